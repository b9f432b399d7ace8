//! Syringe pump capability.

use crate::Result;

/// A syringe pump drawing from and dispensing through the selector
/// common line.
///
/// Position convention: 0 µL is fully plunged; positive positions are
/// volume held in the syringe. `wait = false` starts the move and
/// returns immediately so the caller can poll [`is_busy`] while watching
/// a sensor, then [`halt`] mid-stroke.
///
/// [`is_busy`]: SyringePump::is_busy
/// [`halt`]: SyringePump::halt
pub trait SyringePump: Send + Sync {
    /// Home the plunger to a true zero. Some pumps ignore tiny end-range
    /// moves, so this is the only reliable way to clear a near-zero
    /// residual position.
    fn reset_syringe_position(&self) -> Result<()>;

    /// Move the plunger to an absolute position in percent of full travel.
    fn move_absolute_percent(&self, percent: f64, wait: bool) -> Result<()>;

    /// Draw the given volume into the syringe.
    fn withdraw(&self, microliters: f64, wait: bool) -> Result<()>;

    /// Stop the plunger where it is.
    fn halt(&self) -> Result<()>;

    /// Whether a commanded move is still in progress.
    fn is_busy(&self) -> Result<bool>;

    /// Current plunger position in microliters withdrawn.
    fn position_ul(&self) -> Result<f64>;

    /// Current plunger position in percent of full travel.
    fn position_percent(&self) -> Result<f64>;

    /// Set the plunger speed in percent of the pump's maximum.
    fn set_speed_percent(&self, percent: f64) -> Result<()>;

    /// Current plunger speed in percent of the pump's maximum.
    fn speed_percent(&self) -> Result<f64>;

    /// Total syringe volume in microliters (one full stroke).
    fn syringe_volume_ul(&self) -> f64;
}
