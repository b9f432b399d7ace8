//! Mixer capability.

use crate::Result;

/// A stirrer/shaker agitating the reaction vessel contents.
///
/// The API is rpm everywhere; drivers that speak percent or that only
/// support on/off perform the mapping internally. A fixed-speed mixer
/// returns [`HardwareError::Unsupported`](crate::HardwareError::Unsupported)
/// from [`set_speed_rpm`](Mixer::set_speed_rpm) and callers treat that
/// as "mix at whatever speed you have".
pub trait Mixer: Send + Sync {
    /// Set the mixing speed in rpm.
    fn set_speed_rpm(&self, rpm: f64) -> Result<()>;

    fn start_mixing(&self) -> Result<()>;

    fn stop_mixing(&self) -> Result<()>;
}
