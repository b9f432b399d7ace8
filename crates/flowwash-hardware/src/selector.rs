//! Closeable rotary selector valve capability.

use crate::Result;

/// A rotary shear valve routing a common line to one of many named ports
/// (reagents, `ambient` air, `outlet` to the downstream valve block).
///
/// A *closeable* selector can additionally seal the common line entirely
/// by parking at an interstitial position between two ports; [`close`]
/// seals and [`open`] returns to the last selected port. Drivers for
/// selectors that cannot seal should return
/// [`HardwareError::Unsupported`](crate::HardwareError::Unsupported)
/// from both.
///
/// [`close`]: Selector::close
/// [`open`]: Selector::open
pub trait Selector: Send + Sync {
    /// Move the common line to the named port.
    fn move_to_port(&self, port: &str) -> Result<()>;

    /// Re-open the last selected port after a [`close`](Selector::close).
    fn open(&self) -> Result<()>;

    /// Seal the common line at an interstitial position.
    fn close(&self) -> Result<()>;

    /// The port currently in line, if known. `None` after power-up before
    /// the first move.
    fn current_port(&self) -> Option<String>;

    /// All named ports in the selector's port map.
    fn port_names(&self) -> Vec<String>;
}
