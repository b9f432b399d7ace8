//! Solenoid valve capabilities.

use crate::Result;

/// A normally-closed isolation valve (waste bypass, waste drain).
pub trait IsolationValve: Send + Sync {
    /// Energize the solenoid, opening the valve.
    fn open(&self) -> Result<()>;

    /// De-energize the solenoid, letting the valve spring closed.
    fn close(&self) -> Result<()>;

    fn is_open(&self) -> Result<bool>;
}

/// A 3/2 solenoid valve routing one common port between two legs
/// (reaction-vessel source and exhaust valves).
///
/// De-energized selects the normally-open leg; energized selects the
/// normally-closed leg. The supervisor's safe state is every 3/2 valve
/// de-energized.
pub trait ThreeTwoValve: Send + Sync {
    fn energize(&self) -> Result<()>;

    fn deenergize(&self) -> Result<()>;

    fn is_energized(&self) -> Result<bool>;
}
