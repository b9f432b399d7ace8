//! Binary liquid-detection and pressure sensor capabilities.

use crate::Result;

/// A boolean optical/bubble sensor reporting whether liquid is present
/// at a node in the flowpath (one per reagent port, one at the pump
/// inlet).
pub trait LiquidSensor: Send + Sync {
    /// True when liquid has reached the sensor.
    fn tripped(&self) -> Result<bool>;

    /// Convenience inverse of [`tripped`](LiquidSensor::tripped).
    fn untripped(&self) -> Result<bool> {
        Ok(!self.tripped()?)
    }
}

/// A gauge pressure sensor on the pump common line.
pub trait PressureSensor: Send + Sync {
    /// Current gauge pressure in psig.
    fn pressure_psig(&self) -> Result<f64>;
}
