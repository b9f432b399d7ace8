//! # Flowwash Hardware
//!
//! Capability traits for every leaf device on the fluidics instrument,
//! plus simulated implementations of each.
//!
//! The supervisor is polymorphic over capability sets, not device class
//! chains: each trait names exactly the operations the supervisor needs
//! and nothing a concrete driver happens to expose. Real drivers (serial
//! syringe pumps, rotary selector valves, relay boards) live out of tree
//! and implement these traits; the in-tree [`sim`] module provides value
//! implementations backed by plain shared state so that every control
//! path can be exercised without an instrument on the bench.
//!
//! ## Concurrency contract
//!
//! All trait methods take `&self` and all traits require `Send + Sync`.
//! Drivers own their interior mutability (typically a mutex around a
//! serial port). This is load-bearing: the pressure monitor's halt path
//! must be able to call [`SyringePump::halt`], de-energize valves, and
//! stop the mixer *while* a foreground operation is blocked mid-I/O on
//! the same devices.

mod error;
mod mixer;
mod pump;
mod selector;
mod sensor;
pub mod sim;
mod valve;

pub use error::{HardwareError, Result};
pub use mixer::Mixer;
pub use pump::SyringePump;
pub use selector::Selector;
pub use sensor::{LiquidSensor, PressureSensor};
pub use valve::{IsolationValve, ThreeTwoValve};
