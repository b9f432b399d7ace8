//! Simulated devices.
//!
//! Value implementations of every capability trait, backed by plain
//! shared state. Each sim device is `Clone`: the clone shares state with
//! the original, so a test can hand one handle to the supervisor and keep
//! the other to script sensor readings or inspect valve positions while
//! an operation is in flight.
//!
//! The sim pump models just enough motion for the supervisor's control
//! flow: a commanded move lands immediately, but [`SyringePump::is_busy`]
//! keeps reporting `true` for a configurable number of polls afterward so
//! that sensor-polling withdraw loops actually execute their bodies.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    HardwareError, IsolationValve, LiquidSensor, Mixer, PressureSensor, Result, Selector,
    SyringePump, ThreeTwoValve,
};

/// How many `is_busy` polls a sim pump move stays "in motion" for.
const DEFAULT_BUSY_POLLS: u32 = 2;

#[derive(Debug)]
struct SelectorState {
    current: Option<String>,
    open: bool,
}

/// Simulated closeable rotary selector.
#[derive(Clone)]
pub struct SimSelector {
    ports: Arc<Vec<String>>,
    state: Arc<Mutex<SelectorState>>,
}

impl SimSelector {
    pub fn new<S: Into<String>>(ports: impl IntoIterator<Item = S>) -> Self {
        Self {
            ports: Arc::new(ports.into_iter().map(Into::into).collect()),
            state: Arc::new(Mutex::new(SelectorState {
                current: None,
                open: false,
            })),
        }
    }

    /// Whether the common line is currently open to a port.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

impl Selector for SimSelector {
    fn move_to_port(&self, port: &str) -> Result<()> {
        if !self.ports.iter().any(|p| p == port) {
            return Err(HardwareError::UnknownPort(port.to_string()));
        }
        debug!(port, "sim selector move");
        let mut state = self.state.lock();
        state.current = Some(port.to_string());
        state.open = true;
        Ok(())
    }

    fn open(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.current.is_none() {
            return Err(HardwareError::Io("no port selected to re-open".into()));
        }
        state.open = true;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        debug!("sim selector close");
        self.state.lock().open = false;
        Ok(())
    }

    fn current_port(&self) -> Option<String> {
        self.state.lock().current.clone()
    }

    fn port_names(&self) -> Vec<String> {
        self.ports.as_ref().clone()
    }
}

#[derive(Debug)]
struct PumpState {
    position_ul: f64,
    speed_percent: f64,
    busy_polls_remaining: u32,
}

/// Simulated syringe pump.
#[derive(Clone)]
pub struct SimSyringePump {
    syringe_volume_ul: f64,
    busy_polls: u32,
    state: Arc<Mutex<PumpState>>,
}

impl SimSyringePump {
    pub fn new(syringe_volume_ul: f64) -> Self {
        Self {
            syringe_volume_ul,
            busy_polls: DEFAULT_BUSY_POLLS,
            state: Arc::new(Mutex::new(PumpState {
                position_ul: 0.0,
                speed_percent: 100.0,
                busy_polls_remaining: 0,
            })),
        }
    }

    /// Override how many `is_busy` polls each move reports in-motion.
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }
}

impl SyringePump for SimSyringePump {
    fn reset_syringe_position(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.position_ul = 0.0;
        state.busy_polls_remaining = 0;
        Ok(())
    }

    fn move_absolute_percent(&self, percent: f64, wait: bool) -> Result<()> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(HardwareError::OutOfRange(format!(
                "commanded position {percent}% outside 0-100%"
            )));
        }
        let mut state = self.state.lock();
        state.position_ul = percent / 100.0 * self.syringe_volume_ul;
        state.busy_polls_remaining = if wait { 0 } else { self.busy_polls };
        Ok(())
    }

    fn withdraw(&self, microliters: f64, wait: bool) -> Result<()> {
        let mut state = self.state.lock();
        let target = state.position_ul + microliters;
        if target > self.syringe_volume_ul + 1e-9 {
            return Err(HardwareError::OutOfRange(format!(
                "withdraw of {microliters}[uL] would exceed syringe volume"
            )));
        }
        debug!(microliters, "sim pump withdraw");
        state.position_ul = target;
        state.busy_polls_remaining = if wait { 0 } else { self.busy_polls };
        Ok(())
    }

    fn halt(&self) -> Result<()> {
        self.state.lock().busy_polls_remaining = 0;
        Ok(())
    }

    fn is_busy(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if state.busy_polls_remaining > 0 {
            state.busy_polls_remaining -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn position_ul(&self) -> Result<f64> {
        Ok(self.state.lock().position_ul)
    }

    fn position_percent(&self) -> Result<f64> {
        Ok(self.state.lock().position_ul / self.syringe_volume_ul * 100.0)
    }

    fn set_speed_percent(&self, percent: f64) -> Result<()> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(HardwareError::OutOfRange(format!(
                "commanded speed {percent}% outside 0-100%"
            )));
        }
        self.state.lock().speed_percent = percent;
        Ok(())
    }

    fn speed_percent(&self) -> Result<f64> {
        Ok(self.state.lock().speed_percent)
    }

    fn syringe_volume_ul(&self) -> f64 {
        self.syringe_volume_ul
    }
}

/// Simulated liquid-detection sensor. Tests flip the reading with
/// [`set_tripped`](SimLiquidSensor::set_tripped).
#[derive(Clone)]
pub struct SimLiquidSensor {
    tripped: Arc<AtomicBool>,
}

impl SimLiquidSensor {
    pub fn new(tripped: bool) -> Self {
        Self {
            tripped: Arc::new(AtomicBool::new(tripped)),
        }
    }

    pub fn set_tripped(&self, tripped: bool) {
        self.tripped.store(tripped, Ordering::SeqCst);
    }
}

impl LiquidSensor for SimLiquidSensor {
    fn tripped(&self) -> Result<bool> {
        Ok(self.tripped.load(Ordering::SeqCst))
    }
}

/// Simulated pressure sensor with a test-settable reading.
#[derive(Clone)]
pub struct SimPressureSensor {
    psig_bits: Arc<AtomicU64>,
}

impl SimPressureSensor {
    pub fn new(psig: f64) -> Self {
        Self {
            psig_bits: Arc::new(AtomicU64::new(psig.to_bits())),
        }
    }

    pub fn set_psig(&self, psig: f64) {
        self.psig_bits.store(psig.to_bits(), Ordering::SeqCst);
    }
}

impl PressureSensor for SimPressureSensor {
    fn pressure_psig(&self) -> Result<f64> {
        Ok(f64::from_bits(self.psig_bits.load(Ordering::SeqCst)))
    }
}

/// Simulated normally-closed solenoid valve.
#[derive(Clone)]
pub struct SimIsolationValve {
    open: Arc<AtomicBool>,
}

impl SimIsolationValve {
    pub fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for SimIsolationValve {
    fn default() -> Self {
        Self::new()
    }
}

impl IsolationValve for SimIsolationValve {
    fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> Result<bool> {
        Ok(self.open.load(Ordering::SeqCst))
    }
}

/// Simulated 3/2 solenoid valve.
#[derive(Clone)]
pub struct SimThreeTwoValve {
    energized: Arc<AtomicBool>,
}

impl SimThreeTwoValve {
    pub fn new() -> Self {
        Self {
            energized: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for SimThreeTwoValve {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreeTwoValve for SimThreeTwoValve {
    fn energize(&self) -> Result<()> {
        self.energized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn deenergize(&self) -> Result<()> {
        self.energized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_energized(&self) -> Result<bool> {
        Ok(self.energized.load(Ordering::SeqCst))
    }
}

#[derive(Debug)]
struct MixerState {
    rpm: f64,
    running: bool,
}

/// Simulated mixer. `fixed_speed()` builds a variant whose
/// `set_speed_rpm` reports `Unsupported`, for exercising the executor's
/// warn-and-continue path.
#[derive(Clone)]
pub struct SimMixer {
    speed_control: bool,
    state: Arc<Mutex<MixerState>>,
}

impl SimMixer {
    pub fn new() -> Self {
        Self {
            speed_control: true,
            state: Arc::new(Mutex::new(MixerState {
                rpm: 0.0,
                running: false,
            })),
        }
    }

    /// A mixer without speed control.
    pub fn fixed_speed() -> Self {
        let mut mixer = Self::new();
        mixer.speed_control = false;
        mixer
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn last_rpm(&self) -> f64 {
        self.state.lock().rpm
    }
}

impl Default for SimMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Mixer for SimMixer {
    fn set_speed_rpm(&self, rpm: f64) -> Result<()> {
        if !self.speed_control {
            return Err(HardwareError::Unsupported("mixer speed control"));
        }
        self.state.lock().rpm = rpm;
        Ok(())
    }

    fn start_mixing(&self) -> Result<()> {
        debug!("sim mixer start");
        self.state.lock().running = true;
        Ok(())
    }

    fn stop_mixing(&self) -> Result<()> {
        debug!("sim mixer stop");
        self.state.lock().running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_rejects_unknown_port() {
        let selector = SimSelector::new(["ambient", "outlet", "pbs"]);
        assert!(selector.move_to_port("pbs").is_ok());
        assert!(matches!(
            selector.move_to_port("acetone"),
            Err(HardwareError::UnknownPort(_))
        ));
    }

    #[test]
    fn selector_close_and_reopen() {
        let selector = SimSelector::new(["ambient", "outlet"]);
        selector.move_to_port("outlet").unwrap();
        selector.close().unwrap();
        assert!(!selector.is_open());
        selector.open().unwrap();
        assert!(selector.is_open());
        assert_eq!(selector.current_port().as_deref(), Some("outlet"));
    }

    #[test]
    fn pump_motion_model() {
        let pump = SimSyringePump::new(12_500.0);
        pump.withdraw(5_000.0, false).unwrap();
        assert_eq!(pump.position_ul().unwrap(), 5_000.0);
        // Busy for DEFAULT_BUSY_POLLS polls, then settled.
        assert!(pump.is_busy().unwrap());
        assert!(pump.is_busy().unwrap());
        assert!(!pump.is_busy().unwrap());
        pump.move_absolute_percent(0.0, true).unwrap();
        assert_eq!(pump.position_ul().unwrap(), 0.0);
    }

    #[test]
    fn pump_rejects_over_withdraw() {
        let pump = SimSyringePump::new(1_000.0);
        pump.withdraw(800.0, true).unwrap();
        assert!(matches!(
            pump.withdraw(800.0, true),
            Err(HardwareError::OutOfRange(_))
        ));
    }

    #[test]
    fn pump_halt_clears_busy() {
        let pump = SimSyringePump::new(1_000.0).with_busy_polls(100);
        pump.withdraw(500.0, false).unwrap();
        assert!(pump.is_busy().unwrap());
        pump.halt().unwrap();
        assert!(!pump.is_busy().unwrap());
    }

    #[test]
    fn shared_state_across_clones() {
        let sensor = SimLiquidSensor::new(false);
        let handle = sensor.clone();
        handle.set_tripped(true);
        assert!(sensor.tripped().unwrap());

        let pressure = SimPressureSensor::new(0.0);
        let handle = pressure.clone();
        handle.set_psig(14.0);
        assert_eq!(pressure.pressure_psig().unwrap(), 14.0);
    }

    #[test]
    fn fixed_speed_mixer_reports_unsupported() {
        let mixer = SimMixer::fixed_speed();
        assert!(matches!(
            mixer.set_speed_rpm(500.0),
            Err(HardwareError::Unsupported(_))
        ));
        mixer.start_mixing().unwrap();
        assert!(mixer.is_running());
    }
}
