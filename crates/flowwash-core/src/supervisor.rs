//! Supervisor construction and shared instrument state.
//!
//! The supervisor owns the wetted flowpath: a rotary selector choosing
//! between reagent ports, an ambient/gas port, and an outlet; downstream
//! 3/2 valves routing to the reaction vessel or bypassing it to waste;
//! and a syringe pump drawing from and dispensing through the selector.
//! Every externally-callable operation that reads or writes that
//! hardware acquires the re-entrant flowpath lock; the only path allowed
//! to bypass it is [`halt`](Supervisor::halt).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use flowwash_hardware::{
    IsolationValve, LiquidSensor, Mixer, PressureSensor, Selector, SyringePump, ThreeTwoValve,
};
use flowwash_job::StepOverrides;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::pressure::{AbortFlag, PressureMonitor};
use crate::vessel::{Vessel, WasteVessel};
use crate::{Result, SupervisorError};

/// Selector port names the supervisor requires; every other port is a
/// plumbed chemical.
pub(crate) const AMBIENT_PORT: &str = "ambient";
pub(crate) const OUTLET_PORT: &str = "outlet";

/// The capability-typed device set the supervisor is built from.
///
/// Handles are `Arc`s so the pressure monitor's halt path can reach the
/// pump, valves, and mixer without going through (or waiting on) the
/// supervisor itself.
pub struct Devices {
    pub selector: Arc<dyn Selector>,
    pub pump: Arc<dyn SyringePump>,
    pub mixer: Arc<dyn Mixer>,
    pub pressure_sensor: Arc<dyn PressureSensor>,
    /// Liquid-detection sensor at the pump inlet.
    pub pump_prime_lds: Arc<dyn LiquidSensor>,
    /// Per-chemical liquid-detection sensors at the selector ports. The
    /// key set defines the plumbed chemicals.
    pub selector_lds: BTreeMap<String, Arc<dyn LiquidSensor>>,
    /// 3/2 valve feeding the reaction vessel from the selector outlet.
    pub rv_source_valve: Arc<dyn ThreeTwoValve>,
    /// 3/2 valve on the reaction vessel's upper exhaust port.
    pub rv_exhaust_valve: Arc<dyn ThreeTwoValve>,
    /// Bypass valves routing liquids and vapors around the vessel to
    /// each waste. Order matches the waste vessel order.
    pub output_bypass_valves: Vec<Arc<dyn IsolationValve>>,
    /// Valves gating the vessel's lower drain path to each waste.
    /// Order matches the waste vessel order.
    pub waste_drain_valves: Vec<Arc<dyn IsolationValve>>,
}

/// Lock-free emergency stop: pump halt, all solenoids de-energized,
/// mixer stopped. Never fails; device errors are logged and swallowed
/// because there is nothing better to do with them on this path.
#[derive(Clone)]
pub(crate) struct HaltHandle {
    pump: Arc<dyn SyringePump>,
    mixer: Arc<dyn Mixer>,
    rv_source_valve: Arc<dyn ThreeTwoValve>,
    rv_exhaust_valve: Arc<dyn ThreeTwoValve>,
    output_bypass_valves: Vec<Arc<dyn IsolationValve>>,
    waste_drain_valves: Vec<Arc<dyn IsolationValve>>,
}

impl HaltHandle {
    pub(crate) fn halt(&self) {
        warn!("Halting and disabling all active components.");
        match self.pump.is_busy() {
            Ok(true) => {
                if let Err(err) = self.pump.halt() {
                    error!(%err, "error halting pump");
                }
            }
            Ok(false) => {}
            Err(err) => error!(%err, "error querying pump while halting"),
        }
        self.deenergize_all();
        if let Err(err) = self.mixer.stop_mixing() {
            error!(%err, "error stopping mixer");
        }
    }

    pub(crate) fn deenergize_all(&self) {
        debug!("De-energizing all solenoid valves.");
        if let Err(err) = self.rv_source_valve.deenergize() {
            error!(%err, "error de-energizing reaction vessel source valve");
        }
        if let Err(err) = self.rv_exhaust_valve.deenergize() {
            error!(%err, "error de-energizing reaction vessel exhaust valve");
        }
        for valve in self
            .output_bypass_valves
            .iter()
            .chain(self.waste_drain_valves.iter())
        {
            if let Err(err) = valve.close() {
                error!(%err, "error closing waste valve");
            }
        }
    }
}

/// Prime bookkeeping, written only under the flowpath lock.
#[derive(Debug, Default)]
pub(crate) struct PrimeState {
    /// Chemical → volume displaced to prime its reservoir line. A
    /// chemical is present iff its line is primed.
    pub ledger: BTreeMap<String, f64>,
    /// Chemical currently filling the selector-to-pump segment.
    pub pump_primed_with: Option<String>,
}

/// The instrument supervisor.
///
/// Owns the reaction and waste vessels, the prime ledger, the flowpath
/// lock, and the pressure monitor. Construction starts the monitor; it
/// samples for the supervisor's whole lifetime and cannot be disabled
/// while a foreground operation runs.
///
/// Functions are written to work whether an "empty" reaction vessel is
/// installed (for cleaning) or a normal reaction vessel with a specimen.
pub struct Supervisor {
    pub(crate) config: SupervisorConfig,
    pub(crate) selector: Arc<dyn Selector>,
    pub(crate) pump: Arc<dyn SyringePump>,
    pub(crate) mixer: Arc<dyn Mixer>,
    pub(crate) pump_prime_lds: Arc<dyn LiquidSensor>,
    pub(crate) selector_lds: BTreeMap<String, Arc<dyn LiquidSensor>>,
    pub(crate) rv_source_valve: Arc<dyn ThreeTwoValve>,
    pub(crate) rv_exhaust_valve: Arc<dyn ThreeTwoValve>,
    pub(crate) output_bypass_valves: Vec<Arc<dyn IsolationValve>>,
    pub(crate) waste_drain_valves: Vec<Arc<dyn IsolationValve>>,

    pub(crate) rxn_vessel: Mutex<Vessel>,
    pub(crate) waste_vessels: Mutex<Vec<WasteVessel>>,
    pub(crate) prime: Mutex<PrimeState>,

    /// Thread-safe exclusion for everything that touches the flowpath.
    pub(crate) flowpath: ReentrantMutex<()>,

    pub(crate) monitor: PressureMonitor,
    pub(crate) abort: AbortFlag,
    halt: HaltHandle,

    // Job control
    pub(crate) pause_requested: AtomicBool,
    pub(crate) job_running: AtomicBool,
    pub(crate) resume_overrides: Mutex<StepOverrides>,
    pub(crate) worker: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Supervisor {
    /// Build a supervisor and start its pressure monitor.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Config`] when the device set is
    /// inconsistent: LDS bindings for unplumbed ports, missing
    /// `ambient`/`outlet` ports, or waste valve lists that do not match
    /// the waste vessel count.
    pub fn new(
        config: SupervisorConfig,
        devices: Devices,
        reaction_vessel: Vessel,
        waste_vessels: Vec<WasteVessel>,
    ) -> Result<Self> {
        let port_names: BTreeSet<String> = devices.selector.port_names().into_iter().collect();
        for required in [AMBIENT_PORT, OUTLET_PORT] {
            if !port_names.contains(required) {
                return Err(SupervisorError::Config(format!(
                    "selector port map must include a '{required}' port"
                )));
            }
        }
        for chemical in devices.selector_lds.keys() {
            if !port_names.contains(chemical) {
                return Err(SupervisorError::Config(format!(
                    "liquid sensor bound to '{chemical}', which is not a selector port"
                )));
            }
        }
        if devices.output_bypass_valves.len() != waste_vessels.len()
            || devices.waste_drain_valves.len() != waste_vessels.len()
        {
            return Err(SupervisorError::Config(format!(
                "waste valve counts (bypass {}, drain {}) must match the {} waste vessels",
                devices.output_bypass_valves.len(),
                devices.waste_drain_valves.len(),
                waste_vessels.len()
            )));
        }

        let halt = HaltHandle {
            pump: Arc::clone(&devices.pump),
            mixer: Arc::clone(&devices.mixer),
            rv_source_valve: Arc::clone(&devices.rv_source_valve),
            rv_exhaust_valve: Arc::clone(&devices.rv_exhaust_valve),
            output_bypass_valves: devices.output_bypass_valves.clone(),
            waste_drain_valves: devices.waste_drain_valves.clone(),
        };
        let abort = AbortFlag::default();
        let monitor = PressureMonitor::start(
            Arc::clone(&devices.pressure_sensor),
            config.max_safe_pressure_psig,
            halt.clone(),
            abort.clone(),
        )
        .map_err(|err| SupervisorError::Internal(format!("spawning pressure monitor: {err}")))?;

        info!(
            plumbed = devices.selector_lds.len(),
            wastes = waste_vessels.len(),
            "supervisor initialized; pressure monitor running"
        );

        Ok(Self {
            config,
            selector: devices.selector,
            pump: devices.pump,
            mixer: devices.mixer,
            pump_prime_lds: devices.pump_prime_lds,
            selector_lds: devices.selector_lds,
            rv_source_valve: devices.rv_source_valve,
            rv_exhaust_valve: devices.rv_exhaust_valve,
            output_bypass_valves: devices.output_bypass_valves,
            waste_drain_valves: devices.waste_drain_valves,
            rxn_vessel: Mutex::new(reaction_vessel),
            waste_vessels: Mutex::new(waste_vessels),
            prime: Mutex::new(PrimeState::default()),
            flowpath: ReentrantMutex::new(()),
            monitor,
            abort,
            halt,
            pause_requested: AtomicBool::new(false),
            job_running: AtomicBool::new(false),
            resume_overrides: Mutex::new(StepOverrides::default()),
            worker: Mutex::new(None),
        })
    }

    /// Chemicals the instrument is currently plumbed with.
    pub fn plumbed_chemicals(&self) -> BTreeSet<String> {
        self.selector_lds.keys().cloned().collect()
    }

    /// Snapshot of the reaction vessel.
    pub fn reaction_vessel(&self) -> Vessel {
        self.rxn_vessel.lock().clone()
    }

    /// Snapshot of the waste vessels.
    pub fn waste_vessels(&self) -> Vec<WasteVessel> {
        self.waste_vessels.lock().clone()
    }

    /// Volumes displaced to prime each reservoir line.
    pub fn prime_ledger(&self) -> BTreeMap<String, f64> {
        self.prime.lock().ledger.clone()
    }

    /// Chemical currently filling the selector-to-pump segment.
    pub fn pump_primed_with(&self) -> Option<String> {
        self.prime.lock().pump_primed_with.clone()
    }

    /// Live pressure reading from the monitor.
    pub fn pressure_psig(&self) -> f64 {
        self.monitor.live_psig()
    }

    /// Mean pressure over a sample window. The only pressure API the
    /// leak-check routines use.
    pub fn average_psig(&self, duration_s: f64) -> Result<f64> {
        self.monitor.average_psig(duration_s)
    }

    /// The pressure that tripped the monitor, if the instrument was
    /// halted by an over-pressure abort.
    pub fn pressure_fault(&self) -> Option<f64> {
        self.abort.trip_pressure_psig()
    }

    /// Emergency stop. Deliberately does not take the flowpath lock: a
    /// foreground operation may be blocked mid-I/O holding it.
    pub fn halt(&self) {
        self.halt.halt();
    }

    /// De-energize every solenoid valve, sealing the reaction vessel and
    /// closing all waste paths.
    pub fn deenergize_all_valves(&self) -> Result<()> {
        let _flowpath = self.flowpath.lock();
        debug!("De-energizing all solenoid valves.");
        self.rv_source_valve.deenergize()?;
        self.rv_exhaust_valve.deenergize()?;
        for valve in self
            .output_bypass_valves
            .iter()
            .chain(self.waste_drain_valves.iter())
        {
            valve.close()?;
        }
        Ok(())
    }

    /// Initialize all hardware while ensuring the system can bleed any
    /// pressure pockets created to waste. Clears a latched abort: this is
    /// the operator's explicit acknowledgement of a halt.
    pub fn reset(&self) -> Result<()> {
        let _flowpath = self.flowpath.lock();
        info!("Resetting instrument.");
        self.abort.clear();
        self.mixer.stop_mixing()?;
        self.deenergize_all_valves()?;
        let result = (|| {
            // Connect pump -> waste. The pump contents are unknown at
            // this point, so this goes to the first waste vessel.
            debug!("Connecting pump to waste.");
            error!("Dumping unknown pump contents to unknown waste.");
            self.output_bypass_valves[0].open()?;
            self.selector.move_to_port(OUTLET_PORT)?;
            self.pump.reset_syringe_position()?;
            self.pump
                .set_speed_percent(self.config.nominal_pump_speed_percent)?;
            Ok(())
        })();
        self.deenergize_all_valves()?;
        result
    }

    /// Update the specified waste vessel volume to empty (the operator
    /// swapped or drained the carboy).
    pub fn reset_waste_vessel(&self, index: usize) {
        self.waste_vessels.lock()[index].vessel.purge();
    }

    /// Given a solution's components, pick a chemically-compatible waste
    /// vessel.
    ///
    /// No components: any vessel is compatible, return the least-full.
    /// None compatible: `None` — the caller decides whether that is
    /// fatal. Otherwise the least-full compatible vessel, ties broken by
    /// lower index.
    pub fn compatible_waste_id(&self, components: &BTreeSet<String>) -> Option<usize> {
        let wastes = self.waste_vessels.lock();
        if components.is_empty() {
            warn!("Reaction vessel is empty. Any waste vessel is compatible.");
            return least_full(&wastes, |_| true);
        }
        let choice = least_full(&wastes, |waste| waste.compatible_with(components));
        if choice.is_none() {
            error!(?components, "No compatible waste found.");
        }
        choice
    }

    pub(crate) fn check_abort(&self) -> Result<()> {
        self.abort.check()
    }

    /// Precondition for operations that meter volume: the syringe must
    /// start near its reset position.
    pub(crate) fn ensure_syringe_empty(&self) -> Result<()> {
        debug!("Ensuring syringe is empty.");
        let position_ul = self.pump.position_ul()?;
        if position_ul.abs() > self.config.pump_approx_zero_ul {
            error!(
                position_ul,
                "pump is not starting from its reset position and contains liquid or gas"
            );
            return Err(SupervisorError::PumpNotEmpty { position_ul });
        }
        Ok(())
    }
}

fn least_full(wastes: &[WasteVessel], mut keep: impl FnMut(&WasteVessel) -> bool) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, waste) in wastes.iter().enumerate() {
        if !keep(waste) {
            continue;
        }
        let volume = waste.vessel.current_volume_ul();
        match best {
            // Strictly-less keeps ties on the lower index.
            Some((_, best_volume)) if volume >= best_volume => {}
            _ => best = Some((index, volume)),
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use flowwash_hardware::sim::{
        SimIsolationValve, SimLiquidSensor, SimMixer, SimPressureSensor, SimSelector,
        SimSyringePump, SimThreeTwoValve,
    };
    use flowwash_job::Solution;

    /// A fully simulated instrument with handles kept for scripting and
    /// inspection from tests.
    pub(crate) struct SimInstrument {
        pub supervisor: Supervisor,
        pub pump: SimSyringePump,
        pub mixer: SimMixer,
        pub pressure: SimPressureSensor,
        pub selector: SimSelector,
        pub lds: BTreeMap<String, SimLiquidSensor>,
        pub pump_prime_lds: SimLiquidSensor,
        pub bypass_valves: Vec<SimIsolationValve>,
        pub drain_valves: Vec<SimIsolationValve>,
        pub rv_source_valve: SimThreeTwoValve,
        pub rv_exhaust_valve: SimThreeTwoValve,
    }

    pub(crate) fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            settle_time_s: 0.0,
            leak_check_measurement_time_s: 0.2,
            leak_check_window_s: 0.05,
            ..SupervisorConfig::default()
        }
    }

    /// Two-waste instrument: waste 0 takes aqueous chemistry, waste 1
    /// takes solvents.
    pub(crate) fn sim_instrument(config: SupervisorConfig, rxn_max_ul: f64) -> SimInstrument {
        let chemicals = ["pbs", "di_water", "thf", "dcm", "acetone"];
        let mut ports = vec!["ambient".to_string(), "outlet".to_string()];
        ports.extend(chemicals.iter().map(|c| c.to_string()));

        let selector = SimSelector::new(ports);
        let pump = SimSyringePump::new(12_500.0);
        let mixer = SimMixer::new();
        let pressure = SimPressureSensor::new(0.0);
        let pump_prime_lds = SimLiquidSensor::new(true);
        let lds: BTreeMap<String, SimLiquidSensor> = chemicals
            .iter()
            .map(|c| (c.to_string(), SimLiquidSensor::new(true)))
            .collect();
        let bypass_valves = vec![SimIsolationValve::new(), SimIsolationValve::new()];
        let drain_valves = vec![SimIsolationValve::new(), SimIsolationValve::new()];
        let rv_source_valve = SimThreeTwoValve::new();
        let rv_exhaust_valve = SimThreeTwoValve::new();

        let devices = Devices {
            selector: Arc::new(selector.clone()),
            pump: Arc::new(pump.clone()),
            mixer: Arc::new(mixer.clone()),
            pressure_sensor: Arc::new(pressure.clone()),
            pump_prime_lds: Arc::new(pump_prime_lds.clone()),
            selector_lds: lds
                .iter()
                .map(|(name, sensor)| {
                    (name.clone(), Arc::new(sensor.clone()) as Arc<dyn LiquidSensor>)
                })
                .collect(),
            rv_source_valve: Arc::new(rv_source_valve.clone()),
            rv_exhaust_valve: Arc::new(rv_exhaust_valve.clone()),
            output_bypass_valves: bypass_valves
                .iter()
                .map(|v| Arc::new(v.clone()) as Arc<dyn IsolationValve>)
                .collect(),
            waste_drain_valves: drain_valves
                .iter()
                .map(|v| Arc::new(v.clone()) as Arc<dyn IsolationValve>)
                .collect(),
        };

        let supervisor = Supervisor::new(
            config,
            devices,
            Vessel::new("reaction_vessel", rxn_max_ul),
            vec![
                WasteVessel::new("aqueous_waste", 100_000.0, ["pbs", "di_water", "thf"]),
                WasteVessel::new("solvent_waste", 100_000.0, ["dcm", "thf", "di_water"]),
            ],
        )
        .expect("sim instrument construction");

        SimInstrument {
            supervisor,
            pump,
            mixer,
            pressure,
            selector,
            lds,
            pump_prime_lds,
            bypass_valves,
            drain_valves,
            rv_source_valve,
            rv_exhaust_valve,
        }
    }

    pub(crate) fn solution(entries: &[(&str, f64)]) -> Solution {
        entries
            .iter()
            .map(|(name, ul)| (name.to_string(), *ul))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{fast_config, sim_instrument};
    use super::*;

    #[test]
    fn construction_requires_ambient_and_outlet() {
        use flowwash_hardware::sim::*;
        let selector = SimSelector::new(["outlet", "pbs"]);
        let devices = Devices {
            selector: Arc::new(selector),
            pump: Arc::new(SimSyringePump::new(12_500.0)),
            mixer: Arc::new(SimMixer::new()),
            pressure_sensor: Arc::new(SimPressureSensor::new(0.0)),
            pump_prime_lds: Arc::new(SimLiquidSensor::new(false)),
            selector_lds: BTreeMap::new(),
            rv_source_valve: Arc::new(SimThreeTwoValve::new()),
            rv_exhaust_valve: Arc::new(SimThreeTwoValve::new()),
            output_bypass_valves: vec![],
            waste_drain_valves: vec![],
        };
        let result = Supervisor::new(
            SupervisorConfig::default(),
            devices,
            Vessel::new("rv", 8_000.0),
            vec![],
        );
        assert!(matches!(result, Err(SupervisorError::Config(_))));
    }

    #[test]
    fn waste_router_prefers_compatible_vessel() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        let supervisor = &instrument.supervisor;

        let aqueous = BTreeSet::from(["thf".to_string(), "di_water".to_string()]);
        assert_eq!(supervisor.compatible_waste_id(&aqueous), Some(0));

        let solvent = BTreeSet::from(["dcm".to_string()]);
        assert_eq!(supervisor.compatible_waste_id(&solvent), Some(1));

        let unknown = BTreeSet::from(["peanut_butter".to_string()]);
        assert_eq!(supervisor.compatible_waste_id(&unknown), None);
    }

    #[test]
    fn waste_router_empty_components_returns_least_full() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        let supervisor = &instrument.supervisor;

        // Equally full: lower index wins.
        assert_eq!(supervisor.compatible_waste_id(&BTreeSet::new()), Some(0));

        // Fill waste 0; the empty one wins.
        supervisor.waste_vessels.lock()[0]
            .deposit(&testutil::solution(&[("pbs", 5_000.0)]));
        assert_eq!(supervisor.compatible_waste_id(&BTreeSet::new()), Some(1));

        // The operator swaps the carboy; waste 0 is empty again.
        supervisor.reset_waste_vessel(0);
        assert_eq!(supervisor.compatible_waste_id(&BTreeSet::new()), Some(0));
    }

    #[test]
    fn waste_router_multi_compatible_returns_least_full() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        let supervisor = &instrument.supervisor;

        // di_water is accepted by both wastes.
        let components = BTreeSet::from(["di_water".to_string()]);
        assert_eq!(supervisor.compatible_waste_id(&components), Some(0));

        supervisor.waste_vessels.lock()[0]
            .deposit(&testutil::solution(&[("di_water", 2_000.0)]));
        assert_eq!(supervisor.compatible_waste_id(&components), Some(1));
    }

    #[test]
    fn halt_stops_mixer_and_closes_valves() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        instrument.mixer.start_mixing().unwrap();
        instrument.bypass_valves[0].open().unwrap();
        instrument.rv_source_valve.energize().unwrap();

        instrument.supervisor.halt();

        assert!(!instrument.mixer.is_running());
        assert!(!instrument.bypass_valves[0].is_open().unwrap());
        assert!(!instrument.rv_source_valve.is_energized().unwrap());
    }

    #[test]
    fn ensure_syringe_empty_enforces_reset_band() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        let supervisor = &instrument.supervisor;

        assert!(supervisor.ensure_syringe_empty().is_ok());

        // Within the approximate-zero band still counts as plunged.
        instrument.pump.withdraw(25.0, true).unwrap();
        assert!(supervisor.ensure_syringe_empty().is_ok());

        instrument.pump.withdraw(500.0, true).unwrap();
        assert!(matches!(
            supervisor.ensure_syringe_empty(),
            Err(SupervisorError::PumpNotEmpty { .. })
        ));
    }

    #[test]
    fn reset_homes_pump_and_seals_valves() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        instrument.pump.withdraw(4_000.0, true).unwrap();

        instrument.supervisor.reset().unwrap();

        assert_eq!(instrument.pump.position_ul().unwrap(), 0.0);
        assert!(!instrument.bypass_valves[0].is_open().unwrap());
        assert!(!instrument.rv_source_valve.is_energized().unwrap());
    }
}
