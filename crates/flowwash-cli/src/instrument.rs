//! Simulated instrument assembly.
//!
//! Real drivers (serial syringe pumps, VICI selectors, relay-board
//! valves) live out of tree; this binary assembles the supervisor
//! against the simulated devices so protocols can be authored and dry
//! run anywhere.

use std::collections::BTreeMap;
use std::sync::Arc;

use flowwash_core::{Devices, InstrumentConfig, Result, Supervisor};
use flowwash_hardware::sim::{
    SimIsolationValve, SimLiquidSensor, SimMixer, SimPressureSensor, SimSelector, SimSyringePump,
    SimThreeTwoValve,
};
use flowwash_hardware::{IsolationValve, LiquidSensor};
use tracing::info;

/// Syringe volume of the simulated pump, matching the bench instrument.
const SIM_SYRINGE_VOLUME_UL: f64 = 12_500.0;

/// Build a fully simulated supervisor from an instrument config.
pub fn build_simulated(config: &InstrumentConfig) -> Result<Supervisor> {
    info!("Assembling simulated instrument.");
    let selector = SimSelector::new(config.selector_port_map.keys().cloned());

    // Simulated reservoirs always have liquid at the valve.
    let selector_lds: BTreeMap<String, Arc<dyn LiquidSensor>> = config
        .selector_lds_map
        .keys()
        .map(|chemical| {
            (
                chemical.clone(),
                Arc::new(SimLiquidSensor::new(true)) as Arc<dyn LiquidSensor>,
            )
        })
        .collect();

    let waste_count = config.waste_vessels.len();
    let devices = Devices {
        selector: Arc::new(selector),
        pump: Arc::new(SimSyringePump::new(SIM_SYRINGE_VOLUME_UL)),
        mixer: Arc::new(SimMixer::new()),
        pressure_sensor: Arc::new(SimPressureSensor::new(0.0)),
        pump_prime_lds: Arc::new(SimLiquidSensor::new(true)),
        selector_lds,
        rv_source_valve: Arc::new(SimThreeTwoValve::new()),
        rv_exhaust_valve: Arc::new(SimThreeTwoValve::new()),
        output_bypass_valves: (0..waste_count)
            .map(|_| Arc::new(SimIsolationValve::new()) as Arc<dyn IsolationValve>)
            .collect(),
        waste_drain_valves: (0..waste_count)
            .map(|_| Arc::new(SimIsolationValve::new()) as Arc<dyn IsolationValve>)
            .collect(),
    };

    Supervisor::new(
        config.supervisor.clone(),
        devices,
        config.reaction_vessel.clone().into(),
        config
            .waste_vessels
            .iter()
            .cloned()
            .map(Into::into)
            .collect(),
    )
}
