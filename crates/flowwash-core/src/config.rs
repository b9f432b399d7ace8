//! Configuration types for the flowwash supervisor.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use flowwash_job::Solution;

/// Tunables the supervisor consumes. Every field has a site default so a
/// config document only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Ceiling above which the pressure monitor halts the instrument.
    pub max_safe_pressure_psig: f64,

    /// Ceiling for the pressure-watched plunge during gas purge cycles.
    pub max_purge_pressure_psig: f64,

    /// Syringe travel compressed during a leak check, in percent.
    pub leak_check_squeeze_percent: f64,

    /// A leak-check segment that cannot build at least this much relative
    /// pressure fails outright.
    pub min_leak_check_starting_pressure_psig: f64,

    /// Maximum permissible relative change in pressure during leak checks.
    pub max_leak_check_pressure_delta_psig: f64,

    /// How long a leak check watches the compressed segment.
    pub leak_check_measurement_time_s: f64,

    /// Averaging window for leak-check pressure readings. Drift polls use
    /// half this window.
    pub leak_check_window_s: f64,

    /// Some pumps do not return exactly 0 after a reset; positions within
    /// this band count as plunged.
    pub pump_approx_zero_ul: f64,

    /// Fixed volume held in the pump-to-vessel path, re-introduced by the
    /// gas purge at the end of a dispense.
    pub pump_to_vessel_dead_volume_ul: f64,

    pub nominal_pump_speed_percent: f64,
    pub slow_pump_speed_percent: f64,
    pub unprime_pump_speed_percent: f64,
    pub purge_pump_speed_percent: f64,

    /// Prime budget when the caller does not specify one.
    pub default_prime_displacement_ul: f64,

    /// Unprime budget when the caller does not specify one.
    pub default_unprime_displacement_ul: f64,

    /// Gas volume pushed through the vessel on a drain when the caller
    /// does not specify one.
    pub default_drain_volume_ul: f64,

    /// Dwell after vented strokes for liquid to clear the line.
    pub settle_time_s: f64,

    /// When true, operating on a pump line primed with a different
    /// chemical is a [`PrimeMismatch`](crate::SupervisorError::PrimeMismatch)
    /// error instead of a logged warning.
    pub strict_prime_checks: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_safe_pressure_psig: 13.0,
            max_purge_pressure_psig: 8.0,
            leak_check_squeeze_percent: 15.0,
            min_leak_check_starting_pressure_psig: 1.0,
            max_leak_check_pressure_delta_psig: 0.10,
            leak_check_measurement_time_s: 4.0,
            leak_check_window_s: 1.0,
            pump_approx_zero_ul: 30.0,
            pump_to_vessel_dead_volume_ul: 10.0,
            nominal_pump_speed_percent: 20.0,
            slow_pump_speed_percent: 10.0,
            unprime_pump_speed_percent: 60.0,
            purge_pump_speed_percent: 100.0,
            default_prime_displacement_ul: 12_500.0,
            default_unprime_displacement_ul: 25_000.0,
            default_drain_volume_ul: 40_000.0,
            settle_time_s: 0.5,
            strict_prime_checks: false,
        }
    }
}

/// A reaction vessel as described by the instrument config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VesselConfig {
    pub name: String,
    pub max_volume_ul: f64,
    /// Contents at startup, if the operator pre-filled the vessel.
    #[serde(default)]
    pub solution: Solution,
}

/// A waste vessel as described by the instrument config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WasteVesselConfig {
    pub name: String,
    pub max_volume_ul: f64,
    pub compatible_chemicals: BTreeSet<String>,
}

/// The full startup document: plumbing maps, vessels, and supervisor
/// tunables (flattened, so limits sit at the document's top level).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Chemical/utility name → physical selector port. Must contain
    /// `ambient` and `outlet`; every other key is a plumbed chemical.
    pub selector_port_map: BTreeMap<String, u8>,

    /// Chemical name → liquid-detection sensor channel for the same
    /// chemicals.
    #[serde(default)]
    pub selector_lds_map: BTreeMap<String, u8>,

    pub reaction_vessel: VesselConfig,

    pub waste_vessels: Vec<WasteVesselConfig>,

    #[serde(flatten)]
    pub supervisor: SupervisorConfig,
}
