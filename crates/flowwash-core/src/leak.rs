//! Leak-check suite.
//!
//! Ordered isolation/compression tests over distinct flowpath segments.
//! Each routine isolates a segment with a specific valve configuration,
//! charges it with gas, squeezes the syringe, and watches the pressure
//! hold. The suite runs in order of increasing trapped volume so a
//! failure isolates down to a small number of fittings and seals.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::supervisor::{Supervisor, OUTLET_PORT};
use crate::{Result, SupervisorError};

/// Gas charge used to fill a segment before squeezing, in percent of
/// syringe travel.
const LEAK_CHECK_CHARGE_PERCENT: f64 = 30.0;

impl Supervisor {
    /// Leak check the entire system, finest-grain isolation first.
    pub fn run_leak_checks(&self) -> Result<()> {
        let _flowpath = self.flowpath.lock();
        info!("Running leak checks in order of increasing volume.");
        self.leak_check_syringe_to_selector_common()?;
        self.leak_check_syringe_to_exhaust_normally_open()?;
        self.leak_check_syringe_to_waste_bypass()?;
        self.leak_check_syringe_to_reaction_vessel()?;
        Ok(())
    }

    /// Test for leaks between the syringe pump and the selector's common
    /// position.
    pub fn leak_check_syringe_to_selector_common(&self) -> Result<()> {
        const SEGMENT: &str = "syringe to selector common";
        let _flowpath = self.flowpath.lock();
        self.check_abort()?;
        self.ensure_syringe_empty()?;

        self.fast_gas_charge_syringe(LEAK_CHECK_CHARGE_PERCENT)?;
        debug!("Creating closed volume.");
        self.deenergize_all_valves()?;
        self.selector.close()?;

        let result = self.squeeze_and_measure(SEGMENT);
        self.selector.open()?;
        self.purge_gas_filled_syringe()?;
        if result.is_err() {
            error!("Flowpath between syringe pump and selector common outlet is leaking.");
            return result;
        }
        info!("leak check passed: syringe -><- selector common path.");
        Ok(())
    }

    /// Test for leaks between the syringe pump and the normally-open leg
    /// of the reaction vessel exhaust valve.
    pub fn leak_check_syringe_to_exhaust_normally_open(&self) -> Result<()> {
        const SEGMENT: &str = "syringe to reaction vessel exhaust normally-open leg";
        let _flowpath = self.flowpath.lock();
        self.check_abort()?;
        self.ensure_syringe_empty()?;

        debug!("Creating closed volume.");
        self.deenergize_all_valves()?;
        self.rv_exhaust_valve.energize()?;
        self.fast_gas_charge_syringe(LEAK_CHECK_CHARGE_PERCENT)?;
        self.selector.move_to_port(OUTLET_PORT)?;

        let result = self.squeeze_and_measure(SEGMENT);
        self.purge_gas_filled_syringe()?;
        if result.is_err() {
            error!(
                "Flowpath between syringe pump and normally-open position of \
                 output bypass valve is leaking."
            );
            return result;
        }
        info!("leak check passed: syringe -><- reaction vessel exhaust NO path.");
        Ok(())
    }

    /// Test for leaks between the syringe pump and the closed waste
    /// bypass valves.
    pub fn leak_check_syringe_to_waste_bypass(&self) -> Result<()> {
        const SEGMENT: &str = "syringe to waste bypass";
        let _flowpath = self.flowpath.lock();
        self.check_abort()?;
        self.ensure_syringe_empty()?;

        debug!("Creating closed volume.");
        self.deenergize_all_valves()?;
        self.fast_gas_charge_syringe(LEAK_CHECK_CHARGE_PERCENT)?;
        self.selector.move_to_port(OUTLET_PORT)?;

        let result = self.squeeze_and_measure(SEGMENT);
        self.purge_gas_filled_syringe()?;
        if result.is_err() {
            error!("Flowpath between syringe pump and closed output bypass valve is leaking.");
            return result;
        }
        info!("leak check passed: syringe -><- output bypass path.");
        Ok(())
    }

    /// Test for leaks between the syringe pump and the sealed reaction
    /// vessel. Cleanup additionally depressurizes the vessel to a waste
    /// compatible with its vapors.
    pub fn leak_check_syringe_to_reaction_vessel(&self) -> Result<()> {
        const SEGMENT: &str = "syringe to sealed reaction vessel";
        let _flowpath = self.flowpath.lock();
        self.check_abort()?;
        self.ensure_syringe_empty()?;

        debug!("Creating closed volume.");
        self.deenergize_all_valves()?;
        self.rv_source_valve.energize()?;
        self.fast_gas_charge_syringe(LEAK_CHECK_CHARGE_PERCENT)?;
        self.selector.move_to_port(OUTLET_PORT)?;

        let result = self.squeeze_and_measure(SEGMENT);
        // Cleanup: purge compressed gas everywhere, then depressurize
        // the reaction vessel.
        self.purge_gas_filled_syringe()?;
        debug!("Depressurizing reaction vessel.");
        let vapor_components = self.rxn_vessel.lock().components();
        let waste_id = self
            .compatible_waste_id(&vapor_components)
            .ok_or_else(|| {
                SupervisorError::NoCompatibleWaste(
                    vapor_components.iter().cloned().collect::<Vec<_>>().join(", "),
                )
            })?;
        self.output_bypass_valves[waste_id].open()?;
        self.rv_exhaust_valve.energize()?;
        self.settle();
        self.output_bypass_valves[waste_id].close()?;
        self.rv_exhaust_valve.deenergize()?;
        if result.is_err() {
            error!("Flowpath between syringe pump and sealed reaction vessel is leaking.");
            return result;
        }
        info!("leak check passed: syringe -><- reaction vessel path.");
        Ok(())
    }

    /// Compress the syringe and flag a leak if the pressure cannot be
    /// built or does not hold.
    fn squeeze_and_measure(&self, segment: &'static str) -> Result<()> {
        let squeeze_percent = self.config.leak_check_squeeze_percent;
        let window_s = self.config.leak_check_window_s;

        let position_percent = self.pump.position_percent()?;
        let compressed_position_percent = position_percent - squeeze_percent;
        if compressed_position_percent < 0.0 {
            return Err(SupervisorError::LeakCheck {
                segment,
                reason: "cannot compress pump beyond full travel range".into(),
            });
        }
        let uncompressed_psig = self.average_psig(window_s)?;
        debug!(uncompressed_psig, "Uncompressed pressure.");

        debug!("Squeezing closed volume.");
        self.pump
            .move_absolute_percent(compressed_position_percent, true)?;
        thread::sleep(Duration::from_secs_f64(window_s));
        let compressed_psig = self.average_psig(window_s)?;
        debug!(compressed_psig, "Compressed pressure.");
        if compressed_psig - uncompressed_psig < self.config.min_leak_check_starting_pressure_psig
        {
            return Err(SupervisorError::LeakCheck {
                segment,
                reason: "syringe cannot create a positive relative pressure \
                         within the starting volume"
                    .into(),
            });
        }

        let started = Instant::now();
        let measurement_time = Duration::from_secs_f64(self.config.leak_check_measurement_time_s);
        while started.elapsed() < measurement_time {
            self.check_abort()?;
            let current_psig = self.average_psig(window_s / 2.0)?;
            let delta_psig = (compressed_psig - current_psig).abs();
            debug!(delta_psig, "Pressure delta.");
            if delta_psig > self.config.max_leak_check_pressure_delta_psig {
                return Err(SupervisorError::LeakCheck {
                    segment,
                    reason: format!(
                        "pressure changed by {delta_psig:.3} psig, enough to indicate a leak"
                    ),
                });
            }
        }
        Ok(())
    }

    /// Clear the gas-filled syringe to a waste compatible with the
    /// current vessel vapors.
    fn purge_gas_filled_syringe(&self) -> Result<()> {
        debug!("Purging gas-filled syringe to waste.");
        self.deenergize_all_valves()?;
        let vapor_components = self.rxn_vessel.lock().components();
        let waste_id = self
            .compatible_waste_id(&vapor_components)
            .ok_or_else(|| {
                SupervisorError::NoCompatibleWaste(
                    vapor_components.iter().cloned().collect::<Vec<_>>().join(", "),
                )
            })?;
        self.output_bypass_valves[waste_id].open()?;
        self.pump.move_absolute_percent(0.0, true)?;
        self.output_bypass_valves[waste_id].close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::testutil::{fast_config, sim_instrument};
    use flowwash_hardware::{IsolationValve, SyringePump};

    #[test]
    fn unpressurizable_segment_fails_with_segment_name() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        // Constant 0 psig: the squeeze builds no relative pressure.
        let err = instrument
            .supervisor
            .leak_check_syringe_to_selector_common()
            .unwrap_err();
        match err {
            SupervisorError::LeakCheck { segment, .. } => {
                assert_eq!(segment, "syringe to selector common");
            }
            other => panic!("expected LeakCheck, got {other:?}"),
        }
        // Cleanup ran: selector reopened, syringe purged, bypass closed.
        assert!(instrument.selector.is_open());
        assert_eq!(instrument.pump.position_ul().unwrap(), 0.0);
        assert!(!instrument.bypass_valves[0].is_open().unwrap());
    }

    #[test]
    fn squeeze_refuses_to_exceed_travel() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        // Park the pump below the squeeze distance.
        instrument
            .supervisor
            .fast_gas_charge_syringe(5.0)
            .unwrap();
        let err = instrument
            .supervisor
            .squeeze_and_measure("travel test")
            .unwrap_err();
        assert!(matches!(err, SupervisorError::LeakCheck { .. }));
    }
}
