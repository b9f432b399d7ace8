//! Dispense and drain engine.
//!
//! Microliter-accurate transfer of reagent into the reaction vessel and
//! gas-driven drain of the vessel to a chemically-compatible waste.

use tracing::{debug, info, warn};

use crate::prime::PurgeDestination;
use crate::supervisor::{Supervisor, OUTLET_PORT};
use crate::{Result, SupervisorError};

impl Supervisor {
    /// Withdraw `microliters` of `chemical` from its reservoir and
    /// dispense it into the reaction vessel.
    ///
    /// The metered withdraw is short of the request by the
    /// pump-to-vessel dead volume; the closing gas purge pushes that
    /// residual through, so the vessel receives the full amount. Leaves
    /// the vessel sealed, the bypass closed, and the pump line cleared.
    pub fn dispense_to_vessel(&self, microliters: f64, chemical: &str) -> Result<()> {
        let _flowpath = self.flowpath.lock();
        self.check_abort()?;

        // Safety checks:
        {
            let vessel = self.rxn_vessel.lock();
            if microliters + vessel.current_volume_ul() > vessel.max_volume_ul {
                return Err(SupervisorError::OverCapacity {
                    vessel: vessel.name.clone(),
                    requested_ul: microliters + vessel.current_volume_ul(),
                    max_volume_ul: vessel.max_volume_ul,
                });
            }
        }
        // State checks:
        if !self.selector_lds.contains_key(chemical) {
            return Err(SupervisorError::UnknownChemical(chemical.to_string()));
        }
        if !self.prime.lock().ledger.contains_key(chemical) {
            warn!(chemical, "not yet primed. Priming now.");
            self.prime_reservoir_line(chemical, self.config.default_prime_displacement_ul)?;
        }
        let waste_id = self
            .compatible_waste_id(&std::collections::BTreeSet::from([chemical.to_string()]))
            .ok_or_else(|| SupervisorError::NoCompatibleWaste(chemical.to_string()))?;
        self.prime_pump_line(chemical)?;

        info!(microliters, chemical, "Dispensing to vessel.");
        // Vessel in line, compatible waste bypass open for exhaust.
        self.rv_source_valve.energize()?;
        self.rv_exhaust_valve.energize()?;
        self.output_bypass_valves[waste_id].open()?;
        self.selector.move_to_port(chemical)?;

        // The dead volume comes back when the pump-to-vessel flowpath is
        // purged below, so the metered withdraw stops short of it.
        let dead_volume_ul = self.config.pump_to_vessel_dead_volume_ul;
        let metered_ul = microliters - dead_volume_ul;
        self.pump.withdraw(metered_ul, true)?;
        self.selector.move_to_port(OUTLET_PORT)?;
        debug!(metered_ul, "Plunging initial volume.");
        self.pump.move_absolute_percent(0.0, true)?;
        debug!(
            dead_volume_ul,
            "Plunging pump-to-vessel dead volume to clear the line."
        );
        let primed_with = self
            .prime
            .lock()
            .pump_primed_with
            .clone()
            .unwrap_or_else(|| chemical.to_string());
        self.purge_pump_line(&primed_with, PurgeDestination::ReactionVessel, 1, 1)?;

        // Update state:
        {
            let mut vessel = self.rxn_vessel.lock();
            let addition =
                flowwash_job::Solution::from([(chemical.to_string(), microliters)]);
            vessel.add_solution(&addition)?;
        }
        self.prime.lock().pump_primed_with = None;
        // Seal reaction vessel and all other flowpaths.
        self.rv_source_valve.deenergize()?;
        self.rv_exhaust_valve.deenergize()?;
        self.output_bypass_valves[waste_id].close()?;
        debug!(
            microliters,
            "Dispensed into reaction vessel. Prime line is now cleared."
        );
        Ok(())
    }

    /// Force the vessel contents to a compatible waste by gas
    /// displacement.
    ///
    /// Gas is compressible, so the displaced volume trails the pump
    /// movement; `drain_volume_ul` of gas is pushed through regardless of
    /// the nominal liquid volume, with a settle between strokes for
    /// liquid to clear the line.
    pub fn drain_vessel(&self, drain_volume_ul: f64) -> Result<()> {
        let _flowpath = self.flowpath.lock();
        self.check_abort()?;
        self.ensure_syringe_empty()?;

        let (components, contents) = {
            let vessel = self.rxn_vessel.lock();
            (vessel.components(), vessel.solution().clone())
        };
        if contents.is_empty() {
            info!("Draining vessel.");
        } else {
            info!(?contents, "Draining vessel.");
        }
        let waste_id = self
            .compatible_waste_id(&components)
            .ok_or_else(|| {
                SupervisorError::NoCompatibleWaste(
                    components.iter().cloned().collect::<Vec<_>>().join(", "),
                )
            })?;
        debug!(
            waste = %self.waste_vessels.lock()[waste_id].vessel.name,
            "Waste contents will be discarded."
        );

        // Seal the upper exhaust, open the lower drain path and the
        // bypass for the selected waste.
        self.rv_source_valve.energize()?;
        self.rv_exhaust_valve.deenergize()?;
        self.waste_drain_valves[waste_id].open()?;
        self.output_bypass_valves[waste_id].open()?;
        self.pump
            .set_speed_percent(self.config.purge_pump_speed_percent)?;

        let syringe_volume_ul = self.pump.syringe_volume_ul();
        let mut remaining_ul = drain_volume_ul;
        while remaining_ul > 0.0 {
            self.check_abort()?;
            let stroke_ul = remaining_ul.min(syringe_volume_ul);
            let stroke_percent = stroke_ul / syringe_volume_ul * 100.0;
            self.fast_gas_charge_syringe(stroke_percent)?;
            self.selector.move_to_port(OUTLET_PORT)?;
            self.pump.move_absolute_percent(0.0, true)?;
            remaining_ul -= stroke_ul;
            // Wait for liquid to finish moving.
            self.settle();
        }
        self.pump
            .set_speed_percent(self.config.nominal_pump_speed_percent)?;

        // Update state:
        if !contents.is_empty() {
            let overflowed = self.waste_vessels.lock()[waste_id].deposit(&contents);
            if overflowed {
                warn!(
                    waste = %self.waste_vessels.lock()[waste_id].vessel.name,
                    "waste vessel filled beyond its nominal capacity"
                );
            }
        }
        self.rxn_vessel.lock().purge();
        self.rv_source_valve.deenergize()?;
        self.rv_exhaust_valve.deenergize()?;
        self.waste_drain_valves[waste_id].close()?;
        self.output_bypass_valves[waste_id].close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::testutil::{fast_config, sim_instrument, solution};
    use flowwash_hardware::{IsolationValve, SyringePump, ThreeTwoValve};

    #[test]
    fn dispense_updates_vessel_and_clears_pump_prime() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        let supervisor = &instrument.supervisor;

        supervisor.dispense_to_vessel(4_000.0, "pbs").unwrap();

        let vessel = supervisor.reaction_vessel();
        assert_eq!(vessel.solution().get("pbs"), Some(&4_000.0));
        assert!(supervisor.pump_primed_with().is_none());
        assert_eq!(instrument.pump.position_ul().unwrap(), 0.0);
        // Vessel sealed and bypass closed afterward.
        assert!(!instrument.rv_source_valve.is_energized().unwrap());
        assert!(!instrument.rv_exhaust_valve.is_energized().unwrap());
        assert!(!instrument.bypass_valves[0].is_open().unwrap());
    }

    #[test]
    fn dispense_sums_repeated_chemicals() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        let supervisor = &instrument.supervisor;
        supervisor.dispense_to_vessel(2_000.0, "pbs").unwrap();
        supervisor.dispense_to_vessel(3_000.0, "pbs").unwrap();
        assert_eq!(
            supervisor.reaction_vessel().solution().get("pbs"),
            Some(&5_000.0)
        );
    }

    #[test]
    fn dispense_to_exact_capacity_succeeds_one_more_fails() {
        let instrument = sim_instrument(fast_config(), 8_000.0);
        let supervisor = &instrument.supervisor;
        supervisor.dispense_to_vessel(8_000.0, "pbs").unwrap();
        let err = supervisor.dispense_to_vessel(1.0, "pbs").unwrap_err();
        assert!(matches!(err, SupervisorError::OverCapacity { .. }));
        // The failed dispense did not move anything.
        assert_eq!(supervisor.reaction_vessel().current_volume_ul(), 8_000.0);
    }

    #[test]
    fn dispense_unknown_chemical_fails() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        assert!(matches!(
            instrument.supervisor.dispense_to_vessel(100.0, "ipa"),
            Err(SupervisorError::UnknownChemical(_))
        ));
    }

    #[test]
    fn drain_moves_contents_to_compatible_waste() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        let supervisor = &instrument.supervisor;
        supervisor
            .rxn_vessel
            .lock()
            .add_solution(&solution(&[("dcm", 5_000.0)]))
            .unwrap();

        supervisor.drain_vessel(20_000.0).unwrap();

        assert!(supervisor.reaction_vessel().is_empty());
        let wastes = supervisor.waste_vessels();
        // dcm is only compatible with the solvent waste.
        assert_eq!(wastes[1].vessel.solution().get("dcm"), Some(&5_000.0));
        assert_eq!(wastes[0].vessel.current_volume_ul(), 0.0);
        // All valves released.
        assert!(!instrument.drain_valves[1].is_open().unwrap());
        assert!(!instrument.bypass_valves[1].is_open().unwrap());
        assert!(!instrument.rv_source_valve.is_energized().unwrap());
    }

    #[test]
    fn drain_empty_vessel_runs_gas_cycles_and_stays_empty() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        instrument.supervisor.drain_vessel(20_000.0).unwrap();
        assert!(instrument.supervisor.reaction_vessel().is_empty());
        assert_eq!(instrument.pump.position_ul().unwrap(), 0.0);
    }

    #[test]
    fn drain_with_no_compatible_waste_is_fatal() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        let supervisor = &instrument.supervisor;
        // acetone is plumbed but no waste accepts it.
        supervisor
            .rxn_vessel
            .lock()
            .add_solution(&solution(&[("acetone", 1_000.0)]))
            .unwrap();
        assert!(matches!(
            supervisor.drain_vessel(20_000.0),
            Err(SupervisorError::NoCompatibleWaste(_))
        ));
    }
}
