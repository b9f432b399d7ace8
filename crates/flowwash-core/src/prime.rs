//! Prime and purge engine.
//!
//! Stateful routines to fill, flush, and reset each reagent line. A
//! reservoir line is *primed* when liquid has been pulled from its
//! reservoir up to the selector port, so subsequent metered withdrawals
//! deliver chemical rather than gas. The pump line is primed when the
//! selector-to-pump segment is filled. Displaced volumes are recorded in
//! the prime ledger so lines can be unprimed later.

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::supervisor::{Supervisor, AMBIENT_PORT, OUTLET_PORT};
use crate::{Result, SupervisorError};

/// Stop priming when this little budget remains; we can be +/- one pump
/// step (~2.1 uL) per stroke.
const PRIME_REMAINDER_FLOOR_UL: f64 = 5.0;

/// Unprime pushes back the primed volume plus this margin.
const UNPRIME_MARGIN: f64 = 1.05;

/// The pump line primes within a fraction of a stroke once the reservoir
/// line is full.
const PUMP_PRIME_MAX_STROKE_FRACTION: f64 = 1.0 / 3.0;

/// Poll interval while watching a liquid sensor mid-stroke.
const LDS_POLL_PERIOD: Duration = Duration::from_millis(5);

/// Poll interval while watching pressure during a sealed plunge.
const PURGE_PRESSURE_POLL_PERIOD: Duration = Duration::from_millis(50);

/// Where a purge directs the pump line contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeDestination {
    /// Through the energized source/exhaust valves into the vessel.
    ReactionVessel,
    /// Around the vessel, straight to the compatible waste bypass.
    WasteBypass,
}

impl Supervisor {
    /// Fill the chemical's flowpath from its reservoir up to the selector
    /// port.
    ///
    /// Withdraws up to a syringe stroke at a time while polling the
    /// port's liquid sensor, venting displaced gas to a compatible waste
    /// between strokes. Skips with a warning if the line is already
    /// primed. Fails with [`SupervisorError::PrimeFailure`] if the whole
    /// displacement budget is spent without the sensor tripping.
    pub fn prime_reservoir_line(&self, chemical: &str, max_displacement_ul: f64) -> Result<()> {
        let _flowpath = self.flowpath.lock();
        self.check_abort()?;
        self.ensure_syringe_empty()?;

        if self.prime.lock().ledger.contains_key(chemical) {
            warn!(chemical, "reservoir line already primed. Aborting.");
            return Ok(());
        }
        let lds = self
            .selector_lds
            .get(chemical)
            .ok_or_else(|| SupervisorError::UnknownChemical(chemical.to_string()))?;
        if lds.tripped()? {
            warn!(
                chemical,
                "reservoir line detected prematurely as primed. Aborting."
            );
            self.prime.lock().ledger.insert(chemical.to_string(), 0.0);
            return Ok(());
        }
        let components = BTreeSet::from([chemical.to_string()]);
        let waste_id = self
            .compatible_waste_id(&components)
            .ok_or_else(|| SupervisorError::NoCompatibleWaste(chemical.to_string()))?;

        info!(chemical, "Priming reservoir line.");
        debug!("Opening pump path to waste.");
        self.rv_source_valve.deenergize()?;
        self.rv_exhaust_valve.deenergize()?;
        self.output_bypass_valves[waste_id].open()?;

        let syringe_volume_ul = self.pump.syringe_volume_ul();
        let mut remaining_ul = max_displacement_ul;
        let mut liquid_detected = false;
        let result = (|| -> Result<()> {
            while !liquid_detected && remaining_ul > PRIME_REMAINDER_FLOOR_UL {
                if lds.tripped()? {
                    liquid_detected = true;
                    break;
                }
                let stroke_ul = remaining_ul.min(syringe_volume_ul);
                debug!(
                    chemical,
                    stroke_ul, "Polling reservoir sensor while withdrawing."
                );
                self.selector.move_to_port(chemical)?;
                self.pump.withdraw(stroke_ul, false)?;
                while self.pump.is_busy()? {
                    self.check_abort()?;
                    if lds.tripped()? {
                        debug!("Halting pump mid-stroke.");
                        self.pump.halt()?;
                        liquid_detected = true;
                        break;
                    }
                    thread::sleep(LDS_POLL_PERIOD);
                }
                // Subtract off however much volume we actually withdrew.
                remaining_ul -= self.pump.position_ul()?;
                debug!("Removing displaced gas.");
                self.selector.move_to_port(OUTLET_PORT)?;
                self.pump.move_absolute_percent(0.0, true)?;
            }
            // Some pumps ignore tiny end-range moves, so a position near
            // zero needs a true reset rather than a plunge.
            if self.pump.position_ul()? != 0.0 {
                debug!("Post-priming, removing displaced gas.");
                self.selector.move_to_port(OUTLET_PORT)?;
                self.pump.reset_syringe_position()?;
            }
            Ok(())
        })();
        self.output_bypass_valves[waste_id].close()?;
        result?;

        if !liquid_detected {
            return Err(SupervisorError::PrimeFailure {
                chemical: chemical.to_string(),
                displaced_ul: max_displacement_ul,
            });
        }
        let displaced_ul = max_displacement_ul - remaining_ul;
        self.prime
            .lock()
            .ledger
            .insert(chemical.to_string(), displaced_ul);
        info!(chemical, displaced_ul, "Priming complete.");
        Ok(())
    }

    /// Push the reagent line contents back to the reservoir with gas.
    ///
    /// Displaces the ledgered prime volume plus 5%, capped at
    /// `max_displacement_ul`; if the chemical was never primed, the full
    /// `max_displacement_ul` is displaced. Removes the chemical from the
    /// prime ledger.
    pub fn unprime_reservoir_line(&self, chemical: &str, max_displacement_ul: f64) -> Result<()> {
        let _flowpath = self.flowpath.lock();
        self.check_abort()?;
        self.ensure_syringe_empty()?;

        info!(chemical, "Unpriming reservoir line.");
        let ledger_entry_ul = self.prime.lock().ledger.get(chemical).copied();
        if ledger_entry_ul.is_none() {
            warn!(
                chemical,
                max_displacement_ul, "never primed before; unpriming will displace the maximum."
            );
        }
        let unprime_volume_ul = ledger_entry_ul
            .map(|volume_ul| (volume_ul * UNPRIME_MARGIN).min(max_displacement_ul))
            .unwrap_or(max_displacement_ul);

        let syringe_volume_ul = self.pump.syringe_volume_ul();
        let mut remaining_ul = unprime_volume_ul;
        self.pump
            .set_speed_percent(self.config.unprime_pump_speed_percent)?;
        while remaining_ul > 0.0 {
            self.check_abort()?;
            debug!(remaining_ul, "Remaining volume to displace.");
            let stroke_ul = remaining_ul.min(syringe_volume_ul);
            self.fast_gas_charge_syringe(100.0)?;
            self.selector.move_to_port(chemical)?;
            self.pump.move_absolute_percent(0.0, true)?;
            remaining_ul -= stroke_ul;
        }
        {
            let mut prime = self.prime.lock();
            prime.pump_primed_with = None;
            prime.ledger.remove(chemical);
        }
        self.pump
            .set_speed_percent(self.config.nominal_pump_speed_percent)?;
        info!(chemical, "Unpriming complete.");
        Ok(())
    }

    /// Ensure the selector-to-pump segment is filled with `chemical`.
    ///
    /// Idempotent: returns early when the pump line already holds this
    /// chemical. A pump line holding a *different* chemical is a known
    /// hazard: by default it is logged loudly and left alone; with
    /// `strict_prime_checks` it is a [`SupervisorError::PrimeMismatch`].
    pub fn prime_pump_line(&self, chemical: &str) -> Result<()> {
        let _flowpath = self.flowpath.lock();
        self.check_abort()?;
        self.ensure_syringe_empty()?;

        if !self.prime.lock().ledger.contains_key(chemical) {
            self.prime_reservoir_line(chemical, self.config.default_prime_displacement_ul)?;
        }
        if let Some(primed_with) = self.prime.lock().pump_primed_with.clone() {
            if primed_with == chemical {
                return Ok(());
            }
            if self.config.strict_prime_checks {
                return Err(SupervisorError::PrimeMismatch {
                    expected: chemical.to_string(),
                    found: primed_with,
                });
            }
            warn!(primed_with, "Pump line already primed.");
            return Ok(());
        }

        debug!(chemical, "Priming pump line.");
        self.selector.move_to_port(chemical)?;
        debug!(chemical, "Withdrawing from reservoir.");
        self.pump
            .set_speed_percent(self.config.slow_pump_speed_percent)?;
        let max_stroke_ul = self.pump.syringe_volume_ul() * PUMP_PRIME_MAX_STROKE_FRACTION;
        self.pump.withdraw(max_stroke_ul, false)?;
        while self.pump.is_busy()? {
            self.check_abort()?;
            if self.pump_prime_lds.untripped()? {
                thread::sleep(LDS_POLL_PERIOD);
                continue;
            }
            self.pump.halt()?;
            debug!(
                displaced_ul = self.pump.position_ul()?,
                "Pump line priming detected liquid."
            );
            self.pump
                .set_speed_percent(self.config.nominal_pump_speed_percent)?;
            self.prime.lock().pump_primed_with = Some(chemical.to_string());
            return Ok(());
        }
        self.pump
            .set_speed_percent(self.config.nominal_pump_speed_percent)?;
        Err(SupervisorError::PrimeFailure {
            chemical: chemical.to_string(),
            displaced_ul: max_stroke_ul,
        })
    }

    /// Empty the selector-to-pump line by purging its contents to
    /// `destination`.
    ///
    /// `full_cycles` gas charge-and-plunge cycles clear liquid;
    /// `gas_cycles` additionally pressurize the sealed line (selector
    /// closed, plunge watched against `max_purge_pressure_psig`) and
    /// release it to blow away droplets. The pump may enter this function
    /// partially filled; its contents are directed to `destination`
    /// first. Clears the pump-primed state.
    pub fn purge_pump_line(
        &self,
        chemical: &str,
        destination: PurgeDestination,
        full_cycles: u32,
        gas_cycles: u32,
    ) -> Result<()> {
        let _flowpath = self.flowpath.lock();
        self.check_abort()?;

        debug!("Purging pump line.");
        if let Some(primed_with) = self.prime.lock().pump_primed_with.clone() {
            if primed_with != chemical {
                if self.config.strict_prime_checks {
                    return Err(SupervisorError::PrimeMismatch {
                        expected: chemical.to_string(),
                        found: primed_with,
                    });
                }
                warn!(
                    primed_with,
                    purging_as = chemical,
                    "Purging pump line that holds a different chemical."
                );
            }
        }
        let components = BTreeSet::from([chemical.to_string()]);
        let waste_id = self
            .compatible_waste_id(&components)
            .ok_or_else(|| SupervisorError::NoCompatibleWaste(chemical.to_string()))?;

        debug!("Opening pump path to waste.");
        match destination {
            PurgeDestination::ReactionVessel => {
                self.rv_source_valve.energize()?;
                self.rv_exhaust_valve.energize()?;
            }
            PurgeDestination::WasteBypass => {
                self.rv_source_valve.deenergize()?;
                self.rv_exhaust_valve.deenergize()?;
            }
        }
        self.output_bypass_valves[waste_id].open()?;
        self.pump
            .set_speed_percent(self.config.purge_pump_speed_percent)?;

        let result = (|| -> Result<()> {
            // Purge all starting contents of the syringe.
            if self.pump.position_ul()? != 0.0 {
                warn!("Directing existing pump contents to destination.");
                self.selector.move_to_port(OUTLET_PORT)?;
                self.pump.move_absolute_percent(0.0, true)?;
            }
            if full_cycles > 0 {
                debug!("Pulling residual pump line contents into syringe with gas.");
            }
            for _ in 0..full_cycles {
                self.check_abort()?;
                self.fast_gas_charge_syringe(100.0)?;
                debug!("Purging pump line contents to destination.");
                self.selector.move_to_port(OUTLET_PORT)?;
                self.pump.move_absolute_percent(0.0, true)?;
            }
            // PV = nRT: as the sealed volume shrinks, the same plunger
            // displacement builds more pressure, so each squeeze is
            // watched against the purge ceiling and vented.
            for _ in 0..gas_cycles {
                self.check_abort()?;
                self.fast_gas_charge_syringe(100.0)?;
                debug!("Purging pump line contents to destination.");
                self.selector.move_to_port(OUTLET_PORT)?;
                let mut remaining_ul = self.pump.position_ul()?;
                while remaining_ul > self.config.pump_approx_zero_ul {
                    self.check_abort()?;
                    debug!(remaining_ul, "Sealing syringe flowpath.");
                    self.selector.close()?;
                    debug!("Pressurizing syringe volume.");
                    self.pump.move_absolute_percent(0.0, false)?;
                    while self.pump.is_busy()? {
                        if self.monitor.live_psig() > self.config.max_purge_pressure_psig {
                            self.pump.halt()?;
                            break;
                        }
                        thread::sleep(PURGE_PRESSURE_POLL_PERIOD);
                    }
                    remaining_ul = self.pump.position_ul()?;
                    debug!("Releasing pressure to outlet.");
                    self.selector.open()?;
                    self.settle();
                }
            }
            // A position near zero needs a true reset; small end-range
            // moves may be ignored by the pump.
            self.pump.reset_syringe_position()?;
            Ok(())
        })();
        self.output_bypass_valves[waste_id].close()?;
        result?;

        debug!("Purging pump line complete.");
        self.prime.lock().pump_primed_with = None;
        Ok(())
    }

    /// Quickly charge the syringe with gas from the ambient port,
    /// restoring the previous pump speed afterward.
    pub fn fast_gas_charge_syringe(&self, percent: f64) -> Result<()> {
        let _flowpath = self.flowpath.lock();
        debug!(percent, "Fast-charging pump with gas.");
        self.selector.move_to_port(AMBIENT_PORT)?;
        let old_speed_percent = self.pump.speed_percent()?;
        self.pump.set_speed_percent(100.0)?;
        self.pump.move_absolute_percent(percent, true)?;
        self.pump.set_speed_percent(old_speed_percent)?;
        Ok(())
    }

    pub(crate) fn settle(&self) {
        if self.config.settle_time_s > 0.0 {
            thread::sleep(Duration::from_secs_f64(self.config.settle_time_s));
        }
    }
}
