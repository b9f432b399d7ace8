//! Wash step executor.
//!
//! Composes drain → fill → mix (possibly intermittent) → optional drain
//! into one wash cycle, honoring pause requests mid-interval.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use flowwash_hardware::HardwareError;
use flowwash_job::{Solution, WashStep};
use tracing::{info, warn};

use crate::supervisor::Supervisor;
use crate::{Result, SupervisorError};

/// Granularity of the pause-polling sleep inside the timed loop.
const PAUSE_POLL_PERIOD: Duration = Duration::from_millis(10);

impl Supervisor {
    /// Run one wash cycle: drain (optional), fill with the step's
    /// solution, mix for the step's duration, drain (optional).
    ///
    /// Zero values compose: no chemicals with `start_empty = false` is a
    /// pure mixing step, zero mix speed is a passive exposure, zero
    /// duration is a pure fill.
    ///
    /// During a job, a pause request is observed at the next poll (or
    /// intermittent on/off boundary); the remaining duration is published
    /// as a step override for the job runner to persist, the mixer is
    /// stopped, and the step returns early.
    pub fn run_wash_step(&self, step: &WashStep, start_empty: bool, end_empty: bool) -> Result<()> {
        let _flowpath = self.flowpath.lock();
        self.check_abort()?;

        // Intermittent mixing engages only when both times are present
        // and positive.
        let intermittent = match (
            step.intermittent_mixing_on_time_s,
            step.intermittent_mixing_off_time_s,
        ) {
            (Some(on_s), Some(off_s)) if on_s > 0.0 && off_s > 0.0 => Some((on_s, off_s)),
            _ => None,
        };

        // Validate chemicals.
        let plumbed = self.plumbed_chemicals();
        let unrecognized: Vec<String> = step
            .components()
            .difference(&plumbed)
            .cloned()
            .collect();
        if !unrecognized.is_empty() {
            return Err(SupervisorError::UnknownChemical(unrecognized.join(", ")));
        }

        if start_empty {
            self.drain_vessel(self.config.default_drain_volume_ul)?;
        }

        // Fill.
        if !step.solution.is_empty() {
            info!(solution = ?step.solution, "Filling vessel.");
        }
        for (chemical, microliters) in &step.solution {
            self.dispense_to_vessel(*microliters, chemical)?;
        }

        let mix_speed_rpm = step.mix_speed_rpm;
        if mix_speed_rpm > 0.0 {
            match self.mixer.set_speed_rpm(mix_speed_rpm) {
                Err(HardwareError::Unsupported(_)) => {
                    warn!("Mixer does not support speed control. Skipping speed setting.");
                }
                Err(err) => return Err(err.into()),
                Ok(()) => {}
            }
        }
        if mix_speed_rpm > 0.0 && step.duration_s > 0.0 {
            match intermittent {
                Some((on_s, off_s)) => info!(
                    duration_s = step.duration_s,
                    mix_speed_rpm, on_s, off_s, "Mixing with intermittent strategy."
                ),
                None => info!(duration_s = step.duration_s, mix_speed_rpm, "Mixing."),
            }
        } else if step.duration_s > 0.0 {
            info!(duration_s = step.duration_s, "Idling.");
        }

        let started = Instant::now();
        if mix_speed_rpm > 0.0 {
            self.mixer.start_mixing()?;
        }
        let duration = Duration::from_secs_f64(step.duration_s);
        while started.elapsed() < duration {
            self.check_abort()?;
            // Handle a pause request if called in a job context.
            if self.job_running.load(Ordering::SeqCst)
                && self.pause_requested.load(Ordering::SeqCst)
            {
                let elapsed_s = started.elapsed().as_secs_f64();
                let action = if mix_speed_rpm > 0.0 { "mixing" } else { "idling" };
                warn!(elapsed_s, "Aborting {action} early for pause.");
                self.resume_overrides.lock().duration_s =
                    Some((step.duration_s - elapsed_s).max(0.0));
                if mix_speed_rpm > 0.0 {
                    self.mixer.stop_mixing()?;
                }
                return Ok(());
            }
            match intermittent {
                None => thread::sleep(PAUSE_POLL_PERIOD),
                Some((on_s, off_s)) => {
                    thread::sleep(Duration::from_secs_f64(on_s));
                    self.mixer.stop_mixing()?;
                    thread::sleep(Duration::from_secs_f64(off_s));
                    self.mixer.start_mixing()?;
                }
            }
        }
        if mix_speed_rpm > 0.0 {
            self.mixer.stop_mixing()?;
        }

        if end_empty {
            self.drain_vessel(self.config.default_drain_volume_ul)?;
        }
        Ok(())
    }

    /// Pure mixing step: no fill, no drain.
    pub fn mix(
        &self,
        duration_s: f64,
        mix_speed_rpm: f64,
        intermittent_mixing_on_time_s: Option<f64>,
        intermittent_mixing_off_time_s: Option<f64>,
    ) -> Result<()> {
        let step = WashStep {
            intermittent_mixing_on_time_s,
            intermittent_mixing_off_time_s,
            mix_speed_rpm,
            duration_s,
            solution: Solution::new(),
        };
        self.run_wash_step(&step, false, false)
    }

    /// Pure fill step: dispense a solution with no mixing.
    pub fn fill(&self, solution: &Solution, empty_first: bool) -> Result<()> {
        let step = WashStep {
            intermittent_mixing_on_time_s: None,
            intermittent_mixing_off_time_s: None,
            mix_speed_rpm: 0.0,
            duration_s: 0.0,
            solution: solution.clone(),
        };
        self.run_wash_step(&step, empty_first, false)
    }
}
