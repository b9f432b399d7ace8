//! Job runner.
//!
//! Validates, executes, pauses, resumes, and durably persists a
//! sequenced protocol. The job runs on a worker thread so the flowpath
//! lock covers the entire run while the calling thread stays free for
//! pause signals. The worker is the only context that writes the job
//! file; after every step boundary or pause the on-disk document either
//! says the job is finished or says exactly where to resume.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use flowwash_job::{store, Job, StepOverrides};
use tracing::{debug, error, info, warn};

use crate::supervisor::Supervisor;
use crate::{Result, SupervisorError};

impl Supervisor {
    /// Validate that the job can be executed on this instrument
    /// configuration. Fails fast with every problem found, not just the
    /// first.
    pub fn validate_job(&self, job: &Job) -> Result<()> {
        let mut problems = Vec::new();

        // Every step's solution must fit the reaction vessel.
        let max_volume_ul = self.rxn_vessel.lock().max_volume_ul;
        for (index, step) in job.protocol.iter().enumerate() {
            let total_ul = step.total_volume_ul();
            if total_ul > max_volume_ul {
                let msg = format!(
                    "step {index}: solution total volume ({total_ul} [uL]) exceeds \
                     reaction vessel volume ({max_volume_ul} [uL])"
                );
                error!("{msg}");
                problems.push(msg);
            }
        }

        // Every chemical used must be plumbed.
        let plumbed = self.plumbed_chemicals();
        let unplumbed: Vec<String> = job.chemicals().difference(&plumbed).cloned().collect();
        if !unplumbed.is_empty() {
            let msg = format!(
                "job chemicals are not plumbed on the machine: {}",
                unplumbed.join(", ")
            );
            error!("{msg}");
            problems.push(msg);
        }

        // Every step's solution must have somewhere to be dumped.
        for (index, step) in job.protocol.iter().enumerate() {
            let components = step.components();
            if self.compatible_waste_id(&components).is_none() {
                let msg = format!(
                    "step {index}: solution has no designated waste (components: {})",
                    components.iter().cloned().collect::<Vec<_>>().join(", ")
                );
                error!("{msg}");
                problems.push(msg);
            }
        }

        if !problems.is_empty() {
            return Err(SupervisorError::JobInvalid(problems));
        }
        info!("Job passed validation against instrument capabilities.");
        Ok(())
    }

    /// Load, validate, and start (or resume) the job at `job_path` on a
    /// worker thread. Exactly one job runs at a time.
    pub fn run(self: &Arc<Self>, job_path: &Path) -> Result<()> {
        if self.job_running.load(Ordering::SeqCst) {
            return Err(SupervisorError::AlreadyRunning);
        }
        let job = store::load(job_path)?;
        self.validate_job(&job)?;

        debug!("Launching job worker thread.");
        // A fresh run never inherits a stale pause or override. Cleared
        // here, before the worker exists, so a pause requested right
        // after `run` returns is never lost.
        self.pause_requested.store(false, Ordering::SeqCst);
        *self.resume_overrides.lock() = StepOverrides::default();
        let supervisor = Arc::clone(self);
        let path = job_path.to_path_buf();
        self.job_running.store(true, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name("job_worker".into())
            .spawn(move || {
                let result = supervisor.run_job_worker(job, &path);
                if let Err(err) = &result {
                    error!(%err, "job worker failed");
                }
                supervisor.job_running.store(false, Ordering::SeqCst);
                result
            });
        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.job_running.store(false, Ordering::SeqCst);
                Err(SupervisorError::Internal(format!(
                    "spawning job worker: {err}"
                )))
            }
        }
    }

    /// Request that the running job pause at the next opportunity (step
    /// boundary, poll tick, or intermittent-mix boundary).
    pub fn pause(&self) {
        if !self.job_running.load(Ordering::SeqCst) {
            error!("Ignoring pause request. System is not running a job.");
            return;
        }
        info!("Requesting system pause.");
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// True while a job worker is executing.
    pub fn is_job_running(&self) -> bool {
        self.job_running.load(Ordering::SeqCst)
    }

    /// Wait for the current job worker (if any) and surface its result.
    pub fn join_job(&self) -> Result<()> {
        let handle = self.worker.lock().take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| SupervisorError::Internal("job worker panicked".into()))?,
            None => Ok(()),
        }
    }

    /// Start or resume a job, holding the flowpath lock for the whole
    /// run.
    fn run_job_worker(&self, mut job: Job, job_path: &PathBuf) -> Result<()> {
        let _flowpath = self.flowpath.lock();

        // The vessel contents must be unspecified (operator promises the
        // starting solution is loaded; we seed the model from the job) or
        // must match what the job expects.
        let (start_step, start_overrides) = if let Some(resume) = job.resume_state.clone() {
            {
                let mut vessel = self.rxn_vessel.lock();
                if vessel.is_empty() {
                    vessel.add_solution(&resume.starting_solution)?;
                }
                if vessel.solution() != &resume.starting_solution {
                    return Err(SupervisorError::StartingSolutionMismatch);
                }
            }
            job.clear_resume_state();
            job.record_resume();
            info!(
                job = %job.name,
                step = resume.step + 1,
                remaining_s = job.duration_s(resume.step),
                "Resuming job."
            );
            (resume.step, resume.overrides)
        } else {
            {
                let mut vessel = self.rxn_vessel.lock();
                if vessel.is_empty() {
                    vessel.add_solution(&job.starting_solution)?;
                }
                if vessel.solution() != &job.starting_solution {
                    return Err(SupervisorError::StartingSolutionMismatch);
                }
            }
            job.record_start();
            info!(
                job = %job.name,
                duration_s = job.duration_s(0),
                "Starting job."
            );
            (0, None)
        };

        let total_steps = job.protocol.len();
        let mut index = start_step;
        while index < total_steps {
            let step = job.protocol[index].clone();
            // Apply overrides on the starting (i.e. resume) step only.
            let effective = match (&start_overrides, index == start_step) {
                (Some(overrides), true) => {
                    info!(?overrides, "Applying overrides to starting step.");
                    overrides.apply(&step)
                }
                _ => step.clone(),
            };
            info!(
                step = index + 1,
                of = total_steps,
                solution = ?effective.solution,
                "Conducting step."
            );
            let result = self.run_wash_step(&effective, true, false);

            // A pause mid-interval leaves the remaining duration here.
            let overrides = {
                let mut buffer = self.resume_overrides.lock();
                let taken = std::mem::take(&mut *buffer);
                (!taken.is_empty()).then_some(taken)
            };
            // Save the current step if it did not complete, the next
            // step if it did.
            let resume_step = match &result {
                Err(_) => index,
                Ok(()) if overrides.is_some() => index,
                Ok(()) => index + 1,
            };
            let paused = result.is_ok()
                && self
                    .pause_requested
                    .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
            if paused {
                // Steps are 1-indexed when referenced in logs.
                warn!(step = resume_step + 1, "Pausing system.");
                job.record_pause();
            }
            // Always persist the snapshot so an unhandled failure or a
            // power loss resumes from the right step.
            job.save_resume_state(resume_step, step.solution.clone(), overrides);
            store::save(&job, job_path)?;
            result?;
            if paused {
                info!("System paused.");
                return Ok(());
            }
            index += 1;
        }

        job.clear_resume_state();
        job.record_finish();
        store::save(&job, job_path)?;
        info!(job = %job.name, path = %job_path.display(), "Finished job.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::testutil::{fast_config, sim_instrument, solution};
    use flowwash_job::{Solution, WashStep};

    fn step(solution: Solution, duration_s: f64) -> WashStep {
        WashStep {
            intermittent_mixing_on_time_s: None,
            intermittent_mixing_off_time_s: None,
            mix_speed_rpm: 1_000.0,
            duration_s,
            solution,
        }
    }

    #[test]
    fn validation_lists_every_problem() {
        let instrument = sim_instrument(fast_config(), 8_000.0);
        let job = Job::new(
            "bad",
            Solution::new(),
            vec![
                // Too big for the vessel.
                step(solution(&[("pbs", 12_000.0)]), 0.0),
                // Not plumbed at all.
                step(solution(&[("peanut_butter", 100.0)]), 0.0),
                // Plumbed, but no waste accepts it.
                step(solution(&[("acetone", 100.0)]), 0.0),
            ],
        );
        let err = instrument.supervisor.validate_job(&job).unwrap_err();
        match err {
            SupervisorError::JobInvalid(problems) => {
                assert_eq!(problems.len(), 4, "{problems:?}");
                assert!(problems[0].contains("step 0"));
                assert!(problems.iter().any(|p| p.contains("not plumbed")));
                assert!(problems.iter().any(|p| p.contains("no designated waste")));
            }
            other => panic!("expected JobInvalid, got {other:?}"),
        }
    }

    #[test]
    fn validation_passes_a_well_formed_job() {
        let instrument = sim_instrument(fast_config(), 8_000.0);
        let job = Job::new(
            "good",
            solution(&[("pbs", 5_000.0)]),
            vec![step(solution(&[("dcm", 5_000.0)]), 10.0)],
        );
        instrument.supervisor.validate_job(&job).unwrap();
    }

    #[test]
    fn starting_solution_mismatch_is_rejected() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        let supervisor = Arc::new(instrument.supervisor);
        supervisor
            .rxn_vessel
            .lock()
            .add_solution(&solution(&[("thf", 123.0)]))
            .unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("job.yaml");
        let job = Job::new(
            "mismatch",
            solution(&[("pbs", 10_000.0)]),
            vec![step(solution(&[("dcm", 100.0)]), 0.0)],
        );
        store::save(&job, &path).unwrap();

        supervisor.run(&path).unwrap();
        let err = supervisor.join_job().unwrap_err();
        assert!(matches!(err, SupervisorError::StartingSolutionMismatch));
    }

    #[test]
    fn second_run_is_rejected_while_first_is_active() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        let supervisor = Arc::new(instrument.supervisor);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("job.yaml");
        let job = Job::new(
            "long",
            Solution::new(),
            vec![step(Solution::new(), 5.0)],
        );
        store::save(&job, &path).unwrap();

        supervisor.run(&path).unwrap();
        assert!(matches!(
            supervisor.run(&path),
            Err(SupervisorError::AlreadyRunning)
        ));
        supervisor.pause();
        supervisor.join_job().unwrap();
    }

    #[test]
    fn missing_job_file_is_not_found() {
        let instrument = sim_instrument(fast_config(), 20_000.0);
        let supervisor = Arc::new(instrument.supervisor);
        let err = supervisor.run(Path::new("/nonexistent/job.yaml")).unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Job(flowwash_job::JobError::NotFound(_))
        ));
    }
}
