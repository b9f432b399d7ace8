//! Flowwash CLI - run, validate, and leak-check wash protocols on the
//! (simulated) instrument.

mod instrument;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use flowwash_core::{InstrumentConfig, Result, Solution, Supervisor, SupervisorError};
use flowwash_job::{store, Job};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowwash")]
#[command(about = "Supervisor for the flowwash automated fluidics instrument")]
struct Cli {
    /// Instrument configuration document
    #[arg(short, long, default_value = "config/instrument.yaml")]
    config: PathBuf,

    /// Assemble the instrument from simulated devices. Real drivers are
    /// external; this binary only supports simulated operation.
    #[arg(long, default_value_t = true)]
    simulated: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run (or resume) a job to completion
    Run {
        /// Job file path
        job: PathBuf,
    },
    /// Validate a job against the instrument without running it
    Validate {
        /// Job file path
        job: PathBuf,
    },
    /// Run the ordered leak-check suite
    LeakCheck,
    /// Prime a chemical's reservoir line up to the selector port
    Prime {
        /// Chemical name from the selector port map
        chemical: String,
    },
    /// Push a chemical's reservoir line contents back with gas
    Unprime {
        /// Chemical name from the selector port map
        chemical: String,
    },
    /// Create a job file, empty or copied from an existing job
    Create {
        /// Job file path to create
        job: PathBuf,
        /// Existing job to copy the protocol from
        #[arg(short, long)]
        from: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn dispatch(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Run { job } => {
            let supervisor = Arc::new(build(cli)?);
            supervisor.run(job)?;
            let result = supervisor.join_job();
            if matches!(result, Err(SupervisorError::Aborted)) {
                if let Some(psig) = supervisor.pressure_fault() {
                    return Err(SupervisorError::OverPressure { psig });
                }
            }
            result
        }
        Commands::Validate { job } => {
            let supervisor = build(cli)?;
            let job = store::load(job)?;
            supervisor.validate_job(&job)?;
            info!(job = %job.name, "Job is valid for this instrument.");
            Ok(())
        }
        Commands::LeakCheck => {
            let supervisor = build(cli)?;
            supervisor.run_leak_checks()?;
            info!("All leak checks passed.");
            Ok(())
        }
        Commands::Prime { chemical } => {
            let config = load_config(&cli.config)?;
            let supervisor = assemble(cli, &config)?;
            supervisor
                .prime_reservoir_line(chemical, config.supervisor.default_prime_displacement_ul)
        }
        Commands::Unprime { chemical } => {
            let config = load_config(&cli.config)?;
            let supervisor = assemble(cli, &config)?;
            supervisor.unprime_reservoir_line(
                chemical,
                config.supervisor.default_unprime_displacement_ul,
            )
        }
        Commands::Create { job, from } => create_job(job, from.as_deref()),
    }
}

fn build(cli: &Cli) -> Result<Supervisor> {
    let config = load_config(&cli.config)?;
    assemble(cli, &config)
}

fn assemble(cli: &Cli, config: &InstrumentConfig) -> Result<Supervisor> {
    if !cli.simulated {
        return Err(SupervisorError::Config(
            "real device drivers are external; only --simulated is supported".into(),
        ));
    }
    instrument::build_simulated(config)
}

fn load_config(path: &Path) -> Result<InstrumentConfig> {
    let text = fs::read_to_string(path).map_err(|err| {
        SupervisorError::Config(format!("reading {}: {err}", path.display()))
    })?;
    serde_yaml::from_str(&text)
        .map_err(|err| SupervisorError::Config(format!("parsing {}: {err}", path.display())))
}

/// Create a job file: empty by default, or copied from an existing job
/// with its history purged and its provenance stamped.
fn create_job(job_path: &Path, source: Option<&Path>) -> Result<()> {
    if job_path.exists() {
        return Err(SupervisorError::Config(format!(
            "refusing to overwrite existing job file: {}",
            job_path.display()
        )));
    }
    let job = match source {
        None => {
            let name = job_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "job".to_string());
            info!(name, "Creating an empty job file.");
            Job::new(name, Solution::new(), Vec::new())
        }
        Some(source_path) => {
            let mut job = store::load(source_path)?;
            job.purge_history();
            job.clear_resume_state();
            job.set_source_protocol(source_path);
            info!(source = %source_path.display(), "Created job file from an existing job.");
            job
        }
    };
    store::save(&job, job_path)?;
    Ok(())
}

/// Each error kind maps to a distinct exit code so wrapping automation
/// can react without parsing logs.
fn exit_code(err: &SupervisorError) -> u8 {
    use flowwash_job::JobError;
    match err {
        SupervisorError::UnknownChemical(_) => 2,
        SupervisorError::OverCapacity { .. } => 3,
        SupervisorError::NoCompatibleWaste(_) => 4,
        SupervisorError::PrimeFailure { .. } => 5,
        SupervisorError::PrimeMismatch { .. } => 6,
        SupervisorError::LeakCheck { .. } => 7,
        SupervisorError::JobInvalid(_) => 8,
        SupervisorError::StartingSolutionMismatch => 9,
        SupervisorError::AlreadyRunning => 10,
        SupervisorError::PumpNotEmpty { .. } => 11,
        SupervisorError::OverPressure { .. } => 12,
        SupervisorError::Aborted => 13,
        SupervisorError::Job(JobError::NotFound(_)) => 14,
        SupervisorError::Job(_) => 15,
        SupervisorError::Hardware(_) => 16,
        SupervisorError::Config(_) => 17,
        SupervisorError::Internal(_) => 18,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn exit_codes_are_distinct() {
        let errors = [
            SupervisorError::UnknownChemical("x".into()),
            SupervisorError::NoCompatibleWaste("x".into()),
            SupervisorError::StartingSolutionMismatch,
            SupervisorError::AlreadyRunning,
            SupervisorError::Aborted,
            SupervisorError::OverPressure { psig: 14.0 },
            SupervisorError::Config("x".into()),
        ];
        let mut codes: Vec<u8> = errors.iter().map(exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn create_then_copy_job() {
        let dir = TempDir::new().unwrap();
        let empty_path = dir.path().join("empty.yaml");
        create_job(&empty_path, None).unwrap();
        let empty = store::load(&empty_path).unwrap();
        assert_eq!(empty.name, "empty");
        assert!(empty.protocol.is_empty());

        let copy_path = dir.path().join("copy.yaml");
        create_job(&copy_path, Some(&empty_path)).unwrap();
        let copy = store::load(&copy_path).unwrap();
        assert!(copy.history.events.is_empty());
        assert_eq!(
            copy.source_protocol.unwrap().path.as_deref(),
            Some(empty_path.as_path())
        );
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.yaml");
        create_job(&path, None).unwrap();
        assert!(matches!(
            create_job(&path, None),
            Err(SupervisorError::Config(_))
        ));
    }
}
