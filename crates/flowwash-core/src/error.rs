//! Error types for the instrument supervisor.

use flowwash_hardware::HardwareError;
use flowwash_job::JobError;
use thiserror::Error;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors raised by supervisor operations.
///
/// Every operation either commits its state change or leaves the
/// instrument in a well-defined state: valves de-energized and the pump
/// plunged if the operation ran to completion, otherwise the job
/// runner's resume snapshot captures partial progress.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A chemical name is not in the plumbed set.
    #[error("unknown chemical(s): {0}")]
    UnknownChemical(String),

    /// Adding solution would exceed a vessel's maximum volume.
    #[error(
        "vessel '{vessel}' over capacity: {requested_ul:.1}[uL] exceeds \
         {max_volume_ul:.1}[uL]"
    )]
    OverCapacity {
        vessel: String,
        requested_ul: f64,
        max_volume_ul: f64,
    },

    /// No waste vessel is chemically compatible with the solution.
    #[error("no compatible waste vessel for components: {0}")]
    NoCompatibleWaste(String),

    /// A prime displaced its entire budget without the liquid sensor
    /// tripping.
    #[error(
        "withdrew maximum volume ({displaced_ul:.1}[uL]) of {chemical} and \
         no liquid detected"
    )]
    PrimeFailure { chemical: String, displaced_ul: f64 },

    /// Strict mode only: the pump line holds a different chemical than
    /// the operation expects.
    #[error("pump line is primed with {found}, expected {expected}")]
    PrimeMismatch { expected: String, found: String },

    /// A leak-check segment failed to hold pressure.
    #[error("leak check failed ({segment}): {reason}")]
    LeakCheck {
        segment: &'static str,
        reason: String,
    },

    /// Pre-flight job validation failed. Carries every per-step diagnosis.
    #[error("job failed validation: {}", .0.join("; "))]
    JobInvalid(Vec<String>),

    /// Reaction vessel contents do not match the solution the job (or its
    /// resume state) expects at start.
    #[error(
        "reaction vessel starting solution does not match the job's \
         expected starting solution"
    )]
    StartingSolutionMismatch,

    /// A job is already running on this supervisor.
    #[error("cannot run another job while an existing job is running")]
    AlreadyRunning,

    /// An operation requiring an empty syringe found the pump away from
    /// its reset position.
    #[error(
        "pump is not starting from its reset position (~0) and contains \
         liquid or gas: abs(position) = {position_ul:.1}[uL]"
    )]
    PumpNotEmpty { position_ul: f64 },

    /// The pressure monitor observed a sample above the safety ceiling
    /// and halted the instrument.
    #[error("pressure exceeded the safety ceiling: {psig:.2} psig; instrument halted")]
    OverPressure { psig: f64 },

    /// The current operation was cut short by an instrument halt.
    #[error("operation aborted: instrument halted")]
    Aborted,

    /// Instrument construction was handed an inconsistent device set.
    #[error("invalid instrument configuration: {0}")]
    Config(String),

    /// Device driver failure passthrough.
    #[error("hardware fault: {0}")]
    Hardware(#[from] HardwareError),

    /// Job file failure passthrough.
    #[error(transparent)]
    Job(#[from] JobError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}
