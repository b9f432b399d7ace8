//! # Flowwash Core
//!
//! The instrument supervisor for an automated fluidics platform that
//! runs programmable multi-step liquid-handling ("wash") protocols on a
//! sealed reaction vessel: priming reagent lines, metering microliter
//! volumes, mixing for timed intervals, and draining to
//! chemically-compatible waste.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Supervisor                            │
//! │                                                              │
//! │   Job Runner ──> Wash Step Executor ──> Prime/Purge Engine   │
//! │       │                 │               Dispense/Drain       │
//! │       │                 │               Leak-Check Suite     │
//! │       │                 │                      │             │
//! │       ▼                 ▼                      ▼             │
//! │   job file        ┌───────────────────────────────────┐      │
//! │   (YAML,          │      flowpath lock (re-entrant)   │      │
//! │    atomic)        └───────────────────────────────────┘      │
//! │                                 │                            │
//! │                     selector / pump / valves / mixer         │
//! │                                 ▲                            │
//! │   Pressure Monitor ── halt ─────┘   (bypasses the lock)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency model
//!
//! Three logical contexts share a supervisor:
//!
//! 1. The **command context** accepts operator input, spawns the job
//!    worker, and can request pause or halt.
//! 2. The **job worker** runs the current job, holding the flowpath
//!    lock for the run's duration. It is the only writer of the job
//!    file.
//! 3. The **pressure monitor** samples continuously, never takes the
//!    flowpath lock, and on an over-pressure sample halts the
//!    instrument and latches an abort every foreground operation
//!    observes.
//!
//! Operations on a single supervisor observe a total order on flowpath
//! mutations equal to the lock-acquisition order.

mod config;
mod error;
mod leak;
mod pressure;
mod prime;
mod runner;
mod supervisor;
mod transfer;
mod vessel;
mod wash;

pub use config::{InstrumentConfig, SupervisorConfig, VesselConfig, WasteVesselConfig};
pub use error::{Result, SupervisorError};
pub use pressure::AbortFlag;
pub use prime::PurgeDestination;
pub use supervisor::{Devices, Supervisor};
pub use vessel::{Vessel, WasteVessel};

// Re-export the job model for downstream convenience.
pub use flowwash_job::{Job, JobError, Solution, StepOverrides, WashStep};
