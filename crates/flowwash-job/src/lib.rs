//! # Flowwash Job
//!
//! The persistent unit of work for the instrument: an ordered protocol of
//! wash steps plus everything needed to start, pause, resume, and audit a
//! run.
//!
//! ## Durability
//!
//! A job lives on disk as a single YAML document ([`store`]). The runner
//! rewrites the document atomically (write `<path>.tmp`, then rename)
//! after every step boundary and on pause, so a reader of the file can
//! always reconstruct exactly one of:
//!
//! - the job is finished (history ends in an `end` event, no
//!   `resume_state`), or
//! - the job can be resumed from `resume_state.step` with
//!   `resume_state.overrides` applied.
//!
//! `resume_state` is only ever written by the software running the job;
//! it is omitted from the document entirely when empty.

mod error;
mod model;
mod step;
pub mod store;

pub use error::{JobError, Result};
pub use model::{Event, EventType, History, Job, ResumeState, SourceProtocol};
pub use step::{Solution, StepOverrides, WashStep};
