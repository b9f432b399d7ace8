//! The job document: protocol, execution history, and resume state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::step::{Solution, StepOverrides, WashStep};

/// Where this job came from, for traceability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceProtocol {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessed: Option<DateTime<Utc>>,
}

/// The kind of a history event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Start,
    End,
    Pause,
    Resume,
}

/// A timestamped life-cycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventType,
}

/// Append-only record of the job's life cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    #[serde(default)]
    pub events: Vec<Event>,
}

impl History {
    /// The kind of the most recent event, if any.
    pub fn last_event(&self) -> Option<EventType> {
        self.events.last().map(|event| event.kind)
    }
}

/// Checkpoint for resuming an interrupted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    /// 0-based index of the next (or in-progress) step.
    pub step: usize,

    /// Expected reaction vessel contents at that step. Required so the
    /// runner knows how to route waste before anything else happens.
    pub starting_solution: Solution,

    /// Partial-progress remnants to replay on the resume step only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<StepOverrides>,
}

/// A local job, derived from a protocol, to be run on an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,

    /// Reaction vessel contents expected (or seeded) at a fresh start.
    pub starting_solution: Solution,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_protocol: Option<SourceProtocol>,

    /// Wash steps in execution order.
    #[serde(default)]
    pub protocol: Vec<WashStep>,

    /// Present only while the job is interrupted; never written by hand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_state: Option<ResumeState>,

    #[serde(default)]
    pub history: History,
}

impl Job {
    pub fn new(name: impl Into<String>, starting_solution: Solution, protocol: Vec<WashStep>) -> Self {
        Self {
            name: name.into(),
            starting_solution,
            source_protocol: None,
            protocol,
            resume_state: None,
            history: History::default(),
        }
    }

    /// Every chemical the job touches: starting solution plus all step
    /// components.
    pub fn chemicals(&self) -> BTreeSet<String> {
        let mut chemicals: BTreeSet<String> = self
            .protocol
            .iter()
            .flat_map(|step| step.solution.keys().cloned())
            .collect();
        chemicals.extend(self.starting_solution.keys().cloned());
        chemicals
    }

    /// Per-chemical volume totals across all steps, for stocking the
    /// reservoirs. The starting solution is excluded: the operator loads
    /// it into the vessel directly.
    pub fn stock_chemical_volumes_ul(&self) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for step in &self.protocol {
            for (chemical, volume_ul) in &step.solution {
                *totals.entry(chemical.clone()).or_insert(0.0) += volume_ul;
            }
        }
        totals
    }

    /// Total job duration in seconds starting from the specified step.
    pub fn duration_s(&self, from_step: usize) -> f64 {
        self.protocol
            .iter()
            .skip(from_step)
            .map(|step| step.duration_s)
            .sum()
    }

    pub fn record_start(&mut self) {
        self.record(EventType::Start);
    }

    pub fn record_finish(&mut self) {
        self.record(EventType::End);
    }

    pub fn record_pause(&mut self) {
        self.record(EventType::Pause);
    }

    pub fn record_resume(&mut self) {
        self.record(EventType::Resume);
    }

    fn record(&mut self, kind: EventType) {
        self.history.events.push(Event {
            timestamp: Utc::now(),
            kind,
        });
    }

    pub fn save_resume_state(
        &mut self,
        step: usize,
        starting_solution: Solution,
        overrides: Option<StepOverrides>,
    ) {
        self.resume_state = Some(ResumeState {
            step,
            starting_solution,
            overrides,
        });
    }

    /// Cleared on fresh start and on completion.
    pub fn clear_resume_state(&mut self) {
        self.resume_state = None;
    }

    pub fn purge_history(&mut self) {
        self.history = History::default();
    }

    pub fn set_source_protocol(&mut self, path: &Path) {
        self.source_protocol = Some(SourceProtocol {
            path: Some(path.to_path_buf()),
            accessed: Some(Utc::now()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_job() -> Job {
        Job::new(
            "test_brian",
            Solution::from([("pbs".to_string(), 10_000.0)]),
            vec![
                WashStep {
                    intermittent_mixing_on_time_s: None,
                    intermittent_mixing_off_time_s: None,
                    mix_speed_rpm: 1000.0,
                    duration_s: 1800.0,
                    solution: Solution::from([
                        ("thf".to_string(), 1000.0),
                        ("di_water".to_string(), 4000.0),
                    ]),
                },
                WashStep {
                    intermittent_mixing_on_time_s: None,
                    intermittent_mixing_off_time_s: None,
                    mix_speed_rpm: 1000.0,
                    duration_s: 1800.0,
                    solution: Solution::from([("dcm".to_string(), 5000.0)]),
                },
            ],
        )
    }

    #[test]
    fn job_duration() {
        let job = dummy_job();
        assert_eq!(job.duration_s(0), 3600.0);
        // Start halfway through:
        assert_eq!(job.duration_s(1), 1800.0);
    }

    #[test]
    fn chemicals_include_starting_solution() {
        let job = dummy_job();
        let chemicals = job.chemicals();
        for name in ["pbs", "thf", "di_water", "dcm"] {
            assert!(chemicals.contains(name), "missing {name}");
        }
    }

    #[test]
    fn stock_volumes_exclude_starting_solution() {
        let job = dummy_job();
        let stock = job.stock_chemical_volumes_ul();
        assert_eq!(stock.get("thf"), Some(&1000.0));
        assert_eq!(stock.get("dcm"), Some(&5000.0));
        assert!(stock.get("pbs").is_none());
    }

    #[test]
    fn disappearing_resume_state() {
        let mut job = dummy_job();
        // Resume state should not appear in the document unless set.
        assert!(job.resume_state.is_none());
        let doc = serde_yaml::to_string(&job).unwrap();
        assert!(!doc.contains("resume_state"));

        job.save_resume_state(
            1,
            Solution::from([("pbs".to_string(), 10_000.0)]),
            Some(StepOverrides {
                duration_s: Some(1000.0),
                ..Default::default()
            }),
        );
        let doc = serde_yaml::to_string(&job).unwrap();
        assert!(doc.contains("resume_state"));

        job.clear_resume_state();
        let doc = serde_yaml::to_string(&job).unwrap();
        assert!(!doc.contains("resume_state"));
    }

    #[test]
    fn history_is_recorded_in_order() {
        let mut job = dummy_job();
        job.record_start();
        job.record_pause();
        job.record_resume();
        job.record_finish();
        let kinds: Vec<EventType> = job.history.events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventType::Start,
                EventType::Pause,
                EventType::Resume,
                EventType::End
            ]
        );
        assert_eq!(job.history.last_event(), Some(EventType::End));
    }

    #[test]
    fn event_type_wire_names() {
        let event = Event {
            timestamp: Utc::now(),
            kind: EventType::End,
        };
        let doc = serde_yaml::to_string(&event).unwrap();
        assert!(doc.contains("type: end"));
    }
}
