//! Wash steps and the override mechanism used for mid-step resume.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A named solution: chemical name → volume in microliters.
pub type Solution = BTreeMap<String, f64>;

/// One unit of work in a protocol: optional drain, fill with a named
/// solution, mix for a duration (possibly intermittently), optional
/// final drain.
///
/// Zero values compose meaningfully: no chemicals is a pure mix or idle
/// step, zero mix speed is a passive exposure, zero duration is a pure
/// fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WashStep {
    /// With `intermittent_mixing_off_time_s`, the on-interval of an
    /// intermittent mixing strategy. Both must be present and positive
    /// for the strategy to engage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermittent_mixing_on_time_s: Option<f64>,

    /// The off-interval of an intermittent mixing strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermittent_mixing_off_time_s: Option<f64>,

    /// Mixing speed in rpm. 0 disables mixing.
    #[serde(default)]
    pub mix_speed_rpm: f64,

    /// Time in seconds to mix (or idle) after filling.
    #[serde(default)]
    pub duration_s: f64,

    /// Chemicals to dispense, keyed by name, in microliters.
    pub solution: Solution,
}

impl WashStep {
    /// Total solution volume across all chemicals.
    pub fn total_volume_ul(&self) -> f64 {
        self.solution.values().sum()
    }

    /// Names of the chemical components used in this step.
    pub fn components(&self) -> BTreeSet<String> {
        self.solution.keys().cloned().collect()
    }
}

/// Partial-progress remnants of an interrupted step.
///
/// A subset of [`WashStep`] fields that a resume replays in place of the
/// originals — most commonly `duration_s` holding the remaining mix time
/// after a mid-interval pause. The `solution` field is deliberately not
/// representable here: what a step dispenses is never overridable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermittent_mixing_on_time_s: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermittent_mixing_off_time_s: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mix_speed_rpm: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
}

impl StepOverrides {
    /// True when no field is overridden.
    pub fn is_empty(&self) -> bool {
        self.intermittent_mixing_on_time_s.is_none()
            && self.intermittent_mixing_off_time_s.is_none()
            && self.mix_speed_rpm.is_none()
            && self.duration_s.is_none()
    }

    /// Field-merge onto a copy of `step`. Unset fields keep the step's
    /// original values.
    pub fn apply(&self, step: &WashStep) -> WashStep {
        let mut merged = step.clone();
        if let Some(on_s) = self.intermittent_mixing_on_time_s {
            merged.intermittent_mixing_on_time_s = Some(on_s);
        }
        if let Some(off_s) = self.intermittent_mixing_off_time_s {
            merged.intermittent_mixing_off_time_s = Some(off_s);
        }
        if let Some(rpm) = self.mix_speed_rpm {
            merged.mix_speed_rpm = rpm;
        }
        if let Some(duration_s) = self.duration_s {
            merged.duration_s = duration_s;
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step() -> WashStep {
        WashStep {
            intermittent_mixing_on_time_s: None,
            intermittent_mixing_off_time_s: None,
            mix_speed_rpm: 1000.0,
            duration_s: 1800.0,
            solution: Solution::from([("thf".to_string(), 1000.0), ("di_water".to_string(), 4000.0)]),
        }
    }

    #[test]
    fn totals_and_components() {
        let step = step();
        assert_eq!(step.total_volume_ul(), 5000.0);
        assert_eq!(
            step.components(),
            BTreeSet::from(["thf".to_string(), "di_water".to_string()])
        );
    }

    #[test]
    fn overrides_merge_only_set_fields() {
        let overrides = StepOverrides {
            duration_s: Some(1740.0),
            ..Default::default()
        };
        let merged = overrides.apply(&step());
        assert_eq!(merged.duration_s, 1740.0);
        assert_eq!(merged.mix_speed_rpm, 1000.0);
        assert_eq!(merged.solution, step().solution);
    }

    #[test]
    fn empty_overrides_are_identity() {
        let overrides = StepOverrides::default();
        assert!(overrides.is_empty());
        assert_eq!(overrides.apply(&step()), step());
    }

    #[test]
    fn step_defaults_from_minimal_document() {
        let step: WashStep = serde_yaml::from_str("solution:\n  pbs: 500.0\n").unwrap();
        assert_eq!(step.mix_speed_rpm, 0.0);
        assert_eq!(step.duration_s, 0.0);
        assert!(step.intermittent_mixing_on_time_s.is_none());
    }
}
