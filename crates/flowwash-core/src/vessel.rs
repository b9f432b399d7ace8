//! Reaction and waste vessel models.

use std::collections::BTreeSet;

use flowwash_job::Solution;
use serde::{Deserialize, Serialize};

use crate::config::{VesselConfig, WasteVesselConfig};
use crate::{Result, SupervisorError};

/// A vessel with named, volume-tracked contents.
///
/// Contents are a mapping from chemical name to microliters; the current
/// volume is always the sum of the values. [`add_solution`] is the only
/// way volume enters, and it refuses additions that would exceed
/// `max_volume_ul`.
///
/// [`add_solution`]: Vessel::add_solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vessel {
    pub name: String,
    pub max_volume_ul: f64,
    #[serde(default)]
    solution: Solution,
}

impl Vessel {
    pub fn new(name: impl Into<String>, max_volume_ul: f64) -> Self {
        Self {
            name: name.into(),
            max_volume_ul,
            solution: Solution::new(),
        }
    }

    /// Current contents, keyed by chemical name.
    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    /// Sum of all contained volumes.
    pub fn current_volume_ul(&self) -> f64 {
        self.solution.values().sum()
    }

    /// Names of the chemicals currently in the vessel.
    pub fn components(&self) -> BTreeSet<String> {
        self.solution.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.solution.is_empty()
    }

    /// Add per-chemical volumes. Existing entries are summed, not
    /// replaced. Fails without mutating if the resulting total would
    /// exceed the vessel's maximum.
    pub fn add_solution(&mut self, chemicals: &Solution) -> Result<()> {
        let added_ul: f64 = chemicals.values().sum();
        let requested_ul = self.current_volume_ul() + added_ul;
        if requested_ul > self.max_volume_ul {
            return Err(SupervisorError::OverCapacity {
                vessel: self.name.clone(),
                requested_ul,
                max_volume_ul: self.max_volume_ul,
            });
        }
        for (chemical, volume_ul) in chemicals {
            *self.solution.entry(chemical.clone()).or_insert(0.0) += volume_ul;
        }
        Ok(())
    }

    /// Empty the vessel.
    pub fn purge(&mut self) {
        self.solution = Solution::new();
    }
}

impl From<VesselConfig> for Vessel {
    fn from(config: VesselConfig) -> Self {
        Self {
            name: config.name,
            max_volume_ul: config.max_volume_ul,
            solution: config.solution,
        }
    }
}

/// A chemically-typed waste sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasteVessel {
    pub vessel: Vessel,
    pub compatible_chemicals: BTreeSet<String>,
}

impl WasteVessel {
    pub fn new(
        name: impl Into<String>,
        max_volume_ul: f64,
        compatible_chemicals: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            vessel: Vessel::new(name, max_volume_ul),
            compatible_chemicals: compatible_chemicals.into_iter().map(Into::into).collect(),
        }
    }

    /// A solution is dumpable here iff its component set is a subset of
    /// the compatible set.
    pub fn compatible_with(&self, components: &BTreeSet<String>) -> bool {
        components.is_subset(&self.compatible_chemicals)
    }

    /// Record drained contents. Waste level tracking is advisory, so an
    /// overfill is reported to the caller rather than refused.
    pub fn deposit(&mut self, solution: &Solution) -> bool {
        let overflowed = self.vessel.current_volume_ul() + solution.values().sum::<f64>()
            > self.vessel.max_volume_ul;
        for (chemical, volume_ul) in solution {
            *self.vessel.solution.entry(chemical.clone()).or_insert(0.0) += volume_ul;
        }
        overflowed
    }
}

impl From<WasteVesselConfig> for WasteVessel {
    fn from(config: WasteVesselConfig) -> Self {
        Self {
            vessel: Vessel::new(config.name, config.max_volume_ul),
            compatible_chemicals: config.compatible_chemicals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solution(entries: &[(&str, f64)]) -> Solution {
        entries
            .iter()
            .map(|(name, ul)| (name.to_string(), *ul))
            .collect()
    }

    #[test]
    fn add_solution_sums_existing_entries() {
        let mut vessel = Vessel::new("rv", 10_000.0);
        vessel.add_solution(&solution(&[("pbs", 2_000.0)])).unwrap();
        vessel.add_solution(&solution(&[("pbs", 3_000.0)])).unwrap();
        assert_eq!(vessel.solution().get("pbs"), Some(&5_000.0));
        assert_eq!(vessel.current_volume_ul(), 5_000.0);
    }

    #[test]
    fn add_solution_at_exact_capacity_succeeds() {
        let mut vessel = Vessel::new("rv", 8_000.0);
        vessel.add_solution(&solution(&[("pbs", 8_000.0)])).unwrap();
        assert_eq!(vessel.current_volume_ul(), 8_000.0);
    }

    #[test]
    fn add_solution_over_capacity_fails_without_mutating() {
        let mut vessel = Vessel::new("rv", 8_000.0);
        vessel.add_solution(&solution(&[("pbs", 7_999.0)])).unwrap();
        let err = vessel
            .add_solution(&solution(&[("thf", 2.0)]))
            .unwrap_err();
        assert!(matches!(err, SupervisorError::OverCapacity { .. }));
        // Failed add leaves contents untouched.
        assert_eq!(vessel.current_volume_ul(), 7_999.0);
        assert!(vessel.solution().get("thf").is_none());
    }

    #[test]
    fn purge_empties_contents() {
        let mut vessel = Vessel::new("rv", 8_000.0);
        vessel.add_solution(&solution(&[("pbs", 500.0)])).unwrap();
        vessel.purge();
        assert!(vessel.is_empty());
        assert_eq!(vessel.current_volume_ul(), 0.0);
    }

    #[test]
    fn waste_compatibility_is_subset_test() {
        let waste = WasteVessel::new("aqueous", 100_000.0, ["pbs", "di_water", "thf"]);
        assert!(waste.compatible_with(&BTreeSet::from(["pbs".to_string()])));
        assert!(waste.compatible_with(&BTreeSet::from([
            "thf".to_string(),
            "di_water".to_string()
        ])));
        assert!(!waste.compatible_with(&BTreeSet::from(["dcm".to_string()])));
        // Empty component set is a subset of anything.
        assert!(waste.compatible_with(&BTreeSet::new()));
    }

    #[test]
    fn deposit_reports_overflow() {
        let mut waste = WasteVessel::new("small", 1_000.0, ["pbs"]);
        assert!(!waste.deposit(&solution(&[("pbs", 800.0)])));
        assert!(waste.deposit(&solution(&[("pbs", 800.0)])));
        assert_eq!(waste.vessel.current_volume_ul(), 1_600.0);
    }
}
