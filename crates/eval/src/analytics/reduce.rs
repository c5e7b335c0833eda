use crate::analyzer::store::Observation;
use crate::types::Label;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MisclassifiedContract {
    pub contract_id: String,
    pub groundtruth: Label,
    pub predicted: Label,
    pub data_representation: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub total: usize,
    pub misclassified: usize,
}

/// Aggregate outcome of one model within one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total: usize,
    pub reentrant: usize,
    pub safe: usize,
    pub misclassified_reentrant: usize,
    pub misclassified_safe: usize,
    /// `representation -> label -> tally`. Lists every representation scanned,
    /// including those without a single misclassification.
    #[serde(default)]
    pub by_representation: BTreeMap<String, BTreeMap<String, Tally>>,
    pub misclassified_contracts: Vec<MisclassifiedContract>,
}

impl RunStatistics {
    pub fn misclassified(&self) -> usize {
        self.misclassified_reentrant + self.misclassified_safe
    }

    /// Every representation the run scanned. Documents written without the
    /// per-representation breakdown still name the representations of their
    /// misclassified contracts.
    pub fn representations(&self) -> BTreeSet<&str> {
        self.by_representation
            .keys()
            .map(String::as_str)
            .chain(
                self.misclassified_contracts
                    .iter()
                    .map(|m| m.data_representation.as_str()),
            )
            .collect()
    }

    /// IDs misclassified with ground truth `label`, optionally restricted to one
    /// representation.
    pub fn misclassified_ids(&self, label: Label, representation: Option<&str>) -> Vec<&str> {
        self.misclassified_contracts
            .iter()
            .filter(|m| m.groundtruth == label)
            .filter(|m| representation.map_or(true, |r| m.data_representation == r))
            .map(|m| m.contract_id.as_str())
            .collect()
    }
}

/// Per-model statistics of a run; the analytics document written by `reduce`.
pub type RunReport = BTreeMap<String, RunStatistics>;

/// Accumulates one model's observations. Consumed by [`Self::finish`], so a
/// finished [`RunStatistics`] is never touched again.
#[derive(Debug, Default)]
pub struct StatisticsBuilder {
    stats: RunStatistics,
    seen: HashSet<(String, String)>,
}

impl StatisticsBuilder {
    /// Returns `false` when the contract was already counted for this
    /// representation.
    pub fn observe(&mut self, observation: &Observation) -> bool {
        let key = &observation.key;
        if !self
            .seen
            .insert((key.representation.clone(), key.contract_id.clone()))
        {
            return false;
        }

        let groundtruth = key.label;
        let misclassified = observation.predicted != groundtruth;

        self.stats.total += 1;
        match groundtruth {
            Label::Reentrant => self.stats.reentrant += 1,
            Label::Safe => self.stats.safe += 1,
        }

        let tally = self
            .stats
            .by_representation
            .entry(key.representation.clone())
            .or_default()
            .entry(groundtruth.dir_name().to_string())
            .or_default();
        tally.total += 1;

        if misclassified {
            tally.misclassified += 1;
            match groundtruth {
                Label::Reentrant => self.stats.misclassified_reentrant += 1,
                Label::Safe => self.stats.misclassified_safe += 1,
            }
            self.stats.misclassified_contracts.push(MisclassifiedContract {
                contract_id: key.contract_id.clone(),
                groundtruth,
                predicted: observation.predicted,
                data_representation: key.representation.clone(),
            });
        }
        true
    }

    pub fn finish(mut self) -> RunStatistics {
        self.stats.misclassified_contracts.sort();
        self.stats
    }
}

/// Groups observations by model and reduces each group.
pub fn reduce(observations: &[Observation]) -> RunReport {
    let mut builders: BTreeMap<String, StatisticsBuilder> = BTreeMap::new();

    for observation in observations {
        let builder = builders.entry(observation.model.clone()).or_default();
        if !builder.observe(observation) {
            warn!(
                "{}: contract {} already counted for {}; ignoring duplicate under {}",
                observation.model,
                observation.key.contract_id,
                observation.key.representation,
                observation.key.label.dir_name()
            );
        }
    }

    builders
        .into_iter()
        .map(|(model, builder)| (model, builder.finish()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContractKey;

    fn obs(model: &str, repr: &str, truth: Label, id: &str, predicted: Label) -> Observation {
        Observation {
            model: model.to_string(),
            key: ContractKey::new(repr, truth, id),
            predicted,
        }
    }

    #[test]
    fn test_counts_add_up() {
        use Label::*;
        let observations = vec![
            obs("gpt-4o", "source", Reentrant, "A", Safe),
            obs("gpt-4o", "source", Reentrant, "B", Reentrant),
            obs("gpt-4o", "source", Safe, "C", Reentrant),
            obs("gpt-4o", "source", Safe, "D", Safe),
            obs("gpt-4o", "ast", Safe, "D", Reentrant),
        ];

        let report = reduce(&observations);
        let stats = &report["gpt-4o"];
        assert_eq!(stats.total, 5);
        assert_eq!(stats.reentrant, 2);
        assert_eq!(stats.safe, 3);
        assert_eq!(stats.misclassified_reentrant + stats.misclassified_safe, 3);
        assert_eq!(stats.misclassified_contracts.len(), 3);
        assert_eq!(stats.by_representation["ast"]["safe"].misclassified, 1);
        assert_eq!(stats.by_representation["source"]["reentrant"].total, 2);
    }

    #[test]
    fn test_representation_without_errors_is_still_listed() {
        let report = reduce(&[obs("o3-mini", "cfg", Label::Safe, "X", Label::Safe)]);
        let reprs: Vec<&str> = report["o3-mini"].representations().into_iter().collect();
        assert_eq!(reprs, vec!["cfg"]);
        assert_eq!(report["o3-mini"].misclassified(), 0);
    }

    #[test]
    fn test_contract_counted_once_per_representation() {
        let report = reduce(&[
            obs("gpt-4o", "source", Label::Reentrant, "A", Label::Safe),
            obs("gpt-4o", "source", Label::Safe, "A", Label::Safe),
        ]);
        assert_eq!(report["gpt-4o"].total, 1);
        assert_eq!(report["gpt-4o"].misclassified_reentrant, 1);
    }

    #[test]
    fn test_models_are_reduced_separately() {
        let report = reduce(&[
            obs("gpt-4o", "source", Label::Reentrant, "A", Label::Safe),
            obs("gemini-1.5-flash", "source", Label::Reentrant, "A", Label::Reentrant),
        ]);
        assert_eq!(report.len(), 2);
        assert_eq!(report["gpt-4o"].misclassified(), 1);
        assert_eq!(report["gemini-1.5-flash"].misclassified(), 0);
    }

    #[test]
    fn test_report_serializes_as_json_document() {
        let report = reduce(&[obs("gpt-4o", "source", Label::Safe, "C", Label::Reentrant)]);
        let json = serde_json::to_value(&report).unwrap();
        let entry = &json["gpt-4o"]["misclassified_contracts"][0];
        assert_eq!(entry["contract_id"], "C");
        assert_eq!(entry["groundtruth"], "Safe");
        assert_eq!(entry["predicted"], "Reentrant");

        let parsed: RunReport = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, report);
    }
}
