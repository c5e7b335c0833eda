use super::reduce::{RunReport, RunStatistics};
use crate::types::Label;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Set comparison of one ground-truth label between two runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelComparison {
    pub union: BTreeSet<String>,
    pub intersection: BTreeSet<String>,
    /// Baseline misclassified count minus comparison misclassified count.
    pub improvement: i64,
}

impl LabelComparison {
    pub fn between(baseline: &BTreeSet<String>, comparison: &BTreeSet<String>) -> Self {
        Self {
            union: baseline.union(comparison).cloned().collect(),
            intersection: baseline.intersection(comparison).cloned().collect(),
            improvement: baseline.len() as i64 - comparison.len() as i64,
        }
    }
}

/// `representation -> label -> comparison` for a single model.
pub type RepresentationComparison = BTreeMap<String, BTreeMap<String, LabelComparison>>;

/// `model -> representation -> label -> comparison`; the comparison document.
pub type ComparisonResult = BTreeMap<String, RepresentationComparison>;

/// Compares two reduced runs, model by model and representation by representation.
///
/// Representations come from the comparison run. When the baseline scanned the same
/// representation its misclassifications there are used; otherwise the baseline's
/// misclassifications across all of its representations stand in, which is the
/// shape of a single-representation baseline. Identity is the contract ID alone.
pub fn compare(baseline: &RunReport, comparison: &RunReport) -> ComparisonResult {
    let empty = RunStatistics::default();
    let models: BTreeSet<&String> = baseline.keys().chain(comparison.keys()).collect();

    models
        .into_iter()
        .map(|model| {
            let base = baseline.get(model).unwrap_or(&empty);
            let comp = comparison.get(model).unwrap_or(&empty);
            (model.clone(), compare_model(base, comp))
        })
        .collect()
}

fn compare_model(baseline: &RunStatistics, comparison: &RunStatistics) -> RepresentationComparison {
    let compared = comparison.representations();
    let scanned_by_baseline = baseline.representations();
    let representations = if compared.is_empty() {
        scanned_by_baseline.clone()
    } else {
        compared
    };

    representations
        .into_iter()
        .map(|repr| {
            let baseline_scope = scanned_by_baseline.contains(repr).then_some(repr);

            let per_label = Label::ALL
                .iter()
                .map(|&label| {
                    let base_ids = id_set(baseline.misclassified_ids(label, baseline_scope));
                    let comp_ids = id_set(comparison.misclassified_ids(label, Some(repr)));
                    (
                        label.dir_name().to_string(),
                        LabelComparison::between(&base_ids, &comp_ids),
                    )
                })
                .collect();

            (repr.to_string(), per_label)
        })
        .collect()
}

fn id_set(ids: Vec<&str>) -> BTreeSet<String> {
    ids.into_iter().map(str::to_string).collect()
}
