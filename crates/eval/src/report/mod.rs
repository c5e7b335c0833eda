//! Review export for contracts that both runs got wrong.
//!
//! [`ReportMaterializer`] walks the intersection sets of a [`ComparisonResult`] and
//! pulls together, per contract, the two explanations and the source code so a human
//! can judge why neither run classified it correctly. [`ReviewTable`] flattens the
//! entries for annotation.

pub mod table;

pub use table::{ReviewRow, ReviewTable, TableFormat};

use crate::analytics::ComparisonResult;
use crate::analyzer::dataset::{decode_latin1, locate_contract};
use crate::analyzer::store::record_path;
use crate::types::{ContractKey, Label, Mode};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const NO_EXPLANATION: &str = "No explanation found";
pub const EXPLANATION_ERROR: &str = "Error loading explanation";
pub const NO_SOURCE: &str = "Source code not found";
pub const SOURCE_ERROR: &str = "Error loading source code";

/// Where explanations and source code are read from.
#[derive(Debug, Clone)]
pub struct ExplanationSources {
    pub baseline_results: PathBuf,
    pub baseline_mode: Mode,
    pub comparison_results: PathBuf,
    pub comparison_mode: Mode,
    pub dataset_root: PathBuf,
    /// Representation whose files hold the readable contract source.
    pub source_representation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub contract_id: String,
    pub model: String,
    pub data_representation: String,
    pub groundtruth: Label,
    pub model_classification: String,
    pub baseline_explanation: String,
    pub comparison_explanation: String,
    pub source_code: String,
}

impl ReviewEntry {
    pub fn key(&self) -> ContractKey {
        ContractKey::new(&self.data_representation, self.groundtruth, &self.contract_id)
    }
}

pub struct ReportMaterializer {
    sources: ExplanationSources,
}

impl ReportMaterializer {
    pub fn new(sources: ExplanationSources) -> Self {
        Self { sources }
    }

    /// One entry per contract in an intersection set, ordered by model,
    /// representation, label and ID. Missing or broken inputs become sentinels.
    pub fn materialize(&self, comparison: &ComparisonResult) -> Vec<ReviewEntry> {
        let mut entries = Vec::new();

        for (model, representations) in comparison {
            for (representation, labels) in representations {
                for (label_name, label_cmp) in labels {
                    let Ok(label) = label_name.parse::<Label>() else {
                        warn!("Skipping unknown label '{}' for {}", label_name, model);
                        continue;
                    };
                    for id in &label_cmp.intersection {
                        let key = ContractKey::new(representation, label, id);
                        entries.push(self.entry(model, &key));
                    }
                }
            }
        }

        info!("Materialized {} review entries", entries.len());
        entries
    }

    /// Writes every entry to `<out>/<model>/<representation>/<label>/<id>.json`.
    /// Entries that cannot be written are logged and left out of the returned paths.
    pub fn write_entries(&self, entries: &[ReviewEntry], out: &Path) -> Vec<PathBuf> {
        entries
            .iter()
            .filter_map(|entry| match write_entry(entry, out) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Could not write review entry {}: {:#}", entry.key(), e);
                    None
                }
            })
            .collect()
    }

    fn entry(&self, model: &str, key: &ContractKey) -> ReviewEntry {
        let baseline_explanation = self.baseline_explanation(model, key);
        let comparison_explanation = load_explanation(&record_path(
            &self.sources.comparison_results,
            model,
            self.sources.comparison_mode,
            key,
        ));

        ReviewEntry {
            contract_id: key.contract_id.clone(),
            model: model.to_string(),
            data_representation: key.representation.clone(),
            groundtruth: key.label,
            model_classification: "misclassified".to_string(),
            baseline_explanation,
            comparison_explanation,
            source_code: self.source_code(key),
        }
    }

    /// Prefers the baseline record of the same representation; a baseline run over a
    /// single representation is found under whichever representation it used.
    fn baseline_explanation(&self, model: &str, key: &ContractKey) -> String {
        let root = &self.sources.baseline_results;
        let mode = self.sources.baseline_mode;

        let same = record_path(root, model, mode, key);
        if same.is_file() {
            return load_explanation(&same);
        }

        let mode_dir = root.join(model).join(mode.as_str());
        let mut representations: Vec<String> = fs::read_dir(&mode_dir)
            .map(|dir| {
                dir.filter_map(|e| e.ok())
                    .filter(|e| e.path().is_dir())
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        representations.sort();

        representations
            .iter()
            .map(|repr| {
                let other = ContractKey::new(repr, key.label, &key.contract_id);
                record_path(root, model, mode, &other)
            })
            .find(|path| path.is_file())
            .map(|path| load_explanation(&path))
            .unwrap_or_else(|| NO_EXPLANATION.to_string())
    }

    fn source_code(&self, key: &ContractKey) -> String {
        let Some(path) = locate_contract(
            &self.sources.dataset_root,
            &self.sources.source_representation,
            key.label,
            &key.contract_id,
        ) else {
            return NO_SOURCE.to_string();
        };

        match fs::read(&path) {
            Ok(bytes) => decode_latin1(&bytes),
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                SOURCE_ERROR.to_string()
            }
        }
    }
}

fn load_explanation(path: &Path) -> String {
    if !path.is_file() {
        debug!("No record at {}", path.display());
        return NO_EXPLANATION.to_string();
    }

    match read_explanation(path) {
        Ok(text) => text,
        Err(e) => {
            warn!("{:#}", e);
            EXPLANATION_ERROR.to_string()
        }
    }
}

fn read_explanation(path: &Path) -> Result<String> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let record: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    match record.get("explanation") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Null) | None => Ok(NO_EXPLANATION.to_string()),
        Some(other) => Ok(other.to_string()),
    }
}

fn write_entry(entry: &ReviewEntry, out: &Path) -> Result<PathBuf> {
    let path = out
        .join(&entry.model)
        .join(&entry.data_representation)
        .join(entry.groundtruth.dir_name())
        .join(format!("{}.json", entry.contract_id));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&path, serde_json::to_string_pretty(entry)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Reads review entries back from a directory written by
/// [`ReportMaterializer::write_entries`].
pub fn read_entries(out: &Path) -> Result<Vec<ReviewEntry>> {
    let mut entries = Vec::new();
    for entry in walkdir::WalkDir::new(out)
        .min_depth(4)
        .max_depth(4)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to walk {}", out.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let content = fs::read_to_string(entry.path())?;
        let review: ReviewEntry = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", entry.path().display()))?;
        entries.push(review);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{compare, reduce};
    use crate::analyzer::store::{Observation, ResultStore};
    use crate::types::{ClassificationResult, ModelId, Verdict};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn sources(&self) -> ExplanationSources {
            ExplanationSources {
                baseline_results: self.path("baseline"),
                baseline_mode: Mode::Direct,
                comparison_results: self.path("xrag"),
                comparison_mode: Mode::Retrieval,
                dataset_root: self.path("dataset"),
                source_representation: "source".to_string(),
            }
        }

        fn record(&self, store: &str, mode: Mode, repr: &str, id: &str, explanation: &str) {
            let result = ClassificationResult::new(
                Verdict {
                    classification: Label::Safe,
                    explanation: explanation.to_string(),
                },
                ModelId::Gpt4o,
                mode,
            );
            ResultStore::new(self.path(store))
                .write(&ContractKey::new(repr, Label::Reentrant, id), &result)
                .unwrap();
        }

        fn source(&self, id: &str, bytes: &[u8]) {
            let dir = self.path("dataset").join("source").join("reentrant");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("{}.sol", id)), bytes).unwrap();
        }
    }

    fn miss(repr: &str, id: &str) -> Observation {
        Observation {
            model: "gpt-4o".to_string(),
            key: ContractKey::new(repr, Label::Reentrant, id),
            predicted: Label::Safe,
        }
    }

    #[test]
    fn test_entries_carry_both_explanations_and_source() {
        let fx = Fixture::new();
        fx.record("baseline", Mode::Direct, "source", "B", "no external call seen");
        fx.record("xrag", Mode::Retrieval, "source", "B", "similar contracts are guarded");
        fx.source("B", b"contract B { }");

        let cmp = compare(
            &reduce(&[miss("source", "A"), miss("source", "B")]),
            &reduce(&[miss("source", "B"), miss("source", "C")]),
        );
        let entries = ReportMaterializer::new(fx.sources()).materialize(&cmp);

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.contract_id, "B");
        assert_eq!(entry.groundtruth, Label::Reentrant);
        assert_eq!(entry.model_classification, "misclassified");
        assert_eq!(entry.baseline_explanation, "no external call seen");
        assert_eq!(entry.comparison_explanation, "similar contracts are guarded");
        assert_eq!(entry.source_code, "contract B { }");
    }

    #[test]
    fn test_missing_inputs_become_sentinels() {
        let fx = Fixture::new();
        let corrupt = record_path(
            &fx.path("xrag"),
            "gpt-4o",
            Mode::Retrieval,
            &ContractKey::new("source", Label::Reentrant, "B"),
        );
        fs::create_dir_all(corrupt.parent().unwrap()).unwrap();
        fs::write(&corrupt, "not json").unwrap();

        let report = reduce(&[miss("source", "B")]);
        let entries = ReportMaterializer::new(fx.sources()).materialize(&compare(&report, &report));

        assert_eq!(entries[0].baseline_explanation, NO_EXPLANATION);
        assert_eq!(entries[0].comparison_explanation, EXPLANATION_ERROR);
        assert_eq!(entries[0].source_code, NO_SOURCE);
    }

    #[test]
    fn test_baseline_from_other_representation_is_found() {
        let fx = Fixture::new();
        fx.record("baseline", Mode::Direct, "source", "B", "baseline view");
        fx.source("B", &[0x63, 0xe9]);

        let cmp = compare(&reduce(&[miss("source", "B")]), &reduce(&[miss("cfg", "B")]));
        let entries = ReportMaterializer::new(fx.sources()).materialize(&cmp);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data_representation, "cfg");
        assert_eq!(entries[0].baseline_explanation, "baseline view");
        assert_eq!(entries[0].source_code, "c\u{e9}");
    }

    #[test]
    fn test_written_entries_reproduce_intersection() {
        let fx = Fixture::new();
        let cmp = compare(
            &reduce(&[miss("source", "A"), miss("source", "B"), miss("source", "D")]),
            &reduce(&[miss("source", "B"), miss("source", "D")]),
        );
        let materializer = ReportMaterializer::new(fx.sources());
        let entries = materializer.materialize(&cmp);
        let paths = materializer.write_entries(&entries, &fx.path("review"));
        assert_eq!(paths.len(), 2);

        let reread = read_entries(&fx.path("review")).unwrap();
        let ids: BTreeSet<String> = reread.into_iter().map(|e| e.contract_id).collect();
        assert_eq!(ids, cmp["gpt-4o"]["source"]["reentrant"].intersection);
    }
}
