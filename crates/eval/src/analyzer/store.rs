use crate::types::{ClassificationResult, ContractKey, Label, ModelId, Mode};
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// File-backed result store addressed by
/// `<root>/<model>/<mode>/<representation>/<label>/<contract_id>.json`.
///
/// Every `(model, mode, contract)` has its own file, so concurrent writers never
/// touch the same path as long as no contract is scheduled twice.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, model: ModelId, mode: Mode, key: &ContractKey) -> PathBuf {
        record_path(&self.root, model.as_str(), mode, key)
    }

    pub fn exists(&self, model: ModelId, mode: Mode, key: &ContractKey) -> bool {
        self.record_path(model, mode, key).is_file()
    }

    /// Overwrites any previous record for the same key.
    pub fn write(&self, key: &ContractKey, result: &ClassificationResult) -> io::Result<PathBuf> {
        let path = self.record_path(result.model, result.mode, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(result)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&path, json)?;

        debug!("Stored {} -> {}", key, path.display());
        Ok(path)
    }

    pub fn read(
        &self,
        model: ModelId,
        mode: Mode,
        key: &ContractKey,
    ) -> Result<Option<ClassificationResult>> {
        let path = self.record_path(model, mode, key);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let result = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(result))
    }
}

pub fn record_path(root: &Path, model: &str, mode: Mode, key: &ContractKey) -> PathBuf {
    root.join(model)
        .join(mode.as_str())
        .join(&key.representation)
        .join(key.label.dir_name())
        .join(format!("{}.json", key.contract_id))
}

/// One persisted prediction, as seen by the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Directory name; kept as text so records from retired models still reduce.
    pub model: String,
    pub key: ContractKey,
    pub predicted: Label,
}

/// Only the field the reducer needs. Records written by other tools with extra
/// fields still load.
#[derive(Deserialize)]
struct StoredPrediction {
    classification: Label,
}

/// Collects every prediction stored for `mode`, across all model directories.
/// Unreadable or unparseable records are logged and left out.
pub fn load_run(store_root: &Path, mode: Mode) -> Result<Vec<Observation>> {
    let model_dirs: Vec<PathBuf> = fs::read_dir(store_root)
        .with_context(|| format!("Failed to read result store {}", store_root.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.join(mode.as_str()).is_dir())
        .collect();

    let mut observations: Vec<Observation> = model_dirs
        .par_iter()
        .flat_map_iter(|model_dir| load_model_dir(model_dir, mode))
        .collect();

    observations.sort_by(|a, b| a.model.cmp(&b.model).then_with(|| a.key.cmp(&b.key)));
    Ok(observations)
}

fn load_model_dir(model_dir: &Path, mode: Mode) -> Vec<Observation> {
    let Some(model) = model_dir.file_name().and_then(|n| n.to_str()) else {
        return Vec::new();
    };
    let mode_dir = model_dir.join(mode.as_str());

    WalkDir::new(&mode_dir)
        .min_depth(3)
        .max_depth(3)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().and_then(|e| e.to_str()) == Some("json")
        })
        .filter_map(|entry| {
            let path = entry.path();
            let key = key_from_record_path(&mode_dir, path)?;
            match read_prediction(path) {
                Ok(predicted) => Some(Observation {
                    model: model.to_string(),
                    key,
                    predicted,
                }),
                Err(e) => {
                    warn!("Excluding unreadable record {}: {:#}", path.display(), e);
                    None
                }
            }
        })
        .collect()
}

fn key_from_record_path(mode_dir: &Path, path: &Path) -> Option<ContractKey> {
    let relative = path.strip_prefix(mode_dir).ok()?;
    let mut parts = relative.iter().filter_map(|p| p.to_str());
    let representation = parts.next()?;
    let label = match parts.next()?.parse::<Label>() {
        Ok(label) => label,
        Err(_) => {
            debug!("Ignoring record outside a label directory: {}", path.display());
            return None;
        }
    };
    let file = parts.next()?;
    let contract_id = file.strip_suffix(".json").unwrap_or(file);
    Some(ContractKey::new(representation, label, contract_id))
}

fn read_prediction(path: &Path) -> Result<Label> {
    let content = fs::read_to_string(path)?;
    let record: StoredPrediction = serde_json::from_str(&content)?;
    Ok(record.classification)
}
