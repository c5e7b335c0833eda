//! Misclassification analytics.
//!
//! `reduce` turns one run's stored predictions into per-model [`RunStatistics`];
//! `compare` sets two reduced runs against each other. Both are pure over their
//! inputs; documents move between them as pretty JSON.

pub mod compare;
pub mod reduce;

pub use compare::{compare, ComparisonResult, LabelComparison};
pub use reduce::{reduce, MisclassifiedContract, RunReport, RunStatistics, Tally};

use crate::analyzer::store::load_run;
use crate::types::Mode;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// Loads every stored prediction of `mode` under `store_root` and reduces them.
pub fn reduce_run(store_root: &Path, mode: Mode) -> Result<RunReport> {
    let observations = load_run(store_root, mode)?;
    info!(
        "Reducing {} records from {} ({} mode)",
        observations.len(),
        store_root.display(),
        mode
    );
    Ok(reduce(&observations))
}

pub fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(document)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
