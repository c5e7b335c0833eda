use crate::error::ConfigError;
use crate::types::{ContractKey, Label};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const SIMILAR_DIR_SUFFIX: &str = ".similar";

/// One previously audited contract offered as retrieval context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarContract {
    pub rank: u32,
    /// `None` when the file name carries no recognizable label.
    pub label: Option<Label>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Contract {
    pub key: ContractKey,
    pub path: PathBuf,
    pub source: String,
    /// Ordered by rank.
    pub similar: Vec<SimilarContract>,
}

#[derive(Debug, Default)]
pub struct Dataset {
    pub root: PathBuf,
    pub contracts: Vec<Contract>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn representations(&self) -> Vec<&str> {
        let mut reprs: Vec<&str> = self
            .contracts
            .iter()
            .map(|c| c.key.representation.as_str())
            .collect();
        reprs.sort_unstable();
        reprs.dedup();
        reprs
    }
}

/// Reads `<root>/<representation>/<label>/<contract_id>.<ext>`.
pub struct DatasetLoader {
    root: PathBuf,
    representations: Option<Vec<String>>,
}

impl DatasetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            representations: None,
        }
    }

    /// Restricts loading to the named representations. An empty list loads all.
    pub fn with_representations(mut self, representations: Vec<String>) -> Self {
        self.representations = if representations.is_empty() {
            None
        } else {
            Some(representations)
        };
        self
    }

    pub fn load(&self) -> Result<Dataset, ConfigError> {
        if !self.root.is_dir() {
            return Err(ConfigError::MissingDatasetRoot(
                self.root.display().to_string(),
            ));
        }

        let mut contracts = Vec::new();
        for repr_dir in sorted_subdirs(&self.root) {
            let Some(representation) = file_name(&repr_dir) else {
                continue;
            };
            if let Some(wanted) = &self.representations {
                if !wanted.iter().any(|r| r == &representation) {
                    debug!("Skipping representation {}", representation);
                    continue;
                }
            }

            for label_dir in sorted_subdirs(&repr_dir) {
                let Some(label) = file_name(&label_dir).and_then(|n| n.parse::<Label>().ok())
                else {
                    debug!("Ignoring non-label directory {}", label_dir.display());
                    continue;
                };
                contracts.extend(load_label_dir(&label_dir, &representation, label));
            }
        }

        info!(
            "Loaded {} contracts from {}",
            contracts.len(),
            self.root.display()
        );

        Ok(Dataset {
            root: self.root.clone(),
            contracts,
        })
    }
}

fn load_label_dir(dir: &Path, representation: &str, label: Label) -> Vec<Contract> {
    let mut seen = HashSet::new();
    let mut contracts = Vec::new();

    for path in sorted_files(dir) {
        let Some(name) = file_name(&path) else {
            continue;
        };
        let id = contract_id(&name);
        if id.is_empty() {
            continue;
        }
        if !seen.insert(id.to_string()) {
            warn!(
                "Duplicate contract id {} in {}; keeping the first file",
                id,
                dir.display()
            );
            continue;
        }

        let source = match fs::read(&path) {
            Ok(bytes) => decode_latin1(&bytes),
            Err(e) => {
                warn!("Skipping unreadable contract {}: {}", path.display(), e);
                continue;
            }
        };

        let similar_dir = dir.join(format!("{}{}", id, SIMILAR_DIR_SUFFIX));
        let similar = if similar_dir.is_dir() {
            load_similar(&similar_dir)
        } else {
            Vec::new()
        };

        contracts.push(Contract {
            key: ContractKey::new(representation, label, id),
            path,
            source,
            similar,
        });
    }

    contracts
}

/// Files are named `<rank>_<label>.<ext>`.
fn load_similar(dir: &Path) -> Vec<SimilarContract> {
    let mut similar: Vec<SimilarContract> = sorted_files(dir)
        .into_iter()
        .filter_map(|path| {
            let name = file_name(&path)?;
            let stem = contract_id(&name);
            let (rank, label) = match stem.split_once('_') {
                Some((rank, label)) => (rank, label.parse::<Label>().ok()),
                None => (stem, None),
            };
            let rank = match rank.parse::<u32>() {
                Ok(rank) => rank,
                Err(_) => {
                    warn!("Ignoring similar contract with no rank: {}", path.display());
                    return None;
                }
            };

            match fs::read(&path) {
                Ok(bytes) => Some(SimilarContract {
                    rank,
                    label,
                    text: decode_latin1(&bytes),
                }),
                Err(e) => {
                    warn!("Skipping unreadable similar contract {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect();

    similar.sort_by_key(|s| s.rank);
    similar
}

/// File name up to its first `.`.
pub fn contract_id(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

/// Every byte maps to the code point of the same value, so decoding never fails.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Finds the file holding `contract_id` under `<root>/<representation>/<label>/`.
pub fn locate_contract(
    root: &Path,
    representation: &str,
    label: Label,
    id: &str,
) -> Option<PathBuf> {
    let dir = root.join(representation).join(label.dir_name());
    sorted_files(&dir)
        .into_iter()
        .find(|path| file_name(path).map_or(false, |name| contract_id(&name) == id))
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    children(dir, true)
}

/// Regular, non-hidden files directly under `dir`.
fn sorted_files(dir: &Path) -> Vec<PathBuf> {
    children(dir, false)
}

fn children(dir: &Path, want_dirs: bool) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }

    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Cannot read dataset entry: {}", e);
                None
            }
        })
        .filter(|entry| {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let kind_matches = if want_dirs {
                entry.file_type().is_dir()
            } else {
                entry.file_type().is_file()
            };
            !hidden && kind_matches
        })
        .map(|entry| entry.into_path())
        .collect()
}
