use thiserror::Error;

/// Configuration problems. These are fatal: a run never starts with them.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown model identifier: '{0}'")]
    UnknownModel(String),

    #[error("{0} not set")]
    MissingApiKey(&'static str),

    #[error("Dataset root not found: {0}")]
    MissingDatasetRoot(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Per-contract failures. The orchestrator logs these and skips the contract.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("{stage}: gave up after {attempts} attempts ({last_error})")]
    RetriesExhausted {
        stage: String,
        attempts: u32,
        last_error: String,
    },

    #[error("{stage}: malformed response: {reason}")]
    MalformedResponse { stage: String, reason: String },

    #[error("per-function analysis unresolved for: {}", .0.join(", "))]
    UnresolvedFunctions(Vec<String>),

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClassificationError {
    pub fn malformed(stage: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedResponse {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }

    /// Short tag used to bucket skip counts in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::UnresolvedFunctions(_) => "unresolved_dependency",
            Self::Prompt(_) => "prompt",
            Self::Io(_) => "io",
        }
    }
}
