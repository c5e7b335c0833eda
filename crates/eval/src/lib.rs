//! XRAG Eval - Reentrancy Classification Evaluation
//!
//! This crate classifies smart contracts as reentrant or safe with an LLM, either in
//! a single pass (optionally augmented with similar contracts) or through a staged
//! chain-of-thought pipeline, persists every verdict, and measures how the
//! misclassifications of two runs overlap.

pub mod analytics;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod llm;
pub mod report;
pub mod retry;
pub mod staged;
pub mod types;

pub use analytics::{compare, reduce, ComparisonResult, RunReport, RunStatistics};
pub use analyzer::{ContractAnalyzer, DatasetLoader, ResultStore, RunSummary, Strategy};
pub use config::EvalConfig;
pub use error::{ClassificationError, ConfigError};
pub use llm::{LLMProvider, MockLLMProvider, OpenAIProvider};
pub use report::{ExplanationSources, ReportMaterializer, ReviewEntry, ReviewTable};
pub use retry::{RetryOutcome, RetryPolicy, RetryingInvoker};
pub use staged::StagedClassifier;
pub use types::{ClassificationResult, ContractKey, Label, ModelId, Mode, Verdict};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
