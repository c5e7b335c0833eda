//! Contract analysis orchestration.
//!
//! [`ContractAnalyzer`] walks a [`Dataset`], classifies every contract with the
//! strategy selected once from the run's [`Mode`], and persists one record per
//! contract in a [`ResultStore`]. Per-contract failures are logged and counted, never
//! propagated; only configuration problems stop a run.

pub mod context;
pub mod dataset;
pub mod store;

pub use dataset::{Contract, Dataset, DatasetLoader, SimilarContract};
pub use store::{load_run, Observation, ResultStore};

use crate::config::EvalConfig;
use crate::error::{ClassificationError, ConfigError};
use crate::llm::prompts::{PromptBuilder, CLASSIFY_DIRECT, CLASSIFY_WITH_CONTEXT};
use crate::llm::provider::{LLMProvider, TokenUsage};
use crate::llm::schemas::{parse_response, ClassificationResponse};
use crate::llm::session::LLMSession;
use crate::retry::RetryingInvoker;
use crate::staged::StagedClassifier;
use crate::types::{ClassificationResult, Label, Mode, Verdict};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Classification strategy, resolved from [`Mode`] before any contract is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Retrieval,
    Staged { with_retrieval: bool },
}

impl From<Mode> for Strategy {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Direct => Strategy::Direct,
            Mode::Retrieval => Strategy::Retrieval,
            Mode::Staged | Mode::StagedRetrieval => Strategy::Staged {
                with_retrieval: mode.uses_retrieval(),
            },
        }
    }
}

impl Strategy {
    pub async fn classify(
        &self,
        session: &LLMSession<'_>,
        contract: &Contract,
        describe_similar: bool,
    ) -> Result<Verdict, ClassificationError> {
        match *self {
            Strategy::Direct => classify_single_pass(session, contract, None).await,
            Strategy::Retrieval => {
                let context =
                    context::assemble_context(session, &contract.similar, describe_similar).await;
                if context.is_none() {
                    warn!(
                        "{}: no retrieval context available, classifying without it",
                        contract.key
                    );
                }
                classify_single_pass(session, contract, context.as_deref()).await
            }
            Strategy::Staged { with_retrieval } => {
                let context = if with_retrieval {
                    context::assemble_context(session, &contract.similar, describe_similar).await
                } else {
                    None
                };
                StagedClassifier::new(session)
                    .classify(&contract.source, context.as_deref())
                    .await
            }
        }
    }
}

async fn classify_single_pass(
    session: &LLMSession<'_>,
    contract: &Contract,
    retrieval_context: Option<&str>,
) -> Result<Verdict, ClassificationError> {
    let mut variables = HashMap::new();
    variables.insert("contract_source", contract.source.clone());

    let template = match retrieval_context {
        Some(context) => {
            variables.insert("similar_contexts", context.to_string());
            CLASSIFY_WITH_CONTEXT
        }
        None => CLASSIFY_DIRECT,
    };

    let content = session.complete_json(template, template, &variables).await?;
    let response: ClassificationResponse = parse_response(template, &content)?;
    response.into_verdict(template)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelTally {
    pub processed: usize,
    pub correct: usize,
}

/// Outcome of one orchestrator run. Skipped contracts never enter a denominator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub model: String,
    pub mode: String,
    pub total: usize,
    pub processed: usize,
    pub correct: usize,
    /// Contracts left untouched because a record already existed.
    pub already_done: usize,
    /// Skip counts keyed by failure kind.
    pub skipped: BTreeMap<String, usize>,
    pub per_label: BTreeMap<String, LabelTally>,
    pub usage: TokenUsage,
}

impl RunSummary {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    /// `None` when nothing was processed.
    pub fn accuracy(&self) -> Option<f64> {
        if self.processed == 0 {
            None
        } else {
            Some(self.correct as f64 / self.processed as f64)
        }
    }

    fn record(&mut self, outcome: ContractOutcome) {
        match outcome {
            ContractOutcome::Classified {
                groundtruth,
                predicted,
                usage,
            } => {
                let correct = groundtruth == predicted;
                self.processed += 1;
                self.correct += usize::from(correct);
                let tally = self
                    .per_label
                    .entry(groundtruth.dir_name().to_string())
                    .or_default();
                tally.processed += 1;
                tally.correct += usize::from(correct);
                self.usage += usage;
            }
            ContractOutcome::Skipped { reason, usage } => {
                *self.skipped.entry(reason.to_string()).or_insert(0) += 1;
                self.usage += usage;
            }
            ContractOutcome::AlreadyDone => self.already_done += 1,
        }
    }
}

#[derive(Debug)]
enum ContractOutcome {
    Classified {
        groundtruth: Label,
        predicted: Label,
        usage: TokenUsage,
    },
    Skipped {
        reason: &'static str,
        usage: TokenUsage,
    },
    AlreadyDone,
}

/// Everything a worker needs; cheap to clone into a task.
#[derive(Clone)]
struct Worker {
    provider: Arc<dyn LLMProvider>,
    prompts: Arc<PromptBuilder>,
    config: Arc<EvalConfig>,
    store: ResultStore,
    mode: Mode,
    strategy: Strategy,
    skip_existing: bool,
}

impl Worker {
    async fn process(&self, contract: &Contract) -> ContractOutcome {
        let model = self.config.model;
        if self.skip_existing && self.store.exists(model, self.mode, &contract.key) {
            debug!("{}: record exists, skipping", contract.key);
            return ContractOutcome::AlreadyDone;
        }

        let invoker = RetryingInvoker::new(self.config.retry_policy());
        let session = LLMSession::new(
            self.provider.as_ref(),
            &self.prompts,
            &invoker,
            self.config.generation.clone(),
        );

        let verdict = self
            .strategy
            .classify(&session, contract, self.config.describe_similar)
            .await;
        let usage = session.usage();

        let verdict = match verdict {
            Ok(verdict) => verdict,
            Err(e) => {
                error!("{}: skipped ({})", contract.key, e);
                return ContractOutcome::Skipped {
                    reason: e.kind(),
                    usage,
                };
            }
        };

        let predicted = verdict.classification;
        let result = ClassificationResult::new(verdict, model, self.mode);
        if let Err(e) = self.store.write(&contract.key, &result) {
            error!("{}: cannot store result: {}", contract.key, e);
            return ContractOutcome::Skipped {
                reason: ClassificationError::from(e).kind(),
                usage,
            };
        }

        info!(
            "{}: predicted {} (ground truth {})",
            contract.key, predicted, contract.key.label
        );
        ContractOutcome::Classified {
            groundtruth: contract.key.label,
            predicted,
            usage,
        }
    }
}

pub struct ContractAnalyzer {
    worker: Worker,
}

impl ContractAnalyzer {
    pub fn new(
        config: EvalConfig,
        mode: Mode,
        provider: Arc<dyn LLMProvider>,
        store: ResultStore,
    ) -> Self {
        Self {
            worker: Worker {
                provider,
                prompts: Arc::new(PromptBuilder::new()),
                config: Arc::new(config),
                store,
                mode,
                strategy: Strategy::from(mode),
                skip_existing: false,
            },
        }
    }

    /// Leave contracts that already have a record alone instead of overwriting them.
    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.worker.skip_existing = skip;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.worker.strategy
    }

    pub fn store(&self) -> &ResultStore {
        &self.worker.store
    }

    /// Loads the dataset at `dataset_root` and classifies it. A missing root is the
    /// only error; everything per-contract ends up in the summary.
    pub async fn analyze_path(
        &self,
        dataset_root: &Path,
        representations: Vec<String>,
        parallel: bool,
    ) -> Result<RunSummary, ConfigError> {
        let dataset = DatasetLoader::new(dataset_root)
            .with_representations(representations)
            .load()?;
        Ok(self.analyze(Arc::new(dataset), parallel).await)
    }

    pub async fn analyze(&self, dataset: Arc<Dataset>, parallel: bool) -> RunSummary {
        let config = &self.worker.config;
        info!(
            "Classifying {} contracts with {} in {} mode ({})",
            dataset.len(),
            config.model,
            self.worker.mode,
            if parallel { "parallel" } else { "sequential" }
        );

        let mut summary = RunSummary {
            model: config.model.to_string(),
            mode: self.worker.mode.to_string(),
            total: dataset.len(),
            ..RunSummary::default()
        };

        if parallel {
            self.run_parallel(dataset, &mut summary).await;
        } else {
            for contract in &dataset.contracts {
                let outcome = self.worker.process(contract).await;
                summary.record(outcome);
            }
        }

        info!(
            "Run finished: {} processed, {} skipped, {} already done, accuracy {}",
            summary.processed,
            summary.skipped_total(),
            summary.already_done,
            summary
                .accuracy()
                .map(|a| format!("{:.2}%", a * 100.0))
                .unwrap_or_else(|| "n/a".to_string())
        );
        summary
    }

    /// Each contract index is handed to exactly one task, so no two tasks ever
    /// write the same record.
    async fn run_parallel(&self, dataset: Arc<Dataset>, summary: &mut RunSummary) {
        let permits = Arc::new(Semaphore::new(self.worker.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for index in 0..dataset.contracts.len() {
            let worker = self.worker.clone();
            let dataset = Arc::clone(&dataset);
            let permits = Arc::clone(&permits);

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return ContractOutcome::Skipped {
                        reason: "cancelled",
                        usage: TokenUsage::default(),
                    };
                };
                worker.process(&dataset.contracts[index]).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!("Worker task failed: {}", e);
                    summary.record(ContractOutcome::Skipped {
                        reason: "worker_failed",
                        usage: TokenUsage::default(),
                    });
                }
            }
        }
    }
}
