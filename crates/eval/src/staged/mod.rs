//! Four-phase chain-of-thought classification.
//!
//! Triage lists the functions that make external calls, each of those functions is
//! analysed on its own (concurrently), a single cross-function pass looks for
//! re-entry paths between them, and [`synthesize`] reduces the artifacts to a
//! verdict with a fixed rule. Phases only move forward; a phase that cannot produce
//! its artifact aborts the contract instead of defaulting a verdict.

use crate::error::ClassificationError;
use crate::llm::prompts::{COT_CROSS_FUNCTION, COT_FUNCTION, COT_TRIAGE};
use crate::llm::schemas::{
    parse_response, CrossFunctionResponse, FunctionAnalysisResponse, TriageResponse,
};
use crate::llm::session::LLMSession;
use crate::types::{Label, Verdict};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

pub const NO_CROSS_FUNCTION_PATH: &str =
    "No plausible cross-function reentrancy paths were identified.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Triage,
    PerFunction,
    CrossFunction,
    Synthesis,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Triage => "triage",
            Self::PerFunction => "per_function_analysis",
            Self::CrossFunction => "cross_function_analysis",
            Self::Synthesis => "synthesis",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TriageResult {
    /// Distinct names in the order the model listed them.
    pub functions_to_analyze: Vec<String>,
}

impl TriageResult {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let functions_to_analyze = names
            .into_iter()
            .map(|name| name.as_ref().trim().trim_end_matches("()").to_string())
            .filter(|name| !name.is_empty() && seen.insert(name.clone()))
            .collect();
        Self {
            functions_to_analyze,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.functions_to_analyze.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionAnalysis {
    pub function_name: String,
    pub has_external_call: bool,
    pub follows_cei_pattern: bool,
    pub has_reentrancy_guard: bool,
    pub is_vulnerable_in_isolation: bool,
    pub reasoning: String,
}

impl FunctionAnalysis {
    fn from_response(requested: &str, response: FunctionAnalysisResponse) -> Self {
        if response.function_name.trim() != requested {
            debug!(
                "Model answered for '{}' while '{}' was requested",
                response.function_name, requested
            );
        }
        let body = response.analysis;
        Self {
            function_name: requested.to_string(),
            has_external_call: body.has_external_call,
            follows_cei_pattern: body.follows_cei_pattern,
            has_reentrancy_guard: body.has_reentrancy_guard,
            is_vulnerable_in_isolation: body.is_vulnerable_in_isolation,
            reasoning: body.reasoning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossFunctionAnalysis {
    pub is_exploitable: bool,
    pub exploit_scenario: String,
}

/// Deterministic phase 4. Reentrant iff some function is vulnerable in isolation or
/// the cross-function pass found an exploitable path.
pub fn synthesize(
    triage: &TriageResult,
    analyses: &[FunctionAnalysis],
    cross_function: Option<&CrossFunctionAnalysis>,
) -> Verdict {
    if triage.is_empty() {
        let explanation = json!({
            "verdict": Label::Safe.to_string(),
            "triggered_by": [],
            "reason": "Triage found no functions with external calls; per-function and cross-function analysis were not needed.",
            "functions": [],
        });
        return Verdict {
            classification: Label::Safe,
            explanation: explanation.to_string(),
        };
    }

    let vulnerable: Vec<&str> = analyses
        .iter()
        .filter(|a| a.is_vulnerable_in_isolation)
        .map(|a| a.function_name.as_str())
        .collect();
    let cross_exploitable = cross_function.map_or(false, |c| c.is_exploitable);

    let mut triggered_by = Vec::new();
    if !vulnerable.is_empty() {
        triggered_by.push(Phase::PerFunction.to_string());
    }
    if cross_exploitable {
        triggered_by.push(Phase::CrossFunction.to_string());
    }

    let classification = if triggered_by.is_empty() {
        Label::Safe
    } else {
        Label::Reentrant
    };

    let explanation = json!({
        "verdict": classification.to_string(),
        "triggered_by": triggered_by,
        "vulnerable_functions": vulnerable,
        "functions": analyses,
        "cross_function": cross_function,
    });

    Verdict {
        classification,
        explanation: explanation.to_string(),
    }
}

/// Runs the staged pipeline for one contract on top of an [`LLMSession`].
pub struct StagedClassifier<'s, 'a> {
    session: &'s LLMSession<'a>,
}

impl<'s, 'a> StagedClassifier<'s, 'a> {
    pub fn new(session: &'s LLMSession<'a>) -> Self {
        Self { session }
    }

    /// `retrieval_context`, when present, is shown to every per-function analysis.
    pub async fn classify(
        &self,
        contract_source: &str,
        retrieval_context: Option<&str>,
    ) -> Result<Verdict, ClassificationError> {
        let triage = self.triage(contract_source).await?;
        if triage.is_empty() {
            info!("Triage found no external calls; skipping per-function and cross-function phases");
            return Ok(synthesize(&triage, &[], None));
        }
        debug!("Triage selected {:?}", triage.functions_to_analyze);

        let analyses = self
            .analyze_functions(contract_source, &triage, retrieval_context)
            .await?;

        let cross_function = self.cross_function(contract_source, &analyses).await?;

        let verdict = synthesize(&triage, &analyses, Some(&cross_function));
        debug!("{} verdict: {}", Phase::Synthesis, verdict.classification);
        Ok(verdict)
    }

    async fn triage(&self, contract_source: &str) -> Result<TriageResult, ClassificationError> {
        let stage = Phase::Triage.to_string();
        let mut variables = HashMap::new();
        variables.insert("contract_source", contract_source.to_string());

        let content = self
            .session
            .complete_json(&stage, COT_TRIAGE, &variables)
            .await?;
        let response: TriageResponse = parse_response(&stage, &content)?;

        Ok(TriageResult::new(response.functions_to_analyze))
    }

    /// Every triaged function must come back with an analysis. Missing ones are
    /// reported together and abort the pipeline.
    async fn analyze_functions(
        &self,
        contract_source: &str,
        triage: &TriageResult,
        retrieval_context: Option<&str>,
    ) -> Result<Vec<FunctionAnalysis>, ClassificationError> {
        let function_context = retrieval_context
            .map(|ctx| format!("\n### Security Analysis of Similar Contracts\n{}\n", ctx))
            .unwrap_or_default();

        let outcomes = join_all(triage.functions_to_analyze.iter().map(|name| {
            self.analyze_function(contract_source, name, &function_context)
        }))
        .await;

        let mut analyses = Vec::with_capacity(outcomes.len());
        let mut unresolved = Vec::new();
        for (name, outcome) in triage.functions_to_analyze.iter().zip(outcomes) {
            match outcome {
                Ok(analysis) => analyses.push(analysis),
                Err(e) => {
                    warn!("Analysis of function '{}' unresolved: {}", name, e);
                    unresolved.push(name.clone());
                }
            }
        }

        if !unresolved.is_empty() {
            return Err(ClassificationError::UnresolvedFunctions(unresolved));
        }
        Ok(analyses)
    }

    async fn analyze_function(
        &self,
        contract_source: &str,
        function_name: &str,
        function_context: &str,
    ) -> Result<FunctionAnalysis, ClassificationError> {
        let stage = format!("{}:{}", Phase::PerFunction, function_name);
        let mut variables = HashMap::new();
        variables.insert("contract_source", contract_source.to_string());
        variables.insert("function_name", function_name.to_string());
        variables.insert("function_context", function_context.to_string());

        let content = self
            .session
            .complete_json(&stage, COT_FUNCTION, &variables)
            .await?;
        let response: FunctionAnalysisResponse = parse_response(&stage, &content)?;

        Ok(FunctionAnalysis::from_response(function_name, response))
    }

    async fn cross_function(
        &self,
        contract_source: &str,
        analyses: &[FunctionAnalysis],
    ) -> Result<CrossFunctionAnalysis, ClassificationError> {
        let stage = Phase::CrossFunction.to_string();
        let analyses_json = serde_json::to_string_pretty(analyses)
            .map_err(|e| ClassificationError::Prompt(e.to_string()))?;

        let mut variables = HashMap::new();
        variables.insert("contract_source", contract_source.to_string());
        variables.insert("analyses_json", analyses_json);

        let content = self
            .session
            .complete_json(&stage, COT_CROSS_FUNCTION, &variables)
            .await?;
        let response: CrossFunctionResponse = parse_response(&stage, &content)?;
        let body = response.cross_function_analysis;

        let exploit_scenario = if body.exploit_scenario.trim().is_empty() && !body.is_exploitable
        {
            NO_CROSS_FUNCTION_PATH.to_string()
        } else {
            body.exploit_scenario
        };

        Ok(CrossFunctionAnalysis {
            is_exploitable: body.is_exploitable,
            exploit_scenario,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationSettings;
    use crate::llm::mock_provider::MockLLMProvider;
    use crate::llm::prompts::PromptBuilder;
    use crate::retry::{RetryPolicy, RetryingInvoker};
    use std::time::Duration;

    fn analysis(name: &str, vulnerable: bool) -> FunctionAnalysis {
        FunctionAnalysis {
            function_name: name.to_string(),
            has_external_call: true,
            follows_cei_pattern: !vulnerable,
            has_reentrancy_guard: false,
            is_vulnerable_in_isolation: vulnerable,
            reasoning: String::new(),
        }
    }

    fn cross(exploitable: bool) -> CrossFunctionAnalysis {
        CrossFunctionAnalysis {
            is_exploitable: exploitable,
            exploit_scenario: NO_CROSS_FUNCTION_PATH.to_string(),
        }
    }

    #[test]
    fn test_synthesis_rule_over_all_flag_combinations() {
        let triage = TriageResult::new(["withdraw", "transfer"]);
        for first in [false, true] {
            for second in [false, true] {
                for exploitable in [false, true] {
                    let analyses = vec![analysis("withdraw", first), analysis("transfer", second)];
                    let verdict = synthesize(&triage, &analyses, Some(&cross(exploitable)));
                    let expected = if first || second || exploitable {
                        Label::Reentrant
                    } else {
                        Label::Safe
                    };
                    assert_eq!(verdict.classification, expected);
                }
            }
        }
    }

    #[test]
    fn test_synthesis_cites_triggering_phase() {
        let triage = TriageResult::new(["withdraw"]);
        let verdict = synthesize(&triage, &[analysis("withdraw", false)], Some(&cross(true)));
        let explanation: serde_json::Value = serde_json::from_str(&verdict.explanation).unwrap();
        assert_eq!(explanation["triggered_by"], json!(["cross_function_analysis"]));
        assert_eq!(explanation["verdict"], "Reentrant");
    }

    #[test]
    fn test_empty_triage_synthesizes_safe() {
        let verdict = synthesize(&TriageResult::default(), &[], None);
        assert_eq!(verdict.classification, Label::Safe);
        assert!(verdict.explanation.contains("no functions with external calls"));
    }

    #[test]
    fn test_triage_names_are_normalized() {
        let triage = TriageResult::new([" withdraw() ", "withdraw", "", "claim"]);
        assert_eq!(triage.functions_to_analyze, vec!["withdraw", "claim"]);
    }

    fn function_reply(name: &str, vulnerable: bool) -> String {
        json!({
            "function_name": name,
            "analysis": {
                "has_external_call": true,
                "follows_cei_pattern": !vulnerable,
                "has_reentrancy_guard": false,
                "is_vulnerable_in_isolation": vulnerable,
                "reasoning": "line 10 call, line 12 write"
            }
        })
        .to_string()
    }

    fn invoker() -> RetryingInvoker {
        RetryingInvoker::new(RetryPolicy::new(2, Duration::ZERO))
    }

    #[tokio::test]
    async fn test_no_external_calls_skips_later_phases() {
        let provider = MockLLMProvider::new()
            .with_response("functions_to_analyze", r#"{"functions_to_analyze": []}"#);
        let prompts = PromptBuilder::new();
        let invoker = invoker();
        let session = LLMSession::new(&provider, &prompts, &invoker, GenerationSettings::default());

        let verdict = StagedClassifier::new(&session)
            .classify("contract Empty {}", None)
            .await
            .unwrap();

        assert_eq!(verdict.classification, Label::Safe);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_full_pipeline_flags_vulnerable_function() {
        let provider = MockLLMProvider::new()
            .with_response("cross_function_analysis", r#"{"cross_function_analysis": {"is_exploitable": false, "exploit_scenario": ""}}"#)
            .with_response("`withdraw`", function_reply("withdraw", true))
            .with_response("`deposit`", function_reply("deposit", false))
            .with_response(
                "functions_to_analyze",
                r#"{"functions_to_analyze": ["withdraw", "deposit"]}"#,
            );
        let prompts = PromptBuilder::new();
        let invoker = invoker();
        let session = LLMSession::new(&provider, &prompts, &invoker, GenerationSettings::default());

        let verdict = StagedClassifier::new(&session)
            .classify("contract Bank { function withdraw() {} function deposit() {} }", None)
            .await
            .unwrap();

        assert_eq!(verdict.classification, Label::Reentrant);
        // triage + two functions + cross-function
        assert_eq!(provider.call_count(), 4);
        assert_eq!(session.usage().total_tokens, 4 * 150);
        assert!(verdict.explanation.contains(NO_CROSS_FUNCTION_PATH));
    }

    #[tokio::test]
    async fn test_unparseable_function_analysis_aborts_pipeline() {
        let provider = MockLLMProvider::new()
            .with_response("cross_function_analysis", r#"{"cross_function_analysis": {"is_exploitable": false, "exploit_scenario": ""}}"#)
            .with_response("`withdraw`", "I think it is fine")
            .with_response("`deposit`", function_reply("deposit", false))
            .with_response(
                "functions_to_analyze",
                r#"{"functions_to_analyze": ["withdraw", "deposit"]}"#,
            );
        let prompts = PromptBuilder::new();
        let invoker = invoker();
        let session = LLMSession::new(&provider, &prompts, &invoker, GenerationSettings::default());

        let err = StagedClassifier::new(&session)
            .classify("contract Bank {}", None)
            .await
            .unwrap_err();

        match err {
            ClassificationError::UnresolvedFunctions(names) => assert_eq!(names, vec!["withdraw"]),
            other => panic!("unexpected error: {}", other),
        }
        // cross-function phase never ran
        assert_eq!(provider.call_count(), 3);
    }

    fn bank_provider(cross_reply: &str) -> MockLLMProvider {
        MockLLMProvider::new()
            .with_response("cross_function_analysis", cross_reply)
            .with_response("`withdraw`", function_reply("withdraw", false))
            .with_response("`deposit`", function_reply("deposit", false))
            .with_response(
                "functions_to_analyze",
                r#"{"functions_to_analyze": ["withdraw", "deposit"]}"#,
            )
    }

    #[tokio::test]
    async fn test_retrieval_context_only_reaches_function_prompts() {
        let provider = bank_provider(
            r#"{"cross_function_analysis": {"is_exploitable": false, "exploit_scenario": ""}}"#,
        );
        let prompts = PromptBuilder::new();
        let invoker = invoker();
        let session = LLMSession::new(&provider, &prompts, &invoker, GenerationSettings::default());

        let verdict = StagedClassifier::new(&session)
            .classify("contract Bank {}", Some("Neighbor guards withdraw with nonReentrant"))
            .await
            .unwrap();
        assert_eq!(verdict.classification, Label::Safe);

        let sent = provider.prompts();
        assert_eq!(sent.len(), 4);
        let (triage, rest) = sent.split_first().unwrap();
        let (cross, functions) = rest.split_last().unwrap();

        assert!(!triage.contains("Neighbor guards withdraw"));
        assert!(!cross.contains("Neighbor guards withdraw"));
        assert_eq!(functions.len(), 2);
        for prompt in functions {
            assert!(prompt.contains("### Security Analysis of Similar Contracts"));
            assert!(prompt.contains("Neighbor guards withdraw with nonReentrant"));
        }
    }

    #[tokio::test]
    async fn test_cross_function_failure_aborts_contract() {
        let provider = bank_provider("no structured answer today");
        let prompts = PromptBuilder::new();
        let invoker = invoker();
        let session = LLMSession::new(&provider, &prompts, &invoker, GenerationSettings::default());

        let err = StagedClassifier::new(&session)
            .classify("contract Bank {}", None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "malformed_response");
        assert!(err.to_string().contains("cross_function_analysis"));
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn test_triage_failure_is_not_defaulted() {
        let provider = MockLLMProvider::failing();
        let prompts = PromptBuilder::new();
        let invoker = invoker();
        let session = LLMSession::new(&provider, &prompts, &invoker, GenerationSettings::default());

        let err = StagedClassifier::new(&session)
            .classify("contract Bank {}", None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "retries_exhausted");
        assert!(err.to_string().contains("triage"));
        assert_eq!(provider.call_count(), 2);
    }
}
