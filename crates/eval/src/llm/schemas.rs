//! Wire shapes of the JSON objects the prompts ask the model to return.

use crate::error::ClassificationError;
use crate::llm::provider::extract_json_from_text;
use crate::types::{Label, Verdict};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reply to `classify_direct` / `classify_with_context`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationResponse {
    pub classification: Label,
    pub explanation: Value,
}

impl ClassificationResponse {
    /// Explanations may arrive as a JSON string or as a nested object; objects are
    /// re-serialized so the stored explanation is always a string.
    pub fn into_verdict(self, stage: &str) -> Result<Verdict, ClassificationError> {
        let explanation = match self.explanation {
            Value::String(text) => text,
            value @ (Value::Object(_) | Value::Array(_)) => value.to_string(),
            other => {
                return Err(ClassificationError::malformed(
                    stage,
                    format!("explanation is not text: {}", other),
                ))
            }
        };

        if explanation.trim().is_empty() {
            return Err(ClassificationError::malformed(stage, "empty explanation"));
        }

        Ok(Verdict {
            classification: self.classification,
            explanation,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriageResponse {
    pub functions_to_analyze: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionAnalysisResponse {
    pub function_name: String,
    pub analysis: FunctionAnalysisBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionAnalysisBody {
    #[serde(deserialize_with = "lenient_bool")]
    pub has_external_call: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub follows_cei_pattern: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub has_reentrancy_guard: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub is_vulnerable_in_isolation: bool,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrossFunctionResponse {
    pub cross_function_analysis: CrossFunctionBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrossFunctionBody {
    #[serde(deserialize_with = "lenient_bool")]
    pub is_exploitable: bool,
    #[serde(default)]
    pub exploit_scenario: String,
}

/// Accepts `true`/`false` as well as their quoted forms.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Ok(true),
            "false" | "no" => Ok(false),
            other => Err(de::Error::custom(format!("expected boolean, got '{}'", other))),
        },
        other => Err(de::Error::custom(format!("expected boolean, got {}", other))),
    }
}

/// Parses a model reply into `T`, falling back to the first embedded JSON object
/// when the reply carries surrounding prose.
pub fn parse_response<T: DeserializeOwned>(
    stage: &str,
    content: &str,
) -> Result<T, ClassificationError> {
    match serde_json::from_str(content.trim()) {
        Ok(parsed) => Ok(parsed),
        Err(first_err) => {
            let extracted = extract_json_from_text(content);
            serde_json::from_str(&extracted)
                .map_err(|_| ClassificationError::malformed(stage, first_err))
        }
    }
}
