use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Binary reentrancy verdict, used both for ground truth and for predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Label {
    Reentrant,
    Safe,
}

impl Label {
    pub const ALL: [Label; 2] = [Label::Reentrant, Label::Safe];

    /// Lowercase form used for directory names in datasets and result stores.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Reentrant => "reentrant",
            Self::Safe => "safe",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reentrant => write!(f, "Reentrant"),
            Self::Safe => write!(f, "Safe"),
        }
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_matches(|c: char| c == '\'' || c == '"').to_lowercase().as_str() {
            "reentrant" => Ok(Self::Reentrant),
            "safe" => Ok(Self::Safe),
            other => Err(format!("'{}' is neither Reentrant nor Safe", other)),
        }
    }
}

impl TryFrom<String> for Label {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAI,
    Gemini,
}

impl ProviderKind {
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => None,
            Self::Gemini => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
        }
    }
}

/// Closed set of models the evaluation knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelId {
    Gpt4o,
    Gpt4oMini,
    O3Mini,
    Gemini20FlashLite,
    Gemini15Flash,
}

impl ModelId {
    pub const ALL: [ModelId; 5] = [
        ModelId::Gpt4o,
        ModelId::Gpt4oMini,
        ModelId::O3Mini,
        ModelId::Gemini20FlashLite,
        ModelId::Gemini15Flash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4o => "gpt-4o",
            Self::Gpt4oMini => "gpt-4o-mini",
            Self::O3Mini => "o3-mini",
            Self::Gemini20FlashLite => "gemini-2.0-flash-lite",
            Self::Gemini15Flash => "gemini-1.5-flash",
        }
    }

    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::Gpt4o | Self::Gpt4oMini | Self::O3Mini => ProviderKind::OpenAI,
            Self::Gemini20FlashLite | Self::Gemini15Flash => ProviderKind::Gemini,
        }
    }

    /// Reasoning models reject temperature and JSON mode.
    pub fn is_reasoning(&self) -> bool {
        matches!(self, Self::O3Mini)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|model| model.as_str() == wanted)
            .ok_or_else(|| ConfigError::UnknownModel(wanted.to_string()))
    }
}

impl TryFrom<String> for ModelId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelId> for String {
    fn from(model: ModelId) -> Self {
        model.as_str().to_string()
    }
}

/// Classification strategy selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Direct,
    Retrieval,
    Staged,
    StagedRetrieval,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Retrieval => "retrieval",
            Self::Staged => "staged",
            Self::StagedRetrieval => "staged-retrieval",
        }
    }

    pub fn uses_retrieval(&self) -> bool {
        matches!(self, Self::Retrieval | Self::StagedRetrieval)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "retrieval" | "retrieval-augmented" => Ok(Self::Retrieval),
            "staged" => Ok(Self::Staged),
            "staged-retrieval" => Ok(Self::StagedRetrieval),
            other => Err(format!("Unknown classification mode: {}", other)),
        }
    }
}

/// Identity of a contract inside a dataset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContractKey {
    pub representation: String,
    pub label: Label,
    pub contract_id: String,
}

impl ContractKey {
    pub fn new(representation: impl Into<String>, label: Label, contract_id: impl Into<String>) -> Self {
        Self {
            representation: representation.into(),
            label,
            contract_id: contract_id.into(),
        }
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.representation,
            self.label.dir_name(),
            self.contract_id
        )
    }
}

/// What a classification strategy produces for one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub classification: Label,
    pub explanation: String,
}

/// Persisted outcome of one `(model, mode, contract)` classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub classification: Label,
    pub explanation: String,
    pub model: ModelId,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl ClassificationResult {
    pub fn new(verdict: Verdict, model: ModelId, mode: Mode) -> Self {
        Self {
            classification: verdict.classification,
            explanation: verdict.explanation,
            model,
            mode,
            recorded_at: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parsing_is_case_insensitive() {
        assert_eq!("Reentrant".parse::<Label>().unwrap(), Label::Reentrant);
        assert_eq!(" safe ".parse::<Label>().unwrap(), Label::Safe);
        assert_eq!("'SAFE'".parse::<Label>().unwrap(), Label::Safe);
        assert!("unknown".parse::<Label>().is_err());
        assert!("".parse::<Label>().is_err());
    }

    #[test]
    fn test_label_serde_accepts_any_case() {
        let label: Label = serde_json::from_str("\"reentrant\"").unwrap();
        assert_eq!(label, Label::Reentrant);
        assert_eq!(serde_json::to_string(&Label::Safe).unwrap(), "\"Safe\"");
        assert!(serde_json::from_str::<Label>("\"maybe\"").is_err());
    }

    #[test]
    fn test_unknown_model_fails_fast() {
        let err = "gpt-5-ultra".parse::<ModelId>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModel(ref m) if m == "gpt-5-ultra"));
    }

    #[test]
    fn test_model_provider_mapping() {
        assert_eq!("gpt-4o".parse::<ModelId>().unwrap().provider(), ProviderKind::OpenAI);
        assert_eq!(
            "gemini-1.5-flash".parse::<ModelId>().unwrap().provider(),
            ProviderKind::Gemini
        );
        assert!(ModelId::O3Mini.is_reasoning());
        assert!(!ModelId::Gpt4o.is_reasoning());
    }

    #[test]
    fn test_result_round_trips_through_json() {
        let result = ClassificationResult::new(
            Verdict {
                classification: Label::Reentrant,
                explanation: "{\"vulnerable_function\": \"withdraw\"}".to_string(),
            },
            ModelId::Gpt4oMini,
            Mode::StagedRetrieval,
        );

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"gpt-4o-mini\""));
        assert!(json.contains("\"staged-retrieval\""));

        let parsed: ClassificationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.classification, Label::Reentrant);
        assert_eq!(parsed.model, ModelId::Gpt4oMini);
    }
}
