use crate::config::EvalConfig;
use crate::error::ConfigError;
use crate::types::ModelId;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
        ChatCompletionResponseFormat, ChatCompletionResponseFormatType,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::Serialize;
use std::ops::AddAssign;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl From<OpenAIError> for LLMError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::Reqwest(e) => LLMError::NetworkError(e.to_string()),
            OpenAIError::JSONDeserialize(e) => LLMError::InvalidResponse(e.to_string()),
            other => {
                let message = other.to_string();
                let lowered = message.to_lowercase();
                if lowered.contains("rate") || lowered.contains("429") || lowered.contains("quota") {
                    LLMError::RateLimitExceeded(message)
                } else {
                    LLMError::ApiError(message)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LLMRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask for a JSON object reply. Free-text prompts (similar-contract descriptions)
    /// leave this off.
    pub expects_json: bool,
}

impl LLMRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: 0.0,
            max_tokens: 0,
            expects_json: true,
        }
    }

    pub fn with_generation(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn free_text(mut self) -> Self {
        self.expects_json = false;
        self
    }
}

#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// A single round trip to a chat-completion service. Implementations must not retry;
/// [`crate::retry::RetryingInvoker`] owns the retry policy.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn analyze(&self, request: LLMRequest) -> Result<LLMResponse, LLMError>;

    fn model_name(&self) -> &str;
}

/// Chat-completion client for every [`ModelId`]. Gemini models are reached through
/// Google's OpenAI-compatible endpoint.
pub struct OpenAIProvider {
    client: Client<OpenAIConfig>,
    model: ModelId,
    default_temperature: f32,
    default_max_tokens: u32,
}

impl OpenAIProvider {
    pub fn from_config(config: &EvalConfig) -> Result<Self, ConfigError> {
        let kind = config.model.provider();
        let api_key = match &config.provider.api_key {
            Some(key) => key.clone(),
            None => std::env::var(kind.api_key_var())
                .map_err(|_| ConfigError::MissingApiKey(kind.api_key_var()))?,
        };
        let base_url = config
            .provider
            .base_url
            .clone()
            .or_else(|| kind.default_base_url().map(str::to_string));

        Ok(Self::with_config(
            api_key,
            base_url,
            config.model,
            config.generation.temperature,
            config.generation.max_tokens,
        ))
    }

    pub fn with_config(
        api_key: String,
        base_url: Option<String>,
        model: ModelId,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = base_url {
            openai_config = openai_config.with_api_base(base);
        }

        Self {
            client: Client::with_config(openai_config),
            model,
            default_temperature: temperature,
            default_max_tokens: max_tokens,
        }
    }

    fn build_messages(&self, request: &LLMRequest) -> Vec<ChatCompletionRequestMessage> {
        if self.model.is_reasoning() {
            let combined_prompt = format!(
                "Instructions:\n{}\n\nTask:\n{}",
                request.system_prompt, request.user_prompt
            );

            let user_message = ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(combined_prompt),
                ..Default::default()
            };
            return vec![ChatCompletionRequestMessage::User(user_message)];
        }

        let system_message = ChatCompletionRequestSystemMessage {
            content: request.system_prompt.clone(),
            ..Default::default()
        };
        let user_message = ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(request.user_prompt.clone()),
            ..Default::default()
        };

        vec![
            ChatCompletionRequestMessage::System(system_message),
            ChatCompletionRequestMessage::User(user_message),
        ]
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn analyze(&self, request: LLMRequest) -> Result<LLMResponse, LLMError> {
        let is_reasoning_model = self.model.is_reasoning();

        let temperature = if request.temperature > 0.0 {
            request.temperature
        } else {
            self.default_temperature
        };
        let max_tokens = if request.max_tokens > 0 {
            request.max_tokens
        } else {
            self.default_max_tokens
        };

        debug!(
            "Sending request to {} (temperature {}, max tokens {}, reasoning {})",
            self.model, temperature, max_tokens, is_reasoning_model
        );

        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder
            .model(self.model.as_str())
            .messages(self.build_messages(&request));

        if is_reasoning_model {
            debug!("Using reasoning model configuration (no temperature, no JSON format)");
        } else {
            request_builder
                .temperature(temperature)
                .max_tokens(completion_token_limit(max_tokens));
            if request.expects_json {
                request_builder.response_format(ChatCompletionResponseFormat {
                    r#type: ChatCompletionResponseFormatType::JsonObject,
                });
            }
        }

        let api_request = request_builder
            .build()
            .map_err(|e| LLMError::ApiError(e.to_string()))?;

        let response = self.client.chat().create(api_request).await.map_err(|e| {
            let err = LLMError::from(e);
            warn!("{} request failed: {}", self.model, err);
            err
        })?;

        let mut content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| LLMError::InvalidResponse("No content in response".to_string()))?;

        if is_reasoning_model && request.expects_json {
            content = extract_json_from_text(&content);
        }

        let usage = response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        debug!("Received response with {} tokens", usage.total_tokens);

        Ok(LLMResponse {
            content,
            model: response.model,
            usage,
        })
    }

    fn model_name(&self) -> &str {
        self.model.as_str()
    }
}

/// The chat-completion API takes a 16-bit limit; larger values are clamped.
pub fn completion_token_limit(max_tokens: u32) -> u16 {
    u16::try_from(max_tokens).unwrap_or(u16::MAX)
}

/// Pulls the first JSON object out of a reply that may wrap it in prose or a
/// fenced code block. Returns the input unchanged when no object is found.
pub fn extract_json_from_text(text: &str) -> String {
    if let Some(start) = text.find("```json") {
        let body = &text[start + 7..];
        if let Some(end) = body.find("```") {
            let json_str = body[..end].trim();
            debug!("Found JSON in code block: {}", json_str);
            return json_str.to_string();
        }
    }

    if let Some(start) = text.find('{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escape_next = false;

        for (i, &byte) in text.as_bytes()[start..].iter().enumerate() {
            if escape_next {
                escape_next = false;
                continue;
            }

            match byte {
                b'\\' if in_string => escape_next = true,
                b'"' => in_string = !in_string,
                b'{' if !in_string => depth += 1,
                b'}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        return text[start..start + i + 1].to_string();
                    }
                }
                _ => {}
            }
        }
    }

    warn!("Could not extract JSON from response, returning full text");
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_code_block() {
        let text = "Here is my verdict:\n```json\n{\"classification\": \"Safe\"}\n```\nDone.";
        assert_eq!(extract_json_from_text(text), "{\"classification\": \"Safe\"}");
    }

    #[test]
    fn test_extract_json_from_prose() {
        let text = r#"After review: {"a": {"b": "}"}, "c": 1} trailing"#;
        assert_eq!(extract_json_from_text(text), r#"{"a": {"b": "}"}, "c": 1}"#);
    }

    #[test]
    fn test_extract_json_without_object_returns_input() {
        assert_eq!(extract_json_from_text("no json here"), "no json here");
    }

    #[test]
    fn test_completion_token_limit_is_clamped() {
        assert_eq!(completion_token_limit(4000), 4000);
        assert_eq!(completion_token_limit(70_000), u16::MAX);
    }

    #[test]
    fn test_token_usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        total += TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        };
        assert_eq!(total.total_tokens, 17);
        assert_eq!(total.prompt_tokens, 11);
    }

    #[test]
    fn test_provider_reports_model_name() {
        let provider = OpenAIProvider::with_config(
            "test_key".to_string(),
            None,
            ModelId::Gpt4oMini,
            0.0,
            4000,
        );
        assert_eq!(provider.model_name(), "gpt-4o-mini");
    }
}
