use crate::llm::provider::{LLMError, LLMProvider, LLMRequest, LLMResponse, TokenUsage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Scripted provider for tests. Replies are chosen by the first registered pattern
/// found in the system or user prompt; patterns are checked in registration order.
pub struct MockLLMProvider {
    responses: Vec<(String, String)>,
    default_response: String,
    call_count: AtomicUsize,
    failures_remaining: AtomicUsize,
    should_fail: bool,
    prompts: Mutex<Vec<String>>,
}

impl Default for MockLLMProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLLMProvider {
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            default_response: Self::safe_response(),
            call_count: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            should_fail: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        let mut provider = Self::new();
        provider.should_fail = true;
        provider
    }

    pub fn with_response(mut self, pattern: &str, response: impl Into<String>) -> Self {
        self.responses.push((pattern.to_string(), response.into()));
        self
    }

    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// The next `n` calls fail with a rate-limit error before normal replies resume.
    pub fn fail_times(self, n: usize) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) {
        self.call_count.store(0, Ordering::SeqCst);
    }

    /// User prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn safe_response() -> String {
        serde_json::json!({
            "classification": "Safe",
            "explanation": "{\"safeguard\": \"state updated before external call\"}"
        })
        .to_string()
    }

    pub fn reentrant_response() -> String {
        serde_json::json!({
            "classification": "Reentrant",
            "explanation": "{\"vulnerable_function\": \"withdraw\", \"attack\": \"re-enter before balance reset\"}"
        })
        .to_string()
    }

    fn generate_response(&self, request: &LLMRequest) -> String {
        let combined_prompt = format!("{} {}", request.system_prompt, request.user_prompt);

        self.responses
            .iter()
            .find(|(pattern, _)| combined_prompt.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.default_response.clone())
    }
}

#[async_trait]
impl LLMProvider for MockLLMProvider {
    async fn analyze(&self, request: LLMRequest) -> Result<LLMResponse, LLMError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.user_prompt.clone());

        if self.should_fail {
            return Err(LLMError::ApiError(
                "Mock provider configured to fail".to_string(),
            ));
        }

        let consumed_failure = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed_failure {
            return Err(LLMError::RateLimitExceeded("mock 429".to_string()));
        }

        tokio::task::yield_now().await;

        Ok(LLMResponse {
            content: self.generate_response(&request),
            model: "mock-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            },
        })
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
