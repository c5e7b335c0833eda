use crate::config::GenerationSettings;
use crate::error::ClassificationError;
use crate::llm::prompts::PromptBuilder;
use crate::llm::provider::{LLMProvider, LLMRequest, TokenUsage};
use crate::retry::RetryingInvoker;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Prompt rendering, retried invocation and token accounting for one contract.
///
/// Borrowed by every stage of a classification so that concurrent per-function
/// calls share the same invoker and usage counter.
pub struct LLMSession<'a> {
    provider: &'a dyn LLMProvider,
    prompts: &'a PromptBuilder,
    invoker: &'a RetryingInvoker,
    generation: GenerationSettings,
    usage: Mutex<TokenUsage>,
}

impl<'a> LLMSession<'a> {
    pub fn new(
        provider: &'a dyn LLMProvider,
        prompts: &'a PromptBuilder,
        invoker: &'a RetryingInvoker,
        generation: GenerationSettings,
    ) -> Self {
        Self {
            provider,
            prompts,
            invoker,
            generation,
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Renders `template`, sends it with JSON mode on, and returns the raw reply.
    pub async fn complete_json(
        &self,
        stage: &str,
        template: &str,
        variables: &HashMap<&str, String>,
    ) -> Result<String, ClassificationError> {
        self.complete(stage, template, variables, true).await
    }

    pub async fn complete_text(
        &self,
        stage: &str,
        template: &str,
        variables: &HashMap<&str, String>,
    ) -> Result<String, ClassificationError> {
        self.complete(stage, template, variables, false).await
    }

    async fn complete(
        &self,
        stage: &str,
        template: &str,
        variables: &HashMap<&str, String>,
        expects_json: bool,
    ) -> Result<String, ClassificationError> {
        let (system_prompt, user_prompt) = self.prompts.build_prompt(template, variables)?;

        let mut request = LLMRequest::new(system_prompt, user_prompt)
            .with_generation(self.generation.temperature, self.generation.max_tokens);
        if !expects_json {
            request = request.free_text();
        }

        let response = self
            .invoker
            .invoke_llm(stage, self.provider, &request)
            .await
            .into_result(stage)?;

        debug!(
            "{}: {} replied with {} tokens",
            stage, response.model, response.usage.total_tokens
        );
        *self.usage.lock() += response.usage;

        Ok(response.content)
    }

    pub fn usage(&self) -> TokenUsage {
        *self.usage.lock()
    }
}
