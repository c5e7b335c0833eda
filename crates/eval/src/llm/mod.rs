//! Reasoning-service integration.
//!
//! The provider abstraction hides which chat-completion backend answers a request,
//! the prompt builder owns every template the classifiers send, and the schema
//! module turns replies back into typed values. A session bundles them for one
//! contract and routes every call through the retrying invoker. A scripted mock
//! provider stands in for the real service in tests.

pub mod mock_provider;
pub mod prompts;
pub mod provider;
pub mod schemas;
pub mod session;

pub use mock_provider::MockLLMProvider;
pub use prompts::{PromptBuilder, PromptTemplate};
pub use provider::{LLMError, LLMProvider, LLMRequest, LLMResponse, OpenAIProvider, TokenUsage};
pub use schemas::parse_response;
pub use session::LLMSession;
