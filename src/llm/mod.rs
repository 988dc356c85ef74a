//! LLM integration for trapforge.
//!
//! [`LlmProvider`] is the transport seam; [`LiteLlmClient`] implements it for
//! any OpenAI-compatible endpoint (LiteLLM proxy, OpenRouter). Stages talk to
//! [`ModelInvoker`], which routes each call to the model serving a tier.
//!
//! ```ignore
//! use std::sync::Arc;
//! use trapforge::llm::{LiteLlmClient, ModelInvoker, ModelTier, TierModels};
//!
//! let client = LiteLlmClient::from_env()?;
//! let invoker = ModelInvoker::new(Arc::new(client), TierModels::default());
//! let text = invoker.invoke_text(ModelTier::Weak, "Write a binary search").await?;
//! ```

pub mod invoker;
pub mod litellm;

pub use invoker::{ModelInvoker, ModelTier, StructuredReply, TierModels};
pub use litellm::{
    Choice, FunctionCall, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider,
    Message, ToolCallInfo, ToolChoice, ToolDefinition, Usage, OPENROUTER_BASE_URL,
};
