//! Tier-routed model invocation.
//!
//! Stages never name concrete models. They ask a [`ModelInvoker`] for a
//! [`ModelTier`] and get back free text or a [`StructuredReply`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use super::litellm::{GenerationRequest, LlmProvider, Message, ToolDefinition};
use crate::error::LlmError;
use crate::utils::json_extraction::extract_json_object;

/// Model strength label used to route a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Generates, judges and composes.
    Strong,
    Mid,
    Weak,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Strong => "strong",
            ModelTier::Mid => "mid",
            ModelTier::Weak => "weak",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete model identifiers per tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierModels {
    pub strong: String,
    pub mid: String,
    pub weak: String,
}

impl Default for TierModels {
    fn default() -> Self {
        Self {
            strong: "anthropic/claude-opus-4.5".to_string(),
            mid: "openai/gpt-4o-mini".to_string(),
            weak: "meta-llama/llama-3.1-8b-instruct".to_string(),
        }
    }
}

impl TierModels {
    /// Model identifier serving the given tier.
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Strong => &self.strong,
            ModelTier::Mid => &self.mid,
            ModelTier::Weak => &self.weak,
        }
    }
}

/// Outcome of a structured (tool-call) completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredReply {
    /// The model produced a JSON object.
    Accepted(Map<String, Value>),
    /// The model produced something else; the raw text is kept for diagnosis.
    Malformed(String),
}

impl StructuredReply {
    /// Raw form suitable for a step record.
    pub fn raw(&self) -> String {
        match self {
            StructuredReply::Accepted(object) => {
                serde_json::to_string_pretty(object).unwrap_or_default()
            }
            StructuredReply::Malformed(raw) => raw.clone(),
        }
    }

    /// The object as a JSON value, or `Null` when malformed.
    pub fn to_value(&self) -> Value {
        match self {
            StructuredReply::Accepted(object) => Value::Object(object.clone()),
            StructuredReply::Malformed(_) => Value::Null,
        }
    }
}

/// Sends prompts to the model serving a tier.
#[derive(Clone)]
pub struct ModelInvoker {
    provider: Arc<dyn LlmProvider>,
    models: TierModels,
    temperature: f64,
    max_tokens: u32,
}

impl ModelInvoker {
    pub fn new(provider: Arc<dyn LlmProvider>, models: TierModels) -> Self {
        Self {
            provider,
            models,
            temperature: 0.7,
            max_tokens: 8000,
        }
    }

    /// Set the sampling temperature for every call (clamped to 0.0..=2.0).
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set the completion token ceiling for every call.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    pub fn models(&self) -> &TierModels {
        &self.models
    }

    /// Model identifier serving the given tier.
    pub fn model_for(&self, tier: ModelTier) -> &str {
        self.models.model_for(tier)
    }

    fn request(&self, tier: ModelTier, prompt: &str) -> GenerationRequest {
        GenerationRequest::new(self.model_for(tier), vec![Message::user(prompt)])
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    /// Free-form completion.
    pub async fn invoke_text(&self, tier: ModelTier, prompt: &str) -> Result<String, LlmError> {
        tracing::debug!(tier = %tier, model = self.model_for(tier), prompt_len = prompt.len(), "Invoking text completion");

        let response = self.provider.generate(self.request(tier, prompt)).await?;
        let content = response
            .first_content()
            .map(str::trim)
            .filter(|content| !content.is_empty())
            .ok_or(LlmError::EmptyResponse)?;
        Ok(content.to_string())
    }

    /// Structured completion through a forced tool call.
    ///
    /// Tool-call arguments are preferred; if the model answered in plain
    /// content instead, the first JSON object in it is used.
    pub async fn invoke_structured(
        &self,
        tier: ModelTier,
        prompt: &str,
        tool: ToolDefinition,
    ) -> Result<StructuredReply, LlmError> {
        tracing::debug!(tier = %tier, tool = tool.name(), prompt_len = prompt.len(), "Invoking structured completion");

        let request = self.request(tier, prompt).with_tool(tool);
        let response = self.provider.generate(request).await?;

        if let Some(arguments) = response.first_tool_arguments() {
            return Ok(match serde_json::from_str::<Value>(arguments) {
                Ok(Value::Object(object)) => StructuredReply::Accepted(object),
                _ => StructuredReply::Malformed(arguments.to_string()),
            });
        }

        let content = response.first_content().unwrap_or_default();
        Ok(match extract_json_object(content) {
            Some(object) => StructuredReply::Accepted(object),
            None => StructuredReply::Malformed(content.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::litellm::{Choice, FunctionCall, GenerationResponse, ToolCallInfo, Usage};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with a fixed message and records the last request.
    struct MockLlmProvider {
        content: String,
        tool_arguments: Option<String>,
        last_request: Mutex<Option<GenerationRequest>>,
    }

    impl MockLlmProvider {
        fn content(content: &str) -> Self {
            Self {
                content: content.to_string(),
                tool_arguments: None,
                last_request: Mutex::new(None),
            }
        }

        fn tool_call(arguments: &str) -> Self {
            Self {
                content: String::new(),
                tool_arguments: Some(arguments.to_string()),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            *self.last_request.lock().expect("lock") = Some(request);
            let tool_calls = self.tool_arguments.as_ref().map(|arguments| {
                vec![ToolCallInfo {
                    id: "call_1".to_string(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: "tool".to_string(),
                        arguments: arguments.clone(),
                    },
                }]
            });
            Ok(GenerationResponse {
                id: "test".to_string(),
                model: "test-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message {
                        role: "assistant".to_string(),
                        content: self.content.clone(),
                        tool_calls,
                    },
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn tool() -> ToolDefinition {
        ToolDefinition::function("emit", "Emit", json!({"type": "object"}))
    }

    #[tokio::test]
    async fn test_structured_prefers_tool_arguments() {
        let provider = Arc::new(MockLlmProvider::tool_call(r#"{"ok": true}"#));
        let invoker = ModelInvoker::new(provider.clone(), TierModels::default());

        let reply = invoker
            .invoke_structured(ModelTier::Strong, "prompt", tool())
            .await
            .expect("invocation succeeds");

        match reply {
            StructuredReply::Accepted(object) => assert_eq!(object["ok"], true),
            other => panic!("expected accepted reply, got {:?}", other),
        }
        let request = provider.last_request.lock().expect("lock").clone().expect("request");
        assert_eq!(request.model, TierModels::default().strong);
        assert_eq!(request.tool_name(), Some("emit"));
    }

    #[tokio::test]
    async fn test_structured_falls_back_to_content() {
        let provider = Arc::new(MockLlmProvider::content("```json\n{\"n\": 3}\n```"));
        let invoker = ModelInvoker::new(provider, TierModels::default());

        let reply = invoker
            .invoke_structured(ModelTier::Mid, "prompt", tool())
            .await
            .expect("invocation succeeds");
        assert!(matches!(reply, StructuredReply::Accepted(ref o) if o["n"] == 3));
    }

    #[tokio::test]
    async fn test_structured_non_object_is_malformed() {
        let provider = Arc::new(MockLlmProvider::tool_call("[1, 2]"));
        let invoker = ModelInvoker::new(provider, TierModels::default());

        let reply = invoker
            .invoke_structured(ModelTier::Strong, "prompt", tool())
            .await
            .expect("invocation succeeds");
        assert_eq!(reply, StructuredReply::Malformed("[1, 2]".to_string()));
        assert_eq!(reply.to_value(), Value::Null);
    }

    #[tokio::test]
    async fn test_text_routes_by_tier_and_rejects_empty() {
        let provider = Arc::new(MockLlmProvider::content("  answer  "));
        let invoker = ModelInvoker::new(provider.clone(), TierModels::default()).with_temperature(5.0);

        let text = invoker.invoke_text(ModelTier::Weak, "prompt").await.expect("text");
        assert_eq!(text, "answer");
        let request = provider.last_request.lock().expect("lock").clone().expect("request");
        assert_eq!(request.model, TierModels::default().weak);
        assert_eq!(request.temperature, Some(2.0));

        let empty = ModelInvoker::new(Arc::new(MockLlmProvider::content("   ")), TierModels::default());
        assert!(matches!(
            empty.invoke_text(ModelTier::Mid, "prompt").await,
            Err(LlmError::EmptyResponse)
        ));
    }
}
