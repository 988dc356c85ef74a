//! Stage 7: compose the assessment and validate it, retrying on violations.

use serde_json::{json, Value};
use std::sync::Arc;

use super::{unpack, Challenge, ContentKind, ImplementationAttempt, StageRun, TopicFocus};
use crate::llm::{ModelInvoker, ModelTier, ToolDefinition};
use crate::prompts;
use crate::rewards::RewardScorer;
use crate::validation::assessment::{AssessmentPayload, AssessmentValidator, ValidatorConfig};

/// Default number of generate-then-validate cycles.
pub const DEFAULT_COMPOSER_ATTEMPTS: u32 = 3;

/// Issue reported when the model answers without a structured object.
pub const MALFORMED_ASSESSMENT: &str =
    "The model did not return valid structured output via the assessment tool.";

fn assessment_tool(config: &ValidatorConfig) -> ToolDefinition {
    let difficulties: Vec<&str> = config.allowed_difficulties.iter().map(|d| d.as_str()).collect();
    let kinds: Vec<&str> = ContentKind::ALL.iter().map(ContentKind::as_str).collect();
    ToolDefinition::function(
        "create_assessment",
        "Return the assessment with every flaw wrapped in <<...>> and described in `errors`",
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "difficulty": { "type": "string", "enum": difficulties },
                "content_type": { "type": "string", "enum": kinds },
                "content": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": config.min_lines,
                    "maxItems": config.max_lines
                },
                "errors": {
                    "type": "array",
                    "minItems": config.min_errors,
                    "maxItems": config.max_errors,
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "description": { "type": "string" }
                        },
                        "required": ["id", "description"]
                    }
                }
            },
            "required": ["title", "difficulty", "content_type", "content", "errors"],
        }),
    )
}

/// Builds the final assessment with an inner validator loop.
pub struct AssessmentComposer {
    invoker: Arc<ModelInvoker>,
    validator: AssessmentValidator,
    scorer: RewardScorer,
    max_attempts: u32,
}

impl AssessmentComposer {
    pub fn new(invoker: Arc<ModelInvoker>, validator: AssessmentValidator, scorer: RewardScorer) -> Self {
        Self {
            invoker,
            validator,
            scorer,
            max_attempts: DEFAULT_COMPOSER_ATTEMPTS,
        }
    }

    /// Set the inner attempt ceiling (at least one).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Compose until the validator accepts or the attempts run out.
    ///
    /// Only the final cycle is reported. On exhaustion the raw output holds
    /// the last model response and its violations.
    pub async fn compose(
        &self,
        focus: &TopicFocus,
        challenge: &Challenge,
        mid: &ImplementationAttempt,
        weak: &ImplementationAttempt,
        failures: &[String],
    ) -> StageRun<AssessmentPayload> {
        let tier = ModelTier::Strong;
        let model = self.invoker.model_for(tier).to_string();
        let mut feedback: Vec<String> = Vec::new();
        let mut last_response = Value::Null;
        let mut rewards = self.scorer.score_assessment(&Value::Null);

        for attempt in 1..=self.max_attempts {
            let prompt = prompts::build_assessment_prompt(
                focus,
                challenge,
                &mid.text,
                &weak.text,
                failures,
                &feedback,
                self.validator.config(),
            );
            let reply = unpack(
                self.invoker
                    .invoke_structured(tier, &prompt, assessment_tool(self.validator.config()))
                    .await,
            );
            let value = reply.value();
            rewards = self.scorer.score_assessment(&value);

            let issues = match reply.object {
                Ok(_) => match self.validator.validate(&value) {
                    Ok(payload) => {
                        tracing::info!(attempt, errors = payload.errors.len(), "Assessment accepted");
                        return StageRun {
                            raw_output: serde_json::to_string_pretty(&payload).unwrap_or_default(),
                            output: Some(payload),
                            tier,
                            model,
                            issues: Vec::new(),
                            rewards,
                        };
                    }
                    Err(issues) => issues,
                },
                Err(_) => vec![MALFORMED_ASSESSMENT.to_string()],
            };

            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                issues = issues.len(),
                "Assessment failed validation"
            );
            last_response = match value {
                Value::Null => Value::String(reply.raw),
                value => value,
            };
            feedback = issues;
        }

        let record = json!({
            "model_response": last_response,
            "validation_errors": feedback,
        });
        StageRun {
            output: None,
            tier,
            model,
            raw_output: serde_json::to_string_pretty(&record).unwrap_or_default(),
            issues: feedback,
            rewards,
        }
    }
}
