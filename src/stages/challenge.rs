//! Stage 3: a challenge built to surface catalog mistakes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{required_text, string_list, unpack, ContentKind, ErrorCatalog, StageRun, TopicFocus};
use crate::llm::{ModelInvoker, ModelTier, ToolDefinition};
use crate::prompts;
use crate::rewards::RewardScorer;
use crate::validation::assessment::{SPAN_CLOSE, SPAN_OPEN};

const MIN_REQUIREMENTS: usize = 4;
const MAX_REQUIREMENTS: usize = 6;

/// A task for the probed tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub title: String,
    pub question_text: String,
    pub context: String,
    pub artifact_type: ContentKind,
    pub requirements: Vec<String>,
    pub success_criteria: String,
    /// Catalog mistakes the challenge is meant to provoke.
    pub target_error_patterns: Vec<String>,
}

impl Challenge {
    /// Accept a raw challenge, or report every violation.
    ///
    /// Target patterns are narrowed to canonical catalog names.
    pub fn from_object(object: &Map<String, Value>, catalog: &ErrorCatalog) -> Result<Self, Vec<String>> {
        let mut issues = Vec::new();

        let title = required_text(object, "title", &mut issues);
        let question_text = required_text(object, "question_text", &mut issues);
        let context = required_text(object, "context", &mut issues);
        let success_criteria = required_text(object, "success_criteria", &mut issues);

        let artifact_type = object
            .get("artifact_type")
            .and_then(Value::as_str)
            .and_then(ContentKind::parse);
        if artifact_type.is_none() {
            issues.push(format!(
                "`artifact_type` must be one of: {}.",
                ContentKind::labels()
            ));
        }

        let requirements = string_list(object.get("requirements"));
        if !(MIN_REQUIREMENTS..=MAX_REQUIREMENTS).contains(&requirements.len()) {
            issues.push(format!(
                "`requirements` must list between {} and {} items (found {}).",
                MIN_REQUIREMENTS,
                MAX_REQUIREMENTS,
                requirements.len()
            ));
        }

        for (field, text) in [("title", &title), ("question_text", &question_text)] {
            if text.contains(SPAN_OPEN) || text.contains(SPAN_CLOSE) {
                issues.push(format!(
                    "`{}` must not contain pre-marked <<...>> spans.",
                    field
                ));
            }
        }

        let mut target_error_patterns: Vec<String> = Vec::new();
        for target in string_list(object.get("target_error_patterns")) {
            if let Some(name) = catalog.canonical_name(&target) {
                if !target_error_patterns.iter().any(|t| t == name) {
                    target_error_patterns.push(name.to_string());
                }
            }
        }

        match artifact_type {
            Some(artifact_type) if issues.is_empty() => Ok(Self {
                title,
                question_text,
                context,
                artifact_type,
                requirements,
                success_criteria,
                target_error_patterns,
            }),
            _ => Err(issues),
        }
    }
}

fn challenge_tool() -> ToolDefinition {
    let kinds: Vec<&str> = ContentKind::ALL.iter().map(ContentKind::as_str).collect();
    ToolDefinition::function(
        "strategic_challenge",
        "Return a challenge whose natural solution exposes the targeted mistakes",
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "question_text": { "type": "string" },
                "context": { "type": "string" },
                "artifact_type": { "type": "string", "enum": kinds },
                "requirements": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": MIN_REQUIREMENTS,
                    "maxItems": MAX_REQUIREMENTS
                },
                "success_criteria": { "type": "string" },
                "target_error_patterns": { "type": "array", "items": { "type": "string" } }
            },
            "required": [
                "title", "question_text", "context", "artifact_type",
                "requirements", "success_criteria"
            ],
        }),
    )
}

/// Produces a [`Challenge`], steered by feedback from failed attempts.
pub struct ChallengeStage {
    invoker: Arc<ModelInvoker>,
    scorer: RewardScorer,
}

impl ChallengeStage {
    pub fn new(invoker: Arc<ModelInvoker>, scorer: RewardScorer) -> Self {
        Self { invoker, scorer }
    }

    pub async fn generate(
        &self,
        focus: &TopicFocus,
        catalog: &ErrorCatalog,
        feedback: &[String],
    ) -> StageRun<Challenge> {
        let tier = ModelTier::Strong;
        let names = catalog.names();
        let prompt = prompts::build_challenge_prompt(focus, &names, feedback);
        let reply = unpack(
            self.invoker
                .invoke_structured(tier, &prompt, challenge_tool())
                .await,
        );
        let rewards = self.scorer.score_challenge(&reply.value(), &names);

        let (output, issues) = match reply.object.as_ref() {
            Ok(object) => match Challenge::from_object(object, catalog) {
                Ok(challenge) => (Some(challenge), Vec::new()),
                Err(issues) => (None, issues),
            },
            Err(reason) => (None, vec![reason.clone()]),
        };
        if !issues.is_empty() {
            tracing::warn!(subtopic = %focus.subtopic, issues = ?issues, "Rejected challenge");
        }

        StageRun {
            output,
            tier,
            model: self.invoker.model_for(tier).to_string(),
            raw_output: reply.raw,
            issues,
            rewards,
        }
    }
}
