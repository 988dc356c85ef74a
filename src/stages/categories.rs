//! Stage 1: difficulty tiers for a topic.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::{unpack, StageRun};
use crate::difficulty::DifficultyLevel;
use crate::llm::{ModelInvoker, ModelTier, ToolDefinition};
use crate::prompts;
use crate::rewards::RewardScorer;

/// Generic words a subtopic may not lean on.
pub const BANNED_TERMS: [&str; 5] = ["overview", "introduction", "basics", "general", "misc"];

const MIN_SUBTOPICS: usize = 3;
const MAX_SUBTOPICS: usize = 5;

/// Subtopics per difficulty tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DifficultyCategories {
    tiers: BTreeMap<DifficultyLevel, Vec<String>>,
}

impl DifficultyCategories {
    /// Accept a raw tier map whole, or report every violation.
    pub fn from_object(object: &Map<String, Value>) -> Result<Self, Vec<String>> {
        let mut issues = Vec::new();
        let mut tiers = BTreeMap::new();
        let mut seen = HashSet::new();

        for key in object.keys() {
            if !DifficultyLevel::TIERS.iter().any(|tier| tier.as_str() == key) {
                issues.push(format!("Unexpected tier '{}'.", key));
            }
        }

        for tier in DifficultyLevel::TIERS {
            let label = tier.as_str();
            let Some(items) = object.get(label).and_then(Value::as_array) else {
                issues.push(format!("Tier '{}' is missing or not a list.", label));
                continue;
            };
            let Some(subtopics) = items
                .iter()
                .map(|item| item.as_str().map(|s| s.trim().to_string()))
                .collect::<Option<Vec<String>>>()
            else {
                issues.push(format!("Tier '{}' must be a list of strings.", label));
                continue;
            };

            if !(MIN_SUBTOPICS..=MAX_SUBTOPICS).contains(&subtopics.len()) {
                issues.push(format!(
                    "Tier '{}' must list between {} and {} subtopics (found {}).",
                    label,
                    MIN_SUBTOPICS,
                    MAX_SUBTOPICS,
                    subtopics.len()
                ));
            }
            for subtopic in &subtopics {
                if subtopic.split_whitespace().count() < 2 {
                    issues.push(format!("Subtopic '{}' must be at least two words.", subtopic));
                }
                if let Some(term) = banned_term(subtopic) {
                    issues.push(format!("Subtopic '{}' uses the generic term '{}'.", subtopic, term));
                }
                if !seen.insert(subtopic.to_lowercase()) {
                    issues.push(format!("Subtopic '{}' appears more than once.", subtopic));
                }
            }
            tiers.insert(tier, subtopics);
        }

        if issues.is_empty() {
            Ok(Self { tiers })
        } else {
            Err(issues)
        }
    }

    /// Subtopics for a tier; empty for unknown tiers.
    pub fn subtopics(&self, level: DifficultyLevel) -> &[String] {
        self.tiers.get(&level).map(Vec::as_slice).unwrap_or_default()
    }

    /// Tiers that have at least one subtopic.
    pub fn levels(&self) -> Vec<DifficultyLevel> {
        self.tiers
            .iter()
            .filter(|(_, subtopics)| !subtopics.is_empty())
            .map(|(level, _)| *level)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.levels().is_empty()
    }
}

/// Whole-word match against [`BANNED_TERMS`].
fn banned_term(subtopic: &str) -> Option<&'static str> {
    let words: Vec<String> = subtopic
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    BANNED_TERMS
        .into_iter()
        .find(|term| words.iter().any(|w| w == term))
}

fn categories_tool() -> ToolDefinition {
    let tier = json!({ "type": "array", "items": { "type": "string" }, "minItems": 3, "maxItems": 5 });
    ToolDefinition::function(
        "difficulty_categories",
        "Return 3-5 concrete subtopics for each difficulty tier",
        json!({
            "type": "object",
            "properties": {
                "Beginner": tier,
                "Intermediate": tier,
                "Advanced": tier,
            },
            "required": ["Beginner", "Intermediate", "Advanced"],
        }),
    )
}

/// Produces [`DifficultyCategories`] for a topic.
pub struct CategoryStage {
    invoker: Arc<ModelInvoker>,
    scorer: RewardScorer,
}

impl CategoryStage {
    pub fn new(invoker: Arc<ModelInvoker>, scorer: RewardScorer) -> Self {
        Self { invoker, scorer }
    }

    pub async fn generate(&self, topic: &str) -> StageRun<DifficultyCategories> {
        let tier = ModelTier::Strong;
        let prompt = prompts::build_categories_prompt(topic);
        let reply = unpack(
            self.invoker
                .invoke_structured(tier, &prompt, categories_tool())
                .await,
        );
        let rewards = self.scorer.score_categories(&reply.value());

        let (output, issues) = match reply.object.as_ref() {
            Ok(object) => match DifficultyCategories::from_object(object) {
                Ok(categories) => (Some(categories), Vec::new()),
                Err(issues) => (None, issues),
            },
            Err(reason) => (None, vec![reason.clone()]),
        };
        if !issues.is_empty() {
            tracing::warn!(topic = %topic, issues = ?issues, "Rejected difficulty categories");
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
