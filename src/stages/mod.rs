//! The seven workflow stages.
//!
//! Each stage is a stateless component over a shared [`ModelInvoker`]:
//!
//! | Stage | Component | Tier |
//! |---|---|---|
//! | 1 | [`CategoryStage`] | strong |
//! | 2 | [`CatalogStage`] | strong |
//! | 3 | [`ChallengeStage`] | strong |
//! | 4, 5 | [`ImplementationProbe`] | mid, weak |
//! | 6 | [`DifferentiationJudge`] | strong |
//! | 7 | [`AssessmentComposer`] | strong |
//!
//! Stages never retry on their own (Stage 7's validator loop aside) and never
//! return errors: a failed stage is a [`StageRun`] without output.
//!
//! [`ModelInvoker`]: crate::llm::ModelInvoker

pub mod catalog;
pub mod categories;
pub mod challenge;
pub mod composer;
pub mod judge;
pub mod probe;
pub mod types;

pub use catalog::{CatalogEntry, CatalogStage, ErrorCatalog, Impact};
pub use categories::{CategoryStage, DifficultyCategories};
pub use challenge::{Challenge, ChallengeStage};
pub use composer::AssessmentComposer;
pub use judge::{DifferentiationJudge, JudgeVerdict};
pub use probe::{ImplementationAttempt, ImplementationProbe};
pub use types::{ContentKind, TopicFocus};

use serde_json::{Map, Value};

use crate::error::LlmError;
use crate::llm::{ModelTier, StructuredReply};
use crate::rewards::RewardReport;

/// What one stage invocation produced.
#[derive(Debug, Clone)]
pub struct StageRun<T> {
    /// Accepted output; `None` when the stage failed.
    pub output: Option<T>,
    pub tier: ModelTier,
    pub model: String,
    /// Raw or serialized model output, kept for the step record.
    pub raw_output: String,
    /// Why the output was rejected. Empty on success.
    pub issues: Vec<String>,
    pub rewards: RewardReport,
}

impl<T> StageRun<T> {
    pub fn succeeded(&self) -> bool {
        self.output.is_some()
    }
}

/// A structured reply split into its record form and its object, if any.
pub(crate) struct Unpacked {
    pub raw: String,
    pub object: Result<Map<String, Value>, String>,
}

impl Unpacked {
    /// The object as a JSON value for scoring, `Null` when absent.
    pub fn value(&self) -> Value {
        match &self.object {
            Ok(object) => Value::Object(object.clone()),
            Err(_) => Value::Null,
        }
    }
}

pub(crate) fn unpack(result: Result<StructuredReply, LlmError>) -> Unpacked {
    match result {
        Ok(StructuredReply::Accepted(object)) => Unpacked {
            raw: serde_json::to_string_pretty(&object).unwrap_or_default(),
            object: Ok(object),
        },
        Ok(StructuredReply::Malformed(raw)) => Unpacked {
            raw,
            object: Err("model did not return a structured object".to_string()),
        },
        Err(e) => Unpacked {
            raw: format!("Error: {}", e),
            object: Err(format!("model call failed: {}", e)),
        },
    }
}

/// Trimmed, non-empty string field.
pub(crate) fn required_text(object: &Map<String, Value>, key: &str, issues: &mut Vec<String>) -> String {
    let value = object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if value.is_empty() {
        issues.push(format!("`{}` must be a non-empty string.", key));
    }
    value.to_string()
}

/// List of trimmed, non-empty strings; other items are dropped.
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
