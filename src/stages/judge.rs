//! Stage 6: did the weak tier fall into catalog mistakes the mid tier avoided?

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{string_list, unpack, Challenge, ErrorCatalog, ImplementationAttempt, StageRun};
use crate::llm::{ModelInvoker, ModelTier, ToolDefinition};
use crate::prompts;
use crate::rewards::RewardScorer;

/// Normalized judge decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub differentiation_achieved: bool,
    /// Canonical catalog names the weak tier committed.
    pub failures_weaker: Vec<String>,
    pub reasoning: String,
    /// Quotes found verbatim in the weak answer.
    pub evidence_spans: Vec<String>,
    pub confidence: Option<f64>,
    pub quality_score: Option<f64>,
    /// Reported failures that match no catalog entry.
    pub unmapped_findings: Vec<String>,
}

impl JudgeVerdict {
    /// Normalize a raw verdict.
    ///
    /// Differentiation claimed with no mapped failure is downgraded to "not
    /// achieved"; the second value is set when that happened.
    pub fn from_object(object: &Map<String, Value>, catalog: &ErrorCatalog, weak_text: &str) -> (Self, bool) {
        let claimed = object.get("differentiation_achieved").is_some_and(truthy);

        let mut failures_weaker: Vec<String> = Vec::new();
        let mut unmapped_findings: Vec<String> = Vec::new();
        for failure in string_list(object.get("failures_weaker")) {
            match catalog.canonical_name(&failure) {
                Some(name) => {
                    if !failures_weaker.iter().any(|f| f == name) {
                        failures_weaker.push(name.to_string());
                    }
                }
                None => unmapped_findings.push(failure),
            }
        }
        for finding in string_list(object.get("unmapped_findings")) {
            if !unmapped_findings.contains(&finding) {
                unmapped_findings.push(finding);
            }
        }

        let evidence_spans = string_list(object.get("evidence_spans"))
            .into_iter()
            .filter(|span| weak_text.contains(span.as_str()))
            .collect();

        let downgraded = claimed && failures_weaker.is_empty();
        let verdict = Self {
            differentiation_achieved: claimed && !downgraded,
            failures_weaker,
            reasoning: object
                .get("reasoning")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            evidence_spans,
            confidence: object
                .get("confidence")
                .and_then(Value::as_f64)
                .map(|c| c.clamp(0.0, 1.0)),
            quality_score: object.get("quality_score").and_then(Value::as_f64),
            unmapped_findings,
        };
        (verdict, downgraded)
    }
}

/// Booleans, non-zero numbers and yes/true/1/y strings count as set.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "yes" | "true" | "1" | "y"),
        _ => false,
    }
}

fn verdict_tool() -> ToolDefinition {
    let strings = json!({ "type": "array", "items": { "type": "string" } });
    ToolDefinition::function(
        "differentiation_verdict",
        "Report whether the weaker answer made catalog mistakes the stronger one avoided",
        json!({
            "type": "object",
            "properties": {
                "differentiation_achieved": { "type": "boolean" },
                "quality_score": { "type": "number" },
                "failures_weaker": strings,
                "reasoning": { "type": "string" },
                "evidence_spans": strings,
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                "unmapped_findings": strings
            },
            "required": ["differentiation_achieved", "failures_weaker", "reasoning"],
        }),
    )
}

/// Gate between the probes and the composer.
pub struct DifferentiationJudge {
    invoker: Arc<ModelInvoker>,
    scorer: RewardScorer,
}

impl DifferentiationJudge {
    pub fn new(invoker: Arc<ModelInvoker>, scorer: RewardScorer) -> Self {
        Self { invoker, scorer }
    }

    /// Judge both attempts. A malformed reply yields no verdict, which the
    /// caller treats as "not achieved".
    pub async fn judge(
        &self,
        challenge: &Challenge,
        mid: &ImplementationAttempt,
        weak: &ImplementationAttempt,
        catalog: &ErrorCatalog,
    ) -> StageRun<JudgeVerdict> {
        let tier = ModelTier::Strong;
        let prompt = prompts::build_judge_prompt(challenge, catalog, &mid.text, &weak.text);
        let reply = unpack(
            self.invoker
                .invoke_structured(tier, &prompt, verdict_tool())
                .await,
        );
        let rewards = self
            .scorer
            .score_verdict(&reply.value(), &catalog.names(), &weak.text);

        let (output, issues) = match reply.object.as_ref() {
            Ok(object) => {
                let (verdict, downgraded) = JudgeVerdict::from_object(object, catalog, &weak.text);
                let issues = if downgraded {
                    tracing::warn!("Judge claimed differentiation without naming a catalog mistake");
                    vec!["Differentiation claimed without any catalog failure; treated as not achieved.".to_string()]
                } else {
                    Vec::new()
                };
                (Some(verdict), issues)
            }
            Err(reason) => (None, vec![reason.clone()]),
        };

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
