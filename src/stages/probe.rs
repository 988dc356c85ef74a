//! Stages 4 and 5: the mid and weak tiers attempt the challenge.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{Challenge, StageRun};
use crate::llm::{ModelInvoker, ModelTier};
use crate::prompts;
use crate::rewards::RewardScorer;

/// Free-form answer from a probed tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationAttempt {
    pub tier: ModelTier,
    pub text: String,
}

/// Runs the same challenge prompt against a given tier.
pub struct ImplementationProbe {
    invoker: Arc<ModelInvoker>,
    scorer: RewardScorer,
}

impl ImplementationProbe {
    pub fn new(invoker: Arc<ModelInvoker>, scorer: RewardScorer) -> Self {
        Self { invoker, scorer }
    }

    /// Stage index recorded for a probed tier.
    pub fn stage_for(tier: ModelTier) -> u8 {
        match tier {
            ModelTier::Weak => 5,
            _ => 4,
        }
    }

    /// Always yields an attempt. An invocation failure becomes the attempt
    /// text so the judge can see what happened.
    pub async fn implement(&self, tier: ModelTier, challenge: &Challenge) -> StageRun<ImplementationAttempt> {
        let prompt = prompts::build_implementation_prompt(challenge);
        let text = match self.invoker.invoke_text(tier, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(tier = %tier, error = %e, "Implementation probe failed");
                format!("[invocation failed] {}", e)
            }
        };
        let rewards = self
            .scorer
            .score_implementation(Self::stage_for(tier), &text, &challenge.requirements);

        StageRun {
            output: Some(ImplementationAttempt {
                tier,
                text: text.clone(),
            }),
            tier,
            model: self.invoker.model_for(tier).to_string(),
            raw_output: text,
            issues: Vec::new(),
            rewards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{invoker, Scripted, ScriptedProvider};
    use crate::stages::ContentKind;

    fn challenge() -> Challenge {
        Challenge {
            title: "Rolling median".to_string(),
            question_text: "Compute the running median of a stream.".to_string(),
            context: "Latency dashboards".to_string(),
            artifact_type: ContentKind::Code,
            requirements: vec![
                "Use two heaps".to_string(),
                "Handle even counts".to_string(),
                "Accept negative values".to_string(),
                "Return floats".to_string(),
            ],
            success_criteria: "Matches sorting-based median".to_string(),
            target_error_patterns: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_routes_to_requested_tier() {
        let provider = ScriptedProvider::new(vec![Scripted::Text("### OUTPUT\nheaps".to_string())]);
        let probe = ImplementationProbe::new(invoker(provider.clone()), RewardScorer::default());

        let run = probe.implement(ModelTier::Weak, &challenge()).await;
        let attempt = run.output.expect("attempt");
        assert_eq!(attempt.tier, ModelTier::Weak);
        assert_eq!(attempt.text, "### OUTPUT\nheaps");
        assert_eq!(run.rewards.stage, 5);

        let request = provider.requests.lock().expect("lock")[0].clone();
        assert_eq!(request.model, run.model);
        assert!(request.tools.is_empty());
        assert!(provider.prompts()[0].contains("Use two heaps"));
    }

    #[tokio::test]
    async fn test_invocation_failure_still_yields_attempt() {
        let provider = ScriptedProvider::new(vec![Scripted::Fail]);
        let probe = ImplementationProbe::new(invoker(provider), RewardScorer::default());

        let run = probe.implement(ModelTier::Mid, &challenge()).await;
        assert!(run.succeeded());
        assert!(run.raw_output.starts_with("[invocation failed]"));
        assert_eq!(run.rewards.stage, 4);
    }
}
