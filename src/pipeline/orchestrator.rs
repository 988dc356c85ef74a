//! The outer state machine.
//!
//! `Init -> Stage 1 -> Stage 2 -> attempt loop (3 -> 4 -> 5 -> 6) -> Stage 7`.
//! Every stage result is committed (persisted, recorded, emitted) before the
//! next stage starts. Nothing in here returns an error: blocked and cancelled
//! runs are reported through [`RunOutcome`].

use rand::seq::IndexedRandom;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::config::PipelineConfig;
use super::feedback::{challenge_note, malformed_verdict_note, verdict_note};
use super::types::{PipelineRun, PipelineStep, RunOutcome, RunReport, Stage};
use crate::difficulty::DifficultyLevel;
use crate::llm::{LlmProvider, ModelInvoker, ModelTier};
use crate::rewards::{RewardReport, RewardScorer};
use crate::stages::{
    AssessmentComposer, CatalogStage, CategoryStage, Challenge, ChallengeStage, DifferentiationJudge,
    DifficultyCategories, ImplementationAttempt, ImplementationProbe, StageRun, TopicFocus,
};
use crate::storage::RunStore;
use crate::validation::AssessmentValidator;

/// The event consumer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cancelled;

/// Per-run state. Never shared between runs.
struct RunContext<'a> {
    run: PipelineRun,
    store: &'a dyn RunStore,
    events: Option<mpsc::Sender<PipelineStep>>,
}

impl<'a> RunContext<'a> {
    async fn start(topic: &str, store: &'a dyn RunStore, events: Option<mpsc::Sender<PipelineStep>>) -> Self {
        let run = PipelineRun::new(topic);
        if let Err(e) = store.mark_run_start(run.run_id(), topic).await {
            tracing::warn!(run_id = %run.run_id(), error = %e, "Failed to record run start");
        }
        Self { run, store, events }
    }

    fn run_id(&self) -> &str {
        self.run.run_id()
    }

    /// Persist, record, then emit a step.
    async fn commit(&mut self, step: PipelineStep, rewards: &RewardReport) -> Result<(), Cancelled> {
        let run_id = self.run.run_id().to_string();
        if let Err(e) = self.store.save_step(&run_id, self.run.topic(), &step).await {
            tracing::warn!(run_id = %run_id, stage = step.stage_index, error = %e, "Failed to persist step");
        }
        if let Err(e) = self.store.save_reward_report(&run_id, step.stage_index, rewards).await {
            tracing::warn!(run_id = %run_id, stage = step.stage_index, error = %e, "Failed to persist reward report");
        }
        tracing::info!(
            run_id = %run_id,
            stage = step.stage_index,
            attempt = ?step.attempt,
            success = step.success,
            pass_rate = rewards.pass_rate(),
            "Stage committed"
        );

        self.run.push_step(step.clone());
        if let Some(sender) = &self.events {
            if sender.send(step).await.is_err() {
                tracing::info!(run_id = %run_id, "Event consumer closed; stopping run");
                return Err(Cancelled);
            }
        }
        Ok(())
    }

    async fn finish(self, outcome: RunOutcome) -> RunReport {
        let total_steps = self.run.steps().len() as u32;
        if let Err(e) = self.store.mark_run_end(self.run.run_id(), &outcome, total_steps).await {
            tracing::warn!(run_id = %self.run.run_id(), error = %e, "Failed to record run end");
        }
        tracing::info!(
            run_id = %self.run.run_id(),
            final_success = outcome.final_success,
            stopped_at_stage = outcome.stopped_at_stage,
            attempts = outcome.attempts,
            total_steps,
            cancelled = outcome.cancelled,
            "Run finished"
        );
        self.run.finalize(outcome)
    }
}

fn step_from<T>(stage: Stage, run: &StageRun<T>, attempt: Option<u32>, success: bool) -> PipelineStep {
    PipelineStep::new(stage, run.tier, run.model.clone(), attempt, success, run.raw_output.clone())
}

/// Choose the difficulty (preferred if it has subtopics, else random) and a
/// random subtopic from it.
fn pick_focus(
    topic: &str,
    categories: &DifficultyCategories,
    preferred: Option<DifficultyLevel>,
) -> Option<TopicFocus> {
    let mut rng = rand::rng();
    let difficulty = match preferred {
        Some(level) if !categories.subtopics(level).is_empty() => level,
        _ => *categories.levels().choose(&mut rng)?,
    };
    let subtopic = categories.subtopics(difficulty).choose(&mut rng)?.clone();
    Some(TopicFocus {
        topic: topic.to_string(),
        subtopic,
        difficulty,
    })
}

/// Drives one run at a time per call; safe to share across tasks.
pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    config: PipelineConfig,
    categories: CategoryStage,
    catalog: CatalogStage,
    challenge: ChallengeStage,
    probe: ImplementationProbe,
    judge: DifferentiationJudge,
    composer: AssessmentComposer,
}

impl Orchestrator {
    /// Build the stages around one provider. Models, sampling and validator
    /// bounds come from `config`.
    pub fn new(provider: Arc<dyn LlmProvider>, store: Arc<dyn RunStore>, config: PipelineConfig) -> Self {
        let invoker = Arc::new(
            ModelInvoker::new(provider, config.models.clone())
                .with_temperature(config.temperature)
                .with_max_tokens(config.max_tokens),
        );
        let scorer = RewardScorer::new(config.validator.clone());

        Self {
            categories: CategoryStage::new(invoker.clone(), scorer.clone()),
            catalog: CatalogStage::new(invoker.clone(), scorer.clone()).with_size(config.catalog_size),
            challenge: ChallengeStage::new(invoker.clone(), scorer.clone()),
            probe: ImplementationProbe::new(invoker.clone(), scorer.clone()),
            judge: DifferentiationJudge::new(invoker.clone(), scorer.clone()),
            composer: AssessmentComposer::new(invoker, AssessmentValidator::new(config.validator.clone()), scorer)
                .with_max_attempts(config.composer_max_attempts),
            store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the workflow for a topic.
    ///
    /// Each committed step is sent on `events` when given. If that send fails
    /// the run stops before its next stage and is reported as cancelled.
    pub async fn run(&self, topic: &str, events: Option<mpsc::Sender<PipelineStep>>) -> RunReport {
        let mut ctx = RunContext::start(topic, self.store.as_ref(), events).await;
        tracing::info!(run_id = %ctx.run_id(), topic = %topic, max_attempts = self.config.max_attempts, "Run started");

        let mut outcome = RunOutcome::default();
        if self.drive(topic, &mut ctx, &mut outcome).await.is_err() {
            outcome.cancelled = true;
            outcome.stopped_at_stage = ctx.run.last_stage();
        }
        ctx.finish(outcome).await
    }

    async fn drive(&self, topic: &str, ctx: &mut RunContext<'_>, outcome: &mut RunOutcome) -> Result<(), Cancelled> {
        // Stage 1
        let categories_run = self.categories.generate(topic).await;
        ctx.commit(
            step_from(Stage::Categories, &categories_run, None, categories_run.succeeded()),
            &categories_run.rewards,
        )
        .await?;
        outcome.stopped_at_stage = Stage::Categories.index();
        let Some(focus) = categories_run
            .output
            .as_ref()
            .and_then(|categories| pick_focus(topic, categories, self.config.preferred_difficulty))
        else {
            tracing::warn!(run_id = %ctx.run_id(), "Blocked at stage 1");
            return Ok(());
        };
        tracing::info!(run_id = %ctx.run_id(), difficulty = %focus.difficulty, subtopic = %focus.subtopic, "Focus selected");
        outcome.difficulty = Some(focus.difficulty);
        outcome.subtopic = Some(focus.subtopic.clone());

        // Stage 2
        let catalog_run = self.catalog.generate(&focus).await;
        ctx.commit(
            step_from(Stage::Catalog, &catalog_run, None, catalog_run.succeeded()),
            &catalog_run.rewards,
        )
        .await?;
        outcome.stopped_at_stage = Stage::Catalog.index();
        let Some(catalog) = catalog_run.output else {
            tracing::warn!(run_id = %ctx.run_id(), "Blocked at stage 2");
            return Ok(());
        };

        let mut feedback: Vec<String> = Vec::new();
        for attempt in 1..=self.config.max_attempts {
            outcome.attempts = attempt;
            let at = Some(attempt);

            // Stage 3
            let challenge_run = self.challenge.generate(&focus, &catalog, &feedback).await;
            ctx.commit(
                step_from(Stage::Challenge, &challenge_run, at, challenge_run.succeeded()),
                &challenge_run.rewards,
            )
            .await?;
            outcome.stopped_at_stage = Stage::Challenge.index();
            let Some(challenge) = challenge_run.output else {
                feedback.push(challenge_note(attempt, &challenge_run.issues));
                continue;
            };

            // Stages 4 and 5
            let mid = self.probe_tier(ctx, ModelTier::Mid, Stage::MidImplementation, &challenge, attempt).await?;
            let weak = self.probe_tier(ctx, ModelTier::Weak, Stage::WeakImplementation, &challenge, attempt).await?;
            outcome.stopped_at_stage = Stage::WeakImplementation.index();

            // Stage 6
            let judge_run = self.judge.judge(&challenge, &mid, &weak, &catalog).await;
            let achieved = judge_run
                .output
                .as_ref()
                .is_some_and(|verdict| verdict.differentiation_achieved);
            ctx.commit(step_from(Stage::Judge, &judge_run, at, achieved), &judge_run.rewards)
                .await?;
            outcome.stopped_at_stage = Stage::Judge.index();

            let verdict = match judge_run.output {
                Some(verdict) if verdict.differentiation_achieved => verdict,
                Some(verdict) => {
                    feedback.push(verdict_note(attempt, &verdict.reasoning, &mid.text, &weak.text));
                    continue;
                }
                None => {
                    feedback.push(malformed_verdict_note(attempt));
                    continue;
                }
            };
            outcome.differentiation_achieved = true;
            outcome.weak_failures = verdict.failures_weaker.clone();
            tracing::info!(run_id = %ctx.run_id(), attempt, failures = ?verdict.failures_weaker, "Differentiation achieved");

            // Stage 7
            let compose_run = self
                .composer
                .compose(&focus, &challenge, &mid, &weak, &verdict.failures_weaker)
                .await;
            ctx.commit(
                step_from(Stage::Assessment, &compose_run, at, compose_run.succeeded()),
                &compose_run.rewards,
            )
            .await?;
            outcome.stopped_at_stage = Stage::Assessment.index();
            outcome.final_success = compose_run.output.is_some();
            outcome.assessment = compose_run.output;
            return Ok(());
        }

        tracing::warn!(run_id = %ctx.run_id(), attempts = outcome.attempts, "Blocked at stage 6 after exhausting attempts");
        outcome.stopped_at_stage = Stage::Judge.index();
        Ok(())
    }

    async fn probe_tier(
        &self,
        ctx: &mut RunContext<'_>,
        tier: ModelTier,
        stage: Stage,
        challenge: &Challenge,
        attempt: u32,
    ) -> Result<ImplementationAttempt, Cancelled> {
        let run = self.probe.implement(tier, challenge).await;
        ctx.commit(step_from(stage, &run, Some(attempt), true), &run.rewards)
            .await?;
        Ok(run.output.unwrap_or_else(|| ImplementationAttempt {
            tier,
            text: run.raw_output,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{Scripted, ScriptedProvider};
    use crate::storage::MemoryRunStore;
    use serde_json::json;

    fn categories() -> Scripted {
        Scripted::Tool(json!({
            "Beginner": ["Loop range bounds", "String slicing pitfalls", "Integer division rounding"],
            "Intermediate": ["Iterator invalidation hazards", "Closure capture semantics", "Error propagation chains"],
            "Advanced": ["Lock ordering deadlocks", "Memory ordering fences", "Async cancellation safety"],
        }))
    }

    #[test]
    fn test_pick_focus_honours_preference() {
        let raw = json!({
            "Beginner": ["Loop range bounds", "String slicing pitfalls", "Integer division rounding"],
            "Intermediate": ["Iterator invalidation hazards", "Closure capture semantics", "Error propagation chains"],
            "Advanced": ["Lock ordering deadlocks", "Memory ordering fences", "Async cancellation safety"],
        });
        let categories = DifficultyCategories::from_object(raw.as_object().expect("object")).expect("valid");

        let focus = pick_focus("Rust", &categories, Some(DifficultyLevel::Advanced)).expect("focus");
        assert_eq!(focus.difficulty, DifficultyLevel::Advanced);
        assert!(categories.subtopics(DifficultyLevel::Advanced).contains(&focus.subtopic));

        let focus = pick_focus("Rust", &categories, None).expect("focus");
        assert!(DifficultyLevel::TIERS.contains(&focus.difficulty));
        assert!(pick_focus("Rust", &DifficultyCategories::default(), None).is_none());
    }

    #[tokio::test]
    async fn test_blocked_at_stage_two_consumes_no_attempts() {
        let provider = ScriptedProvider::new(vec![categories(), Scripted::Text("no catalog".to_string())]);
        let store = Arc::new(MemoryRunStore::new());
        let orchestrator = Orchestrator::new(provider, store.clone(), PipelineConfig::default());

        let report = orchestrator.run("Rust", None).await;
        assert_eq!(report.stopped_at_stage(), 2);
        assert_eq!(report.outcome.attempts, 0);
        assert!(!report.final_success());
        assert!(report.outcome.subtopic.is_some());
        assert_eq!(report.stage_sequence(), vec![1, 2]);

        assert_eq!(store.steps(&report.run_id).len(), 2);
        assert_eq!(store.rewards(&report.run_id).len(), 2);
        assert_eq!(store.outcome(&report.run_id), Some(report.outcome.clone()));
    }

    #[tokio::test]
    async fn test_consumer_drop_cancels_before_next_stage() {
        let provider = ScriptedProvider::new(vec![categories()]);
        let store = Arc::new(MemoryRunStore::new());
        let orchestrator = Orchestrator::new(provider.clone(), store.clone(), PipelineConfig::default());

        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let report = orchestrator.run("Rust", Some(tx)).await;

        assert!(report.outcome.cancelled);
        assert_eq!(report.stopped_at_stage(), 1);
        assert_eq!(provider.prompts().len(), 1, "stage 2 never started");
        // Already-committed work stays persisted.
        assert_eq!(store.steps(&report.run_id).len(), 1);
        assert!(store.outcome(&report.run_id).is_some_and(|o| o.cancelled));
    }
}
