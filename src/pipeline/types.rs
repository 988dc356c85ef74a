//! Step records and the run aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::difficulty::DifficultyLevel;
use crate::llm::ModelTier;
use crate::validation::AssessmentPayload;

/// The seven workflow stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Categories,
    Catalog,
    Challenge,
    MidImplementation,
    WeakImplementation,
    Judge,
    Assessment,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Categories,
        Stage::Catalog,
        Stage::Challenge,
        Stage::MidImplementation,
        Stage::WeakImplementation,
        Stage::Judge,
        Stage::Assessment,
    ];

    /// 1-based stage index.
    pub fn index(&self) -> u8 {
        match self {
            Stage::Categories => 1,
            Stage::Catalog => 2,
            Stage::Challenge => 3,
            Stage::MidImplementation => 4,
            Stage::WeakImplementation => 5,
            Stage::Judge => 6,
            Stage::Assessment => 7,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.index() == index)
    }

    /// Human-readable stage name stored with each step.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Categories => "Generate difficulty categories",
            Stage::Catalog => "Generate conceptual error catalog",
            Stage::Challenge => "Generate strategic challenge",
            Stage::MidImplementation => "Test mid-tier implementation",
            Stage::WeakImplementation => "Test weak-tier implementation",
            Stage::Judge => "Judge implementation differentiation",
            Stage::Assessment => "Create student assessment",
        }
    }

    /// Stages repeated by the outer attempt loop.
    pub fn is_attempt_stage(&self) -> bool {
        (3..=6).contains(&self.index())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.index(), self.name())
    }
}

/// One executed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub stage_index: u8,
    pub stage_name: String,
    pub tier: ModelTier,
    pub model: String,
    /// Outer attempt number; `None` for Stages 1 and 2.
    pub attempt: Option<u32>,
    pub success: bool,
    /// Raw or serialized output.
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

impl PipelineStep {
    pub fn new(
        stage: Stage,
        tier: ModelTier,
        model: impl Into<String>,
        attempt: Option<u32>,
        success: bool,
        output: impl Into<String>,
    ) -> Self {
        Self {
            stage_index: stage.index(),
            stage_name: stage.name().to_string(),
            tier,
            model: model.into(),
            attempt,
            success,
            output: output.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        Stage::from_index(self.stage_index)
    }
}

/// Terminal fields of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// True iff an assessment payload was produced.
    pub final_success: bool,
    /// Last stage the run reached; 0 if it never started one.
    pub stopped_at_stage: u8,
    /// Outer attempts consumed.
    pub attempts: u32,
    pub differentiation_achieved: bool,
    pub weak_failures: Vec<String>,
    pub difficulty: Option<DifficultyLevel>,
    pub subtopic: Option<String>,
    pub assessment: Option<AssessmentPayload>,
    /// The consumer went away before the run finished.
    pub cancelled: bool,
}

/// A run still collecting steps. Only the orchestrator holds one.
#[derive(Debug)]
pub struct PipelineRun {
    run_id: String,
    topic: String,
    started_at: DateTime<Utc>,
    steps: Vec<PipelineStep>,
}

impl PipelineRun {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            started_at: Utc::now(),
            steps: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub fn last_stage(&self) -> u8 {
        self.steps.last().map_or(0, |step| step.stage_index)
    }

    /// Append a step. Indices only go backwards when a new attempt restarts at 3.
    pub fn push_step(&mut self, step: PipelineStep) {
        debug_assert!(
            step.stage_index >= self.last_stage() || step.stage_index == Stage::Challenge.index(),
            "stage {} recorded after stage {}",
            step.stage_index,
            self.last_stage()
        );
        self.steps.push(step);
    }

    /// Seal the run. Consumes the builder, so it can happen only once.
    pub fn finalize(self, outcome: RunOutcome) -> RunReport {
        RunReport {
            run_id: self.run_id,
            topic: self.topic,
            started_at: self.started_at,
            finished_at: Utc::now(),
            steps: self.steps,
            outcome,
        }
    }
}

/// A finalized, immutable run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub topic: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<PipelineStep>,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn final_success(&self) -> bool {
        self.outcome.final_success
    }

    pub fn stopped_at_stage(&self) -> u8 {
        self.outcome.stopped_at_stage
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Stage indices in recorded order.
    pub fn stage_sequence(&self) -> Vec<u8> {
        self.steps.iter().map(|step| step.stage_index).collect()
    }
}
