//! Append-only run persistence.
//!
//! The workflow writes one run-start record, one record per committed stage,
//! one reward report per stage, and a single run-end update. Step records are
//! never modified after they are written.
//!
//! - [`SqliteRunStore`] - SQLite file store used by the CLI and server
//! - [`MemoryRunStore`] - in-process store for tests and `--no-persist`

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRunStore;
pub use sqlite::{RunSummary, SqliteRunStore, StoredStep};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::pipeline::{PipelineStep, RunOutcome};
use crate::rewards::RewardReport;

/// Persistence collaborator called by the orchestrator.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Record that a run began. Repeating the call for the same run is a no-op.
    async fn mark_run_start(&self, run_id: &str, topic: &str) -> Result<(), StorageError>;

    async fn save_step(&self, run_id: &str, topic: &str, step: &PipelineStep) -> Result<(), StorageError>;

    async fn save_reward_report(
        &self,
        run_id: &str,
        stage_index: u8,
        report: &RewardReport,
    ) -> Result<(), StorageError>;

    /// Write the terminal fields. Called once per run; `total_steps` counts
    /// the step records the run committed.
    async fn mark_run_end(
        &self,
        run_id: &str,
        outcome: &RunOutcome,
        total_steps: u32,
    ) -> Result<(), StorageError>;
}
