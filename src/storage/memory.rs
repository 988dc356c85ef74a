//! In-process run store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::RunStore;
use crate::error::StorageError;
use crate::pipeline::{PipelineStep, RunOutcome};
use crate::rewards::RewardReport;

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<String, String>,
    steps: Vec<(String, PipelineStep)>,
    rewards: Vec<(String, u8, f64)>,
    ends: HashMap<String, (RunOutcome, u32)>,
}

/// Keeps every record in memory. Useful for tests and one-off runs.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    inner: Mutex<Inner>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ids of every started run, sorted.
    pub fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().runs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn topic(&self, run_id: &str) -> Option<String> {
        self.lock().runs.get(run_id).cloned()
    }

    pub fn steps(&self, run_id: &str) -> Vec<PipelineStep> {
        self.lock()
            .steps
            .iter()
            .filter(|(id, _)| id == run_id)
            .map(|(_, step)| step.clone())
            .collect()
    }

    /// `(stage_index, pass_rate)` pairs in insertion order.
    pub fn rewards(&self, run_id: &str) -> Vec<(u8, f64)> {
        self.lock()
            .rewards
            .iter()
            .filter(|(id, _, _)| id == run_id)
            .map(|(_, stage, rate)| (*stage, *rate))
            .collect()
    }

    pub fn outcome(&self, run_id: &str) -> Option<RunOutcome> {
        self.lock().ends.get(run_id).map(|(outcome, _)| outcome.clone())
    }

    /// Step count recorded by `mark_run_end`.
    pub fn total_steps(&self, run_id: &str) -> Option<u32> {
        self.lock().ends.get(run_id).map(|(_, total)| *total)
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn mark_run_start(&self, run_id: &str, topic: &str) -> Result<(), StorageError> {
        self.lock()
            .runs
            .entry(run_id.to_string())
            .or_insert_with(|| topic.to_string());
        Ok(())
    }

    async fn save_step(&self, run_id: &str, _topic: &str, step: &PipelineStep) -> Result<(), StorageError> {
        self.lock().steps.push((run_id.to_string(), step.clone()));
        Ok(())
    }

    async fn save_reward_report(
        &self,
        run_id: &str,
        stage_index: u8,
        report: &RewardReport,
    ) -> Result<(), StorageError> {
        self.lock()
            .rewards
            .push((run_id.to_string(), stage_index, report.pass_rate()));
        Ok(())
    }

    async fn mark_run_end(
        &self,
        run_id: &str,
        outcome: &RunOutcome,
        total_steps: u32,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if !inner.runs.contains_key(run_id) {
            return Err(StorageError::RunNotFound(run_id.to_string()));
        }
        if inner.ends.contains_key(run_id) {
            return Err(StorageError::RunFinalized(run_id.to_string()));
        }
        inner.ends.insert(run_id.to_string(), (outcome.clone(), total_steps));
        Ok(())
    }
}
