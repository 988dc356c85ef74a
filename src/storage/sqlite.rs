//! SQLite-backed run store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use super::RunStore;
use crate::error::StorageError;
use crate::pipeline::{PipelineStep, RunOutcome};
use crate::rewards::RewardReport;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pipeline_runs (
    run_id          TEXT    PRIMARY KEY,
    topic           TEXT    NOT NULL,
    started_at      TEXT    NOT NULL,

    -- Written once by mark_run_end
    finished_at     TEXT,
    total_steps     INTEGER,
    stopped_at_stage INTEGER,
    attempts        INTEGER,
    differentiation_achieved INTEGER,
    final_success   INTEGER,
    cancelled       INTEGER
);

CREATE TABLE IF NOT EXISTS step_responses (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id          TEXT    NOT NULL,
    topic           TEXT    NOT NULL,
    stage_index     INTEGER NOT NULL,
    stage_name      TEXT    NOT NULL,
    tier            TEXT    NOT NULL,
    model           TEXT    NOT NULL,
    attempt         INTEGER,
    success         INTEGER NOT NULL,
    response        TEXT    NOT NULL,
    created_at      TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS step_rewards (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id          TEXT    NOT NULL,
    stage_index     INTEGER NOT NULL,
    pass_rate       REAL    NOT NULL,
    num_checks      INTEGER NOT NULL,
    details         TEXT    NOT NULL,
    created_at      TEXT    NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_step_responses_run ON step_responses(run_id);
CREATE INDEX IF NOT EXISTS idx_step_rewards_run ON step_rewards(run_id);
"#;

/// A step as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStep {
    pub stage_index: u8,
    pub stage_name: String,
    pub tier: String,
    pub model: String,
    pub attempt: Option<u32>,
    pub success: bool,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

/// Run row with aggregate counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub topic: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Step records the run committed.
    pub total_steps: Option<u32>,
    pub stopped_at_stage: Option<u8>,
    pub attempts: Option<u32>,
    pub differentiation_achieved: Option<bool>,
    pub final_success: Option<bool>,
    pub cancelled: Option<bool>,
    pub step_count: u32,
    /// Mean reward pass rate over every recorded report.
    pub mean_pass_rate: Option<f64>,
}

#[derive(Clone)]
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().display().to_string();
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        tracing::info!(path = %path, "Run store opened");
        Ok(Self { pool })
    }

    /// Steps of a run in insertion order.
    pub async fn steps_for_run(&self, run_id: &str) -> Result<Vec<StoredStep>, StorageError> {
        let rows = sqlx::query(
            "SELECT stage_index, stage_name, tier, model, attempt, success, response, created_at
             FROM step_responses WHERE run_id = ?1 ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StoredStep {
                stage_index: row.get::<i64, _>("stage_index") as u8,
                stage_name: row.get("stage_name"),
                tier: row.get("tier"),
                model: row.get("model"),
                attempt: row.get::<Option<i64>, _>("attempt").map(|v| v as u32),
                success: row.get::<i64, _>("success") != 0,
                response: row.get("response"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    pub async fn run_summary(&self, run_id: &str) -> Result<RunSummary, StorageError> {
        let row = sqlx::query(
            "SELECT r.*,
                (SELECT COUNT(*) FROM step_responses s WHERE s.run_id = r.run_id) AS step_count,
                (SELECT AVG(pass_rate) FROM step_rewards w WHERE w.run_id = r.run_id) AS mean_pass_rate
             FROM pipeline_runs r WHERE r.run_id = ?1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::RunNotFound(run_id.to_string()))?;

        let flag = |column: &str| row.get::<Option<i64>, _>(column).map(|v| v != 0);
        Ok(RunSummary {
            run_id: row.get("run_id"),
            topic: row.get("topic"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            total_steps: row.get::<Option<i64>, _>("total_steps").map(|v| v as u32),
            stopped_at_stage: row.get::<Option<i64>, _>("stopped_at_stage").map(|v| v as u8),
            attempts: row.get::<Option<i64>, _>("attempts").map(|v| v as u32),
            differentiation_achieved: flag("differentiation_achieved"),
            final_success: flag("final_success"),
            cancelled: flag("cancelled"),
            step_count: row.get::<i64, _>("step_count") as u32,
            mean_pass_rate: row.get("mean_pass_rate"),
        })
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn mark_run_start(&self, run_id: &str, topic: &str) -> Result<(), StorageError> {
        sqlx::query("INSERT OR IGNORE INTO pipeline_runs (run_id, topic, started_at) VALUES (?1, ?2, ?3)")
            .bind(run_id)
            .bind(topic)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_step(&self, run_id: &str, topic: &str, step: &PipelineStep) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO step_responses (
                run_id, topic, stage_index, stage_name, tier, model, attempt, success, response, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(run_id)
        .bind(topic)
        .bind(step.stage_index as i64)
        .bind(&step.stage_name)
        .bind(step.tier.as_str())
        .bind(&step.model)
        .bind(step.attempt.map(|v| v as i64))
        .bind(step.success as i64)
        .bind(&step.output)
        .bind(step.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_reward_report(
        &self,
        run_id: &str,
        stage_index: u8,
        report: &RewardReport,
    ) -> Result<(), StorageError> {
        let details = serde_json::to_string(&report.checks)?;
        sqlx::query(
            "INSERT INTO step_rewards (run_id, stage_index, pass_rate, num_checks, details)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(run_id)
        .bind(stage_index as i64)
        .bind(report.pass_rate())
        .bind(report.num_checks() as i64)
        .bind(details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_run_end(
        &self,
        run_id: &str,
        outcome: &RunOutcome,
        total_steps: u32,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE pipeline_runs SET
                finished_at = ?2,
                total_steps = ?3,
                stopped_at_stage = ?4,
                attempts = ?5,
                differentiation_achieved = ?6,
                final_success = ?7,
                cancelled = ?8
             WHERE run_id = ?1 AND finished_at IS NULL",
        )
        .bind(run_id)
        .bind(Utc::now())
        .bind(total_steps as i64)
        .bind(outcome.stopped_at_stage as i64)
        .bind(outcome.attempts as i64)
        .bind(outcome.differentiation_achieved as i64)
        .bind(outcome.final_success as i64)
        .bind(outcome.cancelled as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM pipeline_runs WHERE run_id = ?1")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            return Err(if exists {
                StorageError::RunFinalized(run_id.to_string())
            } else {
                StorageError::RunNotFound(run_id.to_string())
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelTier;
    use crate::pipeline::Stage;
    use crate::rewards::RewardCheck;

    async fn store() -> (tempfile::TempDir, SqliteRunStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteRunStore::open(dir.path().join("runs.db"))
            .await
            .expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let (_dir, store) = store().await;
        store.mark_run_start("run-1", "Rust").await.expect("start");
        store.mark_run_start("run-1", "Rust").await.expect("repeat start is ignored");

        let step = PipelineStep::new(Stage::Challenge, ModelTier::Strong, "opus", Some(2), true, "{\"title\": \"t\"}");
        store.save_step("run-1", "Rust", &step).await.expect("step");
        let report = RewardReport::new(
            3,
            vec![
                RewardCheck { name: "a".to_string(), passed: true, detail: String::new() },
                RewardCheck { name: "b".to_string(), passed: false, detail: String::new() },
            ],
        );
        store.save_reward_report("run-1", 3, &report).await.expect("reward");

        let outcome = RunOutcome {
            stopped_at_stage: 6,
            attempts: 3,
            ..RunOutcome::default()
        };
        store.mark_run_end("run-1", &outcome, 1).await.expect("end");
        assert!(
            matches!(store.mark_run_end("run-1", &outcome, 1).await, Err(StorageError::RunFinalized(_))),
            "run end is written once"
        );

        let steps = store.steps_for_run("run-1").await.expect("steps");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].stage_index, 3);
        assert_eq!(steps[0].attempt, Some(2));
        assert_eq!(steps[0].tier, "strong");

        let summary = store.run_summary("run-1").await.expect("summary");
        assert_eq!(summary.total_steps, Some(1));
        assert_eq!(summary.stopped_at_stage, Some(6));
        assert_eq!(summary.final_success, Some(false));
        assert_eq!(summary.step_count, 1);
        assert_eq!(summary.mean_pass_rate, Some(0.5));
        assert!(summary.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let (_dir, store) = store().await;
        assert!(matches!(
            store.run_summary("missing").await,
            Err(StorageError::RunNotFound(_))
        ));
    }
}
