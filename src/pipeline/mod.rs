//! The adversarial assessment workflow.
//!
//! A run moves through seven stages:
//!
//! 1. difficulty categories for the topic
//! 2. a ranked catalog of conceptual mistakes for one subtopic
//! 3. a challenge that targets those mistakes
//! 4. a mid-tier implementation attempt
//! 5. a weak-tier implementation attempt
//! 6. a judge verdict on whether only the weak tier fell into the traps
//! 7. a student assessment built from the weak answer
//!
//! Stages 3 to 6 repeat up to [`PipelineConfig::max_attempts`] times. Each
//! failed attempt leaves a feedback note for the next Stage 3 prompt.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trapforge::llm::LiteLlmClient;
//! use trapforge::pipeline::{Orchestrator, PipelineConfig};
//! use trapforge::storage::SqliteRunStore;
//!
//! let config = PipelineConfig::from_env()?;
//! let store = Arc::new(SqliteRunStore::open(&config.database_path).await?);
//! let provider = Arc::new(LiteLlmClient::from_env()?);
//!
//! let report = Orchestrator::new(provider, store, config).run("SQL joins", None).await;
//! println!("stopped at stage {}", report.stopped_at_stage());
//! ```

pub mod config;
pub mod feedback;
pub mod orchestrator;
pub mod types;

pub use config::{parse_validator_profile, PipelineConfig, MAX_ATTEMPTS, MIN_ATTEMPTS};
pub use feedback::FailureKind;
pub use orchestrator::Orchestrator;
pub use types::{PipelineRun, PipelineStep, RunOutcome, RunReport, Stage};
