//! trapforge: adversarial assessment generation.
//!
//! Builds student assessments from the mistakes a weak model makes on a
//! challenge that a mid-tier model handles correctly.

pub mod cli;
pub mod difficulty;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod rewards;
pub mod server;
pub mod stages;
pub mod storage;
pub mod stream;
pub mod utils;
pub mod validation;

pub use error::{ConfigError, LlmError, StorageError};
