//! Configuration for the assessment workflow.

use std::path::PathBuf;

use crate::difficulty::DifficultyLevel;
use crate::error::ConfigError;
use crate::llm::TierModels;
use crate::stages::catalog::DEFAULT_CATALOG_SIZE;
use crate::stages::composer::DEFAULT_COMPOSER_ATTEMPTS;
use crate::validation::ValidatorConfig;

/// Outer attempt ceiling bounds.
pub const MIN_ATTEMPTS: u32 = 1;
pub const MAX_ATTEMPTS: u32 = 5;

/// Configuration for one [`Orchestrator`](super::Orchestrator).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Passes through Stages 3-6 before the run is blocked.
    pub max_attempts: u32,
    /// Generate-then-validate cycles in Stage 7.
    pub composer_max_attempts: u32,
    /// Entries the Stage 2 catalog must hold.
    pub catalog_size: usize,
    /// Difficulty to pick after Stage 1; random among non-empty tiers when unset.
    pub preferred_difficulty: Option<DifficultyLevel>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub validator: ValidatorConfig,
    pub models: TierModels,
    /// SQLite database file for run records.
    pub database_path: PathBuf,
    /// Capacity of the step channel between a run and its stream consumer.
    pub event_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            composer_max_attempts: DEFAULT_COMPOSER_ATTEMPTS,
            catalog_size: DEFAULT_CATALOG_SIZE,
            preferred_difficulty: None,
            temperature: 0.7,
            max_tokens: 8000,
            validator: ValidatorConfig::default(),
            models: TierModels::default(),
            database_path: PathBuf::from("trapforge.db"),
            event_buffer: 32,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TRAPFORGE_MAX_ATTEMPTS`: outer attempts, 1-5 (default: 3)
    /// - `TRAPFORGE_COMPOSER_MAX_ATTEMPTS`: Stage 7 cycles (default: 3)
    /// - `TRAPFORGE_CATALOG_SIZE`: catalog entries (default: 6)
    /// - `TRAPFORGE_VALIDATOR_PROFILE`: `default` or `strict`
    /// - `TRAPFORGE_DIFFICULTY`: preferred difficulty tier
    /// - `TRAPFORGE_TEMPERATURE`: sampling temperature (default: 0.7)
    /// - `TRAPFORGE_MODEL_STRONG`, `TRAPFORGE_MODEL_MID`, `TRAPFORGE_MODEL_WEAK`: tier models
    /// - `TRAPFORGE_DATABASE_PATH`: SQLite file (default: trapforge.db)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("TRAPFORGE_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "TRAPFORGE_MAX_ATTEMPTS")?;
        }
        if let Some(val) = lookup("TRAPFORGE_COMPOSER_MAX_ATTEMPTS") {
            config.composer_max_attempts = parse_env_value(&val, "TRAPFORGE_COMPOSER_MAX_ATTEMPTS")?;
        }
        if let Some(val) = lookup("TRAPFORGE_CATALOG_SIZE") {
            config.catalog_size = parse_env_value(&val, "TRAPFORGE_CATALOG_SIZE")?;
        }
        if let Some(val) = lookup("TRAPFORGE_VALIDATOR_PROFILE") {
            config.validator = parse_validator_profile(&val)?;
        }
        if let Some(val) = lookup("TRAPFORGE_DIFFICULTY") {
            let level = DifficultyLevel::parse_loose(&val).ok_or_else(|| ConfigError::InvalidValue {
                key: "TRAPFORGE_DIFFICULTY".to_string(),
                value: val.clone(),
                reason: "expected Beginner, Intermediate or Advanced".to_string(),
            })?;
            config.preferred_difficulty = Some(level);
        }
        if let Some(val) = lookup("TRAPFORGE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "TRAPFORGE_TEMPERATURE")?;
        }
        if let Some(val) = lookup("TRAPFORGE_MODEL_STRONG") {
            config.models.strong = val;
        }
        if let Some(val) = lookup("TRAPFORGE_MODEL_MID") {
            config.models.mid = val;
        }
        if let Some(val) = lookup("TRAPFORGE_MODEL_WEAK") {
            config.models.weak = val;
        }
        if let Some(val) = lookup("TRAPFORGE_DATABASE_PATH") {
            config.database_path = PathBuf::from(val);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_ATTEMPTS..=MAX_ATTEMPTS).contains(&self.max_attempts) {
            return Err(ConfigError::InvalidValue {
                key: "max_attempts".to_string(),
                value: self.max_attempts.to_string(),
                reason: format!("must be between {} and {}", MIN_ATTEMPTS, MAX_ATTEMPTS),
            });
        }
        if self.composer_max_attempts == 0 {
            return Err(ConfigError::ZeroLimit("composer_max_attempts".to_string()));
        }
        if self.catalog_size == 0 {
            return Err(ConfigError::ZeroLimit("catalog_size".to_string()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::ZeroLimit("event_buffer".to_string()));
        }
        if let Some(level) = self.preferred_difficulty {
            if !DifficultyLevel::TIERS.contains(&level) {
                return Err(ConfigError::InvalidValue {
                    key: "preferred_difficulty".to_string(),
                    value: level.to_string(),
                    reason: "must be one of the generated tiers".to_string(),
                });
            }
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "temperature".to_string(),
                value: self.temperature.to_string(),
                reason: "must be between 0.0 and 2.0".to_string(),
            });
        }
        for (tier, model) in [
            ("strong", &self.models.strong),
            ("mid", &self.models.mid),
            ("weak", &self.models.weak),
        ] {
            if model.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("models.{}", tier),
                    value: model.clone(),
                    reason: "model identifier cannot be empty".to_string(),
                });
            }
        }
        self.validator.validate()
    }

    /// Builder method to set the outer attempt ceiling (clamped to 1-5).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.clamp(MIN_ATTEMPTS, MAX_ATTEMPTS);
        self
    }

    /// Builder method to set the Stage 7 attempt ceiling (at least 1).
    pub fn with_composer_max_attempts(mut self, attempts: u32) -> Self {
        self.composer_max_attempts = attempts.max(1);
        self
    }

    pub fn with_catalog_size(mut self, size: usize) -> Self {
        self.catalog_size = size.max(1);
        self
    }

    pub fn with_preferred_difficulty(mut self, level: Option<DifficultyLevel>) -> Self {
        self.preferred_difficulty = level;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_models(mut self, models: TierModels) -> Self {
        self.models = models;
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }
}

/// Named validator profile.
pub fn parse_validator_profile(value: &str) -> Result<ValidatorConfig, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "default" => Ok(ValidatorConfig::default()),
        "strict" => Ok(ValidatorConfig::strict()),
        _ => Err(ConfigError::InvalidValue {
            key: "TRAPFORGE_VALIDATOR_PROFILE".to_string(),
            value: value.to_string(),
            reason: "expected 'default' or 'strict'".to_string(),
        }),
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: "could not parse value".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.composer_max_attempts, 3);
        assert_eq!(config.catalog_size, 6);
        assert_eq!(config.preferred_difficulty, None);
        assert_eq!(config.validator, ValidatorConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_clamps_attempts() {
        let config = PipelineConfig::new()
            .with_max_attempts(9)
            .with_composer_max_attempts(0)
            .with_catalog_size(0);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.composer_max_attempts, 1);
        assert_eq!(config.catalog_size, 1);
        assert_eq!(PipelineConfig::new().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_from_lookup_reads_every_variable() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("TRAPFORGE_MAX_ATTEMPTS", "5"),
            ("TRAPFORGE_COMPOSER_MAX_ATTEMPTS", "2"),
            ("TRAPFORGE_VALIDATOR_PROFILE", "Strict"),
            ("TRAPFORGE_DIFFICULTY", "advanced"),
            ("TRAPFORGE_MODEL_WEAK", "tiny/model"),
            ("TRAPFORGE_DATABASE_PATH", "/tmp/runs.db"),
        ]))
        .expect("valid config");

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.composer_max_attempts, 2);
        assert_eq!(config.validator, ValidatorConfig::strict());
        assert_eq!(config.preferred_difficulty, Some(DifficultyLevel::Advanced));
        assert_eq!(config.models.weak, "tiny/model");
        assert_eq!(config.database_path, PathBuf::from("/tmp/runs.db"));
    }

    #[test]
    fn test_from_lookup_rejects_out_of_range_attempts() {
        let err = PipelineConfig::from_lookup(lookup(&[("TRAPFORGE_MAX_ATTEMPTS", "7")]))
            .expect_err("out of range");
        assert!(err.to_string().contains("max_attempts"));

        let err = PipelineConfig::from_lookup(lookup(&[("TRAPFORGE_MAX_ATTEMPTS", "three")]))
            .expect_err("not a number");
        assert!(err.to_string().contains("TRAPFORGE_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_validation_rejects_expert_preference_and_bad_profile() {
        let config = PipelineConfig::default().with_preferred_difficulty(Some(DifficultyLevel::Expert));
        assert!(config.validate().is_err());
        assert!(parse_validator_profile("lenient").is_err());
    }

    #[test]
    fn test_validation_empty_model() {
        let mut models = TierModels::default();
        models.mid = " ".to_string();
        let result = PipelineConfig::default().with_models(models).validate();
        assert!(result.unwrap_err().to_string().contains("models.mid"));
    }
}
