//! Difficulty levels for generated assessments.
//!
//! Stage 1 only produces the first three levels; `Expert` is accepted on
//! composed assessments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The difficulty level of a topic tier or assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DifficultyLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl DifficultyLevel {
    /// Tier labels a category map must contain, in order.
    pub const TIERS: [DifficultyLevel; 3] = [
        DifficultyLevel::Beginner,
        DifficultyLevel::Intermediate,
        DifficultyLevel::Advanced,
    ];

    /// Every level an assessment may declare.
    pub const ALL: [DifficultyLevel; 4] = [
        DifficultyLevel::Beginner,
        DifficultyLevel::Intermediate,
        DifficultyLevel::Advanced,
        DifficultyLevel::Expert,
    ];

    /// Canonical label as emitted in JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyLevel::Beginner => "Beginner",
            DifficultyLevel::Intermediate => "Intermediate",
            DifficultyLevel::Advanced => "Advanced",
            DifficultyLevel::Expert => "Expert",
        }
    }

    /// Parse a label case-insensitively.
    pub fn parse_loose(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(value))
    }
}

impl Default for DifficultyLevel {
    fn default() -> Self {
        DifficultyLevel::Intermediate
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse: labels must match exactly.
impl FromStr for DifficultyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| format!("unknown difficulty '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_exclude_expert() {
        assert_eq!(DifficultyLevel::TIERS.len(), 3);
        assert!(!DifficultyLevel::TIERS.contains(&DifficultyLevel::Expert));
    }

    #[test]
    fn test_strict_and_loose_parsing() {
        assert_eq!("Advanced".parse::<DifficultyLevel>(), Ok(DifficultyLevel::Advanced));
        assert!("advanced".parse::<DifficultyLevel>().is_err());
        assert_eq!(
            DifficultyLevel::parse_loose(" advanced "),
            Some(DifficultyLevel::Advanced)
        );
        assert_eq!(DifficultyLevel::parse_loose("hard"), None);
    }

    #[test]
    fn test_serde_uses_capitalized_labels() {
        let encoded = serde_json::to_string(&DifficultyLevel::Expert).expect("serialize");
        assert_eq!(encoded, "\"Expert\"");
        let decoded: DifficultyLevel = serde_json::from_str("\"Beginner\"").expect("deserialize");
        assert_eq!(decoded, DifficultyLevel::Beginner);
    }
}
