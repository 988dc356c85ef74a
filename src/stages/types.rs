//! Types shared by several stages.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::difficulty::DifficultyLevel;

/// Topic, subtopic and difficulty a run settled on after Stage 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicFocus {
    pub topic: String,
    pub subtopic: String,
    pub difficulty: DifficultyLevel,
}

/// Kind of artifact a challenge asks for and an assessment presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Code,
    Prose,
    Math,
    Email,
    Table,
    Diagram,
    Plan,
    Pseudo,
    Query,
    Other,
}

impl ContentKind {
    pub const ALL: [ContentKind; 10] = [
        ContentKind::Code,
        ContentKind::Prose,
        ContentKind::Math,
        ContentKind::Email,
        ContentKind::Table,
        ContentKind::Diagram,
        ContentKind::Plan,
        ContentKind::Pseudo,
        ContentKind::Query,
        ContentKind::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Code => "code",
            ContentKind::Prose => "prose",
            ContentKind::Math => "math",
            ContentKind::Email => "email",
            ContentKind::Table => "table",
            ContentKind::Diagram => "diagram",
            ContentKind::Plan => "plan",
            ContentKind::Pseudo => "pseudo",
            ContentKind::Query => "query",
            ContentKind::Other => "other",
        }
    }

    /// Parse after trimming and lowercasing.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == normalized)
    }

    /// Comma-separated list of every label, for prompts and messages.
    pub fn labels() -> String {
        Self::ALL
            .iter()
            .map(ContentKind::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(ContentKind::parse(" Code "), Some(ContentKind::Code));
        assert_eq!(ContentKind::parse("QUERY"), Some(ContentKind::Query));
        assert_eq!(ContentKind::parse("spreadsheet"), None);
    }

    #[test]
    fn test_labels_lists_every_kind() {
        let labels = ContentKind::labels();
        assert!(labels.starts_with("code, prose"));
        assert!(labels.ends_with("other"));
    }
}
