//! Stage 2: catalog of conceptual mistakes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use super::{unpack, StageRun, TopicFocus};
use crate::llm::{ModelInvoker, ModelTier, ToolDefinition};
use crate::prompts;
use crate::rewards::RewardScorer;

/// Default number of catalog entries.
pub const DEFAULT_CATALOG_SIZE: usize = 6;

/// How much a mistake hurts the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Impact {
    Minor,
    Moderate,
    Major,
}

impl Impact {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "minor" => Some(Impact::Minor),
            "moderate" => Some(Impact::Moderate),
            "major" => Some(Impact::Major),
            _ => None,
        }
    }
}

/// One conceptual mistake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub mistake: String,
    pub why_wrong: String,
    /// What the mistake looks like in an answer.
    #[serde(alias = "code_pattern")]
    pub match_hint: String,
    pub impact: Impact,
    pub domain_specific: bool,
    pub likelihood_strong_avoids: f64,
    pub likelihood_weak_makes: f64,
}

/// Fixed-size set of named mistakes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCatalog {
    entries: Vec<CatalogEntry>,
}

impl ErrorCatalog {
    /// Accept the raw `errors` list whole, or report every violation.
    pub fn from_object(object: &Map<String, Value>, expected_size: usize) -> Result<Self, Vec<String>> {
        let Some(items) = object.get("errors").and_then(Value::as_array) else {
            return Err(vec!["`errors` must be a list of catalog entries.".to_string()]);
        };

        let mut issues = Vec::new();
        if items.len() != expected_size {
            issues.push(format!(
                "Catalog must contain exactly {} mistakes (found {}).",
                expected_size,
                items.len()
            ));
        }

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match parse_entry(item) {
                Ok(entry) => {
                    if !seen.insert(entry.mistake.to_lowercase()) {
                        issues.push(format!("Mistake '{}' is listed more than once.", entry.mistake));
                    }
                    entries.push(entry);
                }
                Err(reason) => issues.push(format!("Entry {}: {}", index + 1, reason)),
            }
        }

        if issues.is_empty() {
            Ok(Self { entries })
        } else {
            Err(issues)
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mistake names in catalog order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.mistake.clone()).collect()
    }

    /// Canonical spelling of a mistake name, matched case-insensitively.
    ///
    /// Uses the same folding as the uniqueness check in [`Self::from_object`].
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        let name = name.trim().to_lowercase();
        self.entries
            .iter()
            .find(|e| e.mistake.to_lowercase() == name)
            .map(|e| e.mistake.as_str())
    }

    /// Entries by impact, then by how likely the weak tier is to make them.
    pub fn ranked(&self) -> Vec<&CatalogEntry> {
        let mut ranked: Vec<&CatalogEntry> = self.entries.iter().collect();
        ranked.sort_by(|a, b| {
            b.impact.cmp(&a.impact).then_with(|| {
                b.likelihood_weak_makes
                    .partial_cmp(&a.likelihood_weak_makes)
                    .unwrap_or(Ordering::Equal)
            })
        });
        ranked
    }
}

fn parse_entry(item: &Value) -> Result<CatalogEntry, String> {
    let object = item.as_object().ok_or("must be an object")?;
    let text = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mistake = text("mistake").ok_or("`mistake` must be a non-empty string")?;
    let why_wrong = text("why_wrong").ok_or_else(|| format!("'{}' needs `why_wrong`", mistake))?;
    let match_hint = text("match_hint")
        .or_else(|| text("code_pattern"))
        .ok_or_else(|| format!("'{}' needs `match_hint`", mistake))?;
    let impact = object
        .get("impact")
        .and_then(Value::as_str)
        .and_then(Impact::parse)
        .ok_or_else(|| format!("'{}' has an impact outside Minor/Moderate/Major", mistake))?;
    let domain_specific = object
        .get("domain_specific")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let likelihood = |key: &str| -> Result<f64, String> {
        match object.get(key).and_then(Value::as_f64) {
            Some(v) if (0.0..=1.0).contains(&v) => Ok(v),
            Some(v) => Err(format!("'{}' has {} = {} outside [0, 1]", mistake, key, v)),
            None => Err(format!("'{}' needs a numeric `{}`", mistake, key)),
        }
    };
    let likelihood_strong_avoids = likelihood("likelihood_strong_avoids")?;
    let likelihood_weak_makes = likelihood("likelihood_weak_makes")?;

    Ok(CatalogEntry {
        mistake,
        why_wrong,
        match_hint,
        impact,
        domain_specific,
        likelihood_strong_avoids,
        likelihood_weak_makes,
    })
}

fn catalog_tool(size: usize) -> ToolDefinition {
    ToolDefinition::function(
        "error_catalog",
        "Return a catalog of conceptual mistakes a weaker model is likely to make",
        json!({
            "type": "object",
            "properties": {
                "errors": {
                    "type": "array",
                    "minItems": size,
                    "maxItems": size,
                    "items": {
                        "type": "object",
                        "properties": {
                            "mistake": { "type": "string" },
                            "why_wrong": { "type": "string" },
                            "match_hint": { "type": "string" },
                            "impact": { "type": "string", "enum": ["Minor", "Moderate", "Major"] },
                            "domain_specific": { "type": "boolean" },
                            "likelihood_strong_avoids": { "type": "number", "minimum": 0, "maximum": 1 },
                            "likelihood_weak_makes": { "type": "number", "minimum": 0, "maximum": 1 }
                        },
                        "required": [
                            "mistake", "why_wrong", "match_hint", "impact",
                            "domain_specific", "likelihood_strong_avoids", "likelihood_weak_makes"
                        ]
                    }
                }
            },
            "required": ["errors"],
        }),
    )
}

/// Produces an [`ErrorCatalog`] for a topic focus.
pub struct CatalogStage {
    invoker: Arc<ModelInvoker>,
    scorer: RewardScorer,
    size: usize,
}

impl CatalogStage {
    pub fn new(invoker: Arc<ModelInvoker>, scorer: RewardScorer) -> Self {
        Self {
            invoker,
            scorer,
            size: DEFAULT_CATALOG_SIZE,
        }
    }

    /// Set the required catalog size (at least 1).
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self
    }

    pub async fn generate(&self, focus: &TopicFocus) -> StageRun<ErrorCatalog> {
        let tier = ModelTier::Strong;
        let prompt = prompts::build_catalog_prompt(focus, self.size);
        let reply = unpack(
            self.invoker
                .invoke_structured(tier, &prompt, catalog_tool(self.size))
                .await,
        );
        let rewards = self.scorer.score_catalog(&reply.value(), self.size);

        let (output, issues) = match reply.object.as_ref() {
            Ok(object) => match ErrorCatalog::from_object(object, self.size) {
                Ok(catalog) => (Some(catalog), Vec::new()),
                Err(issues) => (None, issues),
            },
            Err(reason) => (None, vec![reason.clone()]),
        };
        if !issues.is_empty() {
            tracing::warn!(subtopic = %focus.subtopic, issues = ?issues, "Rejected error catalog");
        }

        StageRun {
            output,
            tier,
            model: self.invoker.model_for(tier).to_string(),
            raw_output: reply.raw,
            issues,
            rewards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::difficulty::DifficultyLevel;
    use crate::stages::test_support::{invoker, Scripted, ScriptedProvider};

    fn entry(name: &str, impact: &str, weak: f64) -> Value {
        json!({
            "mistake": name,
            "why_wrong": "It breaks an invariant.",
            "match_hint": "look for the unchecked index",
            "impact": impact,
            "domain_specific": true,
            "likelihood_strong_avoids": 0.9,
            "likelihood_weak_makes": weak,
        })
    }

    fn six() -> Value {
        json!({ "errors": [
            entry("Off-by-one loop bound", "Major", 0.7),
            entry("Ignoring empty input", "Moderate", 0.8),
            entry("Mutating while iterating", "Major", 0.9),
            entry("Integer overflow", "Minor", 0.5),
            entry("Wrong equality semantics", "Moderate", 0.4),
            entry("Leaking file handles", "Minor", 0.3),
        ]})
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn test_accepts_six_distinct_entries() {
        let catalog = ErrorCatalog::from_object(&object(six()), 6).expect("valid");
        assert_eq!(catalog.len(), 6);
        assert_eq!(catalog.canonical_name("integer OVERFLOW"), Some("Integer overflow"));
        assert_eq!(catalog.canonical_name("unknown"), None);
    }

    #[test]
    fn test_non_ascii_names_fold_like_uniqueness() {
        let raw = json!({ "errors": [
            entry("Überlauf im Zähler", "Major", 0.7),
            entry("Ignoring empty input", "Moderate", 0.8),
            entry("Mutating while iterating", "Major", 0.9),
            entry("Integer overflow", "Minor", 0.5),
            entry("Wrong equality semantics", "Moderate", 0.4),
            entry("Leaking file handles", "Minor", 0.3),
        ]});
        let catalog = ErrorCatalog::from_object(&object(raw), 6).expect("valid");
        assert_eq!(catalog.canonical_name(" ÜBERLAUF IM ZÄHLER "), Some("Überlauf im Zähler"));

        let mut duplicate = six();
        duplicate["errors"][5] = entry("ÜBERLAUF im zähler", "Minor", 0.3);
        duplicate["errors"][0] = entry("überlauf IM Zähler", "Major", 0.7);
        let issues = ErrorCatalog::from_object(&object(duplicate), 6).expect_err("duplicate");
        assert!(issues.iter().any(|i| i.contains("listed more than once")));
    }

    #[test]
    fn test_rejects_wrong_size_and_duplicates() {
        let mut raw = six();
        raw["errors"][5] = entry("off-by-one LOOP bound", "Minor", 0.1);
        raw["errors"].as_array_mut().expect("array").push(entry("Extra", "Minor", 0.1));

        let issues = ErrorCatalog::from_object(&object(raw), 6).expect_err("invalid");
        assert_eq!(issues[0], "Catalog must contain exactly 6 mistakes (found 7).");
        assert!(issues.contains(&"Mistake 'off-by-one LOOP bound' is listed more than once.".to_string()));
    }

    #[test]
    fn test_rejects_out_of_range_likelihood() {
        let mut raw = six();
        raw["errors"][2]["likelihood_weak_makes"] = json!(1.5);
        let issues = ErrorCatalog::from_object(&object(raw), 6).expect_err("invalid");
        assert_eq!(issues.len(), 1);
        assert!(issues[0].starts_with("Entry 3:"));
    }

    #[test]
    fn test_legacy_code_pattern_alias() {
        let mut raw = six();
        let first = raw["errors"][0].as_object_mut().expect("object");
        let hint = first.remove("match_hint").expect("hint");
        first.insert("code_pattern".to_string(), hint);

        let catalog = ErrorCatalog::from_object(&object(raw), 6).expect("valid");
        assert_eq!(catalog.entries()[0].match_hint, "look for the unchecked index");

        let decoded: CatalogEntry = serde_json::from_value(json!({
            "mistake": "m", "why_wrong": "w", "code_pattern": "p", "impact": "Minor",
            "domain_specific": false, "likelihood_strong_avoids": 0.1, "likelihood_weak_makes": 0.2
        }))
        .expect("alias deserializes");
        assert_eq!(decoded.match_hint, "p");
    }

    #[test]
    fn test_ranked_orders_by_impact_then_weak_likelihood() {
        let catalog = ErrorCatalog::from_object(&object(six()), 6).expect("valid");
        let ranked: Vec<&str> = catalog.ranked().iter().map(|e| e.mistake.as_str()).collect();
        assert_eq!(
            ranked,
            vec![
                "Mutating while iterating",
                "Off-by-one loop bound",
                "Ignoring empty input",
                "Wrong equality semantics",
                "Integer overflow",
                "Leaking file handles",
            ]
        );
    }

    #[tokio::test]
    async fn test_stage_rejects_short_catalog() {
        let mut raw = six();
        raw["errors"].as_array_mut().expect("array").truncate(4);
        let provider = ScriptedProvider::new(vec![Scripted::Tool(raw)]);
        let stage = CatalogStage::new(invoker(provider), RewardScorer::default());
        let focus = TopicFocus {
            topic: "Rust".to_string(),
            subtopic: "Iterator invalidation hazards".to_string(),
            difficulty: DifficultyLevel::Intermediate,
        };

        let run = stage.generate(&focus).await;
        assert!(!run.succeeded());
        assert_eq!(run.issues, vec!["Catalog must contain exactly 6 mistakes (found 4).".to_string()]);
        assert!(run.rewards.pass_rate() < 1.0);
    }
}
