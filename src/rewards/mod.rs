//! Rubric checks over raw stage outputs.
//!
//! Reports are recorded for observability only. Nothing in the workflow
//! branches on a pass rate. Every scorer takes the raw model value (or
//! `Value::Null` when the stage produced nothing) so rejected outputs are
//! scored too.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::difficulty::DifficultyLevel;
use crate::stages::categories::BANNED_TERMS;
use crate::stages::types::ContentKind;
use crate::validation::assessment::{extract_spans, AssessmentValidator, ValidatorConfig};

/// Match hints that say nothing about the mistake.
const GENERIC_HINTS: [&str; 4] = ["bad", "wrong", "error", "issue"];

/// Phrases that suggest a challenge already contains the flaw it should provoke.
const PREEMBEDDED_MARKERS: [&str; 4] = ["<<", "bug", "fix the", "incorrect"];

/// Section headings the implementation prompt asks for.
pub const IMPLEMENTATION_SECTIONS: [&str; 3] = ["### OUTPUT", "### RATIONALE", "### CONSIDERATIONS"];

/// Outcome of one rubric check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl RewardCheck {
    fn new(name: &str, passed: bool) -> Self {
        Self {
            name: name.to_string(),
            passed,
            detail: String::new(),
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// All checks run against one stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardReport {
    pub stage: u8,
    pub checks: Vec<RewardCheck>,
}

impl RewardReport {
    pub fn new(stage: u8, checks: Vec<RewardCheck>) -> Self {
        Self { stage, checks }
    }

    /// Fraction of passed checks; 0.0 for an empty report.
    pub fn pass_rate(&self) -> f64 {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        passed as f64 / self.checks.len().max(1) as f64
    }

    pub fn num_checks(&self) -> usize {
        self.checks.len()
    }

    /// Checks as a JSON array, for persistence.
    pub fn details_json(&self) -> Value {
        serde_json::to_value(&self.checks).unwrap_or(Value::Null)
    }
}

fn str_field<'a>(raw: &'a Value, key: &str) -> &'a str {
    raw.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn str_list(raw: &Value, key: &str) -> Vec<String> {
    raw.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Pure rubric scorer for every stage.
#[derive(Debug, Clone, Default)]
pub struct RewardScorer {
    validator: AssessmentValidator,
}

impl RewardScorer {
    pub fn new(validator: ValidatorConfig) -> Self {
        Self {
            validator: AssessmentValidator::new(validator),
        }
    }

    /// Stage 1: tier keys, list sizes, overlaps, concreteness.
    pub fn score_categories(&self, raw: &Value) -> RewardReport {
        let tiers: Vec<Vec<String>> = DifficultyLevel::TIERS
            .iter()
            .map(|tier| str_list(raw, tier.as_str()))
            .collect();

        let keys_exact = raw.as_object().is_some_and(|object| {
            object.len() == DifficultyLevel::TIERS.len()
                && DifficultyLevel::TIERS
                    .iter()
                    .all(|tier| object.contains_key(tier.as_str()))
        });
        let count_range = tiers.iter().all(|list| (3..=5).contains(&list.len()));

        let all: Vec<String> = tiers.iter().flatten().map(|s| s.trim().to_lowercase()).collect();
        let unique: HashSet<&String> = all.iter().collect();
        let concrete = !all.is_empty()
            && all.iter().all(|subtopic| {
                subtopic.split_whitespace().count() >= 2
                    && BANNED_TERMS.iter().all(|term| !subtopic.contains(term))
            });

        RewardReport::new(
            1,
            vec![
                RewardCheck::new("keys_exact", keys_exact),
                RewardCheck::new("count_range", count_range),
                RewardCheck::new("no_overlaps", unique.len() == all.len()),
                RewardCheck::new("subtopics_concrete", concrete),
            ],
        )
    }

    /// Stage 2: catalog size, fields, ranges, distinctness, match hints.
    pub fn score_catalog(&self, raw: &Value, expected_size: usize) -> RewardReport {
        let entries = raw
            .get("errors")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        const FIELDS: [&str; 7] = [
            "mistake",
            "why_wrong",
            "match_hint",
            "impact",
            "domain_specific",
            "likelihood_strong_avoids",
            "likelihood_weak_makes",
        ];
        let schema_fields = entries.iter().all(|entry| {
            FIELDS.iter().all(|field| {
                entry.get(field).is_some() || (*field == "match_hint" && entry.get("code_pattern").is_some())
            })
        });
        let in_unit = |entry: &Value, key: &str| {
            entry
                .get(key)
                .and_then(Value::as_f64)
                .map_or(true, |v| (0.0..=1.0).contains(&v))
        };
        let likelihood_ranges = entries.iter().all(|entry| {
            in_unit(entry, "likelihood_strong_avoids") && in_unit(entry, "likelihood_weak_makes")
        });
        let impact_normalized = entries
            .iter()
            .all(|entry| matches!(str_field(entry, "impact"), "Minor" | "Moderate" | "Major"));

        let names: Vec<String> = entries
            .iter()
            .map(|entry| str_field(entry, "mistake").trim().to_lowercase())
            .collect();
        let distinct: HashSet<&String> = names.iter().collect();

        let hints_ok = entries.iter().all(|entry| {
            let hint = entry
                .get("match_hint")
                .or_else(|| entry.get("code_pattern"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_lowercase();
            hint.chars().count() >= 6 && !GENERIC_HINTS.contains(&hint.as_str())
        });

        RewardReport::new(
            2,
            vec![
                RewardCheck::new("count_exact", entries.len() == expected_size)
                    .with_detail(format!("found={}", entries.len())),
                RewardCheck::new("schema_fields", schema_fields),
                RewardCheck::new("likelihood_ranges", likelihood_ranges),
                RewardCheck::new("impact_normalized", impact_normalized),
                RewardCheck::new("distinct_mistakes", distinct.len() == names.len()),
                RewardCheck::new("match_hint_present", hints_ok),
            ],
        )
    }

    /// Stage 3: fields, requirement count, artifact type, no pre-embedded flaws, targets.
    pub fn score_challenge(&self, raw: &Value, catalog_names: &[String]) -> RewardReport {
        const FIELDS: [&str; 6] = [
            "title",
            "question_text",
            "context",
            "artifact_type",
            "requirements",
            "success_criteria",
        ];
        let fields_present = FIELDS.iter().all(|field| raw.get(field).is_some());
        let requirements = raw
            .get("requirements")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let artifact_valid = ContentKind::parse(str_field(raw, "artifact_type")).is_some();

        let text = format!(
            "{} {}",
            str_field(raw, "title"),
            str_field(raw, "question_text")
        )
        .to_lowercase();
        let clean = PREEMBEDDED_MARKERS.iter().all(|marker| !text.contains(marker));

        let known: HashSet<&str> = catalog_names.iter().map(String::as_str).collect();
        let targets_known = str_list(raw, "target_error_patterns")
            .iter()
            .all(|target| known.contains(target.as_str()));

        RewardReport::new(
            3,
            vec![
                RewardCheck::new("fields_present", fields_present),
                RewardCheck::new("requirements_count_4_6", (4..=6).contains(&requirements))
                    .with_detail(format!("found={}", requirements)),
                RewardCheck::new("artifact_type_valid", artifact_valid),
                RewardCheck::new("no_preembedded_mistakes", clean),
                RewardCheck::new("targets_subset_catalog", targets_known),
            ],
        )
    }

    /// Stages 4 and 5: section headings, length, soft requirement coverage.
    pub fn score_implementation(&self, stage: u8, text: &str, requirements: &[String]) -> RewardReport {
        let sections = IMPLEMENTATION_SECTIONS.iter().all(|heading| text.contains(heading));
        let lines = text.lines().filter(|line| !line.trim().is_empty()).count();

        let lowered = text.to_lowercase();
        let hits = requirements
            .iter()
            .filter(|requirement| {
                requirement
                    .split_whitespace()
                    .any(|token| lowered.contains(&token.to_lowercase()))
            })
            .count();
        let coverage = hits as f64 / requirements.len().max(1) as f64;

        RewardReport::new(
            stage,
            vec![
                RewardCheck::new("sections_present", sections),
                RewardCheck::new("length_24_120", (24..=120).contains(&lines))
                    .with_detail(format!("lines={}", lines)),
                RewardCheck::new("coverage_soft", coverage >= 0.5)
                    .with_detail(format!("coverage={:.2}", coverage)),
            ],
        )
    }

    /// Stage 6: verdict schema, failures against the catalog, evidence grounding.
    pub fn score_verdict(&self, raw: &Value, catalog_names: &[String], weak_text: &str) -> RewardReport {
        let schema_core = ["differentiation_achieved", "failures_weaker", "reasoning"]
            .iter()
            .all(|field| raw.get(field).is_some());
        let mut checks = vec![RewardCheck::new("schema_core", schema_core)];

        if raw.get("differentiation_achieved").and_then(Value::as_bool) == Some(true) {
            let failures = str_list(raw, "failures_weaker");
            let known: HashSet<String> = catalog_names.iter().map(|n| n.to_lowercase()).collect();
            checks.push(RewardCheck::new("failures_present", !failures.is_empty()));
            checks.push(RewardCheck::new(
                "failures_subset_catalog",
                failures.iter().all(|f| known.contains(&f.to_lowercase())),
            ));
        }

        let weak_lower = weak_text.to_lowercase();
        let evidence_ok = raw
            .get("evidence_spans")
            .and_then(Value::as_array)
            .map_or(true, |spans| {
                spans.iter().all(|span| {
                    span.as_str()
                        .is_some_and(|s| weak_lower.contains(&s.to_lowercase()))
                })
            });
        checks.push(RewardCheck::new("evidence_in_weak_text", evidence_ok));

        RewardReport::new(6, checks)
    }

    /// Stage 7: validator verdict plus span-level sanity checks.
    pub fn score_assessment(&self, raw: &Value) -> RewardReport {
        let validation = self.validator.validate(raw);
        let detail = match &validation {
            Ok(_) => String::new(),
            Err(issues) => issues.iter().take(3).cloned().collect::<Vec<_>>().join("; "),
        };

        let lines: Vec<String> = match raw.get("content") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(text)) => text.lines().map(str::to_string).collect(),
            _ => Vec::new(),
        };
        let spans = extract_spans(&lines.join("\n"));
        let errors = raw.get("errors").and_then(Value::as_array).map_or(0, Vec::len);
        let cfg = self.validator.config();

        RewardReport::new(
            7,
            vec![
                RewardCheck::new("validator_ok", validation.is_ok()).with_detail(detail),
                RewardCheck::new("spans_match_errors_len", spans.len() == errors)
                    .with_detail(format!("spans={} errors={}", spans.len(), errors)),
                RewardCheck::new(
                    "no_crossline_spans",
                    lines
                        .iter()
                        .all(|line| line.matches("<<").count() == line.matches(">>").count()),
                ),
                RewardCheck::new(
                    "span_lengths_in_bounds",
                    spans.iter().all(|span| {
                        (cfg.min_span_len..=cfg.max_span_len).contains(&span.chars().count())
                    }),
                ),
            ],
        )
    }
}
