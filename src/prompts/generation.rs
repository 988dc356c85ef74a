//! Prompts for the generating stages: categories, catalog and challenge.

use crate::stages::{ContentKind, TopicFocus};

const CATEGORIES_TEMPLATE: &str = r#"For the topic "{topic}", create exactly three difficulty tiers (Beginner, Intermediate, Advanced) with concrete subtopics.

## RULES

- Each tier lists 3 to 5 subtopics.
- Every subtopic is a specific, testable concept of at least two words.
- Do not use generic labels such as "overview", "introduction", "basics", "general" or "misc".
- No subtopic may appear under more than one tier.
- Progress from foundational concepts to advanced, domain-specific knowledge.

Return the tiers through the difficulty_categories tool."#;

/// Builds the Stage 1 prompt.
pub fn build_categories_prompt(topic: &str) -> String {
    CATEGORIES_TEMPLATE.replace("{topic}", topic.trim())
}

/// Builds the Stage 2 prompt asking for exactly `size` mistakes.
pub fn build_catalog_prompt(focus: &TopicFocus, size: usize) -> String {
    format!(
        r#"For the topic "{topic}" at {difficulty} level, specifically "{subtopic}", identify exactly {size} conceptual mistakes that separate stronger models from weaker ones.

## WHAT TO LOOK FOR

- Stronger models have the domain knowledge to avoid the mistake.
- Weaker models are likely to fall into it through shallow understanding.
- Mistakes are subtle and domain-specific, not syntax slips or typos.

## FIELDS PER MISTAKE

- mistake: a short, distinct name
- why_wrong: why the result is incorrect
- match_hint: what the mistake looks like inside an answer
- impact: one of Minor, Moderate, Major
- domain_specific: true when it needs knowledge of {topic}
- likelihood_strong_avoids: probability in [0, 1]
- likelihood_weak_makes: probability in [0, 1]

Return the list through the error_catalog tool under the `errors` key."#,
        topic = focus.topic,
        difficulty = focus.difficulty,
        subtopic = focus.subtopic,
        size = size,
    )
}

/// Builds the Stage 3 prompt.
///
/// Only mistake names are shown. Feedback from earlier attempts is appended
/// as a block the model must address.
pub fn build_challenge_prompt(focus: &TopicFocus, mistake_names: &[String], feedback: &[String]) -> String {
    let targets = mistake_names
        .iter()
        .map(|name| format!("- {}", name))
        .collect::<Vec<_>>()
        .join("\n");

    let feedback_block = if feedback.is_empty() {
        String::new()
    } else {
        format!(
            r#"

## VALIDATION FEEDBACK (fix all):
{}

Adjust the strategy:
- If both tiers avoided the mistakes, make the requirements subtler and lean on deeper domain expertise.
- If neither tier produced a usable answer, clarify the requirements while keeping the conceptual traps.
- Otherwise, focus on more nuanced, domain-specific implementation decisions.
"#,
            feedback
                .iter()
                .map(|note| format!("- {}", note))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };

    format!(
        r#"Create an implementation challenge for "{subtopic}" ({difficulty} level, topic "{topic}") whose natural solution exposes these potential mistakes:

## MISTAKES TO PROVOKE
{targets}
{feedback_block}
## DESIGN GOALS

1. Solving it well requires genuine {topic} expertise.
2. A weaker model has natural opportunities to make the listed mistakes.
3. It mirrors a scenario practitioners actually meet.
4. It tests conceptual understanding, not documentation lookup.
5. It contains no flawed material and no hints about the mistakes. Never include << or >> markers.

## FIELDS

- title, question_text, context, success_criteria: non-empty text
- artifact_type: one of {kinds}
- requirements: 4 to 6 concrete functional requirements
- target_error_patterns: names copied exactly from the list above

Return the challenge through the strategic_challenge tool."#,
        subtopic = focus.subtopic,
        difficulty = focus.difficulty,
        topic = focus.topic,
        targets = targets,
        feedback_block = feedback_block,
        kinds = ContentKind::labels(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::difficulty::DifficultyLevel;

    fn focus() -> TopicFocus {
        TopicFocus {
            topic: "Databases".to_string(),
            subtopic: "Transaction isolation anomalies".to_string(),
            difficulty: DifficultyLevel::Intermediate,
        }
    }

    #[test]
    fn test_categories_prompt_names_topic() {
        let prompt = build_categories_prompt("  Databases ");
        assert!(prompt.contains(r#"topic "Databases""#));
        assert!(prompt.contains("3 to 5 subtopics"));
    }

    #[test]
    fn test_catalog_prompt_asks_for_exact_size() {
        let prompt = build_catalog_prompt(&focus(), 6);
        assert!(prompt.contains("exactly 6 conceptual mistakes"));
        assert!(prompt.contains("Intermediate level"));
    }

    #[test]
    fn test_challenge_prompt_feedback_block_only_when_needed() {
        let names = vec!["Phantom reads ignored".to_string()];
        let first = build_challenge_prompt(&focus(), &names, &[]);
        assert!(!first.contains("VALIDATION FEEDBACK"));
        assert!(first.contains("- Phantom reads ignored"));

        let retry = build_challenge_prompt(&focus(), &names, &["Attempt 1: too easy".to_string()]);
        assert!(retry.contains("VALIDATION FEEDBACK (fix all):\n- Attempt 1: too easy"));
    }
}
