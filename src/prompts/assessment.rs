//! Prompt for the Stage 7 composer.

use super::clip;
use crate::stages::{Challenge, TopicFocus};
use crate::validation::assessment::ValidatorConfig;

const WEAK_EXCERPT_CHARS: usize = 2000;
const MID_EXCERPT_CHARS: usize = 1000;

/// Builds one composer prompt. `feedback` holds the previous cycle's
/// violations, verbatim.
pub fn build_assessment_prompt(
    focus: &TopicFocus,
    challenge: &Challenge,
    mid_text: &str,
    weak_text: &str,
    failures: &[String],
    feedback: &[String],
    config: &ValidatorConfig,
) -> String {
    let bullet = |items: &[String]| {
        items
            .iter()
            .map(|item| format!("- {}", item))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let difficulties = config
        .allowed_difficulties
        .iter()
        .map(|d| d.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let feedback_block = if feedback.is_empty() {
        String::new()
    } else {
        format!(
            "\n\n## VALIDATION FEEDBACK FROM THE LAST ATTEMPT\nFix every issue below before returning the next result:\n{}\n",
            bullet(feedback)
        )
    };

    format!(
        r#"Create one interactive error-spotting assessment for students on "{subtopic}" ({topic}).

The task was: {title}. {question}

The weaker answer made these mistakes that the stronger answer avoided:
{failures}

## WEAKER ANSWER (your source material)
{weak}

## STRONGER ANSWER (reference only)
{mid}

## RULES (checked automatically)

1. `content` is a list of {min_lines} to {max_lines} lines of complete {artifact} material taken from the weaker answer, with any context it needs.
2. Wrap each flawed part inline as <<exact text>>. Every marked part is {min_span} to {max_span} characters and stays on one line.
3. Declare {min_errors} to {max_errors} entries in `errors`. Each `id` is exactly the text between << and >>, character for character, and appears once.
4. Each `description` explains what is wrong and what to do instead in at most {max_desc} characters.
5. Mark conceptual mistakes only, never typos or style.
6. `difficulty` is one of: {difficulties}. `content_type` is "{artifact}".
7. Use straight quotes only. Return the result through the create_assessment tool, never as plain text.{feedback_block}"#,
        subtopic = focus.subtopic,
        topic = focus.topic,
        title = challenge.title,
        question = challenge.question_text,
        failures = bullet(failures),
        weak = clip(weak_text, WEAK_EXCERPT_CHARS),
        mid = clip(mid_text, MID_EXCERPT_CHARS),
        min_lines = config.min_lines,
        max_lines = config.max_lines,
        artifact = challenge.artifact_type,
        min_span = config.min_span_len,
        max_span = config.max_span_len,
        min_errors = config.min_errors,
        max_errors = config.max_errors,
        max_desc = config.max_description_len,
        difficulties = difficulties,
        feedback_block = feedback_block,
    )
}
