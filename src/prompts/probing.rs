//! Prompts for the probed tiers and the judge.

use super::clip;
use crate::rewards::IMPLEMENTATION_SECTIONS;
use crate::stages::{Challenge, ErrorCatalog};

/// Builds the Stage 4/5 prompt. Both tiers receive the same text.
pub fn build_implementation_prompt(challenge: &Challenge) -> String {
    let requirements = challenge
        .requirements
        .iter()
        .map(|r| format!("- {}", r))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an expert practitioner. Complete the following {artifact} task.

TASK: {title}
DESCRIPTION: {question}
CONTEXT: {context}

REQUIREMENTS:
{requirements}

SUCCESS CRITERIA: {criteria}

Answer with exactly these sections:

{output}
Your complete {artifact}.

{rationale}
Two or three sentences on your key decisions.

{considerations}
Edge cases and production concerns."#,
        artifact = challenge.artifact_type,
        title = challenge.title,
        question = challenge.question_text,
        context = challenge.context,
        requirements = requirements,
        criteria = challenge.success_criteria,
        output = IMPLEMENTATION_SECTIONS[0],
        rationale = IMPLEMENTATION_SECTIONS[1],
        considerations = IMPLEMENTATION_SECTIONS[2],
    )
}

/// Builds the Stage 6 prompt. The catalog is listed most damaging first.
pub fn build_judge_prompt(challenge: &Challenge, catalog: &ErrorCatalog, mid_text: &str, weak_text: &str) -> String {
    let patterns = catalog
        .ranked()
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            format!(
                "{}. {} [{:?}]\n   Why wrong: {}\n   Looks like: {}",
                i + 1,
                entry.mistake,
                entry.impact,
                entry.why_wrong,
                entry.match_hint
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are judging two answers to the same task to decide whether they show a clear difference in domain expertise.

## TASK
{question}
Context: {context}
Requirements: {requirements}

## KNOWN MISTAKES
{patterns}

## ANSWER A (expected stronger)
{mid}

## ANSWER B (expected weaker)
{weak}

## HOW TO JUDGE

1. Set differentiation_achieved only if B makes at least one known mistake that A avoids.
2. List those mistakes in failures_weaker using the names above exactly.
3. Quote the offending parts of B verbatim in evidence_spans.
4. Put problems that match no known mistake in unmapped_findings.
5. Explain the decision in reasoning. If both answers avoid the mistakes say "both models succeeded"; if neither answer is usable say "neither model succeeded".

Return the verdict through the differentiation_verdict tool."#,
        question = challenge.question_text,
        context = challenge.context,
        requirements = challenge.requirements.join(", "),
        patterns = patterns,
        mid = clip(mid_text, 6000),
        weak = clip(weak_text, 6000),
    )
}
