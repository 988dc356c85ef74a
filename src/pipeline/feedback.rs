//! Notes carried from a failed attempt into the next Stage 3 prompt.

use regex::Regex;
use std::sync::OnceLock;

use crate::prompts::clip;

const NEITHER_QUOTE_CHARS: usize = 200;
const INSUFFICIENT_QUOTE_CHARS: usize = 300;
const ANSWER_PREVIEW_CHARS: usize = 300;

/// At most three plain words between the subject and the verb, so a clause
/// break (`:`, `,`, `.`) ends the phrase.
fn both_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\bboth (?:models|tiers|implementations|answers)(?: \w+){0,3} (?:succeeded|avoided)\b")
            .expect("both pattern is a valid regex")
    })
}

fn neither_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\bneither (?:model|tier|implementation|answer)(?: \w+){0,3} succeeded\b")
            .expect("neither pattern is a valid regex")
    })
}

/// Why an attempt did not pass the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Both tiers avoided every catalog mistake.
    BothAvoided,
    /// Neither tier produced a usable answer.
    NeitherUsable,
    Insufficient,
}

impl FailureKind {
    /// Classify a judge's reasoning by its phrasing.
    pub fn classify(reasoning: &str) -> Self {
        let lowered = reasoning.to_lowercase();
        if both_pattern().is_match(&lowered) {
            FailureKind::BothAvoided
        } else if neither_pattern().is_match(&lowered) {
            FailureKind::NeitherUsable
        } else {
            FailureKind::Insufficient
        }
    }
}

fn preview(answer: &str) -> String {
    let answer = answer.trim();
    let clipped = clip(answer, ANSWER_PREVIEW_CHARS);
    if clipped.len() < answer.len() {
        format!("{}...", clipped)
    } else {
        clipped.to_string()
    }
}

/// Note for an attempt whose judge verdict was negative.
///
/// `mid` and `weak` are the two tier answers the judge compared.
pub fn verdict_note(attempt: u32, reasoning: &str, mid: &str, weak: &str) -> String {
    let reasoning = reasoning.trim();
    match FailureKind::classify(reasoning) {
        FailureKind::BothAvoided => format!(
            "Attempt {}: Both tiers avoided the catalog mistakes. Mid: {} | Weak: {} | Make the requirements subtler so that only deep domain knowledge avoids them.",
            attempt,
            preview(mid),
            preview(weak)
        ),
        FailureKind::NeitherUsable => format!(
            "Attempt {}: Neither tier produced a usable answer. Clarify the task while keeping the conceptual traps. Judge: {}",
            attempt,
            clip(reasoning, NEITHER_QUOTE_CHARS)
        ),
        FailureKind::Insufficient => format!(
            "Attempt {}: Insufficient differentiation between tiers. Judge: {}",
            attempt,
            clip(reasoning, INSUFFICIENT_QUOTE_CHARS)
        ),
    }
}

/// Note for an attempt whose challenge was rejected before any probe.
pub fn challenge_note(attempt: u32, issues: &[String]) -> String {
    format!(
        "Attempt {}: The challenge was rejected: {}",
        attempt,
        issues.join(" ")
    )
}

/// Note for an attempt whose judge reply could not be read.
pub fn malformed_verdict_note(attempt: u32) -> String {
    format!(
        "Attempt {}: The judge returned no usable verdict; make the expected differences easier to observe.",
        attempt
    )
}
