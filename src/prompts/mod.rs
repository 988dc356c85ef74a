//! Prompt builders for every model-backed stage.
//!
//! - [`generation`] - difficulty tiers, mistake catalog and challenge (Stages 1-3)
//! - [`probing`] - tier implementations and the judge (Stages 4-6)
//! - [`assessment`] - the composer (Stage 7)
//!
//! # Usage
//!
//! ```
//! use trapforge::prompts::build_categories_prompt;
//!
//! let prompt = build_categories_prompt("Distributed systems");
//! assert!(prompt.contains("Distributed systems"));
//! ```

pub mod assessment;
pub mod generation;
pub mod probing;

pub use assessment::build_assessment_prompt;
pub use generation::{build_catalog_prompt, build_categories_prompt, build_challenge_prompt};
pub use probing::{build_implementation_prompt, build_judge_prompt};

/// Longest prefix of `text` with at most `max_chars` characters.
pub(crate) fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_respects_char_boundaries() {
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("abc", 10), "abc");
        assert_eq!(clip("", 3), "");
    }
}
