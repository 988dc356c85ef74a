//! Shared utility functions for trapforge.

pub mod json_extraction;

pub use json_extraction::{extract_json_object, try_extract_json_object, JsonExtractionResult};
