//! Deterministic checks on composed assessments.

pub mod assessment;

pub use assessment::{
    extract_spans, AssessmentError, AssessmentPayload, AssessmentValidator, ValidatorConfig,
};
