//! Evidence quality gating.
//!
//! [`QualityThresholds`] define the minimum evidence per stage;
//! [`QualityAssessor`] turns a research state into a completeness score,
//! issues, data gaps and follow-up queries.

pub mod assessor;
pub mod thresholds;

pub use assessor::{DimensionScore, QualityAssessment, QualityAssessor};
pub use thresholds::{coverage_ratio, QualityThresholds};
