//! Evidence thresholds shared by the supervisor, quality assessor and
//! progress calculator.

use serde::{Deserialize, Serialize};

/// Minimum evidence each stage must gather before the pipeline advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    // Search gate
    /// Total search results that clear the search stage.
    pub min_search_results: usize,
    /// Alternatively, this many high-quality results clear it.
    pub min_high_quality_results: usize,

    // Extraction gate
    /// Total extractions that clear the extraction stage.
    pub min_extractions: usize,
    /// Alternatively, this many substantial extractions clear it.
    pub min_substantial_extractions: usize,

    // Analysis gate
    pub min_features: usize,
    pub min_competitors: usize,
    pub min_use_cases: usize,
    pub min_tech_stack: usize,
    /// Minimum analysis confidence (0.0 - 1.0).
    pub min_confidence: f64,

    // Completion
    /// Score (0 - 100) at which research counts as complete.
    pub completion_score: f64,
    /// Multiply the quality score by the analysis confidence.
    pub weight_by_confidence: bool,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_search_results: 15,
            min_high_quality_results: 5,
            min_extractions: 10,
            min_substantial_extractions: 5,
            min_features: 5,
            min_competitors: 3,
            min_use_cases: 3,
            min_tech_stack: 3,
            min_confidence: 0.6,
            completion_score: 70.0,
            weight_by_confidence: false,
        }
    }
}

impl QualityThresholds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_search_results(mut self, min: usize) -> Self {
        self.min_search_results = min;
        self
    }

    pub fn with_min_high_quality_results(mut self, min: usize) -> Self {
        self.min_high_quality_results = min;
        self
    }

    pub fn with_min_extractions(mut self, min: usize) -> Self {
        self.min_extractions = min;
        self
    }

    pub fn with_min_substantial_extractions(mut self, min: usize) -> Self {
        self.min_substantial_extractions = min;
        self
    }

    pub fn with_min_features(mut self, min: usize) -> Self {
        self.min_features = min;
        self
    }

    pub fn with_min_competitors(mut self, min: usize) -> Self {
        self.min_competitors = min;
        self
    }

    pub fn with_min_use_cases(mut self, min: usize) -> Self {
        self.min_use_cases = min;
        self
    }

    pub fn with_min_tech_stack(mut self, min: usize) -> Self {
        self.min_tech_stack = min;
        self
    }

    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = min;
        self
    }

    pub fn with_completion_score(mut self, score: f64) -> Self {
        self.completion_score = score;
        self
    }

    pub fn with_weight_by_confidence(mut self, enabled: bool) -> Self {
        self.weight_by_confidence = enabled;
        self
    }

    /// Checks ranges; returns a description of the first problem found.
    pub fn check(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err("min_confidence must be between 0.0 and 1.0".to_string());
        }
        if !(0.0..=100.0).contains(&self.completion_score) {
            return Err("completion_score must be between 0 and 100".to_string());
        }
        Ok(())
    }
}

/// Coverage ratio of `count` against `min`, clamped to 1. A zero minimum is
/// always fully covered.
pub fn coverage_ratio(count: usize, min: usize) -> f64 {
    if min == 0 {
        return 1.0;
    }
    (count as f64 / min as f64).min(1.0)
}
