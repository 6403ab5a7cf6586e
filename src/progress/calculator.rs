//! Progress model: research state in, 0-100 progress and a detail record out.
//!
//! Each stage reports its own 0-100 completion; the overall figure blends
//! them through a fixed band table.

use crate::quality::{coverage_ratio, QualityThresholds};
use crate::research::{AgentKind, ProgressDetail, ResearchState, ResearchStatus};

/// The slice of overall progress owned by one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageBand {
    pub agent: AgentKind,
    pub start: f64,
    pub end: f64,
}

impl StageBand {
    pub const fn new(agent: AgentKind, start: f64, end: f64) -> Self {
        Self { agent, start, end }
    }

    pub fn width(&self) -> f64 {
        self.end - self.start
    }
}

/// Band table mapping per-stage progress onto overall progress.
#[derive(Debug, Clone, PartialEq)]
pub struct StageWeights {
    bands: Vec<StageBand>,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            bands: vec![
                StageBand::new(AgentKind::Planner, 0.0, 10.0),
                StageBand::new(AgentKind::Searcher, 10.0, 40.0),
                StageBand::new(AgentKind::Extractor, 40.0, 65.0),
                StageBand::new(AgentKind::Analyzer, 65.0, 90.0),
                StageBand::new(AgentKind::Reporter, 90.0, 100.0),
            ],
        }
    }
}

impl StageWeights {
    /// Builds a validated table.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the bands do not cover
    /// 0-100 contiguously, in pipeline order, with positive widths.
    pub fn new(bands: Vec<StageBand>) -> Result<Self, String> {
        let weights = Self { bands };
        weights.validate()?;
        Ok(weights)
    }

    pub fn bands(&self) -> &[StageBand] {
        &self.bands
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bands.len() != AgentKind::STAGES.len() {
            return Err(format!(
                "expected {} stage bands, got {}",
                AgentKind::STAGES.len(),
                self.bands.len()
            ));
        }

        let mut expected_start = 0.0;
        for (band, stage) in self.bands.iter().zip(AgentKind::STAGES) {
            if band.agent != stage {
                return Err(format!("band for '{}' is out of order", band.agent));
            }
            if (band.start - expected_start).abs() > f64::EPSILON {
                return Err(format!(
                    "band for '{}' starts at {} but the previous band ends at {}",
                    band.agent, band.start, expected_start
                ));
            }
            if band.end <= band.start {
                return Err(format!("band for '{}' has no width", band.agent));
            }
            expected_start = band.end;
        }

        if (expected_start - 100.0).abs() > f64::EPSILON {
            return Err(format!("bands end at {} instead of 100", expected_start));
        }
        Ok(())
    }
}

/// Output of [`ProgressCalculator::calculate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Overall progress (0 - 100).
    pub overall: f64,
    /// Per-stage progress (0 - 100) in pipeline order.
    pub stages: Vec<(AgentKind, f64)>,
    pub detail: ProgressDetail,
    pub message: String,
}

/// Pipeline position of a live status; terminal failures have none.
fn rank(status: ResearchStatus) -> Option<u8> {
    match status {
        ResearchStatus::Pending => Some(0),
        ResearchStatus::Planning => Some(1),
        ResearchStatus::Searching => Some(2),
        ResearchStatus::Extracting => Some(3),
        ResearchStatus::Analyzing => Some(4),
        ResearchStatus::Reporting => Some(5),
        ResearchStatus::Completed => Some(6),
        ResearchStatus::Failed | ResearchStatus::Cancelled => None,
    }
}

fn reached(state: &ResearchState, status: ResearchStatus) -> bool {
    match (rank(state.status), rank(status)) {
        (Some(current), Some(target)) => current >= target,
        _ => false,
    }
}

fn past(state: &ResearchState, status: ResearchStatus) -> bool {
    match (rank(state.status), rank(status)) {
        (Some(current), Some(target)) => current > target,
        _ => false,
    }
}

fn linear(count: usize, min: usize) -> f64 {
    coverage_ratio(count, min) * 100.0
}

/// Pure progress calculator.
#[derive(Debug, Clone, Default)]
pub struct ProgressCalculator {
    thresholds: QualityThresholds,
    weights: StageWeights,
}

impl ProgressCalculator {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            thresholds,
            weights: StageWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: StageWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn calculate_planner_progress(&self, state: &ResearchState) -> f64 {
        if state.search_plan.is_some() || past(state, ResearchStatus::Planning) {
            100.0
        } else if state.status == ResearchStatus::Planning {
            50.0
        } else {
            0.0
        }
    }

    pub fn calculate_searcher_progress(&self, state: &ResearchState) -> f64 {
        if !reached(state, ResearchStatus::Searching) {
            return 0.0;
        }
        if past(state, ResearchStatus::Searching) {
            return 100.0;
        }
        linear(state.search_results.len(), self.thresholds.min_search_results)
    }

    pub fn calculate_extractor_progress(&self, state: &ResearchState) -> f64 {
        if state.search_results.is_empty() && !past(state, ResearchStatus::Extracting) {
            return 0.0;
        }
        if past(state, ResearchStatus::Extracting) {
            return 100.0;
        }
        linear(state.extracted_content.len(), self.thresholds.min_extractions)
    }

    pub fn calculate_analyzer_progress(&self, state: &ResearchState) -> f64 {
        if past(state, ResearchStatus::Analyzing) {
            return 100.0;
        }
        match &state.analysis {
            None if state.status == ResearchStatus::Analyzing => 50.0,
            None => 0.0,
            Some(analysis) => {
                let t = &self.thresholds;
                let confidence = if t.min_confidence > 0.0 {
                    (analysis.confidence_score / t.min_confidence).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                let ratios = [
                    coverage_ratio(analysis.features.len(), t.min_features),
                    coverage_ratio(analysis.competitors.len(), t.min_competitors),
                    coverage_ratio(analysis.use_cases.len(), t.min_use_cases),
                    confidence,
                ];
                let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
                50.0 + 50.0 * mean
            }
        }
    }

    pub fn calculate_reporter_progress(&self, state: &ResearchState) -> f64 {
        match state.status {
            ResearchStatus::Completed => 100.0,
            ResearchStatus::Reporting => 50.0,
            _ if state.analysis.is_some() => 25.0,
            _ => 0.0,
        }
    }

    fn stage_progress(&self, agent: AgentKind, state: &ResearchState) -> f64 {
        match agent {
            AgentKind::Planner => self.calculate_planner_progress(state),
            AgentKind::Searcher => self.calculate_searcher_progress(state),
            AgentKind::Extractor => self.calculate_extractor_progress(state),
            AgentKind::Analyzer => self.calculate_analyzer_progress(state),
            AgentKind::Reporter => self.calculate_reporter_progress(state),
            AgentKind::Done => 100.0,
        }
    }

    /// Computes overall progress and a detail record for `state`.
    ///
    /// `failed`/`cancelled` freeze at the state's last recorded progress;
    /// `completed` is always 100.
    pub fn calculate(&self, state: &ResearchState) -> ProgressSnapshot {
        let stages: Vec<(AgentKind, f64)> = self
            .weights
            .bands()
            .iter()
            .map(|band| (band.agent, self.stage_progress(band.agent, state)))
            .collect();

        let overall = match state.status {
            ResearchStatus::Completed => 100.0,
            ResearchStatus::Failed | ResearchStatus::Cancelled => state.progress,
            _ => self
                .weights
                .bands()
                .iter()
                .zip(&stages)
                .map(|(band, (_, pct))| band.width() * pct / 100.0)
                .sum::<f64>()
                .clamp(0.0, 100.0),
        };

        let (detail, message) = self.describe(state);
        ProgressSnapshot {
            overall,
            stages,
            detail,
            message,
        }
    }

    fn describe(&self, state: &ResearchState) -> (ProgressDetail, String) {
        let t = &self.thresholds;
        let stage = match state.status {
            ResearchStatus::Pending | ResearchStatus::Planning => AgentKind::Planner,
            ResearchStatus::Searching => AgentKind::Searcher,
            ResearchStatus::Extracting => AgentKind::Extractor,
            ResearchStatus::Analyzing => AgentKind::Analyzer,
            ResearchStatus::Reporting => AgentKind::Reporter,
            _ => AgentKind::Done,
        };

        let (total_items, completed_items, message) = match state.status {
            ResearchStatus::Pending => (1, 0, "Waiting to start".to_string()),
            ResearchStatus::Planning => (
                1,
                usize::from(state.search_plan.is_some()),
                "Planning research".to_string(),
            ),
            ResearchStatus::Searching => (
                t.min_search_results,
                state.search_results.len(),
                format!(
                    "Searching: {}/{} results ({} high quality)",
                    state.search_results.len(),
                    t.min_search_results,
                    state.high_quality_result_count()
                ),
            ),
            ResearchStatus::Extracting => (
                t.min_extractions,
                state.extracted_content.len(),
                format!(
                    "Extracting: {}/{} pages",
                    state.extracted_content.len(),
                    t.min_extractions
                ),
            ),
            ResearchStatus::Analyzing => {
                let features = state.analysis.as_ref().map_or(0, |a| a.features.len());
                (
                    t.min_features,
                    features,
                    format!("Analyzing: {}/{} features", features, t.min_features),
                )
            }
            ResearchStatus::Reporting => (1, 0, "Generating report".to_string()),
            ResearchStatus::Completed => (1, 1, "Research completed".to_string()),
            ResearchStatus::Failed | ResearchStatus::Cancelled => {
                (1, 0, state.progress_message.clone())
            }
        };

        let detail = ProgressDetail {
            stage: stage.as_str().to_string(),
            step: state.current_step.clone(),
            total_items,
            completed_items,
            current_item: None,
        };
        (detail, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{Analysis, ExtractedContent, Feature, SearchPlan, SearchResult};
    use chrono::Utc;

    fn state(status: ResearchStatus) -> ResearchState {
        let mut s = ResearchState::new("p", "Acme", "", vec![]);
        s.status = status;
        s
    }

    fn results(n: usize) -> Vec<SearchResult> {
        (0..n)
            .map(|i| SearchResult {
                url: format!("https://example.com/{}", i),
                title: String::new(),
                snippet: String::new(),
                source: "test".to_string(),
                quality_score: 0.5,
                query: "q".to_string(),
                retrieved_at: Utc::now(),
            })
            .collect()
    }

    fn extractions(n: usize) -> Vec<ExtractedContent> {
        (0..n)
            .map(|i| ExtractedContent {
                url: format!("https://example.com/{}", i),
                title: String::new(),
                content: "x".repeat(600),
                content_length: 600,
                quality_score: 0.5,
                extracted_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_default_weights_are_valid() {
        assert!(StageWeights::default().validate().is_ok());
    }

    #[test]
    fn test_weights_validation() {
        let mut bands = StageWeights::default().bands().to_vec();
        bands[1].end = 35.0;
        assert!(StageWeights::new(bands).is_err());

        let mut bands = StageWeights::default().bands().to_vec();
        bands.swap(0, 1);
        assert!(StageWeights::new(bands).is_err());

        let mut bands = StageWeights::default().bands().to_vec();
        bands[4].end = 90.0;
        assert!(StageWeights::new(bands).is_err());

        assert!(StageWeights::new(vec![]).is_err());
    }

    #[test]
    fn test_searcher_progress() {
        let calc = ProgressCalculator::default();
        assert_eq!(calc.calculate_searcher_progress(&state(ResearchStatus::Pending)), 0.0);
        let mut s = state(ResearchStatus::Planning);
        s.search_results = results(20);
        assert_eq!(calc.calculate_searcher_progress(&s), 0.0);

        let mut s = state(ResearchStatus::Searching);
        s.search_results = results(6);
        assert!((calc.calculate_searcher_progress(&s) - 40.0).abs() < 1e-9);
        s.search_results = results(15);
        assert_eq!(calc.calculate_searcher_progress(&s), 100.0);
        s.search_results = results(40);
        assert_eq!(calc.calculate_searcher_progress(&s), 100.0);
    }

    #[test]
    fn test_planner_progress() {
        let calc = ProgressCalculator::default();
        assert_eq!(calc.calculate_planner_progress(&state(ResearchStatus::Pending)), 0.0);
        let mut s = state(ResearchStatus::Planning);
        assert_eq!(calc.calculate_planner_progress(&s), 50.0);
        s.search_plan = Some(SearchPlan {
            queries: vec![],
            focus_areas: vec![],
            created_at: Utc::now(),
        });
        assert_eq!(calc.calculate_planner_progress(&s), 100.0);
    }

    #[test]
    fn test_extractor_progress() {
        let calc = ProgressCalculator::default();
        let mut s = state(ResearchStatus::Extracting);
        assert_eq!(calc.calculate_extractor_progress(&s), 0.0);
        s.search_results = results(3);
        s.extracted_content = extractions(5);
        assert!((calc.calculate_extractor_progress(&s) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_analyzer_and_reporter_progress() {
        let calc = ProgressCalculator::default();
        let mut s = state(ResearchStatus::Analyzing);
        assert_eq!(calc.calculate_analyzer_progress(&s), 50.0);
        assert_eq!(calc.calculate_reporter_progress(&s), 0.0);

        s.analysis = Some(Analysis {
            features: (0..5)
                .map(|i| Feature {
                    name: i.to_string(),
                    description: String::new(),
                })
                .collect(),
            competitors: vec![Default::default(); 3],
            use_cases: vec!["a".into(); 3],
            tech_stack: vec!["b".into(); 3],
            confidence_score: 0.9,
            ..Analysis::default()
        });
        assert_eq!(calc.calculate_analyzer_progress(&s), 100.0);
        assert_eq!(calc.calculate_reporter_progress(&s), 25.0);

        s.status = ResearchStatus::Reporting;
        assert_eq!(calc.calculate_reporter_progress(&s), 50.0);
    }

    #[test]
    fn test_analyzer_progress_ignores_tech_stack() {
        let calc = ProgressCalculator::default();
        let mut s = state(ResearchStatus::Analyzing);
        s.analysis = Some(Analysis {
            features: (0..5)
                .map(|i| Feature {
                    name: i.to_string(),
                    description: String::new(),
                })
                .collect(),
            competitors: vec![Default::default(); 3],
            use_cases: vec!["a".into(); 3],
            confidence_score: 0.9,
            ..Analysis::default()
        });
        assert!(s.analysis.as_ref().is_some_and(|a| a.tech_stack.is_empty()));
        assert_eq!(calc.calculate_analyzer_progress(&s), 100.0);
    }

    #[test]
    fn test_overall_blends_bands() {
        let calc = ProgressCalculator::default();
        let mut s = state(ResearchStatus::Searching);
        s.search_plan = Some(SearchPlan {
            queries: vec![],
            focus_areas: vec![],
            created_at: Utc::now(),
        });
        s.search_results = results(15);
        // planner 10 + searcher 30 + extractor 25 * 0 = 40
        let snap = calc.calculate(&s);
        assert!((snap.overall - 40.0).abs() < 1e-9);
        assert_eq!(snap.detail.stage, "searcher");
        assert_eq!(snap.detail.completed_items, 15);
        assert!(snap.message.starts_with("Searching"));
    }

    #[test]
    fn test_terminal_progress() {
        let calc = ProgressCalculator::default();
        let mut s = state(ResearchStatus::Failed);
        s.progress = 37.5;
        assert_eq!(calc.calculate(&s).overall, 37.5);
        s.status = ResearchStatus::Cancelled;
        assert_eq!(calc.calculate(&s).overall, 37.5);
        s.status = ResearchStatus::Completed;
        assert_eq!(calc.calculate(&s).overall, 100.0);
    }

    #[test]
    fn test_overall_non_decreasing_along_happy_path() {
        let calc = ProgressCalculator::default();
        let mut s = state(ResearchStatus::Pending);
        let mut last = calc.calculate(&s).overall;
        let steps: Vec<fn(&mut ResearchState)> = vec![
            |s: &mut ResearchState| s.status = ResearchStatus::Planning,
            |s: &mut ResearchState| {
                s.search_plan = Some(SearchPlan {
                    queries: vec![],
                    focus_areas: vec![],
                    created_at: Utc::now(),
                })
            },
            |s: &mut ResearchState| s.status = ResearchStatus::Searching,
            |s: &mut ResearchState| s.search_results = results(8),
            |s: &mut ResearchState| s.search_results = results(16),
            |s: &mut ResearchState| s.status = ResearchStatus::Extracting,
            |s: &mut ResearchState| s.extracted_content = extractions(10),
            |s: &mut ResearchState| s.status = ResearchStatus::Analyzing,
            |s: &mut ResearchState| s.analysis = Some(Analysis::default()),
            |s: &mut ResearchState| s.status = ResearchStatus::Reporting,
            |s: &mut ResearchState| s.status = ResearchStatus::Completed,
        ];
        for step in steps {
            step(&mut s);
            let now = calc.calculate(&s).overall;
            assert!(now >= last, "{} < {} at {}", now, last, s.status);
            last = now;
        }
        assert_eq!(last, 100.0);
    }
}
