//! Completeness scoring for a research run.
//!
//! The score is a weighted sum over five coverage dimensions:
//!
//! | Dimension   | Weight | Coverage                                  |
//! |-------------|--------|-------------------------------------------|
//! | features    | 25     | `min(1, features / min_features)`         |
//! | competitors | 20     | `min(1, competitors / min_competitors)`   |
//! | use cases   | 20     | `min(1, use_cases / min_use_cases)`       |
//! | tech stack  | 15     | `min(1, tech_stack / min_tech_stack)`     |
//! | market      | 20     | market size or growth rate present        |
//!
//! The raw sum is scaled by a reliability factor and, optionally, the
//! analysis confidence.

use chrono::Utc;

use super::thresholds::{coverage_ratio, QualityThresholds};
use crate::research::{
    CoverageDimension, DataQuality, QueryDescriptor, QueryPriority, ResearchState,
};

const FEATURES_WEIGHT: f64 = 25.0;
const COMPETITORS_WEIGHT: f64 = 20.0;
const USE_CASES_WEIGHT: f64 = 20.0;
const TECH_STACK_WEIGHT: f64 = 15.0;
const MARKET_WEIGHT: f64 = 20.0;

/// Below this coverage a follow-up query is high priority.
const HIGH_PRIORITY_COVERAGE: f64 = 0.5;

/// Score contribution of one coverage dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionScore {
    pub dimension: CoverageDimension,
    /// Coverage ratio (0.0 - 1.0).
    pub coverage: f64,
    /// Points earned out of `weight`.
    pub points: f64,
    pub weight: f64,
}

/// Result of assessing a research state.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityAssessment {
    pub is_complete: bool,
    /// Final score (0 - 100).
    pub score: f64,
    /// Score before reliability and confidence scaling.
    pub raw_score: f64,
    pub reliability: f64,
    pub issues: Vec<String>,
    pub data_gaps: Vec<String>,
    pub follow_up_queries: Vec<QueryDescriptor>,
    pub dimensions: Vec<DimensionScore>,
}

impl QualityAssessment {
    /// Converts the assessment into the form stored on the state.
    pub fn to_data_quality(&self) -> DataQuality {
        DataQuality {
            score: self.score,
            is_complete: self.is_complete,
            reliability: self.reliability,
            issues: self.issues.clone(),
            data_gaps: self.data_gaps.clone(),
            assessed_at: Utc::now(),
        }
    }
}

/// Scores research completeness against [`QualityThresholds`].
#[derive(Debug, Clone)]
pub struct QualityAssessor {
    thresholds: QualityThresholds,
    max_iterations: u32,
}

impl QualityAssessor {
    /// Creates an assessor.
    ///
    /// # Arguments
    ///
    /// * `thresholds` - Minimum counts per dimension and the completion score.
    /// * `max_iterations` - Loop budget; a run one pass from the budget is
    ///   considered complete regardless of score.
    pub fn new(thresholds: QualityThresholds, max_iterations: u32) -> Self {
        Self {
            thresholds,
            max_iterations,
        }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Assesses `state`. Pure: the state is not modified.
    pub fn assess(&self, state: &ResearchState) -> QualityAssessment {
        let t = &self.thresholds;
        let subject = query_subject(state);

        let mut issues = Vec::new();
        let mut data_gaps = Vec::new();
        let mut follow_up_queries = Vec::new();
        let mut dimensions = Vec::with_capacity(5);

        let (features, competitors, use_cases, tech_stack) = state
            .analysis
            .as_ref()
            .map(|a| {
                (
                    a.features.len(),
                    a.competitors.len(),
                    a.use_cases.len(),
                    a.tech_stack.len(),
                )
            })
            .unwrap_or((0, 0, 0, 0));

        for (dimension, count, min, weight) in [
            (CoverageDimension::Features, features, t.min_features, FEATURES_WEIGHT),
            (
                CoverageDimension::Competitors,
                competitors,
                t.min_competitors,
                COMPETITORS_WEIGHT,
            ),
            (CoverageDimension::UseCases, use_cases, t.min_use_cases, USE_CASES_WEIGHT),
            (CoverageDimension::TechStack, tech_stack, t.min_tech_stack, TECH_STACK_WEIGHT),
        ] {
            let coverage = coverage_ratio(count, min);
            if coverage < 1.0 {
                issues.push(format!(
                    "Only {} {} found (minimum {})",
                    count,
                    dimension_label(dimension),
                    min
                ));
                data_gaps.push(format!("Insufficient {} coverage", dimension_label(dimension)));
                let priority = if coverage < HIGH_PRIORITY_COVERAGE {
                    QueryPriority::High
                } else {
                    QueryPriority::Medium
                };
                follow_up_queries.push(follow_up_query(&subject, dimension, priority));
            }
            dimensions.push(DimensionScore {
                dimension,
                coverage,
                points: coverage * weight,
                weight,
            });
        }

        let market = state.analysis.as_ref().map(|a| &a.market_data);
        let has_size = market.is_some_and(|m| m.has_market_size());
        let has_growth = market.is_some_and(|m| m.has_growth_rate());
        let market_coverage = if has_size || has_growth { 1.0 } else { 0.0 };
        if !has_size && !has_growth {
            issues.push("No market size or growth rate data".to_string());
            data_gaps.push("Missing market data".to_string());
            follow_up_queries.push(follow_up_query(
                &subject,
                CoverageDimension::Market,
                QueryPriority::High,
            ));
        } else if !(has_size && has_growth) {
            data_gaps.push(if has_size {
                "Missing market growth rate".to_string()
            } else {
                "Missing market size".to_string()
            });
            follow_up_queries.push(follow_up_query(
                &subject,
                CoverageDimension::Market,
                QueryPriority::Low,
            ));
        }
        dimensions.push(DimensionScore {
            dimension: CoverageDimension::Market,
            coverage: market_coverage,
            points: market_coverage * MARKET_WEIGHT,
            weight: MARKET_WEIGHT,
        });

        if let Some(analysis) = &state.analysis {
            for gap in &analysis.data_gaps {
                if !data_gaps.contains(gap) {
                    data_gaps.push(gap.clone());
                }
            }
        }

        let raw_score: f64 = dimensions.iter().map(|d| d.points).sum();
        let reliability = state
            .data_quality
            .as_ref()
            .map(|q| factor(q.reliability))
            .unwrap_or(1.0);
        let confidence = if t.weight_by_confidence {
            state
                .analysis
                .as_ref()
                .map(|a| factor(a.confidence_score))
                .unwrap_or(1.0)
        } else {
            1.0
        };
        let score = (raw_score * reliability * confidence).clamp(0.0, 100.0);

        let budget_nearly_spent = state.iterations_used >= self.max_iterations.saturating_sub(1);
        let is_complete = score >= t.completion_score || budget_nearly_spent;

        tracing::debug!(
            project_id = %state.project_id,
            score = score,
            raw_score = raw_score,
            is_complete = is_complete,
            issues = issues.len(),
            "Assessed research quality"
        );

        QualityAssessment {
            is_complete,
            score,
            raw_score,
            reliability,
            issues,
            data_gaps,
            follow_up_queries,
            dimensions,
        }
    }
}

/// Clamps a scaling factor into [0, 1]; non-finite values count as 1.
fn factor(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

fn dimension_label(dimension: CoverageDimension) -> &'static str {
    match dimension {
        CoverageDimension::Features => "features",
        CoverageDimension::Competitors => "competitors",
        CoverageDimension::UseCases => "use cases",
        CoverageDimension::TechStack => "tech stack entries",
        CoverageDimension::Market => "market data points",
        CoverageDimension::General => "sources",
    }
}

/// What follow-up queries are about: the title, or the keywords when the
/// title is blank.
fn query_subject(state: &ResearchState) -> String {
    let title = state.title.trim();
    if !title.is_empty() {
        return title.to_string();
    }
    state.keywords.join(" ")
}

fn follow_up_query(
    subject: &str,
    dimension: CoverageDimension,
    priority: QueryPriority,
) -> QueryDescriptor {
    let (query, purpose) = match dimension {
        CoverageDimension::Features => (
            format!("{} key features and capabilities", subject),
            "Find more product features",
        ),
        CoverageDimension::Competitors => (
            format!("{} competitors and alternatives", subject),
            "Identify more competitors",
        ),
        CoverageDimension::UseCases => (
            format!("{} use cases and customer examples", subject),
            "Find more use cases",
        ),
        CoverageDimension::TechStack => (
            format!("{} technology stack and architecture", subject),
            "Identify the technology stack",
        ),
        CoverageDimension::Market => (
            format!("{} market size and growth rate", subject),
            "Find market size and growth data",
        ),
        CoverageDimension::General => (subject.to_string(), "General coverage"),
    };
    QueryDescriptor::new(query, purpose, dimension, priority)
}
