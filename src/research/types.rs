//! Stage artifacts carried by a research run.
//!
//! Every artifact is populated only after its producing stage has run; the
//! orchestrator is the only writer and merges them from worker patches.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ResearchStatus;

/// Search results at or above this quality count as high quality.
pub const HIGH_QUALITY_SCORE: f64 = 0.7;

/// Extractions longer than this many characters count as substantial.
pub const SUBSTANTIAL_CONTENT_CHARS: usize = 500;

// ============================================================================
// Agents
// ============================================================================

/// A pipeline stage the supervisor can dispatch to, plus the `done` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Planner,
    Searcher,
    Extractor,
    Analyzer,
    Reporter,
    Done,
}

impl AgentKind {
    /// The five dispatchable stages, in pipeline order.
    pub const STAGES: [AgentKind; 5] = [
        AgentKind::Planner,
        AgentKind::Searcher,
        AgentKind::Extractor,
        AgentKind::Analyzer,
        AgentKind::Reporter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Planner => "planner",
            AgentKind::Searcher => "searcher",
            AgentKind::Extractor => "extractor",
            AgentKind::Analyzer => "analyzer",
            AgentKind::Reporter => "reporter",
            AgentKind::Done => "done",
        }
    }

    /// Status the project enters while this agent runs.
    pub fn status(&self) -> ResearchStatus {
        match self {
            AgentKind::Planner => ResearchStatus::Planning,
            AgentKind::Searcher => ResearchStatus::Searching,
            AgentKind::Extractor => ResearchStatus::Extracting,
            AgentKind::Analyzer => ResearchStatus::Analyzing,
            AgentKind::Reporter => ResearchStatus::Reporting,
            AgentKind::Done => ResearchStatus::Completed,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the six agent tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAgent(pub String);

impl fmt::Display for UnknownAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown agent '{}'", self.0)
    }
}

impl std::error::Error for UnknownAgent {}

impl FromStr for AgentKind {
    type Err = UnknownAgent;

    /// Exact, case-sensitive match against the six tokens.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planner" => Ok(AgentKind::Planner),
            "searcher" => Ok(AgentKind::Searcher),
            "extractor" => Ok(AgentKind::Extractor),
            "analyzer" => Ok(AgentKind::Analyzer),
            "reporter" => Ok(AgentKind::Reporter),
            "done" => Ok(AgentKind::Done),
            other => Err(UnknownAgent(other.to_string())),
        }
    }
}

// ============================================================================
// Queries and plans
// ============================================================================

/// Coverage dimension a query or a quality gap refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageDimension {
    Features,
    Competitors,
    UseCases,
    TechStack,
    Market,
    General,
}

impl fmt::Display for CoverageDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoverageDimension::Features => "features",
            CoverageDimension::Competitors => "competitors",
            CoverageDimension::UseCases => "use_cases",
            CoverageDimension::TechStack => "tech_stack",
            CoverageDimension::Market => "market",
            CoverageDimension::General => "general",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryPriority {
    High,
    Medium,
    Low,
}

/// A search query with the reason it exists.
///
/// Produced by the planner and by the quality assessor's follow-up feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub query: String,
    pub purpose: String,
    pub dimension: CoverageDimension,
    pub priority: QueryPriority,
}

impl QueryDescriptor {
    pub fn new(
        query: impl Into<String>,
        purpose: impl Into<String>,
        dimension: CoverageDimension,
        priority: QueryPriority,
    ) -> Self {
        Self {
            query: query.into(),
            purpose: purpose.into(),
            dimension,
            priority,
        }
    }
}

/// Output of the planning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPlan {
    pub queries: Vec<QueryDescriptor>,
    pub focus_areas: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Evidence
// ============================================================================

/// One hit returned by a search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub source: String,
    /// Provider-reported relevance/quality in [0, 1].
    pub quality_score: f64,
    /// The query that produced this hit.
    pub query: String,
    pub retrieved_at: DateTime<Utc>,
}

impl SearchResult {
    pub fn is_high_quality(&self) -> bool {
        self.quality_score >= HIGH_QUALITY_SCORE
    }
}

/// Page content pulled from a search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub url: String,
    pub title: String,
    pub content: String,
    /// Length of `content` in characters.
    pub content_length: usize,
    pub quality_score: f64,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedContent {
    pub fn is_substantial(&self) -> bool {
        self.content_length > SUBSTANTIAL_CONTENT_CHARS
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
    pub accessed_at: DateTime<Utc>,
}

// ============================================================================
// Analysis
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Competitor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Swot {
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub opportunities: Vec<String>,
    #[serde(default)]
    pub threats: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub growth_rate: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl MarketData {
    pub fn has_market_size(&self) -> bool {
        self.market_size.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    pub fn has_growth_rate(&self) -> bool {
        self.growth_rate.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Output of the analysis stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub competitors: Vec<Competitor>,
    #[serde(default)]
    pub use_cases: Vec<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub swot: Swot,
    #[serde(default)]
    pub market_data: MarketData,
    /// Self-reported reliability in [0, 1].
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub data_gaps: Vec<String>,
}

/// Latest quality-gate verdict stored on the state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub score: f64,
    pub is_complete: bool,
    /// Source reliability in [0, 1]; scales the completeness score.
    pub reliability: f64,
    pub issues: Vec<String>,
    pub data_gaps: Vec<String>,
    pub assessed_at: DateTime<Utc>,
}

/// Structured output of the synthesis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub title: String,
    pub summary: String,
    pub key_findings: Vec<String>,
    pub features: Vec<Feature>,
    pub competitors: Vec<Competitor>,
    pub swot: Swot,
    pub market_data: MarketData,
    pub recommendations: Vec<String>,
    pub data_gaps: Vec<String>,
    pub citations: Vec<Citation>,
    pub confidence_score: f64,
    pub generated_at: DateTime<Utc>,
}

/// Where the pipeline is right now, for progress sinks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressDetail {
    pub stage: String,
    pub step: String,
    pub total_items: usize,
    pub completed_items: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_kind_tokens_round_trip() {
        for agent in AgentKind::STAGES.iter().chain(std::iter::once(&AgentKind::Done)) {
            let parsed: AgentKind = agent.as_str().parse().expect("known token");
            assert_eq!(parsed, *agent);
        }
    }

    #[test]
    fn test_agent_kind_rejects_unknown_and_case_variants() {
        assert!("Planner".parse::<AgentKind>().is_err());
        assert!("".parse::<AgentKind>().is_err());
        assert!("writer".parse::<AgentKind>().is_err());
    }

    #[test]
    fn test_agent_kind_status_mapping() {
        assert_eq!(AgentKind::Searcher.status(), ResearchStatus::Searching);
        assert_eq!(AgentKind::Done.status(), ResearchStatus::Completed);
    }

    #[test]
    fn test_market_data_presence_ignores_blank() {
        let market = MarketData {
            market_size: Some("  ".to_string()),
            growth_rate: None,
            notes: vec![],
        };
        assert!(!market.has_market_size());
        assert!(!market.has_growth_rate());
    }

    #[test]
    fn test_substantial_content_boundary() {
        let mut content = ExtractedContent {
            url: "https://example.com".to_string(),
            title: "Example".to_string(),
            content: String::new(),
            content_length: SUBSTANTIAL_CONTENT_CHARS,
            quality_score: 0.5,
            extracted_at: Utc::now(),
        };
        assert!(!content.is_substantial());
        content.content_length += 1;
        assert!(content.is_substantial());
    }
}
