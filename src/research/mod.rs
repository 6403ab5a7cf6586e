//! Research run data model.
//!
//! - [`ResearchState`]: the single-writer state of one project
//! - [`ResearchStatus`]: the status state machine
//! - Stage artifacts (plans, search hits, extractions, analysis, report)

pub mod state;
pub mod types;

pub use state::{ResearchState, ResearchStatus};
pub use types::{
    AgentKind, Analysis, Citation, Competitor, CoverageDimension, DataQuality, ExtractedContent,
    Feature, MarketData, ProgressDetail, QueryDescriptor, QueryPriority, ResearchReport,
    SearchPlan, SearchResult, Swot, UnknownAgent, HIGH_QUALITY_SCORE, SUBSTANTIAL_CONTENT_CHARS,
};
