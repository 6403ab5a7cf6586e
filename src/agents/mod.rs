//! Stage workers for the research pipeline.
//!
//! Each worker reads a snapshot of [`ResearchState`] and returns a
//! [`StageOutcome`] whose [`StatePatch`] the orchestrator merges. Workers
//! never write to the state themselves.
//!
//! - [`PlannerWorker`]: builds the search plan
//! - [`SearchWorker`]: runs plan and follow-up queries against a [`SearchProvider`]
//! - [`ExtractionWorker`]: pulls page content through an [`ExtractionProvider`]
//! - [`AnalyzerWorker`]: turns extracted content into a structured [`Analysis`]
//! - [`ReportWorker`]: synthesizes the final [`ResearchReport`]
//!
//! ```ignore
//! use research_forge::agents::WorkerSet;
//!
//! let workers = WorkerSet::standard(search, extraction, llm);
//! let planner = workers.get(AgentKind::Planner).expect("registered");
//! let outcome = planner.run(&state, &ctx).await;
//! ```

pub mod analyzer;
pub mod error;
pub mod extractor;
pub mod planner;
pub mod providers;
pub mod reporter;
pub mod searcher;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::llm::TextGenerationClient;
use crate::pipeline::cancel::CancellationFlag;
use crate::pipeline::config::ResearchConfig;
use crate::progress::ProgressSink;
use crate::research::{
    AgentKind, Analysis, Citation, ExtractedContent, ProgressDetail, ResearchReport,
    ResearchState, SearchPlan, SearchResult,
};

pub use analyzer::AnalyzerWorker;
pub use error::{AgentError, AgentResult};
pub use extractor::ExtractionWorker;
pub use planner::PlannerWorker;
pub use providers::{
    ExtractedPage, ExtractionLimits, ExtractionProvider, SearchHit, SearchLimits, SearchProvider,
};
pub use reporter::ReportWorker;
pub use searcher::SearchWorker;

// ============================================================================
// Patches and outcomes
// ============================================================================

/// Changes a worker wants applied to the state.
///
/// Collections are append-only; entries whose URL is already present are
/// skipped on apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub search_plan: Option<SearchPlan>,
    pub search_results: Vec<SearchResult>,
    /// Queries sent to the search provider this round.
    pub executed_queries: Vec<String>,
    /// URLs whose extraction failed this round.
    pub failed_urls: Vec<String>,
    pub extracted_content: Vec<ExtractedContent>,
    pub citations: Vec<Citation>,
    pub analysis: Option<Analysis>,
    pub report: Option<ResearchReport>,
    pub current_step: Option<String>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merges the patch into `state`.
    pub fn apply(self, state: &mut ResearchState) {
        if let Some(plan) = self.search_plan {
            state.search_plan = Some(plan);
        }

        for query in self.executed_queries {
            state.pending_queries.retain(|pending| pending.query != query);
            if !state.executed_queries.contains(&query) {
                state.executed_queries.push(query);
            }
        }

        for result in self.search_results {
            if !state.search_results.iter().any(|r| r.url == result.url) {
                state.search_results.push(result);
            }
        }

        for url in self.failed_urls {
            if !state.failed_urls.contains(&url) {
                state.failed_urls.push(url);
            }
        }

        for content in self.extracted_content {
            if !state.extracted_content.iter().any(|c| c.url == content.url) {
                state.extracted_content.push(content);
            }
        }

        for citation in self.citations {
            if !state.citations.iter().any(|c| c.url == citation.url) {
                state.citations.push(citation);
            }
        }

        if let Some(analysis) = self.analysis {
            state.analysis = Some(analysis);
        }
        if let Some(report) = self.report {
            state.report = Some(report);
        }
        if let Some(step) = self.current_step {
            state.current_step = step;
        }
        state.updated_at = Utc::now();
    }
}

/// What a stage run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub success: bool,
    pub summary: String,
    pub patch: StatePatch,
    /// The worker stopped early because cancellation was requested.
    pub cancelled: bool,
}

impl StageOutcome {
    pub fn success(summary: impl Into<String>, patch: StatePatch) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            patch,
            cancelled: false,
        }
    }

    pub fn failure(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            patch: StatePatch::default(),
            cancelled: false,
        }
    }

    /// Stopped early; `patch` holds any partial results.
    /// Attaches partial progress to an outcome.
    pub fn with_patch(mut self, patch: StatePatch) -> Self {
        self.patch = patch;
        self
    }

    pub fn cancelled(patch: StatePatch) -> Self {
        Self {
            success: false,
            summary: "cancelled".to_string(),
            patch,
            cancelled: true,
        }
    }

    /// Maps a worker result; errors become failed outcomes.
    pub fn from_result(result: AgentResult<(String, StatePatch)>) -> Self {
        match result {
            Ok((summary, patch)) => Self::success(summary, patch),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Everything a worker may consult besides the state snapshot.
#[derive(Clone)]
pub struct StageContext {
    /// Free-form guidance from the supervisor's decision.
    pub instructions: String,
    pub cancel: CancellationFlag,
    pub config: Arc<ResearchConfig>,
    progress_sink: Option<Arc<dyn ProgressSink>>,
}

impl StageContext {
    pub fn new(config: Arc<ResearchConfig>, cancel: CancellationFlag) -> Self {
        Self {
            instructions: String::new(),
            cancel,
            config,
            progress_sink: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Forwards a per-item progress update to the sink, if any.
    pub fn report(&self, project_id: &str, detail: ProgressDetail) {
        if let Some(sink) = &self.progress_sink {
            sink.update(project_id, &detail);
        }
    }
}

impl Default for StageContext {
    fn default() -> Self {
        Self::new(Arc::new(ResearchConfig::default()), CancellationFlag::new())
    }
}

// ============================================================================
// Workers
// ============================================================================

/// One pipeline stage.
#[async_trait]
pub trait StageWorker: Send + Sync {
    /// The agent token this worker answers to.
    fn agent(&self) -> AgentKind;

    /// Runs the stage against a snapshot. Never panics on collaborator
    /// failure; errors are reported through the outcome.
    async fn run(&self, state: &ResearchState, ctx: &StageContext) -> StageOutcome;
}

/// Workers keyed by the agent they implement.
#[derive(Clone, Default)]
pub struct WorkerSet {
    workers: HashMap<AgentKind, Arc<dyn StageWorker>>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// All five stages wired to the given collaborators.
    ///
    /// # Arguments
    ///
    /// * `search` - Search backend used by the searcher
    /// * `extraction` - Page extraction backend used by the extractor
    /// * `llm` - Text generation used for planning, analysis and summaries
    pub fn standard(
        search: Arc<dyn SearchProvider>,
        extraction: Arc<dyn ExtractionProvider>,
        llm: Arc<dyn TextGenerationClient>,
    ) -> Self {
        Self::new()
            .with_worker(Arc::new(PlannerWorker::new().with_llm(llm.clone())))
            .with_worker(Arc::new(SearchWorker::new(search)))
            .with_worker(Arc::new(ExtractionWorker::new(extraction)))
            .with_worker(Arc::new(AnalyzerWorker::new(llm.clone())))
            .with_worker(Arc::new(ReportWorker::new().with_llm(llm)))
    }

    /// Registers `worker` under its agent, replacing any previous one.
    pub fn with_worker(mut self, worker: Arc<dyn StageWorker>) -> Self {
        self.workers.insert(worker.agent(), worker);
        self
    }

    pub fn get(&self, agent: AgentKind) -> Option<&Arc<dyn StageWorker>> {
        self.workers.get(&agent)
    }

    /// Stages without a registered worker.
    pub fn missing(&self) -> Vec<AgentKind> {
        AgentKind::STAGES
            .iter()
            .copied()
            .filter(|agent| !self.workers.contains_key(agent))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{CoverageDimension, QueryDescriptor, QueryPriority};

    fn result(url: &str, query: &str) -> SearchResult {
        SearchResult {
            url: url.to_string(),
            title: String::new(),
            snippet: String::new(),
            source: "test".to_string(),
            quality_score: 0.8,
            query: query.to_string(),
            retrieved_at: Utc::now(),
        }
    }

    #[test]
    fn test_apply_skips_duplicate_urls() {
        let mut state = ResearchState::new("p", "Widget", "", vec![]);
        state.search_results.push(result("https://a", "q1"));

        let patch = StatePatch {
            search_results: vec![result("https://a", "q2"), result("https://b", "q2")],
            executed_queries: vec!["q2".to_string()],
            ..StatePatch::default()
        };
        patch.apply(&mut state);

        assert_eq!(state.search_results.len(), 2);
        assert_eq!(state.search_results[0].query, "q1");
        assert!(state.has_searched("q2"));
    }

    #[test]
    fn test_apply_consumes_pending_queries() {
        let mut state = ResearchState::new("p", "Widget", "", vec![]);
        state.pending_queries = vec![
            QueryDescriptor::new("a", "", CoverageDimension::Features, QueryPriority::High),
            QueryDescriptor::new("b", "", CoverageDimension::Market, QueryPriority::High),
        ];

        StatePatch {
            executed_queries: vec!["a".to_string(), "a".to_string()],
            ..StatePatch::default()
        }
        .apply(&mut state);

        assert_eq!(state.pending_queries.len(), 1);
        assert_eq!(state.pending_queries[0].query, "b");
        assert_eq!(state.executed_queries, vec!["a".to_string()]);
    }

    #[test]
    fn test_empty_patch_leaves_artifacts() {
        let mut state = ResearchState::new("p", "Widget", "", vec![]);
        state.analysis = Some(Analysis::default());
        let patch = StatePatch::new();
        assert!(patch.is_empty());
        patch.apply(&mut state);
        assert!(state.analysis.is_some());
    }

    #[test]
    fn test_outcome_from_error() {
        let outcome = StageOutcome::from_result(Err(AgentError::MissingInput(
            "no extracted content".to_string(),
        )));
        assert!(!outcome.success);
        assert!(!outcome.cancelled);
        assert!(outcome.summary.contains("no extracted content"));
    }

    #[test]
    fn test_empty_worker_set_reports_all_missing() {
        assert_eq!(WorkerSet::new().missing(), AgentKind::STAGES.to_vec());
    }
}
