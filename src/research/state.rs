//! The canonical data model for one research run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{
    Analysis, Citation, DataQuality, ExtractedContent, ProgressDetail, QueryDescriptor,
    ResearchReport, SearchPlan, SearchResult,
};
use crate::error::StateError;

/// Lifecycle status of a research project.
///
/// ```text
/// pending → planning → searching ⟲ → extracting → analyzing ⟲ → reporting → completed
/// ```
///
/// Every non-terminal status may also move to `failed` or `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStatus {
    Pending,
    Planning,
    Searching,
    Extracting,
    Analyzing,
    Reporting,
    Completed,
    Failed,
    Cancelled,
}

impl ResearchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ResearchStatus::Completed | ResearchStatus::Failed | ResearchStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the status graph.
    ///
    /// Besides the forward chain, a stage may hand control back to an earlier
    /// evidence-gathering stage (`extracting → searching`,
    /// `analyzing → searching | extracting`) when the supervisor asks for more
    /// evidence.
    pub fn can_transition_to(self, next: ResearchStatus) -> bool {
        use ResearchStatus::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (_, Failed)
                | (_, Cancelled)
                | (Pending, Planning)
                | (Planning, Searching)
                | (Searching, Searching)
                | (Searching, Extracting)
                | (Extracting, Analyzing)
                | (Extracting, Searching)
                | (Analyzing, Analyzing)
                | (Analyzing, Reporting)
                | (Analyzing, Searching)
                | (Analyzing, Extracting)
                | (Reporting, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResearchStatus::Pending => "pending",
            ResearchStatus::Planning => "planning",
            ResearchStatus::Searching => "searching",
            ResearchStatus::Extracting => "extracting",
            ResearchStatus::Analyzing => "analyzing",
            ResearchStatus::Reporting => "reporting",
            ResearchStatus::Completed => "completed",
            ResearchStatus::Failed => "failed",
            ResearchStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one research project.
///
/// Owned by exactly one orchestrator loop; collaborators only ever see
/// `&ResearchState` snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    // Identity
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,

    // Control
    pub status: ResearchStatus,
    pub current_step: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub iterations_used: u32,

    // Progress
    pub progress: f64,
    pub progress_message: String,
    pub progress_detail: ProgressDetail,

    // Stage artifacts
    pub search_plan: Option<SearchPlan>,
    pub search_results: Vec<SearchResult>,
    pub pending_queries: Vec<QueryDescriptor>,
    /// Queries already sent to the search provider.
    #[serde(default)]
    pub executed_queries: Vec<String>,
    /// URLs whose extraction failed after retries; never retried.
    #[serde(default)]
    pub failed_urls: Vec<String>,
    pub extracted_content: Vec<ExtractedContent>,
    pub analysis: Option<Analysis>,
    pub data_quality: Option<DataQuality>,
    pub citations: Vec<Citation>,
    pub report: Option<ResearchReport>,

    /// Message captured when the run failed.
    pub error: Option<String>,

    // Timestamps
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ResearchState {
    /// Default pipeline-level retry budget.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(
        project_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        keywords: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.into(),
            title: title.into(),
            description: description.into(),
            keywords,
            status: ResearchStatus::Pending,
            current_step: String::new(),
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            iterations_used: 0,
            progress: 0.0,
            progress_message: "Waiting to start".to_string(),
            progress_detail: ProgressDetail::default(),
            search_plan: None,
            search_results: Vec::new(),
            pending_queries: Vec::new(),
            executed_queries: Vec::new(),
            failed_urls: Vec::new(),
            extracted_content: Vec::new(),
            analysis: None,
            data_quality: None,
            citations: Vec::new(),
            report: None,
            error: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Creates a project with a freshly generated id.
    pub fn with_generated_id(
        title: impl Into<String>,
        description: impl Into<String>,
        keywords: Vec<String>,
    ) -> Self {
        Self::new(Uuid::new_v4().simple().to_string(), title, description, keywords)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_mutable(&self) -> Result<(), StateError> {
        if self.is_terminal() {
            return Err(StateError::Terminal(self.status));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Moves to `next` if the status graph allows it.
    pub fn transition_to(&mut self, next: ResearchStatus) -> Result<(), StateError> {
        self.ensure_mutable()?;
        if !self.status.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        if next == ResearchStatus::Completed {
            return self.complete();
        }

        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    /// Records progress. Values are clamped to 0..=100 and decreases are
    /// ignored, so progress never moves backwards while the run is live.
    pub fn set_progress(&mut self, value: f64, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        let value = if value.is_finite() {
            value.clamp(0.0, 100.0)
        } else {
            self.progress
        };
        if value > self.progress {
            self.progress = value;
        }
        self.progress_message = message.into();
        self.touch();
    }

    /// Consumes one unit of the pipeline retry budget.
    ///
    /// Returns `true` when the budget is exhausted after this failure; the
    /// caller is then expected to fail the run.
    pub fn record_retry(&mut self) -> Result<bool, StateError> {
        self.ensure_mutable()?;
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
        }
        self.touch();
        Ok(self.retry_count >= self.max_retries)
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Terminal success. Only valid from `reporting`; forces progress to 100.
    pub fn complete(&mut self) -> Result<(), StateError> {
        self.ensure_mutable()?;
        if self.status != ResearchStatus::Reporting {
            return Err(StateError::InvalidTransition {
                from: self.status,
                to: ResearchStatus::Completed,
            });
        }
        let now = Utc::now();
        self.status = ResearchStatus::Completed;
        self.progress = 100.0;
        self.progress_message = "Research completed".to_string();
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Terminal failure with a captured message. Progress stays frozen.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), StateError> {
        self.ensure_mutable()?;
        let error = error.into();
        let now = Utc::now();
        self.status = ResearchStatus::Failed;
        self.progress_message = format!("Research failed: {}", error);
        self.error = Some(error);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Terminal cancellation. Progress stays frozen.
    pub fn cancel(&mut self) -> Result<(), StateError> {
        self.ensure_mutable()?;
        let now = Utc::now();
        self.status = ResearchStatus::Cancelled;
        self.progress_message = "Research cancelled".to_string();
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Coverage counters
    // ------------------------------------------------------------------

    pub fn high_quality_result_count(&self) -> usize {
        self.search_results
            .iter()
            .filter(|r| r.is_high_quality())
            .count()
    }

    pub fn substantial_extraction_count(&self) -> usize {
        self.extracted_content
            .iter()
            .filter(|c| c.is_substantial())
            .count()
    }

    /// Search hits whose URL has been neither extracted nor given up on.
    pub fn unextracted_results(&self) -> impl Iterator<Item = &SearchResult> {
        self.search_results.iter().filter(move |r| {
            !self.failed_urls.contains(&r.url)
                && !self
                    .extracted_content
                    .iter()
                    .any(|c| c.url == r.url)
        })
    }

    /// Whether a query has already been run in this project.
    pub fn has_searched(&self, query: &str) -> bool {
        self.executed_queries.iter().any(|q| q == query)
            || self.search_results.iter().any(|r| r.query == query)
    }
}
