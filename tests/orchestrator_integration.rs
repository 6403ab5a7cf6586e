//! End-to-end tests of the research loop with canned collaborators.
//!
//! Every external seam (search, extraction, model, persistence) is replaced
//! by an in-process fake so the full plan → search → extract → analyze →
//! report cycle runs deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use research_forge::agents::{
    ExtractedPage, ExtractionLimits, ExtractionProvider, SearchHit, SearchLimits, SearchProvider,
    WorkerSet,
};
use research_forge::backup::{BackupManager, MemoryBackend, PersistenceBackend};
use research_forge::llm::{GenerationOptions, RetryPolicy, TextGenerationClient};
use research_forge::pipeline::{
    CancellationFlag, Orchestrator, OrchestratorError, ProjectRegistry, ResearchConfig,
    SupervisorMode,
};
use research_forge::progress::ChannelProgressSink;
use research_forge::research::{ResearchState, ResearchStatus};
use research_forge::{LlmError, ProviderError};

const ANALYSIS_REPLY: &str = r#"Here is the analysis:
```json
{
  "features": [
    {"name": "Pipeline automation", "description": "Rules move deals between stages"},
    {"name": "Email sync"},
    "Reporting dashboards",
    "Mobile app",
    "Open API"
  ],
  "competitors": [
    {"name": "Salesforce", "url": "https://salesforce.com"},
    {"name": "HubSpot"},
    {"name": "Pipedrive"}
  ],
  "useCases": ["Sales pipeline tracking", "Customer support handoff", "Forecasting"],
  "techStack": ["PostgreSQL", "React", "Kubernetes"],
  "swot": {
    "strengths": ["Simple onboarding"],
    "weaknesses": ["Small partner ecosystem"],
    "opportunities": ["SMB market"],
    "threats": ["Bundled suites"]
  },
  "marketData": {"marketSize": "$65B", "growthRate": "12% CAGR"},
  "confidenceScore": 0.82,
  "dataGaps": []
}
```"#;

const WEAK_ANALYSIS_REPLY: &str = r#"{
  "features": ["Contact list"],
  "competitors": ["Salesforce"],
  "useCases": [],
  "confidenceScore": 0.3,
  "dataGaps": ["pricing", "market size"]
}"#;

// ============================================================================
// Fakes
// ============================================================================

struct FakeSearch {
    hits_per_query: usize,
    delay: Duration,
    cancel_on_call: Option<CancellationFlag>,
    calls: AtomicUsize,
}

impl FakeSearch {
    fn new(hits_per_query: usize) -> Self {
        Self {
            hits_per_query,
            delay: Duration::ZERO,
            cancel_on_call: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn cancelling(mut self, flag: CancellationFlag) -> Self {
        self.cancel_on_call = Some(flag);
        self
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &str {
        "fake-search"
    }

    async fn search(
        &self,
        query: &str,
        limits: &SearchLimits,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = &self.cancel_on_call {
            flag.cancel();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let slug = query.to_lowercase().replace(' ', "-");
        Ok((0..self.hits_per_query.min(limits.max_results))
            .map(|i| {
                SearchHit::new(
                    format!("https://{}.example.com/{}", slug, i),
                    format!("{} result {}", query, i),
                    0.9,
                )
                .with_snippet(format!("About {}", query))
            })
            .collect())
    }
}

struct FakeExtraction {
    fail: bool,
}

#[async_trait]
impl ExtractionProvider for FakeExtraction {
    fn name(&self) -> &str {
        "fake-extraction"
    }

    async fn extract(
        &self,
        url: &str,
        _limits: &ExtractionLimits,
    ) -> Result<ExtractedPage, ProviderError> {
        if self.fail {
            return Err(ProviderError::Rejected(format!("blocked: {}", url)));
        }
        Ok(ExtractedPage::new(
            url,
            "Acme CRM overview",
            "Acme CRM automates the sales pipeline for small teams. ".repeat(30),
        ))
    }
}

/// Routes each call by its system prompt.
struct FakeModel {
    analysis: &'static str,
    calls: AtomicUsize,
}

impl FakeModel {
    fn new() -> Self {
        Self::answering(ANALYSIS_REPLY)
    }

    fn answering(analysis: &'static str) -> Self {
        Self {
            analysis,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TextGenerationClient for FakeModel {
    async fn generate(
        &self,
        _prompt: &str,
        system_prompt: Option<&str>,
        _options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let system = system_prompt.unwrap_or_default();
        if system.contains("market analyst") {
            Ok(self.analysis.to_string())
        } else if system.contains("executive summary") {
            Ok("Acme CRM is well placed in the SMB segment.".to_string())
        } else {
            Ok("I would keep going with the current plan.".to_string())
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

struct Harness {
    orchestrator: Orchestrator,
    backend: Arc<MemoryBackend>,
    model: Arc<FakeModel>,
}

fn test_config() -> ResearchConfig {
    ResearchConfig::default()
        .with_backup_interval(None)
        .with_max_backups(3)
        .with_retry_policy(RetryPolicy::none())
}

fn harness_with(
    config: ResearchConfig,
    search: FakeSearch,
    extraction: FakeExtraction,
) -> Harness {
    harness_with_model(config, search, extraction, FakeModel::new())
}

fn harness_with_model(
    config: ResearchConfig,
    search: FakeSearch,
    extraction: FakeExtraction,
    model: FakeModel,
) -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let model = Arc::new(model);
    let backups = Arc::new(BackupManager::new(backend.clone(), config.max_backups));
    let orchestrator = Orchestrator::builder(config)
        .workers(WorkerSet::standard(
            Arc::new(search),
            Arc::new(extraction),
            model.clone(),
        ))
        .llm(model.clone())
        .backups(backups)
        .build()
        .expect("orchestrator should build");
    Harness {
        orchestrator,
        backend,
        model,
    }
}

fn harness() -> Harness {
    harness_with(test_config(), FakeSearch::new(4), FakeExtraction { fail: false })
}

fn project(id: &str) -> ResearchState {
    ResearchState::new(
        id,
        "Acme CRM",
        "CRM for small sales teams",
        vec!["pricing".to_string()],
    )
}

// ============================================================================
// Full runs
// ============================================================================

#[tokio::test]
async fn test_full_run_completes_with_report() {
    let h = harness();

    let state = h.orchestrator.run(project("acme")).await.expect("run");

    assert_eq!(state.status, ResearchStatus::Completed);
    assert_eq!(state.progress, 100.0);
    assert!(state.completed_at.is_some());
    assert!(state.error.is_none());

    let report = state.report.as_ref().expect("report");
    assert_eq!(report.title, "Acme CRM Market Research Report");
    assert_eq!(report.summary, "Acme CRM is well placed in the SMB segment.");
    assert_eq!(report.features.len(), 5);
    assert_eq!(report.competitors.len(), 3);
    assert!(!report.citations.is_empty());
    assert!(report
        .recommendations
        .contains(&"Pursue opportunity: SMB market".to_string()));

    // planner, searcher, extractor, analyzer, reporter, done
    assert_eq!(state.iterations_used, 6);
    assert!(state.search_results.len() >= 15);
    assert!(state.data_quality.as_ref().is_some_and(|q| q.is_complete));
    assert!(h.model.calls.load(Ordering::SeqCst) >= 3);

    let stats = h.orchestrator.stats();
    assert_eq!(stats.started, 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn test_search_results_have_unique_urls() {
    let h = harness();
    let state = h.orchestrator.run(project("acme")).await.expect("run");

    let mut urls: Vec<&str> = state.search_results.iter().map(|r| r.url.as_str()).collect();
    let total = urls.len();
    urls.sort_unstable();
    urls.dedup();
    assert_eq!(urls.len(), total);
    assert!(state
        .search_results
        .iter()
        .all(|r| (0.0..=1.0).contains(&r.quality_score)));
}

#[tokio::test]
async fn test_unusable_supervisor_replies_fall_back_to_rules() {
    let config = test_config().with_supervisor_mode(SupervisorMode::LlmAssisted);
    let h = harness_with(config, FakeSearch::new(4), FakeExtraction { fail: false });

    let state = h.orchestrator.run(project("acme")).await.expect("run");

    assert_eq!(state.status, ResearchStatus::Completed);
    assert!(state.report.is_some());
}

#[tokio::test]
async fn test_weak_analysis_completes_when_budget_forces_report() {
    let config = test_config().with_max_iterations(8);
    let h = harness_with_model(
        config,
        FakeSearch::new(4),
        FakeExtraction { fail: false },
        FakeModel::answering(WEAK_ANALYSIS_REPLY),
    );

    let state = h.orchestrator.run(project("acme")).await.expect("run");

    assert_eq!(state.status, ResearchStatus::Completed);
    assert!(state.error.is_none());
    assert_eq!(state.iterations_used, 8);
    assert_eq!(state.progress, 100.0);
    let report = state.report.as_ref().expect("report");
    assert_eq!(report.features.len(), 1);
    assert!(state
        .analysis
        .as_ref()
        .is_some_and(|a| a.confidence_score < 0.6));
    assert_eq!(h.orchestrator.stats().completed, 1);
}

#[tokio::test]
async fn test_progress_events_reach_sink() {
    let backend = Arc::new(MemoryBackend::new());
    let model = Arc::new(FakeModel::new());
    let (sink, mut rx) = ChannelProgressSink::channel(1024);
    let orchestrator = Orchestrator::builder(test_config())
        .workers(WorkerSet::standard(
            Arc::new(FakeSearch::new(4)),
            Arc::new(FakeExtraction { fail: false }),
            model,
        ))
        .backups(Arc::new(BackupManager::new(backend, 3)))
        .progress_sink(Arc::new(sink))
        .build()
        .expect("build");

    orchestrator.run(project("acme")).await.expect("run");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.project_id == "acme"));
    assert!(events.iter().any(|e| e.detail.stage == "searcher"));
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_exhausted_retries_fail_the_run() {
    let config = test_config().with_max_retries(2);
    let h = harness_with(config, FakeSearch::new(4), FakeExtraction { fail: true });

    let state = h.orchestrator.run(project("acme")).await.expect("run");

    assert_eq!(state.status, ResearchStatus::Failed);
    assert_eq!(state.retry_count, 2);
    let error = state.error.as_deref().expect("error message");
    assert!(error.contains("extractor failed after 2 retries"), "{}", error);
    assert!(state.report.is_none());
    assert!(state.progress < 100.0);
    assert_eq!(h.orchestrator.stats().failed, 1);
}

#[tokio::test]
async fn test_cancellation_during_search() {
    let flag = CancellationFlag::new();
    let h = harness_with(
        test_config(),
        FakeSearch::new(4).cancelling(flag.clone()),
        FakeExtraction { fail: false },
    );

    let state = h
        .orchestrator
        .run_with_cancel(project("acme"), flag)
        .await
        .expect("run");

    assert_eq!(state.status, ResearchStatus::Cancelled);
    assert!(state.report.is_none());
    assert!(state.progress < 100.0);
    assert_eq!(h.orchestrator.stats().cancelled, 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = harness();
    let flag = CancellationFlag::new();
    flag.cancel();

    let state = h
        .orchestrator
        .run_with_cancel(project("acme"), flag)
        .await
        .expect("run");

    assert_eq!(state.status, ResearchStatus::Cancelled);
    assert_eq!(state.iterations_used, 0);
    assert!(state.search_plan.is_none());
}

#[tokio::test]
async fn test_terminal_states_are_not_rerun() {
    let h = harness();
    let first = h.orchestrator.run(project("acme")).await.expect("run");
    let calls = h.model.calls.load(Ordering::SeqCst);

    let second = h.orchestrator.run(first.clone()).await.expect("rerun");

    assert_eq!(second, first);
    assert_eq!(h.model.calls.load(Ordering::SeqCst), calls);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_same_project_is_single_writer() {
    let h = harness_with(
        test_config(),
        FakeSearch::new(4).with_delay(Duration::from_millis(50)),
        FakeExtraction { fail: false },
    );

    let (a, b) = tokio::join!(
        h.orchestrator.run(project("acme")),
        h.orchestrator.run(project("acme"))
    );

    let (ok, busy) = match (a, b) {
        (Ok(state), Err(e)) | (Err(e), Ok(state)) => (state, e),
        other => panic!("expected exactly one busy rejection, got {:?}", other),
    };
    assert_eq!(ok.status, ResearchStatus::Completed);
    assert!(matches!(busy, OrchestratorError::ProjectBusy(ref id) if id == "acme"));
    assert!(!h.orchestrator.registry().is_active("acme"));
}

#[tokio::test]
async fn test_shared_registry_spans_orchestrators() {
    let registry = ProjectRegistry::new();
    let first = harness_with(
        test_config(),
        FakeSearch::new(4).with_delay(Duration::from_millis(50)),
        FakeExtraction { fail: false },
    );
    let second = harness();
    let first = first.orchestrator.with_registry(registry.clone());
    let second = second.orchestrator.with_registry(registry.clone());

    let (a, b) = tokio::join!(first.run(project("acme")), second.run(project("acme")));

    assert!(a.is_ok() != b.is_ok());
    assert_eq!(registry.active_count(), 0);
}

#[tokio::test]
async fn test_distinct_projects_run_concurrently() {
    let h = harness_with(
        test_config(),
        FakeSearch::new(4).with_delay(Duration::from_millis(10)),
        FakeExtraction { fail: false },
    );

    let (a, b) = tokio::join!(
        h.orchestrator.run(project("alpha")),
        h.orchestrator.run(project("beta"))
    );

    assert_eq!(a.expect("alpha").status, ResearchStatus::Completed);
    assert_eq!(b.expect("beta").status, ResearchStatus::Completed);
    assert_eq!(h.orchestrator.stats().completed, 2);
}

// ============================================================================
// Backups and recovery
// ============================================================================

#[tokio::test]
async fn test_checkpoints_are_rotated() {
    let h = harness();
    h.orchestrator.run(project("acme")).await.expect("run");

    let backups = h.orchestrator.backups().list_backups("acme").await;
    assert!(!backups.is_empty());
    assert!(backups.len() <= 3);
    assert!(backups
        .windows(2)
        .all(|pair| pair[0].created_at >= pair[1].created_at));

    let latest = h
        .orchestrator
        .backups()
        .restore_latest("acme")
        .await
        .expect("latest");
    assert_eq!(latest.status, ResearchStatus::Completed);
}

#[tokio::test]
async fn test_resume_from_checkpoint() {
    let h = harness();
    let manifest = h
        .orchestrator
        .backups()
        .create_backup_from(&project("acme"))
        .await
        .expect("backup");

    let state = h.orchestrator.resume(&manifest.backup_id).await.expect("resume");

    assert_eq!(state.project_id, "acme");
    assert_eq!(state.status, ResearchStatus::Completed);
}

#[tokio::test]
async fn test_resume_rejects_corrupted_backup() {
    let h = harness();
    let manifest = h
        .orchestrator
        .backups()
        .create_backup_from(&project("acme"))
        .await
        .expect("backup");
    h.backend
        .write(
            &format!("acme/{}", manifest.backup_id),
            b"{\"state\": \"tampered\"}",
        )
        .await
        .expect("overwrite");

    let err = h.orchestrator.resume(&manifest.backup_id).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Unrecoverable(_)));
}

#[tokio::test]
async fn test_resume_latest_skips_corrupted_backup() {
    let h = harness();
    let backups = h.orchestrator.backups();

    backups
        .create_backup_from(&project("acme"))
        .await
        .expect("older backup");
    let newer = backups
        .create_backup_from(&project("acme"))
        .await
        .expect("newer backup");
    h.backend
        .write(&format!("acme/{}", newer.backup_id), b"garbage")
        .await
        .expect("overwrite");

    let state = h.orchestrator.resume_latest("acme").await.expect("resume");

    assert_eq!(state.status, ResearchStatus::Completed);
}

#[tokio::test]
async fn test_resume_latest_without_backups() {
    let h = harness();
    let err = h.orchestrator.resume_latest("ghost").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Unrecoverable(ref id) if id == "ghost"));
}
