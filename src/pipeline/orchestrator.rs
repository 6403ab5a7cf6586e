//! The research loop.
//!
//! One [`Orchestrator::run`] call owns a project's [`ResearchState`] until it
//! reaches a terminal status, is paused by the supervisor, or is cancelled.
//! Each pass:
//!
//! 1. Asks the [`Supervisor`] for a decision
//! 2. Enters the decided stage and dispatches its [`StageWorker`]
//! 3. Merges the worker's [`StatePatch`](crate::agents::StatePatch)
//! 4. Re-scores the state with the [`QualityAssessor`]
//! 5. Updates progress and notifies the [`ProgressSink`]
//! 6. Checkpoints through the [`BackupManager`]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

use super::cancel::CancellationFlag;
use super::config::{ConfigError, ResearchConfig};
use super::registry::ProjectRegistry;
use crate::agents::{StageContext, StageWorker, WorkerSet};
use crate::backup::{BackupManager, BackupScheduler, FsBackend};
use crate::error::StateError;
use crate::llm::TextGenerationClient;
use crate::progress::{ProgressCalculator, ProgressSink, TracingProgressSink};
use crate::quality::QualityAssessor;
use crate::research::{AgentKind, ResearchState, ResearchStatus};
use crate::supervisor::{Decision, Supervisor};

/// Errors surfaced by the orchestrator.
///
/// Failures inside a run are recorded on the state as `failed`; only
/// conditions that prevent a run from starting are returned as errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Another loop is running this project.
    #[error("Project {0} is already running")]
    ProjectBusy(String),

    /// No usable backup to resume from.
    #[error("Cannot resume: no valid backup for {0}")]
    Unrecoverable(String),

    /// A state transition was rejected.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A stage has no registered worker.
    #[error("No worker registered for stage {0}")]
    MissingWorker(AgentKind),
}

/// How a loop pass ended.
enum Step {
    Continue,
    Stop,
}

// ============================================================================
// Stats
// ============================================================================

/// Counters over all runs of one orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Runs that returned a non-terminal state.
    pub paused: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    paused: AtomicU64,
}

impl StatCounters {
    fn record_end(&self, status: ResearchStatus) {
        let counter = match status {
            ResearchStatus::Completed => &self.completed,
            ResearchStatus::Failed => &self.failed,
            ResearchStatus::Cancelled => &self.cancelled,
            _ => &self.paused,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RunStats {
        RunStats {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            paused: self.paused.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives research projects through the pipeline.
pub struct Orchestrator {
    config: Arc<ResearchConfig>,
    supervisor: Supervisor,
    workers: WorkerSet,
    backups: Arc<BackupManager>,
    progress_sink: Arc<dyn ProgressSink>,
    registry: ProjectRegistry,
    assessor: QualityAssessor,
    calculator: ProgressCalculator,
    stats: StatCounters,
}

impl Orchestrator {
    /// Creates an orchestrator from explicit collaborators.
    ///
    /// # Arguments
    ///
    /// * `config` - Loop, threshold and timeout configuration
    /// * `supervisor` - Decision engine
    /// * `workers` - One worker per stage
    /// * `backups` - Checkpoint persistence
    /// * `progress_sink` - Receives progress updates
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Config` if the configuration is invalid
    /// and `OrchestratorError::MissingWorker` if a stage has no worker.
    pub fn new(
        config: ResearchConfig,
        supervisor: Supervisor,
        workers: WorkerSet,
        backups: Arc<BackupManager>,
        progress_sink: Arc<dyn ProgressSink>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        if let Some(agent) = workers.missing().into_iter().next() {
            return Err(OrchestratorError::MissingWorker(agent));
        }

        Ok(Self {
            assessor: QualityAssessor::new(config.thresholds.clone(), config.max_iterations),
            calculator: ProgressCalculator::new(config.thresholds.clone()),
            config: Arc::new(config),
            supervisor,
            workers,
            backups,
            progress_sink,
            registry: ProjectRegistry::new(),
            stats: StatCounters::default(),
        })
    }

    pub fn builder(config: ResearchConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Shares `registry` with other orchestrators so that they reject each
    /// other's active projects.
    pub fn with_registry(mut self, registry: ProjectRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    pub fn stats(&self) -> RunStats {
        self.stats.snapshot()
    }

    /// Runs `state` until it completes, fails, or the supervisor pauses it.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::ProjectBusy` if the project is already
    /// running. Everything else ends up on the returned state.
    pub async fn run(&self, state: ResearchState) -> Result<ResearchState, OrchestratorError> {
        self.run_with_cancel(state, CancellationFlag::new()).await
    }

    /// Like [`Orchestrator::run`], observing `cancel` between and within
    /// stages.
    pub async fn run_with_cancel(
        &self,
        mut state: ResearchState,
        cancel: CancellationFlag,
    ) -> Result<ResearchState, OrchestratorError> {
        if state.is_terminal() {
            return Ok(state);
        }

        let _lease = self
            .registry
            .try_acquire(&state.project_id)
            .ok_or_else(|| OrchestratorError::ProjectBusy(state.project_id.clone()))?;

        if state.status == ResearchStatus::Pending && state.retry_count == 0 {
            state.max_retries = self.config.max_retries;
        }
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            project_id = %state.project_id,
            status = %state.status,
            iterations_used = state.iterations_used,
            "Research run started"
        );

        self.backups.track(&state);
        let scheduler = self.config.backup_interval.map(|interval| {
            BackupScheduler::start(self.backups.clone(), state.project_id.clone(), interval)
        });

        if let Err(e) = self.drive(&mut state, &cancel).await {
            tracing::error!(project_id = %state.project_id, error = %e, "Research run aborted");
            if !state.is_terminal() {
                state.fail(e.to_string())?;
            }
        }

        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
        self.backups.create_backup_from(&state).await;
        self.backups.untrack(&state.project_id);
        self.stats.record_end(state.status);

        tracing::info!(
            project_id = %state.project_id,
            status = %state.status,
            progress = state.progress,
            iterations_used = state.iterations_used,
            "Research run finished"
        );
        Ok(state)
    }

    /// Restores `backup_id` and continues the run.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Unrecoverable` if the backup is missing or
    /// fails verification; the caller should start over from `pending`.
    pub async fn resume(&self, backup_id: &str) -> Result<ResearchState, OrchestratorError> {
        let state = self
            .backups
            .restore_backup(backup_id)
            .await
            .ok_or_else(|| OrchestratorError::Unrecoverable(backup_id.to_string()))?;
        self.run(state).await
    }

    /// Continues from the newest valid backup of `project_id`.
    pub async fn resume_latest(&self, project_id: &str) -> Result<ResearchState, OrchestratorError> {
        let state = self
            .backups
            .restore_latest(project_id)
            .await
            .ok_or_else(|| OrchestratorError::Unrecoverable(project_id.to_string()))?;
        self.run(state).await
    }

    async fn drive(
        &self,
        state: &mut ResearchState,
        cancel: &CancellationFlag,
    ) -> Result<(), OrchestratorError> {
        loop {
            if state.is_terminal() {
                return Ok(());
            }
            if cancel.is_cancelled() {
                tracing::info!(project_id = %state.project_id, "Cancellation observed");
                state.cancel()?;
                return Ok(());
            }
            if state.iterations_used >= self.config.max_iterations {
                // The final pass produced the report; closing it needs no extra pass.
                if state.status == ResearchStatus::Reporting && state.report.is_some() {
                    tracing::info!(
                        project_id = %state.project_id,
                        max_iterations = self.config.max_iterations,
                        "Iteration budget reached with report ready"
                    );
                    state.complete()?;
                    return Ok(());
                }
                tracing::warn!(
                    project_id = %state.project_id,
                    max_iterations = self.config.max_iterations,
                    "Iteration budget exhausted"
                );
                state.fail(format!(
                    "Iteration budget of {} exhausted in {}",
                    self.config.max_iterations, state.status
                ))?;
                return Ok(());
            }

            let decision = self.supervisor.decide(state).await;
            state.iterations_used += 1;

            if let Step::Stop = self.step(state, decision, cancel).await? {
                return Ok(());
            }
        }
    }

    /// Handles one decision.
    async fn step(
        &self,
        state: &mut ResearchState,
        decision: Decision,
        cancel: &CancellationFlag,
    ) -> Result<Step, OrchestratorError> {
        let agent = decision.next_agent;

        if agent == AgentKind::Done {
            if state.status == ResearchStatus::Reporting {
                if state.report.is_some() {
                    state.complete()?;
                } else {
                    state.fail("Reporting finished without a report")?;
                }
            } else {
                state.progress_message = format!("Paused by supervisor: {}", decision.reason);
            }
            return Ok(Step::Stop);
        }

        if !decision.should_continue {
            tracing::info!(
                project_id = %state.project_id,
                next_agent = %agent,
                reason = %decision.reason,
                "Supervisor paused the run"
            );
            state.progress_message = format!("Paused by supervisor: {}", decision.reason);
            return Ok(Step::Stop);
        }

        let target = agent.status();
        if target != state.status {
            let from = state.status;
            state.transition_to(target)?;
            tracing::info!(project_id = %state.project_id, from = %from, to = %target, "Stage entered");
        }

        let worker = self
            .workers
            .get(agent)
            .ok_or(OrchestratorError::MissingWorker(agent))?;
        let outcome = self.dispatch(worker.as_ref(), state, &decision, cancel).await;
        let success = outcome.success;
        let cancelled = outcome.cancelled;
        let summary = outcome.summary;
        outcome.patch.apply(state);

        self.refresh(state);

        if cancelled || cancel.is_cancelled() {
            tracing::info!(project_id = %state.project_id, stage = %agent, "Stage cancelled");
            state.cancel()?;
            return Ok(Step::Stop);
        }

        if success {
            tracing::info!(project_id = %state.project_id, stage = %agent, summary = %summary, "Stage finished");
        } else {
            let exhausted = state.record_retry()?;
            tracing::warn!(
                project_id = %state.project_id,
                stage = %agent,
                summary = %summary,
                retry_count = state.retry_count,
                max_retries = state.max_retries,
                "Stage failed"
            );
            if exhausted {
                state.fail(format!(
                    "{} failed after {} retries: {}",
                    agent, state.retry_count, summary
                ))?;
                return Ok(Step::Stop);
            }
        }

        if self.config.checkpoint_each_stage {
            if let Some(manifest) = self.backups.create_backup_from(state).await {
                tracing::debug!(
                    project_id = %state.project_id,
                    backup_id = %manifest.backup_id,
                    "Checkpoint written"
                );
            }
        }
        Ok(Step::Continue)
    }

    async fn dispatch(
        &self,
        worker: &dyn StageWorker,
        state: &ResearchState,
        decision: &Decision,
        cancel: &CancellationFlag,
    ) -> crate::agents::StageOutcome {
        let ctx = StageContext::new(self.config.clone(), cancel.clone())
            .with_instructions(decision.instructions.clone())
            .with_progress_sink(self.progress_sink.clone());
        worker.run(state, &ctx).await
    }

    /// Re-scores quality, refreshes follow-up queries and progress.
    fn refresh(&self, state: &mut ResearchState) {
        let assessment = self.assessor.assess(state);
        if state.analysis.is_some() {
            state.pending_queries = assessment
                .follow_up_queries
                .iter()
                .filter(|q| !state.has_searched(&q.query))
                .cloned()
                .collect();
        }
        state.data_quality = Some(assessment.to_data_quality());

        let snapshot = self.calculator.calculate(state);
        state.set_progress(snapshot.overall, snapshot.message);
        state.progress_detail = snapshot.detail;
        self.progress_sink
            .update(&state.project_id, &state.progress_detail);
        self.backups.track(state);
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles an [`Orchestrator`], filling defaults for anything not given.
pub struct OrchestratorBuilder {
    config: ResearchConfig,
    supervisor: Option<Supervisor>,
    workers: WorkerSet,
    backups: Option<Arc<BackupManager>>,
    progress_sink: Option<Arc<dyn ProgressSink>>,
    llm: Option<Arc<dyn TextGenerationClient>>,
    registry: Option<ProjectRegistry>,
}

impl OrchestratorBuilder {
    pub fn new(config: ResearchConfig) -> Self {
        Self {
            config,
            supervisor: None,
            workers: WorkerSet::new(),
            backups: None,
            progress_sink: None,
            llm: None,
            registry: None,
        }
    }

    pub fn supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn workers(mut self, workers: WorkerSet) -> Self {
        self.workers = workers;
        self
    }

    pub fn worker(mut self, worker: Arc<dyn StageWorker>) -> Self {
        self.workers = self.workers.with_worker(worker);
        self
    }

    pub fn backups(mut self, backups: Arc<BackupManager>) -> Self {
        self.backups = Some(backups);
        self
    }

    pub fn progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    /// Client for the default supervisor in LLM-assisted mode.
    pub fn llm(mut self, llm: Arc<dyn TextGenerationClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn registry(mut self, registry: ProjectRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// # Errors
    ///
    /// See [`Orchestrator::new`].
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let sink: Arc<dyn ProgressSink> = match self.progress_sink {
            Some(sink) => sink,
            None => Arc::new(TracingProgressSink),
        };
        let supervisor = self.supervisor.unwrap_or_else(|| {
            Supervisor::from_config(&self.config, self.llm.clone()).with_progress_sink(sink.clone())
        });
        let backups = self.backups.unwrap_or_else(|| {
            Arc::new(
                BackupManager::new(
                    Arc::new(FsBackend::new(self.config.backup_dir.clone())),
                    self.config.max_backups,
                )
                .with_io_timeout(self.config.timeouts.backup),
            )
        });

        let orchestrator = Orchestrator::new(self.config, supervisor, self.workers, backups, sink)?;
        Ok(match self.registry {
            Some(registry) => orchestrator.with_registry(registry),
            None => orchestrator,
        })
    }
}
