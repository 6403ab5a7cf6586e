//! Checksummed, rotated checkpoints of research state.
//!
//! A backup file is the 64-character hex SHA-256 digest of the payload
//! followed by the payload itself (canonical JSON of [`BackupPayload`]).
//! Files live at `{project_id}/{backup_id}` where
//! `backup_id = {project_id}_{base36 millis}_{random6}`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::storage::PersistenceBackend;
use crate::error::BackupError;
use crate::research::{
    Analysis, Citation, ExtractedContent, ProgressDetail, QueryDescriptor, ResearchReport,
    ResearchState, ResearchStatus, SearchPlan, SearchResult,
};

/// Length of the hex digest prefix.
const CHECKSUM_LEN: usize = 64;
/// Width of the base36 timestamp in backup ids.
const TIMESTAMP_WIDTH: usize = 9;
/// Length of the random id suffix.
const SUFFIX_LEN: usize = 6;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Backups kept per project unless configured otherwise.
pub const DEFAULT_MAX_BACKUPS: usize = 5;

// ============================================================================
// Payload
// ============================================================================

/// The persisted subset of [`ResearchState`].
///
/// Derived fields (progress detail, progress message, data quality) are
/// recomputed after restore and are not stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupPayload {
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub status: ResearchStatus,
    pub current_step: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub iterations_used: u32,
    pub progress: f64,
    pub search_plan: Option<SearchPlan>,
    pub search_results: Vec<SearchResult>,
    pub pending_queries: Vec<QueryDescriptor>,
    #[serde(default)]
    pub executed_queries: Vec<String>,
    #[serde(default)]
    pub failed_urls: Vec<String>,
    pub extracted_content: Vec<ExtractedContent>,
    pub analysis: Option<Analysis>,
    pub citations: Vec<Citation>,
    pub report: Option<ResearchReport>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ResearchState> for BackupPayload {
    fn from(state: &ResearchState) -> Self {
        Self {
            project_id: state.project_id.clone(),
            title: state.title.clone(),
            description: state.description.clone(),
            keywords: state.keywords.clone(),
            status: state.status,
            current_step: state.current_step.clone(),
            retry_count: state.retry_count,
            max_retries: state.max_retries,
            iterations_used: state.iterations_used,
            progress: state.progress,
            search_plan: state.search_plan.clone(),
            search_results: state.search_results.clone(),
            pending_queries: state.pending_queries.clone(),
            executed_queries: state.executed_queries.clone(),
            failed_urls: state.failed_urls.clone(),
            extracted_content: state.extracted_content.clone(),
            analysis: state.analysis.clone(),
            citations: state.citations.clone(),
            report: state.report.clone(),
            error: state.error.clone(),
            started_at: state.started_at,
            updated_at: state.updated_at,
            completed_at: state.completed_at,
        }
    }
}

impl BackupPayload {
    /// Rebuilds a state; derived fields start empty.
    pub fn into_state(self, backup_id: &str) -> ResearchState {
        ResearchState {
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            keywords: self.keywords,
            status: self.status,
            current_step: self.current_step,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            iterations_used: self.iterations_used,
            progress: self.progress,
            progress_message: format!("Restored from backup {}", backup_id),
            progress_detail: ProgressDetail::default(),
            search_plan: self.search_plan,
            search_results: self.search_results,
            pending_queries: self.pending_queries,
            executed_queries: self.executed_queries,
            failed_urls: self.failed_urls,
            extracted_content: self.extracted_content,
            analysis: self.analysis,
            data_quality: None,
            citations: self.citations,
            report: self.report,
            error: self.error,
            started_at: self.started_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }
}

/// Metadata describing one stored backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_id: String,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub checksum: String,
}

// ============================================================================
// Backup ids
// ============================================================================

/// Components of a backup id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupId {
    pub project_id: String,
    pub timestamp_millis: u64,
    pub suffix: String,
}

impl BackupId {
    /// Parses `{project}_{base36 millis}_{suffix}`. The project id may itself
    /// contain underscores.
    pub fn parse(id: &str) -> Result<Self, BackupError> {
        let invalid = || BackupError::InvalidId(id.to_string());

        if id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(invalid());
        }

        let mut parts = id.rsplitn(3, '_');
        let suffix = parts.next().ok_or_else(invalid)?;
        let timestamp = parts.next().ok_or_else(invalid)?;
        let project_id = parts.next().ok_or_else(invalid)?;

        if project_id.is_empty()
            || suffix.len() != SUFFIX_LEN
            || !suffix.bytes().all(|b| BASE36.contains(&b))
            || timestamp.len() != TIMESTAMP_WIDTH
        {
            return Err(invalid());
        }

        Ok(Self {
            project_id: project_id.to_string(),
            timestamp_millis: decode_base36(timestamp).ok_or_else(invalid)?,
            suffix: suffix.to_string(),
        })
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.project_id, self)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        i64::try_from(self.timestamp_millis)
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl std::fmt::Display for BackupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.project_id,
            encode_base36(self.timestamp_millis, TIMESTAMP_WIDTH),
            self.suffix
        )
    }
}

fn encode_base36(mut value: u64, width: usize) -> String {
    let mut digits = Vec::with_capacity(width);
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    while digits.len() < width {
        digits.push(b'0');
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

fn decode_base36(text: &str) -> Option<u64> {
    text.bytes().try_fold(0u64, |acc, b| {
        let digit = BASE36.iter().position(|&d| d == b)? as u64;
        acc.checked_mul(36)?.checked_add(digit)
    })
}

fn random_suffix() -> String {
    use rand::RngExt;

    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..36usize)] as char)
        .collect()
}

/// Computes the SHA-256 checksum of data.
fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Equality check whose running time depends only on the lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ============================================================================
// State sources
// ============================================================================

/// Supplies the current state of a project for interval backups.
pub trait StateSource: Send + Sync {
    fn snapshot(&self, project_id: &str) -> Option<ResearchState>;
}

/// Latest state snapshots registered by orchestrator loops.
#[derive(Debug, Default)]
pub struct TrackedStates {
    states: Mutex<HashMap<String, ResearchState>>,
}

impl TrackedStates {
    fn states(&self) -> std::sync::MutexGuard<'_, HashMap<String, ResearchState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn track(&self, state: &ResearchState) {
        self.states().insert(state.project_id.clone(), state.clone());
    }

    pub fn forget(&self, project_id: &str) {
        self.states().remove(project_id);
    }
}

impl StateSource for TrackedStates {
    fn snapshot(&self, project_id: &str) -> Option<ResearchState> {
        self.states().get(project_id).cloned()
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Creates, lists, restores, rotates and deletes backups.
///
/// Public operations never return errors: failures are logged and reported
/// as `None` / `false` / empty lists.
pub struct BackupManager {
    backend: Arc<dyn PersistenceBackend>,
    max_backups: usize,
    io_timeout: Duration,
    tracked: Arc<TrackedStates>,
    source: Arc<dyn StateSource>,
    last_timestamp: AtomicU64,
}

impl BackupManager {
    /// Creates a manager over `backend`.
    ///
    /// # Arguments
    ///
    /// * `backend` - Where backup files are stored
    /// * `max_backups` - Backups retained per project (at least 1)
    pub fn new(backend: Arc<dyn PersistenceBackend>, max_backups: usize) -> Self {
        let tracked = Arc::new(TrackedStates::default());
        Self {
            backend,
            max_backups: max_backups.max(1),
            io_timeout: Duration::from_secs(15),
            source: tracked.clone(),
            tracked,
            last_timestamp: AtomicU64::new(0),
        }
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Reads interval-backup states from `source` instead of tracked
    /// snapshots.
    pub fn with_state_source(mut self, source: Arc<dyn StateSource>) -> Self {
        self.source = source;
        self
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// Registers the latest state of a project for [`create_backup`].
    ///
    /// [`create_backup`]: BackupManager::create_backup
    pub fn track(&self, state: &ResearchState) {
        self.tracked.track(state);
    }

    pub fn untrack(&self, project_id: &str) {
        self.tracked.forget(project_id);
    }

    /// Backs up the current state of `project_id` as provided by the state
    /// source. `None` if the project is unknown or the backup failed.
    pub async fn create_backup(&self, project_id: &str) -> Option<BackupManifest> {
        match self.source.snapshot(project_id) {
            Some(state) => self.create_backup_from(&state).await,
            None => {
                tracing::debug!(project_id = %project_id, "No state to back up");
                None
            }
        }
    }

    /// Backs up `state` directly, then rotates old backups.
    pub async fn create_backup_from(&self, state: &ResearchState) -> Option<BackupManifest> {
        match self.try_create(state).await {
            Ok(manifest) => {
                tracing::debug!(
                    project_id = %manifest.project_id,
                    backup_id = %manifest.backup_id,
                    size_bytes = manifest.size_bytes,
                    "Backup created"
                );
                self.rotate(&manifest.project_id).await;
                Some(manifest)
            }
            Err(e) => {
                tracing::warn!(
                    project_id = %state.project_id,
                    error = %e,
                    "Backup failed"
                );
                None
            }
        }
    }

    /// Restores a backup. `None` if it is missing, malformed, or fails the
    /// integrity check.
    pub async fn restore_backup(&self, backup_id: &str) -> Option<ResearchState> {
        match self.try_restore(backup_id).await {
            Ok(state) => {
                tracing::info!(
                    project_id = %state.project_id,
                    backup_id = %backup_id,
                    status = %state.status,
                    "Backup restored"
                );
                Some(state)
            }
            Err(e) => {
                tracing::warn!(backup_id = %backup_id, error = %e, "Backup restore failed");
                None
            }
        }
    }

    /// Restores the newest backup of `project_id` that passes verification.
    pub async fn restore_latest(&self, project_id: &str) -> Option<ResearchState> {
        for manifest in self.list_backups(project_id).await {
            if let Some(state) = self.restore_backup(&manifest.backup_id).await {
                return Some(state);
            }
        }
        None
    }

    /// Backups of `project_id`, newest first.
    pub async fn list_backups(&self, project_id: &str) -> Vec<BackupManifest> {
        match self.try_list(project_id).await {
            Ok(manifests) => manifests,
            Err(e) => {
                tracing::warn!(project_id = %project_id, error = %e, "Listing backups failed");
                Vec::new()
            }
        }
    }

    /// Deletes a backup, returning whether it existed.
    pub async fn delete_backup(&self, backup_id: &str) -> bool {
        let id = match BackupId::parse(backup_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(backup_id = %backup_id, error = %e, "Refusing to delete");
                return false;
            }
        };
        match self.io(self.backend.remove(&id.path())).await {
            Ok(existed) => existed,
            Err(e) => {
                tracing::warn!(backup_id = %backup_id, error = %e, "Backup delete failed");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn io<T>(
        &self,
        fut: impl Future<Output = Result<T, BackupError>>,
    ) -> Result<T, BackupError> {
        tokio::time::timeout(self.io_timeout, fut)
            .await
            .map_err(|_| BackupError::Timeout {
                seconds: self.io_timeout.as_secs(),
            })?
    }

    /// Millisecond timestamp strictly greater than any previously issued.
    fn next_timestamp(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let mut last = self.last_timestamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.last_timestamp.compare_exchange(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    fn new_id(&self, project_id: &str) -> Result<BackupId, BackupError> {
        let id = BackupId {
            project_id: project_id.to_string(),
            timestamp_millis: self.next_timestamp(),
            suffix: random_suffix(),
        };
        // Round-trip through the parser so unusable project ids are rejected
        // before anything is written.
        BackupId::parse(&id.to_string())
    }

    async fn try_create(&self, state: &ResearchState) -> Result<BackupManifest, BackupError> {
        let id = self.new_id(&state.project_id)?;
        let payload = serde_json::to_vec(&BackupPayload::from(state))?;
        let checksum = compute_checksum(&payload);

        let mut bytes = Vec::with_capacity(CHECKSUM_LEN + payload.len());
        bytes.extend_from_slice(checksum.as_bytes());
        bytes.extend_from_slice(&payload);

        self.io(self.backend.write(&id.path(), &bytes)).await?;

        Ok(BackupManifest {
            backup_id: id.to_string(),
            project_id: id.project_id.clone(),
            created_at: id.created_at(),
            size_bytes: bytes.len() as u64,
            checksum,
        })
    }

    async fn try_restore(&self, backup_id: &str) -> Result<ResearchState, BackupError> {
        let id = BackupId::parse(backup_id)?;
        let bytes = self.io(self.backend.read(&id.path())).await?;
        if bytes.len() < CHECKSUM_LEN {
            return Err(BackupError::Truncated(backup_id.to_string()));
        }

        let (stored, payload) = bytes.split_at(CHECKSUM_LEN);
        let actual = compute_checksum(payload);
        if !constant_time_eq(stored, actual.as_bytes()) {
            return Err(BackupError::IntegrityMismatch(backup_id.to_string()));
        }

        let payload: BackupPayload = serde_json::from_slice(payload)?;
        if payload.project_id != id.project_id {
            return Err(BackupError::IntegrityMismatch(backup_id.to_string()));
        }
        Ok(payload.into_state(backup_id))
    }

    async fn try_list(&self, project_id: &str) -> Result<Vec<BackupManifest>, BackupError> {
        let names = self.io(self.backend.list(project_id)).await?;

        let mut manifests = Vec::new();
        for name in names {
            let id = match BackupId::parse(&name) {
                Ok(id) if id.project_id == project_id => id,
                _ => continue,
            };
            let bytes = match self.io(self.backend.read(&id.path())).await {
                Ok(bytes) => bytes,
                Err(BackupError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let checksum = bytes
                .get(..CHECKSUM_LEN)
                .map(|c| String::from_utf8_lossy(c).into_owned())
                .unwrap_or_default();
            manifests.push(BackupManifest {
                backup_id: name,
                project_id: id.project_id.clone(),
                created_at: id.created_at(),
                size_bytes: bytes.len() as u64,
                checksum,
            });
        }

        manifests.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.backup_id.cmp(&a.backup_id))
        });
        Ok(manifests)
    }

    async fn rotate(&self, project_id: &str) {
        let manifests = self.list_backups(project_id).await;
        for stale in manifests.iter().skip(self.max_backups) {
            if self.delete_backup(&stale.backup_id).await {
                tracing::debug!(
                    project_id = %project_id,
                    backup_id = %stale.backup_id,
                    "Rotated out old backup"
                );
            }
        }
    }
}
