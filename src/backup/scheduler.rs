//! Interval backup trigger.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::manager::BackupManager;

/// A background task that backs up one project every `interval`.
///
/// The state comes from the manager's state source, so the owning loop must
/// keep it current with [`BackupManager::track`]. Call
/// [`BackupScheduler::stop`] to cancel.
pub struct BackupScheduler {
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
    created: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl BackupScheduler {
    /// Start backing up `project_id` every `interval`.
    ///
    /// # Arguments
    ///
    /// * `manager` - Manager that performs the backups
    /// * `project_id` - Project to back up
    /// * `interval` - Time between backups; the first fires after one interval
    pub fn start(
        manager: Arc<BackupManager>,
        project_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let created = Arc::new(AtomicUsize::new(0));
        let wake = Arc::new(Notify::new());
        let flag = stop_flag.clone();
        let wakeup = wake.clone();
        let counter = created.clone();
        let project_id = project_id.into();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = wakeup.notified() => break,
                }
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                if manager.create_backup(&project_id).await.is_some() {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            }
            tracing::debug!(project_id = %project_id, "Backup scheduler stopped");
        });

        Self {
            stop_flag,
            wake,
            created,
            handle: Some(handle),
        }
    }

    /// Backups created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Signal the scheduler to stop and wait for it to finish.
    ///
    /// A backup already in flight completes first.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.wake.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.wake.notify_one();
    }
}
