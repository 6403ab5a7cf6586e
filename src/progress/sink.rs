//! Progress notification sinks.
//!
//! Sinks are fire-and-forget: they must never block the orchestrator loop or
//! report errors back to it.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use crate::research::ProgressDetail;

/// Receives progress notifications for research projects.
pub trait ProgressSink: Send + Sync {
    fn update(&self, project_id: &str, detail: &ProgressDetail);
}

/// Emits progress as structured `tracing` events.
#[derive(Debug, Clone, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn update(&self, project_id: &str, detail: &ProgressDetail) {
        tracing::info!(
            project_id = %project_id,
            stage = %detail.stage,
            step = %detail.step,
            completed = detail.completed_items,
            total = detail.total_items,
            current = detail.current_item.as_deref().unwrap_or(""),
            "Progress update"
        );
    }
}

/// A progress notification sent through [`ChannelProgressSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub project_id: String,
    pub detail: ProgressDetail,
}

/// Forwards progress to a bounded channel, typically drained by a UI.
///
/// Events are dropped when the channel is full or closed.
#[derive(Debug)]
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
    dropped: AtomicUsize,
}

impl ChannelProgressSink {
    /// Creates a sink and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self {
            tx,
            dropped: AtomicUsize::new(0),
        }
    }

    /// Events dropped because the channel was full or closed.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn update(&self, project_id: &str, detail: &ProgressDetail) {
        let event = ProgressEvent {
            project_id: project_id.to_string(),
            detail: detail.clone(),
        };
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
