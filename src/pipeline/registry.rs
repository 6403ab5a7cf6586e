//! Single-writer enforcement across orchestrator loops.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Tracks which projects currently have a running loop.
///
/// Clones share the same set, so one registry can be handed to several
/// orchestrators.
#[derive(Debug, Clone, Default)]
pub struct ProjectRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims `project_id`; `None` if another loop already holds it.
    pub fn try_acquire(&self, project_id: &str) -> Option<ProjectLease> {
        if self.active().insert(project_id.to_string()) {
            Some(ProjectLease {
                project_id: project_id.to_string(),
                registry: self.clone(),
            })
        } else {
            None
        }
    }

    pub fn is_active(&self, project_id: &str) -> bool {
        self.active().contains(project_id)
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }
}

/// Exclusive claim on a project, released on drop.
#[derive(Debug)]
pub struct ProjectLease {
    project_id: String,
    registry: ProjectRegistry,
}

impl ProjectLease {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

impl Drop for ProjectLease {
    fn drop(&mut self) {
        self.registry.active().remove(&self.project_id);
    }
}
