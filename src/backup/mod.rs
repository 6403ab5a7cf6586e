//! Checkpoint persistence and crash recovery.
//!
//! - [`BackupManager`]: checksummed, rotated backups of research state
//! - [`PersistenceBackend`]: where the bytes go ([`FsBackend`], [`MemoryBackend`])
//! - [`BackupScheduler`]: interval trigger
//!
//! ```ignore
//! use std::sync::Arc;
//! use research_forge::backup::{BackupManager, FsBackend};
//!
//! let manager = BackupManager::new(Arc::new(FsBackend::new("./backups")), 5);
//! if let Some(manifest) = manager.create_backup_from(&state).await {
//!     let restored = manager.restore_backup(&manifest.backup_id).await;
//! }
//! ```

pub mod manager;
pub mod scheduler;
pub mod storage;

pub use manager::{
    BackupId, BackupManager, BackupManifest, BackupPayload, StateSource, TrackedStates,
    DEFAULT_MAX_BACKUPS,
};
pub use scheduler::BackupScheduler;
pub use storage::{FsBackend, MemoryBackend, PersistenceBackend};
