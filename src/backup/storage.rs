//! Byte-oriented persistence backends for backups.
//!
//! Paths are relative, `/`-separated keys such as `project/backup_id`.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;

use crate::error::BackupError;

/// Storage the backup manager writes through.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Writes `bytes` at `path`, replacing any previous content.
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), BackupError>;

    /// Reads the bytes at `path`; `BackupError::NotFound` if absent.
    async fn read(&self, path: &str) -> Result<Vec<u8>, BackupError>;

    /// Names of the entries directly under `dir`; empty if `dir` is absent.
    async fn list(&self, dir: &str) -> Result<Vec<String>, BackupError>;

    /// Removes `path`, returning whether it existed.
    async fn remove(&self, path: &str) -> Result<bool, BackupError>;
}

/// Rejects absolute paths and any `..`/root components.
fn validate_key(path: &str) -> Result<(), BackupError> {
    if path.is_empty() || path.contains('\\') {
        return Err(BackupError::InvalidId(path.to_string()));
    }
    let ok = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(BackupError::InvalidId(path.to_string()))
    }
}

// ============================================================================
// Filesystem
// ============================================================================

/// Stores backups as files under a root directory, one directory per
/// project.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BackupError> {
        validate_key(path)?;
        Ok(self.root.join(path))
    }
}

/// Sibling temp file unique to `target`, even when its name contains dots.
fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

#[async_trait]
impl PersistenceBackend for FsBackend {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), BackupError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never see a partial file.
        let tmp = temp_path(&target);
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, BackupError> {
        let target = self.resolve(path)?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BackupError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, BackupError> {
        let target = self.resolve(dir)?;
        let mut entries = match fs::read_dir(&target).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(".tmp") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn remove(&self, path: &str) -> Result<bool, BackupError> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Keeps backups in memory. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.files().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files().is_empty()
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), BackupError> {
        validate_key(path)?;
        self.files().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, BackupError> {
        validate_key(path)?;
        self.files()
            .get(path)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(path.to_string()))
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, BackupError> {
        validate_key(dir)?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(self
            .files()
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn remove(&self, path: &str) -> Result<bool, BackupError> {
        validate_key(path)?;
        Ok(self.files().remove(path).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn exercise(backend: &dyn PersistenceBackend) {
        backend.write("proj/a", b"one").await.expect("write a");
        backend.write("proj/b", b"two").await.expect("write b");
        backend.write("other/c", b"three").await.expect("write c");

        assert_eq!(backend.read("proj/a").await.expect("read"), b"one");
        assert_eq!(
            backend.list("proj").await.expect("list"),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(backend.list("missing").await.expect("list").is_empty());

        backend.write("proj/a", b"uno").await.expect("overwrite");
        assert_eq!(backend.read("proj/a").await.expect("read"), b"uno");

        assert!(backend.remove("proj/a").await.expect("remove"));
        assert!(!backend.remove("proj/a").await.expect("remove again"));
        assert!(matches!(
            backend.read("proj/a").await,
            Err(BackupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = MemoryBackend::new();
        exercise(&backend).await;
        assert_eq!(backend.len(), 2);
    }

    #[tokio::test]
    async fn test_fs_backend() {
        let dir = TempDir::new().expect("tempdir");
        let backend = FsBackend::new(dir.path());
        exercise(&backend).await;
        assert!(dir.path().join("proj").join("b").exists());
    }

    #[test]
    fn test_temp_path_keeps_dotted_names_apart() {
        let a = temp_path(Path::new("/b/acme.io/acme.io_00lq8x3k2_abc123"));
        let b = temp_path(Path::new("/b/acme.io/acme.io_00lq8x3k3_def456"));
        assert_eq!(a, Path::new("/b/acme.io/acme.io_00lq8x3k2_abc123.tmp"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_fs_backend_concurrent_writes_with_dotted_project() {
        let dir = TempDir::new().expect("tempdir");
        let backend = FsBackend::new(dir.path());
        let (first, second) = tokio::join!(
            backend.write("acme.io/acme.io_1", b"one"),
            backend.write("acme.io/acme.io_2", b"two"),
        );
        first.expect("first write");
        second.expect("second write");

        assert_eq!(backend.read("acme.io/acme.io_1").await.expect("read"), b"one");
        assert_eq!(backend.read("acme.io/acme.io_2").await.expect("read"), b"two");
        assert_eq!(
            backend.list("acme.io").await.expect("list"),
            vec!["acme.io_1".to_string(), "acme.io_2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let backend = MemoryBackend::new();
        for key in ["../escape", "/abs", "a/../b", "a\\b", ""] {
            assert!(
                matches!(
                    backend.write(key, b"x").await,
                    Err(BackupError::InvalidId(_))
                ),
                "key {:?}",
                key
            );
        }
    }
}
