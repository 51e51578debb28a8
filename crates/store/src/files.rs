//! File stores for uploaded documents.
//!
//! New uploads land under `pending/`; once analysis assigns a category the
//! pipeline relocates the file under that category's folder.
//!
//! Storage location: `~/.carebridge/files/<folder>/<uuid>-<name>`

use async_trait::async_trait;
use carebridge_core::error::FileStoreError;
use carebridge_core::files::{FileStore, reference_file_name, sanitize_file_name};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const PENDING_FOLDER: &str = "pending";

fn new_reference(file_name: &str) -> String {
    format!(
        "{PENDING_FOLDER}/{}-{}",
        Uuid::new_v4().simple(),
        sanitize_file_name(file_name)
    )
}

/// A file store rooted at a local directory.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a reference to a path under the root, rejecting escapes.
    fn resolve(&self, reference: &str) -> Result<PathBuf, FileStoreError> {
        let relative = Path::new(reference);
        let safe = !reference.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(FileStoreError::NotFound(reference.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn ensure_parent(path: &Path) -> Result<(), FileStoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        Ok(())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> FileStoreError {
    FileStoreError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn not_found_or_io(reference: &str, path: &Path, e: std::io::Error) -> FileStoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        FileStoreError::NotFound(reference.to_string())
    } else {
        io_error(path, e)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<String, FileStoreError> {
        let reference = new_reference(file_name);
        let path = self.resolve(&reference)?;
        Self::ensure_parent(&path).await?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_error(&path, e))?;
        debug!(reference = %reference, size = bytes.len(), "Saved upload");
        Ok(reference)
    }

    async fn read(&self, reference: &str) -> Result<Vec<u8>, FileStoreError> {
        let path = self.resolve(reference)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(reference, &path, e))
    }

    async fn relocate(&self, reference: &str, folder: &str) -> Result<String, FileStoreError> {
        let from = self.resolve(reference)?;
        let target = format!("{folder}/{}", reference_file_name(reference));
        if target == reference {
            return Ok(target);
        }
        let to = self.resolve(&target)?;
        Self::ensure_parent(&to).await?;
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| not_found_or_io(reference, &from, e))?;
        debug!(from = %reference, to = %target, "Relocated upload");
        Ok(target)
    }

    async fn delete(&self, reference: &str) -> Result<(), FileStoreError> {
        let path = self.resolve(reference)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(reference, &path, e))
    }
}

/// A file store that keeps bytes in memory. Useful for testing.
#[derive(Default)]
pub struct InMemoryFileStore {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored references, sorted.
    pub async fn references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.files.read().await.keys().cloned().collect();
        refs.sort();
        refs
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<String, FileStoreError> {
        let reference = new_reference(file_name);
        self.files
            .write()
            .await
            .insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }

    async fn read(&self, reference: &str) -> Result<Vec<u8>, FileStoreError> {
        self.files
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| FileStoreError::NotFound(reference.to_string()))
    }

    async fn relocate(&self, reference: &str, folder: &str) -> Result<String, FileStoreError> {
        let mut files = self.files.write().await;
        let bytes = files
            .remove(reference)
            .ok_or_else(|| FileStoreError::NotFound(reference.to_string()))?;
        let target = format!("{folder}/{}", reference_file_name(reference));
        files.insert(target.clone(), bytes);
        Ok(target)
    }

    async fn delete(&self, reference: &str) -> Result<(), FileStoreError> {
        self.files
            .write()
            .await
            .remove(reference)
            .map(|_| ())
            .ok_or_else(|| FileStoreError::NotFound(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_save_read_relocate_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());

        let reference = store.save("blood test.pdf", b"%PDF").await.unwrap();
        assert!(reference.starts_with("pending/"));
        assert!(reference.ends_with("-blood_test.pdf"));
        assert_eq!(store.read(&reference).await.unwrap(), b"%PDF");

        let moved = store
            .relocate(&reference, "investigations_reports")
            .await
            .unwrap();
        assert!(moved.starts_with("investigations_reports/"));
        assert!(dir.path().join(&moved).exists());
        assert!(matches!(
            store.read(&reference).await,
            Err(FileStoreError::NotFound(_))
        ));

        store.delete(&moved).await.unwrap();
        assert!(!dir.path().join(&moved).exists());
    }

    #[tokio::test]
    async fn local_rejects_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        assert!(store.read("../secret").await.is_err());
        assert!(store.read("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn in_memory_relocate_moves_bytes() {
        let store = InMemoryFileStore::new();
        let reference = store.save("scan.png", b"png").await.unwrap();
        let moved = store.relocate(&reference, "others").await.unwrap();
        assert_eq!(store.references().await, vec![moved.clone()]);
        assert_eq!(store.read(&moved).await.unwrap(), b"png");
        assert!(store.delete(&reference).await.is_err());
    }
}
