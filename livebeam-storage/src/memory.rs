// In-memory backend for tests
//
// Stores blocks under their content id and can be told to fail the next N
// publishes, which the watcher tests use to exercise failure isolation.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, StorageError};
use crate::node::content_id;
use crate::HlsStorage;

#[derive(Default)]
pub struct MemoryStorage {
    blocks: Mutex<HashMap<String, Bytes>>,
    saved_files: Mutex<Vec<String>>,
    fail_next: AtomicUsize,
    save_count: AtomicUsize,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` `save_into_hls_directory` calls fail.
    pub fn fail_next_saves(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    #[must_use]
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Filenames published so far, in publish order.
    #[must_use]
    pub fn saved_files(&self) -> Vec<String> {
        self.saved_files.lock().clone()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Bytes> {
        let id = id.rsplit('/').next().unwrap_or(id);
        self.blocks.lock().get(id).cloned()
    }

    fn take_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl HlsStorage for MemoryStorage {
    async fn save_into_hls_directory(&self, file_path: &Path) -> Result<String> {
        if self.take_failure() {
            return Err(StorageError::Backend("injected publish failure".to_string()));
        }

        let data = Bytes::from(tokio::fs::read(file_path).await?);
        let id = content_id(&data);
        self.blocks.lock().insert(id.clone(), data);
        self.save_count.fetch_add(1, Ordering::SeqCst);
        if let Some(name) = file_path.file_name().and_then(|n| n.to_str()) {
            self.saved_files.lock().push(name.to_string());
        }
        Ok(format!("memory://{id}"))
    }

    async fn add_directory(&self, dir_path: &Path) -> Result<String> {
        let name = dir_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("dir");
        let id = content_id(name.as_bytes());
        self.blocks
            .lock()
            .insert(id.clone(), Bytes::from(name.to_string()));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_returns_content_ids() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stream0.ts");
        tokio::fs::write(&file, b"payload").await.unwrap();

        let storage = MemoryStorage::new();
        let id = storage.save_into_hls_directory(&file).await.unwrap();

        assert!(id.starts_with("memory://"));
        assert_eq!(storage.get(&id).unwrap().as_ref(), b"payload");
        assert_eq!(storage.save_count(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stream0.ts");
        tokio::fs::write(&file, b"payload").await.unwrap();

        let storage = MemoryStorage::new();
        storage.fail_next_saves(1);

        assert!(storage.save_into_hls_directory(&file).await.is_err());
        assert!(storage.save_into_hls_directory(&file).await.is_ok());
    }
}
