use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};

/// Object storage for workout photos.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the bytes at `path` and returns a locator that can fetch them.
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    async fn delete(&self, path: &str) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) async fn contains(&self, path: &str) -> bool {
        self.objects.lock().await.contains_key(path)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Remote("Blob store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        self.check_available()?;
        self.objects.lock().await.insert(path.to_string(), bytes);
        Ok(format!("memory://{}", path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_available()?;
        match self.objects.lock().await.remove(path) {
            Some(_) => Ok(()),
            None => Err(AppError::Remote(format!("Object not found: {}", path))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_delete() {
        let blobs = MemoryBlobStore::new();
        let url = blobs
            .put("users/u1/images/a.jpg", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();
        assert_eq!(url, "memory://users/u1/images/a.jpg");
        assert!(blobs.contains("users/u1/images/a.jpg").await);

        blobs.delete("users/u1/images/a.jpg").await.unwrap();
        assert!(blobs.is_empty().await);
        assert!(blobs.delete("users/u1/images/a.jpg").await.is_err());
    }
}
