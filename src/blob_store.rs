//! Write-once storage for generated images.
//!
//! Files are named `image_<unix-millis>_<seq>.<ext>`, where `seq` is a
//! process-wide counter, and opened with create-new semantics: an existing
//! file is never overwritten, and nothing here deletes. The backing
//! directory is created on the first write.

use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create image directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("image file already exists: {0}")]
    Collision(PathBuf),
    #[error("failed to write image {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A blob that has been written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Filename stem, also used as the descriptor id.
    pub id: String,
    pub filename: String,
    pub path: PathBuf,
    /// Root-relative retrieval path, e.g. `/images/image_1700000000000_0.webp`.
    pub url_path: String,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
    url_prefix: String,
    extension: String,
}

impl BlobStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        url_prefix: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Persist `bytes` under a fresh filename.
    pub async fn put(&self, bytes: &[u8]) -> Result<StoredBlob, StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let id = next_id();
        let filename = format!("{}.{}", id, self.extension);
        let path = self.write_new(&filename, bytes).await?;

        Ok(StoredBlob {
            url_path: format!("{}/{}", self.url_prefix, filename),
            id,
            filename,
            path,
        })
    }

    /// Create `filename` in the store directory and write `bytes` to it.
    /// Fails with [`StoreError::Collision`] if the file already exists.
    async fn write_new(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.dir.join(filename);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| match source.kind() {
                ErrorKind::AlreadyExists => StoreError::Collision(path.clone()),
                _ => StoreError::Write {
                    path: path.clone(),
                    source,
                },
            })?;

        let write = async {
            file.write_all(bytes).await?;
            file.flush().await
        };
        write.await.map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

fn next_id() -> String {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("image_{}_{}", Utc::now().timestamp_millis(), seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_directory_lazily_and_writes_bytes() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("public").join("images");
        let store = BlobStore::new(&dir, "/images", "webp");
        assert!(!dir.exists());

        let blob = store.put(b"image-bytes").await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(std::fs::read(&blob.path).unwrap(), b"image-bytes");
        assert!(blob.filename.starts_with("image_"));
        assert!(blob.filename.ends_with(".webp"));
        assert_eq!(blob.url_path, format!("/images/{}", blob.filename));
        assert_eq!(blob.filename, format!("{}.webp", blob.id));
    }

    #[tokio::test]
    async fn consecutive_writes_get_distinct_files() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path(), "/images/", "png");
        let a = store.put(b"a").await.unwrap();
        let b = store.put(b"b").await.unwrap();
        assert_ne!(a.path, b.path);
        assert_eq!(std::fs::read(&a.path).unwrap(), b"a");
        assert_eq!(std::fs::read(&b.path).unwrap(), b"b");
        assert!(a.url_path.starts_with("/images/image_"));
    }

    #[tokio::test]
    async fn existing_file_is_never_overwritten() {
        let tmp = TempDir::new().unwrap();
        let store = BlobStore::new(tmp.path(), "/images", "webp");
        let existing = tmp.path().join("image_1_0.webp");
        std::fs::write(&existing, b"original").unwrap();

        let err = store.write_new("image_1_0.webp", b"replacement").await.unwrap_err();
        assert!(matches!(err, StoreError::Collision(ref p) if *p == existing));
        assert_eq!(std::fs::read(&existing).unwrap(), b"original");
    }

    #[tokio::test]
    async fn directory_that_is_a_file_fails_to_store() {
        let tmp = TempDir::new().unwrap();
        let not_a_dir = tmp.path().join("images");
        std::fs::write(&not_a_dir, b"file").unwrap();

        let err = BlobStore::new(&not_a_dir, "/images", "webp")
            .put(b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CreateDir { .. }));
    }

    #[test]
    fn ids_are_unique_within_a_millisecond() {
        let ids: std::collections::HashSet<String> = (0..100).map(|_| next_id()).collect();
        assert_eq!(ids.len(), 100);
    }
}
