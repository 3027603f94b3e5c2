//! Generation endpoint logic, independent of HTTP.
//!
//! [`ImageService::generate`] validates the prompt, calls the provider,
//! stores the bytes, and returns the descriptor. The axum handler in
//! [`crate::server`] is a thin wrapper around it, and the CLI uses it
//! directly for `pgen batch --local`.

use chrono::Utc;
use std::sync::Arc;

use crate::blob_store::{BlobStore, StoreError};
use crate::models::{GeneratedImage, OriginKind, Prompt};
use crate::provider::{ImageProvider, ProviderError};

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Prompt is required")]
    InvalidInput,
    #[error("Failed to generate image: {0}")]
    Upstream(#[from] ProviderError),
    #[error("Failed to store image: {0}")]
    Storage(#[from] StoreError),
}

/// How a stored image is addressed in the returned descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLocation {
    /// Root-relative URL path, e.g. `/images/image_1_0.webp`.
    UrlPath,
    /// URL path joined onto an absolute base.
    PublicUrl(String),
    /// Filesystem path of the stored file, for in-process use.
    FilePath,
}

#[derive(Clone)]
pub struct ImageService {
    provider: Arc<dyn ImageProvider>,
    store: BlobStore,
    location: ImageLocation,
}

impl ImageService {
    pub fn new(provider: Arc<dyn ImageProvider>, store: BlobStore) -> Self {
        Self {
            provider,
            store,
            location: ImageLocation::UrlPath,
        }
    }

    /// Prefix returned image URLs with an absolute base such as
    /// `http://localhost:5001`. `None` keeps root-relative paths.
    pub fn with_public_url(mut self, public_url: Option<String>) -> Self {
        self.location = match public_url {
            Some(base) => ImageLocation::PublicUrl(base.trim_end_matches('/').to_string()),
            None => ImageLocation::UrlPath,
        };
        self
    }

    pub fn with_location(mut self, location: ImageLocation) -> Self {
        self.location = location;
        self
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    /// Generate and persist one image.
    ///
    /// An empty or whitespace-only prompt fails with
    /// [`GenerateError::InvalidInput`] before any network call or disk write.
    pub async fn generate(&self, prompt: &str) -> Result<GeneratedImage, GenerateError> {
        let prompt = Prompt::new(prompt).ok_or(GenerateError::InvalidInput)?;

        tracing::info!(provider = self.provider.name(), prompt = %prompt, "generating image");
        let bytes = self.provider.generate(&prompt).await.map_err(|e| {
            tracing::error!(error = %e, details = %e.details(), "image generation failed");
            e
        })?;

        let blob = self.store.put(&bytes).await?;
        let image_url = match &self.location {
            ImageLocation::UrlPath => blob.url_path.clone(),
            ImageLocation::PublicUrl(base) => format!("{}{}", base, blob.url_path),
            ImageLocation::FilePath => blob.path.display().to_string(),
        };
        tracing::info!(url = %image_url, bytes = bytes.len(), "image generated");

        Ok(GeneratedImage {
            id: blob.id,
            prompt,
            image_url,
            origin: OriginKind::Fresh,
            similarity: None,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Provider stub returning fixed bytes and counting calls.
    pub(crate) struct FixedProvider {
        pub bytes: Vec<u8>,
        pub calls: AtomicUsize,
    }

    impl FixedProvider {
        pub fn new(bytes: &[u8]) -> Self {
            Self {
                bytes: bytes.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ImageProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _prompt: &Prompt) -> Result<Vec<u8>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl ImageProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _prompt: &Prompt) -> Result<Vec<u8>, ProviderError> {
            Err(ProviderError::Upstream {
                status: 402,
                details: serde_json::json!({ "name": "payment_required" }),
            })
        }
    }

    #[tokio::test]
    async fn stored_image_holds_provider_bytes() {
        let tmp = TempDir::new().unwrap();
        let provider = Arc::new(FixedProvider::new(b"\x89PNG fixed"));
        let service = ImageService::new(
            provider.clone(),
            BlobStore::new(tmp.path(), "/images", "webp"),
        );

        let image = service.generate("  a lighthouse at dusk ").await.unwrap();
        assert_eq!(image.prompt.as_str(), "a lighthouse at dusk");
        assert_eq!(image.origin, OriginKind::Fresh);
        assert!(image.similarity.is_none());

        let filename = image.image_url.strip_prefix("/images/").unwrap();
        let stored = std::fs::read(tmp.path().join(filename)).unwrap();
        assert_eq!(stored, b"\x89PNG fixed");
        assert_eq!(format!("{}.webp", image.id), filename);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_prompt_makes_no_call_and_no_write() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("images");
        let provider = Arc::new(FixedProvider::new(b"x"));
        let service = ImageService::new(provider.clone(), BlobStore::new(&dir, "/images", "webp"));

        for prompt in ["", "   ", "\n\t"] {
            let err = service.generate(prompt).await.unwrap_err();
            assert!(matches!(err, GenerateError::InvalidInput));
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn upstream_failure_propagates_without_writing() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("images");
        let service =
            ImageService::new(Arc::new(FailingProvider), BlobStore::new(&dir, "/images", "webp"));

        let err = service.generate("a cat").await.unwrap_err();
        match err {
            GenerateError::Upstream(e) => assert_eq!(e.details()["name"], "payment_required"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn public_url_prefixes_image_url() {
        let tmp = TempDir::new().unwrap();
        let service = ImageService::new(
            Arc::new(FixedProvider::new(b"x")),
            BlobStore::new(tmp.path(), "/images", "webp"),
        )
        .with_public_url(Some("http://localhost:5001/".to_string()));

        let image = service.generate("a cat").await.unwrap();
        assert!(image
            .image_url
            .starts_with("http://localhost:5001/images/image_"));
    }

    #[tokio::test]
    async fn file_path_location_points_at_stored_bytes() {
        let tmp = TempDir::new().unwrap();
        let service = ImageService::new(
            Arc::new(FixedProvider::new(b"on-disk")),
            BlobStore::new(tmp.path(), "/images", "webp"),
        )
        .with_location(ImageLocation::FilePath);

        let image = service.generate("a cat").await.unwrap();
        assert_eq!(std::fs::read(&image.image_url).unwrap(), b"on-disk");
    }
}
