//! Sequential batch generation.
//!
//! [`run_batch`] submits prompts to an [`ImageGenerator`] strictly in order,
//! one request in flight at a time: request `i + 1` is only sent after the
//! result of request `i` is observed. The first failure stops the batch.
//! Descriptors produced before the failure stay in the [`BatchOutcome`] so
//! the caller can keep showing them, while the outcome itself reports
//! failure.

use anyhow::Result;
use async_trait::async_trait;

use crate::generate::ImageService;
use crate::models::{GeneratedImage, Prompt};
use crate::progress::{BatchProgressEvent, BatchProgressReporter};

/// Anything that turns one prompt into one stored image: the in-process
/// [`ImageService`] or the HTTP [`crate::client::EndpointClient`].
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &Prompt) -> Result<GeneratedImage>;
}

#[async_trait]
impl ImageGenerator for ImageService {
    async fn generate_image(&self, prompt: &Prompt) -> Result<GeneratedImage> {
        Ok(self.generate(prompt.as_str()).await?)
    }
}

/// The prompt that stopped a batch.
#[derive(Debug, thiserror::Error)]
#[error("Failed to generate image for: {prompt} ({error})")]
pub struct BatchFailure {
    /// Zero-based position in the prompt list.
    pub index: usize,
    pub prompt: Prompt,
    pub error: anyhow::Error,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub total: usize,
    /// Descriptors in prompt order, up to (not including) the failed prompt.
    pub images: Vec<GeneratedImage>,
    pub failure: Option<BatchFailure>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    /// Prompts never submitted because of an earlier failure.
    pub fn skipped(&self) -> usize {
        match &self.failure {
            Some(f) => self.total - f.index - 1,
            None => 0,
        }
    }
}

/// Run `prompts` through `generator` one at a time.
pub async fn run_batch(
    generator: &dyn ImageGenerator,
    prompts: &[Prompt],
    progress: &dyn BatchProgressReporter,
) -> BatchOutcome {
    let total = prompts.len();
    let mut images = Vec::with_capacity(total);
    progress.report(BatchProgressEvent::Started { total });

    for (index, prompt) in prompts.iter().enumerate() {
        progress.report(BatchProgressEvent::Generating {
            index,
            total,
            prompt: prompt.to_string(),
        });

        match generator.generate_image(prompt).await {
            Ok(image) => {
                images.push(image);
                progress.report(BatchProgressEvent::Generated { index, total });
            }
            Err(error) => {
                tracing::error!(index, prompt = %prompt, error = %error, "batch aborted");
                progress.report(BatchProgressEvent::Failed { index, total });
                return BatchOutcome {
                    total,
                    images,
                    failure: Some(BatchFailure {
                        index,
                        prompt: prompt.clone(),
                        error,
                    }),
                };
            }
        }
    }

    BatchOutcome {
        total,
        images,
        failure: None,
    }
}
