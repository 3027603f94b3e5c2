//! HTTP client for a running generation server.
//!
//! [`EndpointClient`] posts one prompt to `POST /api/generate-image` and
//! turns the reply into a [`GeneratedImage`] whose `image_url` is absolute,
//! so the archive packager can fetch it later without knowing the server.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::batch::ImageGenerator;
use crate::models::{GenerateImageRequest, GenerateImageResponse, GeneratedImage, OriginKind, Prompt};

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("server rejected prompt ({status}): {message}")]
    Rejected {
        status: u16,
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("could not reach generation server: {0}")]
    Transport(String),
    #[error("invalid response from generation server: {0}")]
    InvalidResponse(String),
}

/// Error body returned by the server on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct EndpointClient {
    client: reqwest::Client,
    base_url: String,
}

impl EndpointClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit one prompt and wait for the stored image's descriptor.
    pub async fn generate(&self, prompt: &Prompt) -> Result<GeneratedImage, EndpointError> {
        let request = GenerateImageRequest {
            prompt: Some(prompt.to_string()),
        };

        let response = self
            .client
            .post(format!("{}/api/generate-image", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| EndpointError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| EndpointError::Transport(e.to_string()))?;
            let (message, details) = match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) => (body.error, body.details),
                Err(_) => (text, None),
            };
            return Err(EndpointError::Rejected {
                status: status.as_u16(),
                message,
                details,
            });
        }

        let body: GenerateImageResponse = response
            .json()
            .await
            .map_err(|e| EndpointError::InvalidResponse(e.to_string()))?;

        let image_url = self.resolve(&body.image_url)?;
        Ok(GeneratedImage {
            id: id_from_url(&image_url),
            prompt: prompt.clone(),
            image_url,
            origin: body.source.unwrap_or(OriginKind::Fresh),
            similarity: body.similarity,
            created_at: Utc::now(),
        })
    }

    /// Join `image_url` onto the server base. Absolute URLs pass through.
    fn resolve(&self, image_url: &str) -> Result<String, EndpointError> {
        let base = reqwest::Url::parse(&format!("{}/", self.base_url))
            .map_err(|e| EndpointError::InvalidResponse(format!("bad server url: {}", e)))?;
        base.join(image_url)
            .map(String::from)
            .map_err(|e| EndpointError::InvalidResponse(format!("bad image url {}: {}", image_url, e)))
    }
}

/// The stored filename stem, or a timestamp when the URL has none.
fn id_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .and_then(|name| name.split('.').next())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Utc::now().timestamp_millis().to_string())
}

#[async_trait]
impl ImageGenerator for EndpointClient {
    async fn generate_image(&self, prompt: &Prompt) -> Result<GeneratedImage> {
        Ok(self.generate(prompt).await?)
    }
}
