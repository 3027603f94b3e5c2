//! Generation client for the upstream image service.
//!
//! Defines the [`ImageProvider`] trait and its implementations:
//! - **[`StabilityProvider`]**: posts the prompt to a Stability-style
//!   `stable-image/generate` endpoint and returns the raw image bytes.
//! - **[`DisabledProvider`]**: always fails; used when `provider.kind = "disabled"`.
//!
//! One call to [`ImageProvider::generate`] is exactly one outbound request.
//! There is no retry and no timeout beyond the transport default; failures
//! carry the upstream status and whatever diagnostic body the service sent.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::models::Prompt;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("upstream returned {status}")]
    Upstream {
        status: u16,
        /// Upstream error body, decoded as JSON when possible.
        details: serde_json::Value,
    },
    #[error("request to upstream failed: {0}")]
    Transport(String),
    #[error("image provider is disabled")]
    Disabled,
}

impl ProviderError {
    /// Diagnostic payload to hand back to API callers.
    pub fn details(&self) -> serde_json::Value {
        match self {
            ProviderError::Upstream { details, .. } => details.clone(),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

/// Turns a prompt into encoded image bytes.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Short identifier used in logs (e.g. `"stability"`).
    fn name(&self) -> &str;

    /// Perform one generation request.
    async fn generate(&self, prompt: &Prompt) -> Result<Vec<u8>, ProviderError>;
}

// ============ Stability Provider ============

/// Provider for Stability AI's v2beta stable-image endpoints.
///
/// Sends a multipart form with `prompt` and `output_format`, authenticated
/// with `Authorization: Bearer <key>` and `Accept: image/*`.
pub struct StabilityProvider {
    client: reqwest::Client,
    endpoint: String,
    output_format: String,
    api_key: String,
}

impl StabilityProvider {
    pub fn new(
        endpoint: impl Into<String>,
        output_format: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            output_format: output_format.into(),
            api_key: api_key.into(),
        }
    }

    pub fn output_format(&self) -> &str {
        &self.output_format
    }
}

#[async_trait]
impl ImageProvider for StabilityProvider {
    fn name(&self) -> &str {
        "stability"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Vec<u8>, ProviderError> {
        let form = reqwest::multipart::Form::new()
            .text("prompt", prompt.as_str().to_string())
            .text("output_format", self.output_format.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "image/*")
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                details: decode_error_body(&body),
            });
        }

        Ok(body.to_vec())
    }
}

/// Upstream errors are usually JSON; anything else is kept as text.
fn decode_error_body(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).into_owned()))
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl ImageProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &Prompt) -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

/// Build the provider selected by `config.kind`.
///
/// # Errors
///
/// Fails when the `stability` provider has no resolved credential.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn ImageProvider>> {
    match config.kind.as_str() {
        "stability" => {
            let Some(api_key) = config.api_key.clone() else {
                bail!("{} environment variable not set", config.api_key_env);
            };
            Ok(Arc::new(StabilityProvider::new(
                config.endpoint.clone(),
                config.output_format.clone(),
                api_key,
            )))
        }
        "disabled" => Ok(Arc::new(DisabledProvider)),
        other => bail!("Unknown provider kind: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderMap, StatusCode},
        routing::post,
        Router,
    };

    async fn spawn_upstream(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/generate", addr)
    }

    async fn echo_ok(headers: HeaderMap, body: String) -> (StatusCode, Vec<u8>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let accept = headers
            .get("accept")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != "Bearer sk-test" || accept != "image/*" {
            return (StatusCode::UNAUTHORIZED, b"{\"name\":\"unauthorized\"}".to_vec());
        }
        if !body.contains("name=\"prompt\"")
            || !body.contains("a red fox")
            || !body.contains("name=\"output_format\"")
            || !body.contains("webp")
        {
            return (StatusCode::BAD_REQUEST, b"missing fields".to_vec());
        }
        (StatusCode::OK, b"RIFF\x00\x00\x00\x00WEBPVP8 ".to_vec())
    }

    #[tokio::test]
    async fn returns_bytes_on_success() {
        let url = spawn_upstream(Router::new().route("/generate", post(echo_ok))).await;
        let provider = StabilityProvider::new(url, "webp", "sk-test");
        let bytes = provider
            .generate(&Prompt::new("a red fox").unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, b"RIFF\x00\x00\x00\x00WEBPVP8 ".to_vec());
    }

    #[tokio::test]
    async fn json_error_body_is_carried_as_details() {
        let url = spawn_upstream(Router::new().route(
            "/generate",
            post(|| async {
                (
                    StatusCode::FORBIDDEN,
                    r#"{"name":"content_moderation","errors":["flagged"]}"#,
                )
            }),
        ))
        .await;
        let provider = StabilityProvider::new(url, "webp", "sk-test");
        let err = provider
            .generate(&Prompt::new("anything").unwrap())
            .await
            .unwrap_err();
        match err {
            ProviderError::Upstream { status, details } => {
                assert_eq!(status, 403);
                assert_eq!(details["name"], "content_moderation");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_json_error_body_is_kept_as_text() {
        let url = spawn_upstream(Router::new().route(
            "/generate",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        ))
        .await;
        let provider = StabilityProvider::new(url, "webp", "sk-test");
        let err = provider
            .generate(&Prompt::new("anything").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.details(), serde_json::json!("upstream down"));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_transport_error() {
        let provider = StabilityProvider::new("http://127.0.0.1:1/generate", "webp", "sk-test");
        let err = provider
            .generate(&Prompt::new("anything").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }

    #[test]
    fn stability_requires_credential() {
        let config = ProviderConfig::default();
        assert!(create_provider(&config).is_err());

        let config = ProviderConfig {
            api_key: Some("sk".to_string()),
            ..ProviderConfig::default()
        };
        assert_eq!(create_provider(&config).unwrap().name(), "stability");
    }

    #[tokio::test]
    async fn disabled_provider_always_fails() {
        let config = ProviderConfig {
            kind: "disabled".to_string(),
            ..ProviderConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        let err = provider
            .generate(&Prompt::new("x").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Disabled));
    }
}
