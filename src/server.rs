//! HTTP server for image generation.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/generate-image` | Generate one image from `{ "prompt": "..." }` |
//! | `GET`  | `/images/{file}` | Stored images, served as static files |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": "Failed to generate image", "details": { "name": "content_moderation" } }
//! ```
//!
//! `400` for a missing prompt or a non-JSON body, `500` when the upstream
//! provider or the blob store fails.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted, including on the static
//! image route, so browser clients can re-fetch images for zip packaging.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::blob_store::BlobStore;
use crate::config::Config;
use crate::generate::{GenerateError, ImageService};
use crate::models::{GenerateImageRequest, GenerateImageResponse};
use crate::provider::create_provider;

/// Starts the generation server.
///
/// Binds to `[server].bind` (after the `PORT` override) and runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let provider = create_provider(&config.provider)?;
    let store = BlobStore::new(
        config.storage.image_dir.clone(),
        config.storage.url_prefix.clone(),
        config.provider.output_format.clone(),
    );
    let service = ImageService::new(provider, store).with_public_url(config.server.public_url.clone());

    let app = build_router(service);
    let bind_addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router for `service`. Images are served from the service's
/// blob store directory under its URL prefix.
pub fn build_router(service: ImageService) -> Router {
    let images = ServeDir::new(service.store().dir());
    let prefix = service.store().url_prefix().to_string();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/generate-image", post(handle_generate_image))
        .route("/health", get(handle_health))
        .nest_service(&prefix, images)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

// ============ Error response ============

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    error: String,
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({ "error": self.error, "details": details }),
            None => json!({ "error": self.error }),
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        error: message.into(),
        details: None,
    }
}

impl From<GenerateError> for ApiError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::InvalidInput => bad_request("Prompt is required"),
            GenerateError::Upstream(e) => ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                error: "Failed to generate image".to_string(),
                details: Some(e.details()),
            },
            GenerateError::Storage(e) => ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                error: "Failed to store image".to_string(),
                details: Some(serde_json::Value::String(e.to_string())),
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/generate-image ============

async fn handle_generate_image(
    State(service): State<ImageService>,
    body: Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<Json<GenerateImageResponse>, ApiError> {
    let Json(request) = body.map_err(|e| {
        tracing::debug!(error = %e, "rejected request body");
        bad_request("Request body must be JSON")
    })?;

    let prompt = request.prompt.unwrap_or_default();
    let image = service.generate(&prompt).await?;
    Ok(Json(GenerateImageResponse::from(&image)))
}
