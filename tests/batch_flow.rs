//! End-to-end batch flow: prompt file → sequential generation → zip archive.
//!
//! Runs both in-process (service called directly) and over HTTP (a real
//! server on a loopback port driven through `EndpointClient`), with a stub
//! provider standing in for the upstream API.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use prompt_gallery::archive::{package_archive, ArchiveError, LocationFetcher};
use prompt_gallery::batch::run_batch;
use prompt_gallery::blob_store::BlobStore;
use prompt_gallery::client::EndpointClient;
use prompt_gallery::generate::{ImageLocation, ImageService};
use prompt_gallery::models::{Gallery, Prompt};
use prompt_gallery::progress::{NoProgress, WatchProgress};
use prompt_gallery::prompts::load_prompts;
use prompt_gallery::provider::{ImageProvider, ProviderError};
use prompt_gallery::server::build_router;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nstub-image";

/// Returns a PNG for every prompt except `reject`, and counts calls.
struct StubProvider {
    reject: Option<&'static str>,
    calls: AtomicUsize,
}

impl StubProvider {
    fn new(reject: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            reject,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ImageProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<Vec<u8>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject == Some(prompt.as_str()) {
            return Err(ProviderError::Upstream {
                status: 403,
                details: serde_json::json!({ "name": "content_moderation" }),
            });
        }
        Ok(PNG.to_vec())
    }
}

async fn spawn_server(service: ImageService) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(service)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn zip_entry_names(bytes: &[u8]) -> Vec<String> {
    let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

#[tokio::test]
async fn csv_batch_in_process_then_zip() {
    let tmp = TempDir::new().unwrap();
    let prompts_path = tmp.path().join("prompts.csv");
    std::fs::write(&prompts_path, "a red fox,\n\" blue whale \"\n,green frog\n").unwrap();

    let prompts = load_prompts(&prompts_path).await.unwrap();
    assert_eq!(prompts.len(), 3);

    let provider = StubProvider::new(None);
    let service = ImageService::new(
        provider.clone(),
        BlobStore::new(tmp.path().join("images"), "/images", "png"),
    )
    .with_location(ImageLocation::FilePath);

    let (reporter, progress) = WatchProgress::new();
    let outcome = run_batch(&service, &prompts, &reporter).await;
    assert!(outcome.is_complete());
    assert_eq!(progress.borrow().completed, 3);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

    let mut gallery = Gallery::new();
    gallery.extend(outcome.images);
    let report = package_archive(&gallery.to_vec(), Arc::new(LocationFetcher::new()))
        .await
        .unwrap();

    assert_eq!((report.succeeded, report.failed), (3, 0));
    assert_eq!(
        zip_entry_names(&report.bytes),
        vec!["a_red_fox.png", "blue_whale.png", "green_frog.png"]
    );

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(&report.bytes[..])).unwrap();
    let mut data = Vec::new();
    archive
        .by_name("blue_whale.png")
        .unwrap()
        .read_to_end(&mut data)
        .unwrap();
    assert_eq!(data, PNG);
}

#[tokio::test]
async fn http_batch_stops_at_first_failure_and_keeps_prior_images() {
    let tmp = TempDir::new().unwrap();
    let prompts_path = tmp.path().join("prompts.txt");
    std::fs::write(&prompts_path, "p1\n\np2\np3\n").unwrap();
    let prompts = load_prompts(&prompts_path).await.unwrap();

    let provider = StubProvider::new(Some("p2"));
    let base = spawn_server(ImageService::new(
        provider.clone(),
        BlobStore::new(tmp.path().join("images"), "/images", "webp"),
    ))
    .await;

    let client = EndpointClient::new(&base);
    let outcome = run_batch(&client, &prompts, &NoProgress).await;

    assert_eq!(outcome.images.len(), 1);
    assert_eq!(outcome.images[0].prompt.as_str(), "p1");
    let failure = outcome.failure.as_ref().expect("batch should fail on p2");
    assert_eq!(failure.index, 1);
    assert_eq!(failure.prompt.as_str(), "p2");
    // p3 was never sent.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

    // The surviving image is still downloadable and packageable.
    let report = package_archive(&outcome.images, Arc::new(LocationFetcher::new()))
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(zip_entry_names(&report.bytes), vec!["p1.png"]);
}

#[tokio::test]
async fn archive_of_unreachable_images_fails() {
    let tmp = TempDir::new().unwrap();
    let provider = StubProvider::new(None);
    let service = ImageService::new(
        provider,
        BlobStore::new(tmp.path().join("images"), "/images", "webp"),
    )
    .with_public_url(Some("http://127.0.0.1:1".to_string()));

    let prompts = vec![Prompt::new("one").unwrap(), Prompt::new("two").unwrap()];
    let outcome = run_batch(&service, &prompts, &NoProgress).await;
    assert!(outcome.is_complete());

    let err = package_archive(&outcome.images, Arc::new(LocationFetcher::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::NothingFetched { failed: 2 }));
}
