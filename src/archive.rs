//! Zip packaging of generated images.
//!
//! [`package_archive`] fetches every image concurrently, one task per
//! descriptor, and waits for all of them to settle. A failed fetch is
//! counted and left out; the archive is built from whatever succeeded.
//! Only when nothing succeeds is the whole operation an error.
//!
//! Entries are named from the prompt (see [`archive_entry_name`]). Two
//! prompts that map to the same name collide, and the one whose fetch
//! completes last wins.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::models::GeneratedImage;

/// Default filename for a downloaded archive.
pub const ARCHIVE_FILENAME: &str = "generated-images.zip";

/// Characters of the prompt used for the entry name.
const NAME_CHARS: usize = 30;
const DEFAULT_EXTENSION: &str = "webp";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("no images to package")]
    Empty,
    #[error("could not retrieve any images ({failed} failed); the image server may be unreachable or blocking cross-origin requests")]
    NothingFetched { failed: usize },
    #[error("failed to build zip archive: {0}")]
    Zip(String),
}

/// Loads the bytes behind an image location.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}

/// Fetches `http(s)://` locations over HTTP and anything else from the
/// local filesystem.
#[derive(Clone, Default)]
pub struct LocationFetcher {
    client: reqwest::Client,
}

impl LocationFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageFetcher for LocationFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let response = self.client.get(location).send().await?;
            let status = response.status();
            if !status.is_success() {
                bail!("HTTP {} fetching {}", status, location);
            }
            Ok(response.bytes().await?.to_vec())
        } else {
            Ok(tokio::fs::read(location).await?)
        }
    }
}

/// A finished archive and how it was assembled.
#[derive(Debug)]
pub struct ArchiveReport {
    /// The serialized zip.
    pub bytes: Vec<u8>,
    pub succeeded: usize,
    pub failed: usize,
    /// Distinct entry names; fewer than `succeeded` when names collide.
    pub entries: usize,
}

/// Filesystem-safe stem for an archive entry.
///
/// The first 30 characters of the prompt with every character outside
/// `[A-Za-z0-9]` replaced by `_`; `untitled` when that window holds no
/// alphanumeric character at all.
pub fn archive_entry_stem(prompt: &str) -> String {
    let head: Vec<char> = prompt.chars().take(NAME_CHARS).collect();
    if !head.iter().any(|c| c.is_ascii_alphanumeric()) {
        return "untitled".to_string();
    }
    head.into_iter()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn archive_entry_name(prompt: &str, extension: &str) -> String {
    format!("{}.{}", archive_entry_stem(prompt), extension)
}

/// Extension for sniffed image bytes; `None` when the bytes are not an image.
fn image_extension(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| {
            format
                .extensions_str()
                .first()
                .copied()
                .unwrap_or(DEFAULT_EXTENSION)
        })
}

/// Fetch every image in parallel and zip the ones that arrived.
pub async fn package_archive(
    images: &[GeneratedImage],
    fetcher: Arc<dyn ImageFetcher>,
) -> Result<ArchiveReport, ArchiveError> {
    if images.is_empty() {
        return Err(ArchiveError::Empty);
    }

    let mut tasks = JoinSet::new();
    for image in images {
        let fetcher = fetcher.clone();
        let location = image.image_url.clone();
        let prompt = image.prompt.to_string();
        tasks.spawn(async move {
            let result = fetcher.fetch(&location).await;
            (prompt, location, result)
        });
    }

    let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut succeeded = 0usize;
    let mut failed = 0usize;

    while let Some(joined) = tasks.join_next().await {
        let (prompt, location, result) = match joined {
            Ok(settled) => settled,
            Err(e) => {
                tracing::warn!(error = %e, "image fetch task did not complete");
                failed += 1;
                continue;
            }
        };

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%location, error = %e, "could not fetch image for archive");
                failed += 1;
                continue;
            }
        };

        let Some(extension) = image_extension(&bytes) else {
            tracing::warn!(%location, "fetched payload is not a recognised image");
            failed += 1;
            continue;
        };

        entries.insert(archive_entry_name(&prompt, extension), bytes);
        succeeded += 1;
    }

    if succeeded == 0 {
        return Err(ArchiveError::NothingFetched { failed });
    }

    let entry_count = entries.len();
    let bytes = write_zip(entries)?;
    tracing::info!(succeeded, failed, entries = entry_count, "archive ready");

    Ok(ArchiveReport {
        bytes,
        succeeded,
        failed,
        entries: entry_count,
    })
}

fn write_zip(entries: BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, ArchiveError> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    // Image payloads are already compressed.
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, data) in entries {
        zip.start_file(name, options).map_err(zip_err)?;
        zip.write_all(&data).map_err(zip_err)?;
    }
    let cursor = zip.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}

fn zip_err(e: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Zip(e.to_string())
}
