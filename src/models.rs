//! Core data models shared by the server, the batch orchestrator, and the
//! archive packager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// A non-empty, trimmed text prompt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Prompt(String);

impl Prompt {
    /// Trim `text` and wrap it; `None` if nothing is left.
    pub fn new(text: impl AsRef<str>) -> Option<Self> {
        let trimmed = text.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Prompt {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Prompt::new(value).ok_or_else(|| "prompt must not be empty".to_string())
    }
}

impl From<Prompt> for String {
    fn from(prompt: Prompt) -> Self {
        prompt.0
    }
}

/// Where an image came from. Only [`OriginKind::Fresh`] is ever produced;
/// `Cached` exists so clients that understand a similarity cache can
/// round-trip the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OriginKind {
    #[serde(rename = "api")]
    Fresh,
    #[serde(rename = "cache")]
    Cached,
}

/// Result of one successful generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    /// Unique per generation; the stored filename stem.
    pub id: String,
    pub prompt: Prompt,
    /// Absolute URL or filesystem path of the stored bytes.
    pub image_url: String,
    #[serde(rename = "source")]
    pub origin: OriginKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl GeneratedImage {
    pub fn is_cached(&self) -> bool {
        self.origin == OriginKind::Cached
    }
}

/// Body of `POST /api/generate-image`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateImageRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Success body of `POST /api/generate-image`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageResponse {
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<OriginKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

impl From<&GeneratedImage> for GenerateImageResponse {
    fn from(image: &GeneratedImage) -> Self {
        Self {
            image_url: image.image_url.clone(),
            source: Some(image.origin),
            cached: Some(image.is_cached()),
            similarity: image.similarity,
        }
    }
}

/// Insertion-ordered collection of descriptors for one session.
///
/// Single-prompt results go to the front, batch results are appended.
/// Nothing is persisted; entries live until the gallery is dropped.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    images: VecDeque<GeneratedImage>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_front(&mut self, image: GeneratedImage) {
        self.images.push_front(image);
    }

    pub fn extend(&mut self, images: impl IntoIterator<Item = GeneratedImage>) {
        self.images.extend(images);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneratedImage> {
        self.images.iter()
    }

    pub fn to_vec(&self) -> Vec<GeneratedImage> {
        self.images.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str) -> GeneratedImage {
        GeneratedImage {
            id: id.to_string(),
            prompt: Prompt::new(format!("prompt {}", id)).unwrap(),
            image_url: format!("/images/{}.webp", id),
            origin: OriginKind::Fresh,
            similarity: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn prompt_is_trimmed_and_rejects_blank() {
        assert_eq!(Prompt::new("  a cat  ").unwrap().as_str(), "a cat");
        assert!(Prompt::new(" \t\r\n").is_none());
        assert!(Prompt::new("").is_none());
    }

    #[test]
    fn prompt_deserialize_rejects_empty() {
        assert!(serde_json::from_str::<Prompt>("\"   \"").is_err());
        let p: Prompt = serde_json::from_str("\" dog \"").unwrap();
        assert_eq!(p.as_str(), "dog");
    }

    #[test]
    fn response_omits_similarity_for_fresh_images() {
        let body = GenerateImageResponse::from(&image("1"));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["imageUrl"], "/images/1.webp");
        assert_eq!(json["source"], "api");
        assert_eq!(json["cached"], false);
        assert!(json.get("similarity").is_none());
    }

    #[test]
    fn bare_image_url_response_parses() {
        let body: GenerateImageResponse =
            serde_json::from_str(r#"{"imageUrl":"http://x/images/a.webp"}"#).unwrap();
        assert_eq!(body.image_url, "http://x/images/a.webp");
        assert!(body.source.is_none());
    }

    #[test]
    fn gallery_orders_single_first_and_batch_last() {
        let mut gallery = Gallery::new();
        gallery.extend(vec![image("b1"), image("b2")]);
        gallery.push_front(image("s1"));
        let ids: Vec<&str> = gallery.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "b1", "b2"]);
        assert_eq!(gallery.len(), 3);
    }
}
