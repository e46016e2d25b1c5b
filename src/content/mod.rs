//! Generated post model
//!
//! The generator stage turns a completion into a [`GeneratedPost`] and stores
//! it in a dated folder; the publisher stage loads it back, resolves media
//! references and hands it to the platform fan-out.

pub mod media;
pub mod prompt;
pub mod store;

pub use media::MediaResolver;
pub use prompt::{PromptBuilder, PromptContext};
pub use store::ContentStore;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::extract_raw_json;
use crate::utils::sha256_hex;

lazy_static! {
    static ref HASHTAG_RE: Regex = Regex::new(r"#(\w+)").expect("Invalid regex pattern");
}

// ============================================================================
// Errors
// ============================================================================

/// Errors while building, storing or loading generated content
#[derive(Error, Debug)]
pub enum ContentError {
    /// Completion could not be turned into a post
    #[error("Unparseable generator response: {0}")]
    UnparseableResponse(String),

    /// Media reference cannot be resolved to a public URL
    #[error("Invalid media reference '{0}'")]
    InvalidMedia(String),

    /// Prompt or preview template failed
    #[error("Template error: {0}")]
    Template(String),

    /// Stored post does not exist
    #[error("Content folder '{0}' not found")]
    NotFound(String),

    /// Stored post is not valid JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("I/O error during '{operation}': {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl ContentError {
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::UnparseableResponse(_))
    }
}

// ============================================================================
// Generated Post
// ============================================================================

/// Post content as returned by the generator
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPost {
    caption: String,
    body: String,
    hashtags: Vec<String>,
    media: Vec<String>,
}

/// Immutable generated post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPost {
    pub caption: String,

    pub body: String,

    /// Hashtags without the leading `#`
    #[serde(default)]
    pub hashtags: Vec<String>,

    /// Media references, `media://` or absolute URLs
    #[serde(default)]
    pub media: Vec<String>,

    pub generated_at: DateTime<Utc>,

    /// SHA-256 over the post content, used as an idempotency key
    pub content_hash: String,
}

impl GeneratedPost {
    /// Build a post and compute its hash
    pub fn new(
        caption: impl Into<String>,
        body: impl Into<String>,
        hashtags: Vec<String>,
        media: Vec<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let hashtags: Vec<String> = hashtags
            .into_iter()
            .map(|tag| tag.trim().trim_start_matches('#').to_string())
            .filter(|tag| !tag.is_empty())
            .collect();

        let mut post = Self {
            caption: caption.into().trim().to_string(),
            body: body.into().trim().to_string(),
            hashtags,
            media,
            generated_at,
            content_hash: String::new(),
        };
        post.content_hash = post.compute_hash();
        post
    }

    /// Parse a completion
    ///
    /// JSON replies (optionally inside a code block) are read field by
    /// field. Anything else is treated as plain text: the first non-empty
    /// line becomes the caption, the rest the body, and inline `#tags` are
    /// collected as hashtags.
    pub fn from_completion(text: &str, generated_at: DateTime<Utc>) -> Result<Self, ContentError> {
        if let Some(json) = extract_raw_json(text) {
            if let Ok(raw) = serde_json::from_str::<RawPost>(json) {
                if !raw.caption.trim().is_empty() || !raw.body.trim().is_empty() {
                    return Ok(Self::new(raw.caption, raw.body, raw.hashtags, raw.media, generated_at));
                }
            }
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ContentError::UnparseableResponse("empty completion".to_string()));
        }

        let (caption, body) = match trimmed.split_once('\n') {
            Some((first, rest)) => (first.trim(), rest.trim()),
            None => (trimmed, ""),
        };
        let hashtags = HASHTAG_RE
            .captures_iter(trimmed)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();

        Ok(Self::new(caption, body, hashtags, Vec::new(), generated_at))
    }

    fn compute_hash(&self) -> String {
        let mut material = String::new();
        material.push_str(&self.caption);
        material.push('\u{1f}');
        material.push_str(&self.body);
        material.push('\u{1f}');
        material.push_str(&self.hashtags.join(","));
        material.push('\u{1f}');
        material.push_str(&self.media.join(","));
        sha256_hex(material.as_bytes())
    }

    /// Caption, body and hashtags joined for text-only platforms
    pub fn full_text(&self) -> String {
        let mut parts = Vec::new();
        if !self.caption.is_empty() {
            parts.push(self.caption.clone());
        }
        if !self.body.is_empty() {
            parts.push(self.body.clone());
        }
        if !self.hashtags.is_empty() {
            parts.push(
                self.hashtags
                    .iter()
                    .map(|tag| format!("#{tag}"))
                    .collect::<Vec<_>>()
                    .join(" "),
            );
        }
        parts.join("\n\n")
    }

    /// Copy with media references replaced, hash unchanged
    pub fn with_media(&self, media: Vec<String>) -> Self {
        Self {
            media,
            ..self.clone()
        }
    }
}
