//! Media reference resolution
//!
//! Posts refer to uploaded assets as `media://path/to/file.png`. Platforms
//! need public URLs, so the publisher rewrites those references against the
//! configured public base URL. Absolute `http(s)` URLs pass through.

use url::Url;

use super::{ContentError, GeneratedPost};

/// Scheme used for internal media references
pub const MEDIA_SCHEME: &str = "media://";

#[derive(Debug, Clone, Default)]
pub struct MediaResolver {
    public_base_url: Option<Url>,
}

impl MediaResolver {
    /// Resolver for `media://` references under `public_base_url`
    pub fn new(public_base_url: Option<&str>) -> Result<Self, ContentError> {
        let public_base_url = public_base_url
            .map(|base| {
                // Url::join drops the last path segment without a trailing slash
                let normalized = if base.ends_with('/') {
                    base.to_string()
                } else {
                    format!("{base}/")
                };
                Url::parse(&normalized).map_err(|_| ContentError::InvalidMedia(base.to_string()))
            })
            .transpose()?;

        Ok(Self { public_base_url })
    }

    /// Resolve one reference to a public URL
    pub fn resolve(&self, reference: &str) -> Result<String, ContentError> {
        if let Some(path) = reference.strip_prefix(MEDIA_SCHEME) {
            let base = self
                .public_base_url
                .as_ref()
                .ok_or_else(|| ContentError::InvalidMedia(reference.to_string()))?;
            return base
                .join(path.trim_start_matches('/'))
                .map(String::from)
                .map_err(|_| ContentError::InvalidMedia(reference.to_string()));
        }

        match Url::parse(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url.into()),
            _ => Err(ContentError::InvalidMedia(reference.to_string())),
        }
    }

    /// Copy of `post` with every media reference resolved
    pub fn resolve_post(&self, post: &GeneratedPost) -> Result<GeneratedPost, ContentError> {
        let media = post
            .media
            .iter()
            .map(|reference| self.resolve(reference))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(post.with_media(media))
    }
}
