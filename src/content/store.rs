//! Dated content folders
//!
//! Every generation writes a fresh folder, never overwriting an earlier one:
//!
//! ```text
//! {root}/{campaign_id}/{task_slug}/{YYYYMMDD-HHMMSS}/post.json
//!                                                   /post.md
//! ```
//!
//! The folder path relative to `root` is what the task records as its
//! `content_folder`.

use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::{ContentError, GeneratedPost};
use crate::utils::slugify;

/// Markdown preview written next to the post
const PREVIEW_TEMPLATE: &str = include_str!("../../templates/post.md.hbs");

const POST_FILE: &str = "post.json";
const PREVIEW_FILE: &str = "post.md";

#[derive(Debug, Serialize)]
struct PreviewData<'a> {
    campaign_id: &'a str,
    task_id: &'a str,
    generated_at: String,
    content_hash: &'a str,
    caption: &'a str,
    body: &'a str,
    hashtags: &'a [String],
    media: &'a [String],
}

/// Filesystem store for generated posts
pub struct ContentStore {
    root: PathBuf,
    handlebars: Handlebars<'static>,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ContentError> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .register_template_string("preview", PREVIEW_TEMPLATE)
            .map_err(|e| ContentError::Template(e.to_string()))?;

        Ok(Self {
            root: root.into(),
            handlebars,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a post into a new dated folder, returning the relative folder
    #[tracing::instrument(skip(self, post))]
    pub async fn save(
        &self,
        campaign_id: &str,
        task_id: &str,
        post: &GeneratedPost,
        at: DateTime<Utc>,
    ) -> Result<String, ContentError> {
        let parent = Path::new(campaign_id).join(slugify(task_id));
        tokio::fs::create_dir_all(self.root.join(&parent))
            .await
            .map_err(|e| ContentError::io(format!("create {}", parent.display()), e))?;

        let relative = self.claim_folder(&parent, at).await?;
        let folder = self.root.join(&relative);

        let json = serde_json::to_string_pretty(post)?;
        tokio::fs::write(folder.join(POST_FILE), json)
            .await
            .map_err(|e| ContentError::io(format!("write {}", folder.display()), e))?;

        let preview = self.render_preview(campaign_id, task_id, post)?;
        tokio::fs::write(folder.join(PREVIEW_FILE), preview)
            .await
            .map_err(|e| ContentError::io(format!("write {}", folder.display()), e))?;

        let relative = relative.to_string_lossy().replace('\\', "/");
        tracing::debug!(folder = %relative, "Stored generated post");
        Ok(relative)
    }

    /// Load the post stored in a folder returned by [`ContentStore::save`]
    pub async fn load(&self, folder: &str) -> Result<GeneratedPost, ContentError> {
        let path = self.root.join(folder).join(POST_FILE);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ContentError::NotFound(folder.to_string()));
            }
            Err(e) => return Err(ContentError::io(format!("read {}", path.display()), e)),
        };
        Ok(serde_json::from_str(&json)?)
    }

    /// Create a fresh timestamped folder under `parent`
    ///
    /// Two generations within the same second get `-1`, `-2`, ... suffixes.
    async fn claim_folder(&self, parent: &Path, at: DateTime<Utc>) -> Result<PathBuf, ContentError> {
        let stamp = at.format("%Y%m%d-%H%M%S").to_string();

        for attempt in 0u32..100 {
            let name = if attempt == 0 {
                stamp.clone()
            } else {
                format!("{stamp}-{attempt}")
            };
            let relative = parent.join(name);

            match tokio::fs::create_dir(self.root.join(&relative)).await {
                Ok(()) => return Ok(relative),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(ContentError::io(format!("create {}", relative.display()), e));
                }
            }
        }

        Err(ContentError::io(
            format!("create {}", parent.display()),
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "no free folder name"),
        ))
    }

    fn render_preview(
        &self,
        campaign_id: &str,
        task_id: &str,
        post: &GeneratedPost,
    ) -> Result<String, ContentError> {
        let data = PreviewData {
            campaign_id,
            task_id,
            generated_at: post.generated_at.to_rfc3339(),
            content_hash: &post.content_hash,
            caption: &post.caption,
            body: &post.body,
            hashtags: &post.hashtags,
            media: &post.media,
        };
        self.handlebars
            .render("preview", &data)
            .map_err(|e| ContentError::Template(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post() -> GeneratedPost {
        GeneratedPost::new(
            "Launch week",
            "Seven days to go",
            vec!["launch".into()],
            vec!["media://hero.png".into()],
            Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap();

        let folder = store.save("launch", "launch:d-7", &post(), at).await.unwrap();
        assert_eq!(folder, "launch/launch-d-7/20250303-080000");

        let loaded = store.load(&folder).await.unwrap();
        assert_eq!(loaded, post());

        let preview = std::fs::read_to_string(dir.path().join(&folder).join("post.md")).unwrap();
        assert!(preview.contains("# Launch week"));
        assert!(preview.contains("#launch"));
    }

    #[tokio::test]
    async fn test_same_second_gets_new_folder() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap();

        let first = store.save("launch", "launch:d-7", &post(), at).await.unwrap();
        let second = store.save("launch", "launch:d-7", &post(), at).await.unwrap();

        assert_ne!(first, second);
        assert!(second.ends_with("20250303-080000-1"));
    }

    #[tokio::test]
    async fn test_load_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();

        let err = store.load("nope/nothing").await.unwrap_err();
        assert!(matches!(err, ContentError::NotFound(_)));
    }
}
