//! Artifact publishing: store the translated text and return a download link.
//!
//! [`LocalDirPublisher`] lays files out the way the object store did
//! (`mds/respMd-<id>.md`) and builds the link from a configurable base URL.
//! Files are written to a temporary name and renamed into place, so a reader
//! following the link never sees a partial file.

use crate::error::PublishError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Key prefix under which artifacts are stored.
pub const ARTIFACT_PREFIX: &str = "mds";

#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    /// Store `content` and return a URL the user can download it from.
    async fn publish(&self, content: &str) -> Result<String, PublishError>;
}

/// Publishes into `root/mds/` and links to `base_url/mds/`.
#[derive(Debug, Clone)]
pub struct LocalDirPublisher {
    root: PathBuf,
    base_url: String,
}

impl LocalDirPublisher {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// A publisher whose links are `file://` URLs to the written files.
    pub fn file_urls(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let base = format!("file://{}", root.display());
        Self::new(root, base)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_err(path: &Path, source: std::io::Error) -> PublishError {
    PublishError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl ArtifactPublisher for LocalDirPublisher {
    async fn publish(&self, content: &str) -> Result<String, PublishError> {
        let dir = self.root.join(ARTIFACT_PREFIX);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_err(&dir, e))?;

        let name = format!("respMd-{}.md", uuid::Uuid::new_v4().simple());
        let path = dir.join(&name);
        let tmp = dir.join(format!(".{name}.tmp"));

        tokio::fs::write(&tmp, content.as_bytes())
            .await
            .map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(&path, e));
        }

        info!("Published {} ({} bytes)", path.display(), content.len());
        Ok(format!("{}/{}/{}", self.base_url, ARTIFACT_PREFIX, name))
    }
}
