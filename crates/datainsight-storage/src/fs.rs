//! Local filesystem artifact store.

use crate::{url_with_key, validate_key, ArtifactStore, StoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    /// When set, URLs are `{public_base_url}/{key}` instead of `file://`.
    public_base_url: Option<Url>,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    pub fn with_public_base_url(mut self, base: &str) -> Result<Self, StoreError> {
        let url = Url::parse(base).map_err(|e| StoreError::Config(format!("public base url `{base}`: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(StoreError::Config(format!("public base url `{base}` cannot carry a path")));
        }
        self.public_base_url = Some(url);
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(&self, key: &str, path: &Path) -> Result<String, StoreError> {
        if let Some(base) = &self.public_base_url {
            return url_with_key(base, key).map(String::from);
        }
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        Url::from_file_path(&absolute)
            .map(String::from)
            .map_err(|_| StoreError::Io(format!("cannot build a file URL for {}", absolute.display())))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, StoreError> {
        validate_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        tracing::debug!(key, content_type, bytes = bytes.len(), "artifact written");
        self.url_for(key, &path)
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}
