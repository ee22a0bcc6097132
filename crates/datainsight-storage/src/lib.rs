//! Datainsight artifact storage
//!
//! Rendered charts are persisted through the [`ArtifactStore`] capability,
//! which takes raw bytes and hands back a URL the caller can fetch:
//!
//! ```text
//! RenderedImage ──► artifact_key(context, task, ext) ──► ArtifactStore::put ──► url
//! ```
//!
//! Two implementations ship here: [`FsArtifactStore`] writes under a local
//! directory, and [`HttpArtifactStore`] (feature `http`) `PUT`s to an
//! object-store style endpoint.

pub mod fs;
#[cfg(feature = "http")]
pub mod http;

#[cfg(test)]
mod tests;

pub use fs::FsArtifactStore;
#[cfg(feature = "http")]
pub use http::{HttpArtifactStore, HttpStoreConfig};

use async_trait::async_trait;
use url::Url;
use uuid::Uuid;

// ============================================================================
// Capability
// ============================================================================

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid artifact key `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("artifact store I/O failed: {0}")]
    Io(String),
    #[error("artifact upload failed: {0}")]
    Upload(String),
    #[error("artifact store configuration: {0}")]
    Config(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Persists artifact bytes and returns a retrievable URL.
///
/// Implementations are constructed once and shared across requests.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, StoreError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Keys
// ============================================================================

/// Reject components that could escape the store root or collide with
/// hidden files.
fn check_component(component: &str, what: &str) -> Result<(), StoreError> {
    let reason = if component.is_empty() {
        Some(format!("{what} cannot be empty"))
    } else if component.contains("..") {
        Some(format!("{what} contains '..'"))
    } else if component.contains('/') || component.contains('\\') {
        Some(format!("{what} contains a path separator"))
    } else if component.starts_with('.') {
        Some(format!("{what} cannot start with '.'"))
    } else if component.contains('\0') {
        Some(format!("{what} contains a null byte"))
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidKey {
            key: component.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// `{context_id}/{task_id}/{uuid}.{ext}`
pub fn artifact_key(context_id: &str, task_id: &str, extension: &str) -> Result<String, StoreError> {
    check_component(context_id, "context id")?;
    check_component(task_id, "task id")?;
    check_component(extension, "extension")?;
    Ok(format!("{context_id}/{task_id}/{}.{extension}", Uuid::new_v4()))
}

/// Validate a key produced elsewhere: relative, `/`-separated, no traversal.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason: "key cannot be empty".to_string(),
        });
    }
    key.split('/')
        .try_for_each(|part| check_component(part, "key segment"))
        .map_err(|e| match e {
            StoreError::InvalidKey { reason, .. } => StoreError::InvalidKey {
                key: key.to_string(),
                reason,
            },
            other => other,
        })
}

/// Append `key` to `base`, one percent-encoded path segment per key
/// segment. `?`, `#` and `:` in ids stay inside the path.
pub fn url_with_key(base: &Url, key: &str) -> Result<Url, StoreError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| StoreError::Config(format!("`{base}` cannot carry a path")))?
        .pop_if_empty()
        .extend(key.split('/'));
    Ok(url)
}
