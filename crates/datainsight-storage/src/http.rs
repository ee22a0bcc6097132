//! Object-store style HTTP uploads.
//!
//! Bytes are `PUT` to `{endpoint}/{bucket}/{key}`; the same URL is returned
//! for retrieval.

use crate::{url_with_key, validate_key, ArtifactStore, StoreError};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub bearer_token: Option<String>,
    pub timeout: Duration,
}

impl HttpStoreConfig {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            bearer_token: None,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Read `DATAINSIGHT_UPLOAD_TOKEN` when set.
    pub fn with_token_from_env(mut self) -> Self {
        if let Ok(token) = std::env::var("DATAINSIGHT_UPLOAD_TOKEN") {
            if !token.trim().is_empty() {
                self.bearer_token = Some(token);
            }
        }
        self
    }
}

pub struct HttpArtifactStore {
    client: reqwest::Client,
    base: Url,
    bearer_token: Option<String>,
}

impl std::fmt::Debug for HttpArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpArtifactStore")
            .field("base", &self.base.as_str())
            .field("authenticated", &self.bearer_token.is_some())
            .finish()
    }
}

impl HttpArtifactStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self, StoreError> {
        let bucket = config.bucket.trim_matches('/');
        if bucket.is_empty() || bucket.contains('/') {
            return Err(StoreError::Config(format!("invalid bucket `{}`", config.bucket)));
        }
        let endpoint = config.endpoint.trim_end_matches('/');
        let base = Url::parse(&format!("{endpoint}/{bucket}/"))
            .map_err(|e| StoreError::Config(format!("upload endpoint `{}`: {e}", config.endpoint)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(StoreError::Config(format!(
                "upload endpoint must be http(s), got `{}`",
                base.scheme()
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base,
            bearer_token: config.bearer_token,
        })
    }

    pub fn url_for(&self, key: &str) -> Result<Url, StoreError> {
        validate_key(key)?;
        url_with_key(&self.base, key)
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, StoreError> {
        let url = self.url_for(key)?;
        let size = bytes.len();
        let mut request = self
            .client
            .put(url.clone())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Upload(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Upload(format!(
                "{status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        tracing::debug!(url = %url, bytes = size, "artifact uploaded");
        Ok(url.into())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
