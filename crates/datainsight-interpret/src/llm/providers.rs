//! Model API Providers
//!
//! Concrete [`ModelService`] implementations for Ollama, OpenAI-compatible
//! servers, and Anthropic. Each client owns one `reqwest::Client`; build it
//! once and share it across requests.

use super::*;
#[cfg(any(feature = "ollama", feature = "openai", feature = "anthropic"))]
use reqwest::{Client, Response, StatusCode};
#[cfg(any(feature = "ollama", feature = "openai", feature = "anthropic"))]
use serde_json::json;

pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
#[cfg(feature = "anthropic")]
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Ollama,
    OpenAI,
    Anthropic,
}

impl Backend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Some(Backend::Ollama),
            "openai" => Some(Backend::OpenAI),
            "anthropic" => Some(Backend::Anthropic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Ollama => "ollama",
            Backend::OpenAI => "openai",
            Backend::Anthropic => "anthropic",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Backend::Ollama => "llama3.1",
            Backend::OpenAI => "gpt-4o-mini",
            Backend::Anthropic => "claude-3-5-haiku-latest",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Backend::Ollama => DEFAULT_OLLAMA_HOST,
            Backend::OpenAI => DEFAULT_OPENAI_BASE_URL,
            Backend::Anthropic => DEFAULT_ANTHROPIC_BASE_URL,
        }
    }
}

/// Model backend configuration loaded from environment or flags.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub backend: Backend,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Transport-level timeout. The interpreter applies its own per-call bound
    /// on top of this.
    pub timeout: Duration,
}

impl ModelConfig {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            model: backend.default_model().to_string(),
            base_url: backend.default_base_url().to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Load from environment variables.
    ///
    /// - `DATAINSIGHT_MODEL_BACKEND`: `ollama` (default), `openai`, `anthropic`
    /// - `DATAINSIGHT_MODEL`: model name (backend default otherwise)
    /// - `OLLAMA_HOST`, `OPENAI_BASE_URL`, `ANTHROPIC_BASE_URL`
    /// - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` (required for those backends)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(None, |name| std::env::var(name).ok())
    }

    /// Same as [`ModelConfig::from_env`], reading variables through `var`.
    /// `backend` replaces `DATAINSIGHT_MODEL_BACKEND` when given; the base URL
    /// and API key variables of the chosen backend still apply.
    pub fn from_lookup(
        backend: Option<Backend>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            var(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let backend = match backend {
            Some(backend) => backend,
            None => match var("DATAINSIGHT_MODEL_BACKEND") {
                Some(raw) => Backend::parse(&raw).ok_or(ConfigError::UnknownBackend(raw))?,
                None => Backend::Ollama,
            },
        };
        let mut config = Self::new(backend);
        if let Some(model) = var("DATAINSIGHT_MODEL") {
            config.model = model;
        }
        let (url_var, key_var) = match backend {
            Backend::Ollama => ("OLLAMA_HOST", None),
            Backend::OpenAI => ("OPENAI_BASE_URL", Some("OPENAI_API_KEY")),
            Backend::Anthropic => ("ANTHROPIC_BASE_URL", Some("ANTHROPIC_API_KEY")),
        };
        if let Some(url) = var(url_var) {
            config.base_url = url;
        }
        if let Some(key_var) = key_var {
            config.api_key = Some(var(key_var).ok_or(ConfigError::MissingApiKey(key_var))?);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model name must not be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("model timeout must be positive".to_string()));
        }
        match self.backend {
            Backend::OpenAI if self.api_key.is_none() => Err(ConfigError::MissingApiKey("OPENAI_API_KEY")),
            Backend::Anthropic if self.api_key.is_none() => {
                Err(ConfigError::MissingApiKey("ANTHROPIC_API_KEY"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown model backend `{0}` (expected ollama, openai or anthropic)")]
    UnknownBackend(String),
    #[error("{0} must be set for this backend")]
    MissingApiKey(&'static str),
    #[error("backend `{0}` is not compiled into this build")]
    BackendDisabled(&'static str),
    #[error("invalid model configuration: {0}")]
    Invalid(String),
}

/// Add a scheme when missing and drop trailing slashes.
pub fn normalize_base_url(url: &str, default: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        url = default.to_string();
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("http://{url}");
    }
    url.trim_end_matches('/').to_string()
}

#[cfg(any(feature = "ollama", feature = "openai", feature = "anthropic"))]
fn http_client(timeout: Duration) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::Invalid(format!("failed to build http client: {e}")))
}

#[cfg(any(feature = "ollama", feature = "openai", feature = "anthropic"))]
fn chat_messages(request: &CompletionRequest) -> Vec<Value> {
    request
        .messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect()
}

#[cfg(any(feature = "ollama", feature = "openai", feature = "anthropic"))]
async fn error_for_status(response: Response, backend: &str) -> Result<Response, ModelError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(ModelError::RateLimited {
            retry_after_ms: retry_after * 1000,
        });
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(ModelError::Api(format!("{backend} http error {status}: {text}")));
    }
    Ok(response)
}

// ============================================================================
// Ollama
// ============================================================================

#[cfg(feature = "ollama")]
pub struct OllamaClient {
    client: Client,
    config: ModelConfig,
}

#[cfg(feature = "ollama")]
impl OllamaClient {
    pub fn new(config: ModelConfig) -> Result<Self, ConfigError> {
        let client = http_client(config.timeout)?;
        Ok(Self { client, config })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Response, ModelError> {
        self.client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ModelError::Network(format!("failed to reach ollama at {url} (is it running?): {e}")))
    }
}

#[cfg(feature = "ollama")]
#[async_trait]
impl ModelService for OllamaClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ModelError> {
        let host = normalize_base_url(&self.config.base_url, DEFAULT_OLLAMA_HOST);
        let url = format!("{host}/api/chat");

        let mut body = json!({
            "model": self.config.model,
            "stream": false,
            "messages": chat_messages(&request),
            "options": { "temperature": request.temperature.unwrap_or(0.0) },
        });
        if let Some(max_tokens) = request.max_tokens {
            body["options"]["num_predict"] = json!(max_tokens);
        }
        let has_format = request.json_schema.is_some();
        if let Some(schema) = request.json_schema {
            body["format"] = schema;
        }

        let mut response = self.post(&url, &body).await?;
        if has_format && response.status() == StatusCode::BAD_REQUEST {
            let text = response.text().await.unwrap_or_default();
            // Older servers only understand `"format": "json"`.
            if !text.contains("invalid JSON schema in format") {
                return Err(ModelError::Api(format!("ollama http error 400: {text}")));
            }
            tracing::debug!(model = %self.config.model, "ollama rejected schema format, retrying with plain json");
            body["format"] = json!("json");
            response = self.post(&url, &body).await?;
        }
        let response = error_for_status(response, "ollama").await?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("ollama returned invalid JSON: {e}")))?;
        let content = data["message"]["content"]
            .as_str()
            .ok_or_else(|| ModelError::InvalidResponse("ollama reply has no message content".to_string()))?
            .to_string();

        Ok(CompletionResponse {
            content,
            model: self.config.model.clone(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            backend: "ollama",
            supports_json_schema: true,
        }
    }
}

// ============================================================================
// OpenAI-compatible
// ============================================================================

#[cfg(feature = "openai")]
pub struct OpenAIClient {
    client: Client,
    config: ModelConfig,
}

#[cfg(feature = "openai")]
impl OpenAIClient {
    pub fn new(config: ModelConfig) -> Result<Self, ConfigError> {
        let client = http_client(config.timeout)?;
        Ok(Self { client, config })
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl ModelService for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ModelError> {
        let base_url = normalize_base_url(&self.config.base_url, DEFAULT_OPENAI_BASE_URL);
        let url = format!("{base_url}/chat/completions");

        let mut body = json!({
            "model": self.config.model,
            "messages": chat_messages(&request),
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if request.json_schema.is_some() {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.as_deref().unwrap_or_default())
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;
        let response = error_for_status(response, "openai").await?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ModelError::InvalidResponse("missing choices[0].message.content".to_string()))?
            .to_string();

        Ok(CompletionResponse {
            content,
            model: self.config.model.clone(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            backend: "openai",
            supports_json_schema: false,
        }
    }
}

// ============================================================================
// Anthropic
// ============================================================================

#[cfg(feature = "anthropic")]
pub struct AnthropicClient {
    client: Client,
    config: ModelConfig,
}

#[cfg(feature = "anthropic")]
impl AnthropicClient {
    pub fn new(config: ModelConfig) -> Result<Self, ConfigError> {
        let client = http_client(config.timeout)?;
        Ok(Self { client, config })
    }
}

#[cfg(feature = "anthropic")]
#[async_trait]
impl ModelService for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ModelError> {
        let base_url = normalize_base_url(&self.config.base_url, DEFAULT_ANTHROPIC_BASE_URL);
        let url = format!("{base_url}/v1/messages");

        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(1024),
            "temperature": request.temperature.unwrap_or(0.0),
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.config.api_key.as_deref().unwrap_or_default())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Network(format!("failed to reach Anthropic at {url}: {e}")))?;
        let response = error_for_status(response, "anthropic").await?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        let content = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ModelError::InvalidResponse("no text blocks in response".to_string()))?;

        Ok(CompletionResponse {
            content,
            model: self.config.model.clone(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            backend: "anthropic",
            supports_json_schema: false,
        }
    }
}

// ============================================================================
// Unified Client
// ============================================================================

/// Dispatches to whichever backend the configuration names.
pub enum UnifiedClient {
    #[cfg(feature = "ollama")]
    Ollama(OllamaClient),
    #[cfg(feature = "openai")]
    OpenAI(OpenAIClient),
    #[cfg(feature = "anthropic")]
    Anthropic(AnthropicClient),
}

impl UnifiedClient {
    pub fn from_config(config: ModelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        match config.backend {
            #[cfg(feature = "ollama")]
            Backend::Ollama => Ok(Self::Ollama(OllamaClient::new(config)?)),
            #[cfg(feature = "openai")]
            Backend::OpenAI => Ok(Self::OpenAI(OpenAIClient::new(config)?)),
            #[cfg(feature = "anthropic")]
            Backend::Anthropic => Ok(Self::Anthropic(AnthropicClient::new(config)?)),
            #[allow(unreachable_patterns)]
            other => Err(ConfigError::BackendDisabled(other.as_str())),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_config(ModelConfig::from_env()?)
    }
}

#[async_trait]
impl ModelService for UnifiedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ModelError> {
        match self {
            #[cfg(feature = "ollama")]
            Self::Ollama(c) => c.complete(request).await,
            #[cfg(feature = "openai")]
            Self::OpenAI(c) => c.complete(request).await,
            #[cfg(feature = "anthropic")]
            Self::Anthropic(c) => c.complete(request).await,
        }
    }

    fn model_info(&self) -> ModelInfo {
        match self {
            #[cfg(feature = "ollama")]
            Self::Ollama(c) => c.model_info(),
            #[cfg(feature = "openai")]
            Self::OpenAI(c) => c.model_info(),
            #[cfg(feature = "anthropic")]
            Self::Anthropic(c) => c.model_info(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
