//! Model service capability
//!
//! The interpreter only ever sees [`ModelService`]: a prompt goes in, text
//! comes out. Concrete HTTP backends live in [`providers`]; [`ScriptedModel`]
//! replays canned replies for tests and offline runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[cfg(any(feature = "ollama", feature = "openai", feature = "anthropic"))]
pub mod providers;

// ============================================================================
// Model Service Interface
// ============================================================================

#[async_trait]
pub trait ModelService: Send + Sync {
    /// Generate a completion for the given conversation.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ModelError>;

    fn model_info(&self) -> ModelInfo;
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// Structured-output hint; backends that support it constrain decoding.
    pub json_schema: Option<Value>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(user)],
            max_tokens: None,
            temperature: None,
            json_schema: None,
        }
    }

    pub fn with_json_schema(mut self, schema: Value) -> Self {
        self.json_schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Content of the last user message, if any.
    pub fn user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub backend: &'static str,
    pub supports_json_schema: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
}

// ============================================================================
// Lenient JSON extraction
// ============================================================================

/// Pull the first JSON object out of a model reply.
///
/// Accepts bare JSON, JSON in a markdown fence, and JSON surrounded by prose.
pub fn extract_json_object(text: &str) -> Result<Value, String> {
    let trimmed = strip_code_fence(text.trim());
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }

    let Some(start) = trimmed.find('{') else {
        return Err("no '{' found".to_string());
    };
    let candidate = match datainsight_table::balanced_object_end(trimmed, start) {
        Some(end) => &trimmed[start..=end],
        None => match trimmed.rfind('}') {
            Some(end) if end > start => &trimmed[start..=end],
            _ => return Err("unterminated JSON object".to_string()),
        },
    };
    serde_json::from_str(candidate).map_err(|e| e.to_string())
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (`json`, `JSON`, ...) on the opening fence line.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

// ============================================================================
// Scripted model
// ============================================================================

/// Replays a fixed script of replies, in order. The last entry repeats once
/// the script runs out. Every request is recorded for inspection.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String, ModelError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<String, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// A model that always answers with `reply`.
    pub fn always(reply: impl Into<String>) -> Self {
        Self::new(vec![Ok(reply.into())])
    }

    /// Sleep before answering (to exercise call timeouts).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    fn next_reply(&self) -> Result<String, ModelError> {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Api("script exhausted".to_string())))
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| Err(ModelError::Api("script exhausted".to_string())))
        }
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_reply().map(|content| CompletionResponse {
            content,
            model: "scripted".to_string(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "scripted".to_string(),
            backend: "scripted",
            supports_json_schema: false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
