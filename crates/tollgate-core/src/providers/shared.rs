//! Provider-agnostic types shared by the model client and the engine.

use std::fmt;

use anyhow::{Context, Result, bail};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolResult;

/// Standard User-Agent header for outbound API requests.
pub const USER_AGENT: &str = concat!("tollgate/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Config resolution helpers
// ============================================================================

/// Resolves an API key with precedence: config > env.
///
/// `env` looks up environment variables; callers pass `std::env::var(..).ok()`
/// in production and a fixed map in tests.
///
/// # Errors
/// Returns an error if neither source has a non-empty key.
pub fn resolve_api_key(
    config_api_key: Option<&str>,
    env_var: &str,
    config_section: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<String> {
    if let Some(key) = config_api_key {
        let trimmed = key.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    match env(env_var) {
        Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => bail!("No API key available. Set {env_var} or api_key in [providers.{config_section}]."),
    }
}

/// Resolves a base URL with precedence: env > config > default.
///
/// # Errors
/// Returns an error if the chosen URL does not parse.
pub fn resolve_base_url(
    config_base_url: Option<&str>,
    env_var: &str,
    default_url: &str,
    provider_name: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<String> {
    if let Some(env_url) = env(env_var) {
        let trimmed = env_url.trim();
        if !trimmed.is_empty() {
            validate_url(trimmed, provider_name)?;
            return Ok(trimmed.trim_end_matches('/').to_string());
        }
    }

    if let Some(config_url) = config_base_url {
        let trimmed = config_url.trim();
        if !trimmed.is_empty() {
            validate_url(trimmed, provider_name)?;
            return Ok(trimmed.trim_end_matches('/').to_string());
        }
    }

    Ok(default_url.to_string())
}

fn validate_url(url: &str, provider_name: &str) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("Invalid {provider_name} base URL: {url}"))?;
    Ok(())
}

/// Content block kinds emitted by the streaming API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentBlockType {
    Text,
    ToolUse,
}

/// Content block in a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult(ToolResult),
}

/// Message content - either simple text or structured blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ChatContentBlock>),
}

/// A chat message in provider wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    /// Creates an assistant message with content blocks (for tool use).
    pub fn assistant_blocks(blocks: Vec<ChatContentBlock>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Creates a user message carrying tool results.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        let blocks = results
            .into_iter()
            .map(ChatContentBlock::ToolResult)
            .collect();
        Self {
            role: "user".to_string(),
            content: MessageContent::Blocks(blocks),
        }
    }
}

/// Categories of provider errors for consistent error handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection timeout or request timeout
    Timeout,
    /// Failed to parse response (JSON parse error, invalid SSE, etc.)
    Parse,
    /// API-level error returned by the provider (e.g., overloaded, `rate_limit`)
    ApiError,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::HttpStatus => write!(f, "http_status"),
            ProviderErrorKind::Timeout => write!(f, "timeout"),
            ProviderErrorKind::Parse => write!(f, "parse"),
            ProviderErrorKind::ApiError => write!(f, "api_error"),
        }
    }
}

/// Structured error from a remote API with kind and details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw error body)
    pub details: Option<String>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Creates an HTTP status error, lifting `error.message` out of a JSON body.
    pub fn http_status(status: u16, body: &str) -> Self {
        if body.is_empty() {
            return Self::new(ProviderErrorKind::HttpStatus, format!("HTTP {status}"));
        }

        let extracted = serde_json::from_str::<Value>(body).ok().and_then(|json| {
            let error = json.get("error")?;
            error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .map(str::to_string)
        });

        let message = match extracted {
            Some(msg) => format!("HTTP {status}: {msg}"),
            None => format!("HTTP {status}"),
        };
        Self {
            kind: ProviderErrorKind::HttpStatus,
            message,
            details: Some(body.to_string()),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    /// Creates an API error (from mid-stream error event).
    pub fn api_error(error_type: &str, message: &str) -> Self {
        Self::new(ProviderErrorKind::ApiError, format!("{error_type}: {message}"))
    }

    /// Maps a transport failure onto a provider error.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::timeout(format!("Connection failed: {e}"))
        } else if e.is_decode() {
            Self::new(ProviderErrorKind::Parse, format!("Invalid response body: {e}"))
        } else {
            Self::new(ProviderErrorKind::HttpStatus, format!("Network error: {e}"))
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Token usage reported at the end of a model reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Events emitted during streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A content block has started (text or `tool_use`)
    ContentBlockStart {
        index: usize,
        block_type: ContentBlockType,
        /// For `tool_use` blocks: the tool call id
        id: Option<String>,
        /// For `tool_use` blocks: the tool name
        name: Option<String>,
    },
    TextDelta { index: usize, text: String },
    /// Partial JSON delta for tool input
    InputJsonDelta { index: usize, partial_json: String },
    ContentBlockCompleted { index: usize },
    /// Final stop reason and usage
    MessageDelta {
        stop_reason: Option<String>,
        usage: Option<Usage>,
    },
    MessageCompleted,
    /// Error event from the API
    Error { error_type: String, message: String },
}

/// Boxed stream of provider events.
pub type ProviderStream = BoxStream<'static, ProviderResult<StreamEvent>>;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_api_key_prefers_config() {
        let env = env_from(&[("OPENAI_API_KEY", "from-env")]);
        let key = resolve_api_key(Some(" from-config "), "OPENAI_API_KEY", "openai", &env).unwrap();
        assert_eq!(key, "from-config");

        let key = resolve_api_key(Some("  "), "OPENAI_API_KEY", "openai", &env).unwrap();
        assert_eq!(key, "from-env");
    }

    #[test]
    fn test_api_key_missing_names_both_sources() {
        let env = env_from(&[]);
        let err = resolve_api_key(None, "ARCADE_API_KEY", "arcade", &env).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No API key available. Set ARCADE_API_KEY or api_key in [providers.arcade]."
        );
    }

    #[test]
    fn test_base_url_precedence_and_validation() {
        let env = env_from(&[("OPENAI_BASE_URL", "http://127.0.0.1:9999/")]);
        let url = resolve_base_url(
            Some("https://config.example.com"),
            "OPENAI_BASE_URL",
            "https://api.openai.com/v1",
            "OpenAI",
            &env,
        )
        .unwrap();
        assert_eq!(url, "http://127.0.0.1:9999");

        let env = env_from(&[]);
        let url = resolve_base_url(None, "OPENAI_BASE_URL", "https://default", "OpenAI", &env)
            .unwrap();
        assert_eq!(url, "https://default");

        let err = resolve_base_url(Some("not a url"), "X", "https://default", "OpenAI", &env)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid OpenAI base URL"));
    }

    #[test]
    fn test_http_status_extracts_message() {
        let err = ProviderError::http_status(401, r#"{"error":{"message":"bad key"}}"#);
        assert_eq!(err.message, "HTTP 401: bad key");
        assert!(err.details.is_some());

        let err = ProviderError::http_status(500, "");
        assert_eq!(err.message, "HTTP 500");
        assert!(err.details.is_none());
    }
}
