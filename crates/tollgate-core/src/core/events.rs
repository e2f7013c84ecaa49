//! Agent event types for streaming display.
//!
//! The driver, resolver and resume loop never write to the terminal. They
//! emit `AgentEvent`s on a bounded channel and the front end renders them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::interrupt::Interrupt;
use crate::core::message::Message;
use crate::providers::ProviderErrorKind;

/// Events emitted while a turn runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A user turn has started on a thread.
    TurnStarted { thread_id: String },

    /// Incremental text chunk from the assistant.
    AssistantDelta { text: String },

    /// A complete message appended to the thread (assistant text, tool calls,
    /// or tool result).
    Message { message: Message },

    /// Execution suspended on an interrupt.
    InterruptRaised { interrupt: Interrupt },

    /// An authorization grant is being waited on.
    AuthorizationPending {
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },

    /// The authorization wait finished.
    AuthorizationResolved {
        tool_name: String,
        authorized: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// The operator is being asked to approve a tool call.
    ApprovalRequested { tool_name: String, input: Value },

    /// The operator answered an approval request.
    ApprovalResolved { tool_name: String, approved: bool },

    /// An error occurred during execution.
    Error {
        /// Error category for structured handling
        kind: ErrorKind,
        /// One-line summary
        message: String,
        /// Optional additional details
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    /// The user turn finished with no outstanding interrupts.
    TurnCompleted { iterations: usize },
}

/// Error categories for `AgentEvent::Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection/request timeout
    Timeout,
    /// Response parsing failed
    Parse,
    /// API-level error from provider
    ApiError,
    /// Internal/unknown error
    Internal,
}

impl From<ProviderErrorKind> for ErrorKind {
    fn from(kind: ProviderErrorKind) -> Self {
        match kind {
            ProviderErrorKind::HttpStatus => ErrorKind::HttpStatus,
            ProviderErrorKind::Timeout => ErrorKind::Timeout,
            ProviderErrorKind::Parse => ErrorKind::Parse,
            ProviderErrorKind::ApiError => ErrorKind::ApiError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::HttpStatus => write!(f, "http_status"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Parse => write!(f, "parse"),
            ErrorKind::ApiError => write!(f, "api_error"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Channel-based event sender (async, bounded).
pub type AgentEventTx = mpsc::Sender<Arc<AgentEvent>>;

/// Channel-based event receiver (async, bounded).
pub type AgentEventRx = mpsc::Receiver<Arc<AgentEvent>>;

/// Default channel capacity for event streams.
///
/// Set higher (128) to accommodate best-effort delta sends without blocking.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Creates a bounded event channel with the default capacity.
pub fn create_event_channel() -> (AgentEventTx, AgentEventRx) {
    mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY)
}

/// Event sender wrapper that provides best-effort and reliable send modes.
///
/// Use `send_delta()` for high-volume events (`AssistantDelta`) that can be
/// dropped if the consumer is slow. Use `send_important()` for everything
/// the operator must see (messages, authorization URLs, approval prompts).
#[derive(Clone)]
pub struct EventSender {
    tx: AgentEventTx,
}

impl EventSender {
    pub fn new(tx: AgentEventTx) -> Self {
        Self { tx }
    }

    /// Sender whose events go nowhere. Handy for callers that do not render.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    /// Best-effort send: never awaits, drops if channel is full.
    pub fn send_delta(&self, ev: AgentEvent) {
        let _ = self.tx.try_send(Arc::new(ev));
    }

    /// Reliable send: awaits delivery.
    pub async fn send_important(&self, ev: AgentEvent) {
        let _ = self.tx.send(Arc::new(ev)).await;
    }
}

/// Structured envelope for tool outputs.
///
/// - Success: `{"ok": true, "data": { ... }}`
/// - Failure: `{"ok": false, "error": { "code": "...", "message": "...", "details": "..." (optional) }}`
/// - Canceled: serializes as failure with `code: "canceled"` but deserializes back to Canceled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    Success { data: Value },
    Failure { error: ToolError },
    /// The call was abandoned before it ran (serializes as failure with code="canceled").
    Canceled { message: String },
}

/// Special error code that indicates a canceled operation.
const CANCELED_ERROR_CODE: &str = "canceled";

impl Serialize for ToolOutput {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("ToolOutput", 2)?;
        match self {
            ToolOutput::Success { data } => {
                state.serialize_field("ok", &true)?;
                state.serialize_field("data", data)?;
            }
            ToolOutput::Failure { error } => {
                state.serialize_field("ok", &false)?;
                state.serialize_field("error", error)?;
            }
            ToolOutput::Canceled { message } => {
                let error = ToolError {
                    code: CANCELED_ERROR_CODE.to_string(),
                    message: message.clone(),
                    details: None,
                };
                state.serialize_field("ok", &false)?;
                state.serialize_field("error", &error)?;
            }
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for ToolOutput {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawToolOutput {
            ok: bool,
            #[serde(default)]
            data: Option<Value>,
            #[serde(default)]
            error: Option<ToolError>,
        }

        let raw = RawToolOutput::deserialize(deserializer)?;

        if raw.ok {
            Ok(ToolOutput::Success {
                data: raw.data.unwrap_or(Value::Null),
            })
        } else if let Some(error) = raw.error {
            if error.code == CANCELED_ERROR_CODE {
                Ok(ToolOutput::Canceled {
                    message: error.message,
                })
            } else {
                Ok(ToolOutput::Failure { error })
            }
        } else {
            Ok(ToolOutput::failure("unknown", "Unknown error", None))
        }
    }
}

impl ToolOutput {
    /// Creates a successful tool output.
    pub fn success(data: Value) -> Self {
        ToolOutput::Success { data }
    }

    /// Creates a failed tool output.
    pub fn failure(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        ToolOutput::Failure {
            error: ToolError {
                code: code.into(),
                message: message.into(),
                details,
            },
        }
    }

    /// Creates a canceled tool output.
    pub fn canceled(message: impl Into<String>) -> Self {
        ToolOutput::Canceled {
            message: message.into(),
        }
    }

    /// Returns true if this output represents success.
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolOutput::Success { .. })
    }

    /// Returns the data if this is a successful output.
    pub fn data(&self) -> Option<&Value> {
        match self {
            ToolOutput::Success { data } => Some(data),
            ToolOutput::Failure { .. } | ToolOutput::Canceled { .. } => None,
        }
    }

    /// Returns the error code and message for failures and cancellations.
    pub fn error_info(&self) -> Option<(&str, &str)> {
        match self {
            ToolOutput::Success { .. } => None,
            ToolOutput::Failure { error } => Some((error.code.as_str(), error.message.as_str())),
            ToolOutput::Canceled { message } => Some((CANCELED_ERROR_CODE, message.as_str())),
        }
    }

    /// Converts the tool output to a JSON string for sending to the model.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"ok":false,"error":{"code":"serialize_error","message":"Failed to serialize tool output"}}"#.to_string()
        })
    }
}

/// Error details for failed tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
