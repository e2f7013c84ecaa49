//! Error taxonomy for the agent loop.
//!
//! Interrupts are not errors: they are ordinary control flow carried by
//! `TurnOutcome`. The types here cover true failures only.

use thiserror::Error;

use crate::core::events::{AgentEvent, ErrorKind};
use crate::providers::ProviderError;

/// Missing or invalid startup configuration. Fatal: the chat loop never starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Missing ARCADE_USER_ID. Set it in the environment or as user_id in config.toml.")]
    MissingIdentity,

    #[error("Missing OPENAI_MODEL. Set it in the environment or as model in config.toml.")]
    MissingModel,

    #[error(
        "Tool catalog has {available} tools but the limit is {limit}. \
         Raise [tools].limit or set [tools].allow_truncation = true."
    )]
    ToolLimitExceeded { limit: usize, available: usize },

    #[error("{0}")]
    Invalid(String),
}

/// The reasoning engine failed outright mid-turn.
///
/// The turn is abandoned; the thread keeps whatever checkpoint the engine
/// emitted before failing.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TurnExecutionError {
    kind: ErrorKind,
    message: String,
    details: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TurnExecutionError {
    /// Wraps an engine failure, keeping provider error details when present.
    pub fn engine(err: anyhow::Error) -> Self {
        let (kind, message, details) = if let Some(provider_err) = err.downcast_ref::<ProviderError>()
        {
            (
                provider_err.kind.clone().into(),
                provider_err.message.clone(),
                provider_err.details.clone(),
            )
        } else {
            (ErrorKind::Internal, format!("{err:#}"), None)
        };
        Self {
            kind,
            message,
            details,
            source: Some(err.into()),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Event form for the renderer.
    pub fn to_event(&self) -> AgentEvent {
        AgentEvent::Error {
            kind: self.kind.clone(),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

impl From<DecisionMismatchError> for TurnExecutionError {
    fn from(err: DecisionMismatchError) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: err.to_string(),
            details: None,
            source: Some(Box::new(err)),
        }
    }
}

/// The external authorization grant was not observed.
///
/// Never propagated past the decision resolver: it becomes `authorized = false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationWaitError {
    #[error("authorization {authorization_id} was not completed within {timeout_secs}s")]
    Timeout {
        authorization_id: String,
        timeout_secs: u64,
    },

    #[error("authorization {authorization_id} failed")]
    Failed { authorization_id: String },

    #[error("authorization status check failed: {0}")]
    Provider(String),
}

/// Decisions do not line up with the interrupts they resolve.
///
/// `InterruptBatch::into_resume` is the only way to build a resumption
/// payload, so these surface from internal checks rather than user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecisionMismatchError {
    #[error("{unresolved} of {expected} interrupts have no decision")]
    Unresolved { expected: usize, unresolved: usize },

    #[error("expected {expected} decisions, received {received}")]
    Count { expected: usize, received: usize },

    #[error("resume does not match the interrupts pending on thread {thread_id}")]
    NotPending { thread_id: String },
}
