//! Reasoning engine seam.
//!
//! An engine turns a [`TurnRequest`] into a finite, in-order stream of
//! [`TurnUpdate`]s. The driver consumes the stream within one turn; the
//! engine keeps nothing between turns except what it emits as checkpoints.

use futures_util::stream::BoxStream;

use crate::core::grants::GrantLedger;
use crate::core::interrupt::{Interrupt, ResumeInput};
use crate::core::message::Message;
use crate::core::session::Checkpoint;
use crate::tools::ToolGateway;

/// What starts a driver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    /// A new user message.
    User(String),
    /// Decisions for the interrupts the previous run raised.
    Resume(ResumeInput),
}

/// One incremental update from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    /// Streaming assistant text, for display only.
    Delta(String),
    /// A complete message to append to the thread.
    Message(Message),
    /// Execution cannot continue without a decision.
    Interrupt(Interrupt),
    /// New continuation state. Replaces the stored checkpoint immediately.
    Checkpoint(Checkpoint),
    /// The tool provider already holds a grant for this tool.
    ToolGranted(String),
}

pub type UpdateStream = BoxStream<'static, anyhow::Result<TurnUpdate>>;

/// Everything the engine needs for one run.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: String,
    pub input: TurnInput,
    pub tools: ToolGateway,
    pub system_prompt: Option<String>,
    /// Last checkpoint stored for the thread, passed back verbatim.
    pub checkpoint: Option<Checkpoint>,
    /// Decisions recorded on the thread so far, including this run's.
    pub grants: GrantLedger,
}

pub trait ReasoningEngine: Send + Sync {
    fn run_turn(&self, request: TurnRequest) -> UpdateStream;
}
