//! Execution driver: runs one engine pass against a thread.

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::core::engine::{ReasoningEngine, TurnInput, TurnRequest, TurnUpdate};
use crate::core::events::{AgentEvent, EventSender};
use crate::core::interrupt::Interrupt;
use crate::core::message::Message;
use crate::core::session::SessionStore;
use crate::error::{DecisionMismatchError, TurnExecutionError};
use crate::tools::ToolGateway;

/// What one driver run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Messages appended to the thread during the run, in order.
    pub messages: Vec<Message>,
    /// Every interrupt raised during the run, in raise order.
    pub interrupts: Vec<Interrupt>,
}

pub struct ExecutionDriver {
    engine: Arc<dyn ReasoningEngine>,
    tools: ToolGateway,
    store: Arc<SessionStore>,
    system_prompt: Option<String>,
}

impl ExecutionDriver {
    pub fn new(
        engine: Arc<dyn ReasoningEngine>,
        tools: ToolGateway,
        store: Arc<SessionStore>,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            engine,
            tools,
            store,
            system_prompt,
        }
    }

    pub fn tools(&self) -> &ToolGateway {
        &self.tools
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Records authorization grants obtained outside a turn (pre-authorization).
    pub async fn record_tool_grants(&self, thread_id: &str, tool_names: &[String]) {
        let mut thread = self.store.lock(thread_id).await;
        for name in tool_names {
            thread.grants.grant_tool(name);
        }
    }

    /// Runs the engine once for `thread_id`.
    ///
    /// The thread stays locked until the run ends. Messages are appended and
    /// forwarded as they arrive; checkpoints replace the stored one as soon as
    /// they are emitted, so a failing run still leaves its partial state.
    ///
    /// # Errors
    /// `TurnExecutionError` when the engine fails, or when a resumption does
    /// not answer exactly the interrupts pending on the thread.
    pub async fn run_turn(
        &self,
        thread_id: &str,
        input: TurnInput,
        sender: &EventSender,
    ) -> Result<TurnOutcome, TurnExecutionError> {
        let mut thread = self.store.lock(thread_id).await;

        match &input {
            TurnInput::User(text) => {
                if !thread.pending.is_empty() {
                    warn!(
                        thread_id,
                        pending = thread.pending.len(),
                        "new user input abandons pending interrupts"
                    );
                    thread.pending.clear();
                }
                thread.messages.push(Message::user(text.clone()));
            }
            TurnInput::Resume(resume) => {
                if thread.pending.as_slice() != resume.interrupts() {
                    let err: TurnExecutionError = DecisionMismatchError::NotPending {
                        thread_id: thread_id.to_string(),
                    }
                    .into();
                    sender.send_important(err.to_event()).await;
                    return Err(err);
                }
                for (interrupt, decision) in resume.pairs() {
                    info!(
                        thread_id,
                        call_id = interrupt.call_id(),
                        tool = interrupt.tool_name(),
                        authorized = decision.authorized,
                        "decision recorded"
                    );
                    thread.grants.record(interrupt, decision);
                }
                thread.pending.clear();
            }
        }

        debug!(thread_id, run = thread.runs + 1, "driver run started");
        let request = TurnRequest {
            thread_id: thread_id.to_string(),
            input,
            tools: self.tools.clone(),
            system_prompt: self.system_prompt.clone(),
            checkpoint: thread.checkpoint.clone(),
            grants: thread.grants.clone(),
        };
        let mut updates = self.engine.run_turn(request);

        let mut outcome = TurnOutcome::default();
        while let Some(update) = updates.next().await {
            match update {
                Ok(TurnUpdate::Delta(text)) => {
                    sender.send_delta(AgentEvent::AssistantDelta { text });
                }
                Ok(TurnUpdate::Message(message)) => {
                    thread.messages.push(message.clone());
                    outcome.messages.push(message.clone());
                    sender.send_important(AgentEvent::Message { message }).await;
                }
                Ok(TurnUpdate::Interrupt(interrupt)) => {
                    info!(
                        thread_id,
                        call_id = interrupt.call_id(),
                        tool = interrupt.tool_name(),
                        "interrupt raised"
                    );
                    sender
                        .send_important(AgentEvent::InterruptRaised {
                            interrupt: interrupt.clone(),
                        })
                        .await;
                    outcome.interrupts.push(interrupt);
                }
                Ok(TurnUpdate::Checkpoint(checkpoint)) => {
                    thread.checkpoint = Some(checkpoint);
                }
                Ok(TurnUpdate::ToolGranted(tool_name)) => {
                    debug!(thread_id, tool = %tool_name, "existing grant recorded");
                    thread.grants.grant_tool(&tool_name);
                }
                Err(err) => {
                    let err = TurnExecutionError::engine(err);
                    warn!(thread_id, kind = %err.kind(), "turn failed: {err}");
                    sender.send_important(err.to_event()).await;
                    thread.runs += 1;
                    return Err(err);
                }
            }
        }

        thread.pending.clone_from(&outcome.interrupts);
        thread.runs += 1;
        debug!(
            thread_id,
            messages = outcome.messages.len(),
            interrupts = outcome.interrupts.len(),
            "driver run finished"
        );
        Ok(outcome)
    }
}
