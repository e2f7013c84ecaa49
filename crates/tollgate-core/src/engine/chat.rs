//! Tool-calling chat engine over the chat-completions API.
//!
//! Each run alternates model requests and tool execution until the model
//! answers without tool calls. Before a batch of calls executes, every call is
//! checked against its gates. If any gate is undecided the engine saves the
//! batch in its checkpoint, raises one interrupt per undecided gate, and ends
//! the run. The next run picks the batch up from the checkpoint, applies the
//! decisions by position and carries on.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_stream::try_stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::core::engine::{ReasoningEngine, TurnInput, TurnRequest, TurnUpdate, UpdateStream};
use crate::core::events::ToolOutput;
use crate::core::grants::GrantLedger;
use crate::core::interrupt::{Decision, Interrupt, ResumeInput};
use crate::core::message::{Message, ToolCall};
use crate::core::session::Checkpoint;
use crate::error::DecisionMismatchError;
use crate::providers::{
    ChatContentBlock, ChatMessage, ContentBlockType, OpenAIChatCompletionsClient, ProviderError,
    StreamEvent,
};
use crate::tools::{AuthorizationStatus, ToolGateway, ToolResult};

pub const DEFAULT_MAX_STEPS: usize = 25;

pub struct ChatEngine {
    client: Arc<OpenAIChatCompletionsClient>,
    max_steps: usize,
}

impl ChatEngine {
    pub fn new(client: OpenAIChatCompletionsClient, max_steps: usize) -> Self {
        Self {
            client: Arc::new(client),
            max_steps,
        }
    }
}

/// Which gate of a call an interrupt stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Gate {
    Authorization,
    Approval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AwaitingGate {
    call_id: String,
    gate: Gate,
}

/// A tool call from the last model reply that has not produced a result yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingCall {
    call: ToolCall,
    #[serde(default)]
    authorization: Option<bool>,
    #[serde(default)]
    approval: Option<bool>,
    /// Set up front when the call can never run (malformed arguments).
    #[serde(default)]
    result: Option<ToolOutput>,
}

impl PendingCall {
    fn new(call: ToolCall, result: Option<ToolOutput>) -> Self {
        Self {
            call,
            authorization: None,
            approval: None,
            result,
        }
    }
}

/// Everything the engine needs to pick a thread back up.
#[derive(Debug, Default, Serialize, Deserialize)]
struct EngineState {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    pending: Vec<PendingCall>,
    /// Gates raised by the last run, in raise order.
    #[serde(default)]
    awaiting: Vec<AwaitingGate>,
}

impl EngineState {
    fn restore(checkpoint: Option<Checkpoint>) -> Result<Self> {
        match checkpoint {
            Some(checkpoint) => serde_json::from_value(checkpoint.into_value())
                .context("restore chat engine checkpoint"),
            None => Ok(Self::default()),
        }
    }

    fn checkpoint(&self) -> Result<Checkpoint> {
        Ok(Checkpoint::new(
            serde_json::to_value(self).context("save chat engine checkpoint")?,
        ))
    }

    /// Closes out calls left pending by an abandoned run.
    fn cancel_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let canceled = ToolOutput::canceled("Superseded by new user input");
        let results = self
            .pending
            .drain(..)
            .map(|pending| ToolResult::from_output(pending.call.id, &canceled))
            .collect();
        self.messages.push(ChatMessage::tool_results(results));
        self.awaiting.clear();
    }

    /// Applies resumption decisions, by position, to the gates raised last run.
    fn apply_decisions(&mut self, resume: &ResumeInput) -> Result<(), DecisionMismatchError> {
        let decisions = resume.payload().decisions();
        if decisions.len() != self.awaiting.len() {
            return Err(DecisionMismatchError::Count {
                expected: self.awaiting.len(),
                received: decisions.len(),
            });
        }

        for (gate, Decision { authorized }) in self.awaiting.drain(..).zip(decisions.iter().copied())
        {
            if let Some(pending) = self
                .pending
                .iter_mut()
                .find(|pending| pending.call.id == gate.call_id)
            {
                match gate.gate {
                    Gate::Authorization => pending.authorization = Some(authorized),
                    Gate::Approval => pending.approval = Some(authorized),
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ToolUseBuilder {
    index: usize,
    id: String,
    name: String,
    input_json: String,
}

impl ToolUseBuilder {
    /// Parses the accumulated arguments. Malformed input yields a preset
    /// failure so the model is told instead of the call running.
    fn finalize(self) -> PendingCall {
        let raw = if self.input_json.trim().is_empty() {
            "{}"
        } else {
            self.input_json.as_str()
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(input) => PendingCall::new(ToolCall::new(self.id, self.name, input), None),
            Err(err) => {
                let output = ToolOutput::failure(
                    "invalid_input",
                    format!("Failed to parse tool arguments: {err}"),
                    Some(self.input_json.clone()),
                );
                let input = json!({ "_raw_malformed": self.input_json });
                PendingCall::new(ToolCall::new(self.id, self.name, input), Some(output))
            }
        }
    }
}

#[derive(Debug, Default)]
struct AssistantTurnBuilder {
    text: String,
    tool_uses: Vec<ToolUseBuilder>,
    stop_reason: Option<String>,
}

impl AssistantTurnBuilder {
    fn find_tool_use_mut(&mut self, index: usize) -> Option<&mut ToolUseBuilder> {
        self.tool_uses.iter_mut().find(|t| t.index == index)
    }

    /// Folds one stream event in. Returns text to forward as a delta.
    fn apply(&mut self, event: StreamEvent) -> Result<Option<String>> {
        match event {
            StreamEvent::TextDelta { text, .. } if !text.is_empty() => {
                self.text.push_str(&text);
                return Ok(Some(text));
            }
            StreamEvent::ContentBlockStart {
                index,
                block_type: ContentBlockType::ToolUse,
                id,
                name,
            } => self.tool_uses.push(ToolUseBuilder {
                index,
                id: id.unwrap_or_default(),
                name: name.unwrap_or_default(),
                input_json: String::new(),
            }),
            StreamEvent::InputJsonDelta {
                index,
                partial_json,
            } => {
                if let Some(tool_use) = self.find_tool_use_mut(index) {
                    tool_use.input_json.push_str(&partial_json);
                }
            }
            StreamEvent::MessageDelta { stop_reason, usage } => {
                if let Some(usage) = usage {
                    debug!(
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        "model usage"
                    );
                }
                self.stop_reason = stop_reason;
            }
            StreamEvent::Error {
                error_type,
                message,
            } => return Err(ProviderError::api_error(&error_type, &message).into()),
            _ => {}
        }
        Ok(None)
    }
}

fn check_step_limit(steps: usize, max_steps: usize) -> Result<()> {
    if steps >= max_steps {
        return Err(anyhow!(
            "Stopped after {max_steps} model requests without a final answer"
        ));
    }
    Ok(())
}

/// A pending flow is only actionable through its URL.
fn pending_url(tool_name: &str, url: Option<String>) -> Result<String> {
    url.ok_or_else(|| anyhow!("Authorization for {tool_name} is pending but no URL was returned"))
}

/// Decides what a pending call gets when it reaches execution.
async fn execute_pending(pending: &PendingCall, tools: &ToolGateway, grants: &GrantLedger) -> ToolOutput {
    if let Some(result) = &pending.result {
        return result.clone();
    }
    if pending.authorization == Some(false) {
        return ToolOutput::failure(
            "not_authorized",
            "The user did not authorize this tool call.",
            None,
        );
    }
    if pending.approval == Some(false) {
        return ToolOutput::failure(
            "not_approved",
            "The user rejected this tool call.",
            None,
        );
    }
    tools.invoke(&pending.call, grants).await
}

impl ReasoningEngine for ChatEngine {
    fn run_turn(&self, request: TurnRequest) -> UpdateStream {
        let client = Arc::clone(&self.client);
        let max_steps = self.max_steps;

        let updates = try_stream! {
            let TurnRequest {
                thread_id,
                input,
                tools,
                system_prompt,
                checkpoint,
                mut grants,
            } = request;
            let mut state = EngineState::restore(checkpoint)?;

            match input {
                TurnInput::User(text) => {
                    state.cancel_pending();
                    state.messages.push(ChatMessage::user(text));
                    yield TurnUpdate::Checkpoint(state.checkpoint()?);
                }
                TurnInput::Resume(resume) => {
                    state.apply_decisions(&resume)?;
                }
            }

            let mut steps = 0;
            loop {
                if !state.pending.is_empty() {
                    let mut interrupts = Vec::new();
                    let mut granted = Vec::new();
                    for pending in &mut state.pending {
                        if pending.result.is_some() {
                            continue;
                        }
                        let Some(tool) = tools.get(&pending.call.name) else {
                            continue;
                        };

                        if tool.requires_authorization && pending.authorization.is_none() {
                            if grants.is_tool_authorized(&tool.name) {
                                pending.authorization = Some(true);
                            } else {
                                let ticket = tools.authorize(tool).await?;
                                match ticket.status {
                                    AuthorizationStatus::Completed => {
                                        grants.grant_tool(&tool.name);
                                        granted.push(tool.name.clone());
                                        pending.authorization = Some(true);
                                    }
                                    AuthorizationStatus::Failed => {
                                        debug!(
                                            %thread_id,
                                            tool = %tool.name,
                                            "authorization refused by provider"
                                        );
                                        pending.authorization = Some(false);
                                    }
                                    AuthorizationStatus::Pending => {
                                        let url = pending_url(&tool.name, ticket.url)?;
                                        state.awaiting.push(AwaitingGate {
                                            call_id: pending.call.id.clone(),
                                            gate: Gate::Authorization,
                                        });
                                        interrupts.push(Interrupt::AuthorizationRequired {
                                            call_id: pending.call.id.clone(),
                                            tool_name: tool.name.clone(),
                                            authorization_id: ticket.id,
                                            authorization_url: url,
                                        });
                                        // Approval is asked only once authorization is settled.
                                        continue;
                                    }
                                }
                            }
                        }

                        if tool.requires_approval
                            && pending.approval.is_none()
                            && pending.authorization != Some(false)
                        {
                            state.awaiting.push(AwaitingGate {
                                call_id: pending.call.id.clone(),
                                gate: Gate::Approval,
                            });
                            interrupts.push(Interrupt::HumanApprovalRequired {
                                call_id: pending.call.id.clone(),
                                tool_name: tool.name.clone(),
                                proposed_input: pending.call.input.clone(),
                            });
                        }
                    }

                    for tool_name in granted {
                        yield TurnUpdate::ToolGranted(tool_name);
                    }

                    if !interrupts.is_empty() {
                        debug!(%thread_id, count = interrupts.len(), "suspending on gated tool calls");
                        yield TurnUpdate::Checkpoint(state.checkpoint()?);
                        for interrupt in interrupts {
                            yield TurnUpdate::Interrupt(interrupt);
                        }
                        return;
                    }

                    let mut results = Vec::with_capacity(state.pending.len());
                    for pending in std::mem::take(&mut state.pending) {
                        let output = execute_pending(&pending, &tools, &grants).await;
                        results.push(ToolResult::from_output(pending.call.id.clone(), &output));
                        yield TurnUpdate::Message(Message::tool_result(
                            pending.call.id,
                            pending.call.name,
                            output,
                        ));
                    }
                    state.messages.push(ChatMessage::tool_results(results));
                    yield TurnUpdate::Checkpoint(state.checkpoint()?);
                }

                check_step_limit(steps, max_steps)?;
                steps += 1;

                let mut events = client
                    .send_messages_stream(&state.messages, tools.definitions(), system_prompt.as_deref())
                    .await?;
                let mut turn = AssistantTurnBuilder::default();
                while let Some(event) = events.next().await {
                    if let Some(text) = turn.apply(event?)? {
                        yield TurnUpdate::Delta(text);
                    }
                }
                debug!(%thread_id, step = steps, stop_reason = ?turn.stop_reason, tool_calls = turn.tool_uses.len(), "model replied");

                let mut blocks = Vec::new();
                if !turn.text.is_empty() {
                    blocks.push(ChatContentBlock::Text {
                        text: turn.text.clone(),
                    });
                    yield TurnUpdate::Message(Message::assistant(turn.text.clone()));
                }

                if turn.tool_uses.is_empty() {
                    if !blocks.is_empty() {
                        state.messages.push(ChatMessage::assistant_blocks(blocks));
                    }
                    yield TurnUpdate::Checkpoint(state.checkpoint()?);
                    break;
                }

                let pending: Vec<PendingCall> = turn
                    .tool_uses
                    .into_iter()
                    .map(ToolUseBuilder::finalize)
                    .collect();
                let calls: Vec<ToolCall> = pending.iter().map(|p| p.call.clone()).collect();
                blocks.extend(calls.iter().map(|call| ChatContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                }));
                state.messages.push(ChatMessage::assistant_blocks(blocks));
                state.pending = pending;
                yield TurnUpdate::Message(Message::tool_calls(calls));
            }
        };
        updates.boxed()
    }
}
