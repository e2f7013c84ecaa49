//! Streamed stdout/stderr rendering of agent events.
//!
//! # Output contract
//! - assistant text, tool activity, authorization and approval status → stdout
//! - errors and authorization failures → stderr

use std::io::{Stderr, Stdout, Write, stderr, stdout};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tollgate_core::core::events::{
    AgentEvent, AgentEventRx, EventSender, ToolOutput, create_event_channel,
};
use tollgate_core::core::interrupt::Interrupt;
use tollgate_core::core::message::{MessageContent, Role};

const AGENT_PREFIX: &str = "🤖: ";
const SYSTEM_PREFIX: &str = "⚙️: ";
/// Longest tool input shown inline before it is cut.
const MAX_INLINE_INPUT: usize = 200;

pub const APPROVAL_QUESTION: &str = "Do you approve this tool call? (y/n)";

pub struct Renderer<O, E> {
    out: O,
    err: E,
    /// Assistant text printed on the current line so far.
    streamed: String,
}

impl Default for Renderer<Stdout, Stderr> {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer<Stdout, Stderr> {
    pub fn new() -> Self {
        Self::with_writers(stdout(), stderr())
    }
}

impl<O: Write, E: Write> Renderer<O, E> {
    pub fn with_writers(out: O, err: E) -> Self {
        Self {
            out,
            err,
            streamed: String::new(),
        }
    }

    pub fn handle_event(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::AssistantDelta { text } => {
                if text.is_empty() {
                    return;
                }
                if self.streamed.is_empty() {
                    let _ = write!(self.out, "{AGENT_PREFIX}");
                }
                self.streamed.push_str(text);
                let _ = write!(self.out, "{text}");
                let _ = self.out.flush();
            }
            AgentEvent::Message { message } => match &message.content {
                MessageContent::Text { text } if message.role == Role::Assistant => {
                    // Deltas are best effort; reprint when some were dropped.
                    let complete = self.streamed == *text;
                    self.end_stream();
                    if !complete {
                        let _ = writeln!(self.out, "{AGENT_PREFIX}{text}");
                    }
                }
                MessageContent::Text { .. } => {}
                MessageContent::ToolCalls { calls } => {
                    self.end_stream();
                    for call in calls {
                        let _ = writeln!(
                            self.out,
                            "{AGENT_PREFIX}calling {} {}",
                            call.name,
                            inline_json(&call.input)
                        );
                    }
                }
                MessageContent::ToolResult {
                    tool_name, output, ..
                } => {
                    self.end_stream();
                    let _ = writeln!(self.out, "{AGENT_PREFIX}{}", tool_summary(tool_name, output));
                }
            },
            AgentEvent::InterruptRaised { interrupt } => {
                if let Interrupt::AuthorizationRequired { tool_name, .. } = interrupt {
                    self.end_stream();
                    let _ = writeln!(
                        self.out,
                        "{SYSTEM_PREFIX}Authorization required for tool call {tool_name}"
                    );
                }
            }
            AgentEvent::AuthorizationPending { url, .. } => {
                self.end_stream();
                if let Some(url) = url {
                    let _ = writeln!(self.out, "{SYSTEM_PREFIX}Please authorize in your browser {url}");
                }
                let _ = writeln!(
                    self.out,
                    "{SYSTEM_PREFIX}Waiting for you to complete authorization..."
                );
            }
            AgentEvent::AuthorizationResolved {
                tool_name,
                authorized,
                reason,
            } => {
                if *authorized {
                    let _ = writeln!(
                        self.out,
                        "{SYSTEM_PREFIX}Authorization granted. Resuming execution..."
                    );
                } else {
                    let _ = writeln!(
                        self.err,
                        "{SYSTEM_PREFIX}Error waiting for authorization of {tool_name} to complete: {}",
                        reason.as_deref().unwrap_or("not completed")
                    );
                }
            }
            AgentEvent::ApprovalRequested { tool_name, input } => {
                self.end_stream();
                let _ = writeln!(
                    self.out,
                    "{SYSTEM_PREFIX}Human in the loop required for tool call {tool_name}"
                );
                let _ = writeln!(
                    self.out,
                    "{SYSTEM_PREFIX}Please approve the tool call {}",
                    inline_json(input)
                );
                let _ = write!(self.out, "{APPROVAL_QUESTION} ");
                let _ = self.out.flush();
            }
            AgentEvent::ApprovalResolved { approved, .. } => {
                let verdict = if *approved { "approved" } else { "rejected" };
                let _ = writeln!(self.out, "{SYSTEM_PREFIX}Tool call {verdict}.");
            }
            AgentEvent::Error {
                kind,
                message,
                details,
            } => {
                self.end_stream();
                let _ = writeln!(self.err, "Error [{kind}]: {message}");
                if let Some(details) = details {
                    let _ = writeln!(self.err, "  Details: {details}");
                }
            }
            AgentEvent::TurnStarted { .. } => {}
            AgentEvent::TurnCompleted { .. } => self.end_stream(),
        }
    }

    fn end_stream(&mut self) {
        if !self.streamed.is_empty() {
            let _ = writeln!(self.out);
            self.streamed.clear();
        }
        let _ = self.out.flush();
    }

    /// Terminates any half-written assistant line.
    pub fn finish(&mut self) {
        self.end_stream();
    }
}

fn inline_json(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() <= MAX_INLINE_INPUT {
        return text;
    }
    let cut: String = text.chars().take(MAX_INLINE_INPUT).collect();
    format!("{cut}…")
}

fn tool_summary(tool_name: &str, output: &ToolOutput) -> String {
    match output {
        ToolOutput::Success { .. } => format!("{tool_name} finished"),
        ToolOutput::Failure { error } => {
            format!("{tool_name} failed ({}): {}", error.code, error.message)
        }
        ToolOutput::Canceled { message } => format!("{tool_name} canceled: {message}"),
    }
}

/// Spawns a renderer task that consumes events until the channel closes.
///
/// `prompt_shown` is notified once an approval question is on screen.
pub fn spawn_renderer(mut rx: AgentEventRx, prompt_shown: Arc<Notify>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut renderer = Renderer::new();

        while let Some(event) = rx.recv().await {
            renderer.handle_event(&event);
            if matches!(&*event, AgentEvent::ApprovalRequested { .. }) {
                prompt_shown.notify_one();
            }
        }

        renderer.finish();
    })
}

/// A renderer fed by its own channel, for one turn.
pub struct RenderTask {
    sender: EventSender,
    handle: JoinHandle<()>,
}

impl RenderTask {
    pub fn start(prompt_shown: &Arc<Notify>) -> Self {
        let (tx, rx) = create_event_channel();
        Self {
            sender: EventSender::new(tx),
            handle: spawn_renderer(rx, Arc::clone(prompt_shown)),
        }
    }

    pub fn sender(&self) -> &EventSender {
        &self.sender
    }

    /// Closes the channel and waits until every event is on screen.
    pub async fn finish(self) {
        drop(self.sender);
        let _ = self.handle.await;
    }
}
