//! Resume loop: drives a user turn until it stops raising interrupts.

use anyhow::Result;
use tracing::{debug, info};

use crate::core::driver::ExecutionDriver;
use crate::core::engine::TurnInput;
use crate::core::events::{AgentEvent, EventSender};
use crate::core::interrupt::{InterruptBatch, ResumePayload};
use crate::core::message::Message;
use crate::core::resolver::{Approver, DecisionResolver};

/// What a completed user turn took.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSummary {
    /// Driver runs, including the first.
    pub iterations: usize,
    /// Messages appended across all runs.
    pub messages: Vec<Message>,
    /// Resumption payloads submitted, in order.
    pub submitted: Vec<ResumePayload>,
}

impl TurnSummary {
    /// Text of the last assistant message, if any.
    pub fn final_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == crate::core::message::Role::Assistant)
            .find_map(Message::text)
    }
}

/// Runs `text` on `thread_id`, resolving and resubmitting decisions until a
/// run finishes with no interrupts.
///
/// # Errors
/// Propagates driver failures (`TurnExecutionError`) and resolver failures.
pub async fn run_to_completion<A: Approver>(
    driver: &ExecutionDriver,
    resolver: &mut DecisionResolver<A>,
    thread_id: &str,
    text: &str,
    sender: &EventSender,
) -> Result<TurnSummary> {
    sender
        .send_important(AgentEvent::TurnStarted {
            thread_id: thread_id.to_string(),
        })
        .await;

    let mut summary = TurnSummary::default();
    let mut input = TurnInput::User(text.to_string());
    loop {
        let outcome = driver.run_turn(thread_id, input, sender).await?;
        summary.iterations += 1;
        summary.messages.extend(outcome.messages);

        let Some(batch) = InterruptBatch::new(outcome.interrupts) else {
            break;
        };
        debug!(thread_id, interrupts = batch.len(), "resolving interrupts");
        let resume = resolver.resolve(batch, sender).await?;
        summary.submitted.push(resume.payload().clone());
        input = TurnInput::Resume(resume);
    }

    info!(
        thread_id,
        iterations = summary.iterations,
        "turn completed"
    );
    sender
        .send_important(AgentEvent::TurnCompleted {
            iterations: summary.iterations,
        })
        .await;
    Ok(summary)
}
