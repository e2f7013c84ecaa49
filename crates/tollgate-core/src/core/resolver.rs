//! Decision resolver: turns raised interrupts into decisions.
//!
//! Authorization interrupts wait on the provider's completion signal. Approval
//! interrupts ask the operator through an [`Approver`]. Decisions are made one
//! interrupt at a time, in raise order.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::events::{AgentEvent, EventSender};
use crate::core::interrupt::{Decision, Interrupt, InterruptBatch, ResumeInput};
use crate::tools::{AuthorizationStatus, ToolDefinition, ToolGateway};

/// Source of human yes/no answers.
#[async_trait]
pub trait Approver: Send {
    /// Asks whether `tool_name` may run with `proposed_input`.
    ///
    /// Blocks until a recognizable answer arrives. Errors only when no answer
    /// can ever arrive (input closed).
    async fn approve(&mut self, tool_name: &str, proposed_input: &Value) -> Result<bool>;
}

pub struct DecisionResolver<A> {
    tools: ToolGateway,
    approver: A,
    auth_timeout: Duration,
}

impl<A: Approver> DecisionResolver<A> {
    pub fn new(tools: ToolGateway, approver: A, auth_timeout: Duration) -> Self {
        Self {
            tools,
            approver,
            auth_timeout,
        }
    }

    /// Decides every interrupt in `batch` and builds the resumption input.
    ///
    /// # Errors
    /// Fails if the approver fails. Authorization failures never error; they
    /// resolve to a denial.
    pub async fn resolve(
        &mut self,
        mut batch: InterruptBatch,
        sender: &EventSender,
    ) -> Result<ResumeInput> {
        for index in 0..batch.len() {
            let Some(interrupt) = batch.begin(index).cloned() else {
                continue;
            };
            let decision = self.decide(&interrupt, sender).await?;
            batch.resolve(index, decision);
        }
        Ok(batch.into_resume()?)
    }

    async fn decide(&mut self, interrupt: &Interrupt, sender: &EventSender) -> Result<Decision> {
        match interrupt {
            Interrupt::AuthorizationRequired {
                tool_name,
                authorization_id,
                authorization_url,
                ..
            } => Ok(self
                .await_authorization(
                    tool_name,
                    authorization_id,
                    Some(authorization_url.clone()),
                    sender,
                )
                .await),
            Interrupt::HumanApprovalRequired {
                tool_name,
                proposed_input,
                ..
            } => {
                sender
                    .send_important(AgentEvent::ApprovalRequested {
                        tool_name: tool_name.clone(),
                        input: proposed_input.clone(),
                    })
                    .await;
                let approved = self
                    .approver
                    .approve(tool_name, proposed_input)
                    .await
                    .with_context(|| format!("approval for {tool_name}"))?;
                info!(tool = %tool_name, approved, "approval answered");
                sender
                    .send_important(AgentEvent::ApprovalResolved {
                        tool_name: tool_name.clone(),
                        approved,
                    })
                    .await;
                Ok(Decision::new(approved))
            }
        }
    }

    async fn await_authorization(
        &self,
        tool_name: &str,
        authorization_id: &str,
        url: Option<String>,
        sender: &EventSender,
    ) -> Decision {
        sender
            .send_important(AgentEvent::AuthorizationPending {
                tool_name: tool_name.to_string(),
                url,
            })
            .await;

        let (decision, reason) = match self
            .tools
            .wait_for_authorization(authorization_id, self.auth_timeout)
            .await
        {
            Ok(()) => {
                info!(tool = %tool_name, authorization_id, "authorization completed");
                (Decision::GRANTED, None)
            }
            Err(err) => {
                warn!(tool = %tool_name, authorization_id, "authorization wait failed: {err}");
                (Decision::DENIED, Some(err.to_string()))
            }
        };

        sender
            .send_important(AgentEvent::AuthorizationResolved {
                tool_name: tool_name.to_string(),
                authorized: decision.authorized,
                reason,
            })
            .await;
        decision
    }

    /// Authorizes every gated tool up front. Returns the names granted.
    ///
    /// Failures are reported through events and leave the tool gated.
    pub async fn preauthorize(&self, sender: &EventSender) -> Vec<String> {
        let gated: Vec<ToolDefinition> = self.tools.gated().cloned().collect();
        let mut granted = Vec::new();

        for tool in gated {
            let ticket = match self.tools.authorize(&tool).await {
                Ok(ticket) => ticket,
                Err(err) => {
                    warn!(tool = %tool.name, "pre-authorization failed: {err:#}");
                    sender
                        .send_important(AgentEvent::AuthorizationResolved {
                            tool_name: tool.name.clone(),
                            authorized: false,
                            reason: Some(format!("{err:#}")),
                        })
                        .await;
                    continue;
                }
            };

            let authorized = match ticket.status {
                AuthorizationStatus::Completed => true,
                AuthorizationStatus::Failed => {
                    sender
                        .send_important(AgentEvent::AuthorizationResolved {
                            tool_name: tool.name.clone(),
                            authorized: false,
                            reason: Some("authorization failed".to_string()),
                        })
                        .await;
                    false
                }
                AuthorizationStatus::Pending => {
                    self.await_authorization(&tool.name, &ticket.id, ticket.url, sender)
                        .await
                        .authorized
                }
            };
            if authorized {
                granted.push(tool.name);
            }
        }
        granted
    }
}
