//! Interrupt protocol: what a suspended turn asks for and how it is answered.
//!
//! A turn that needs external sign-off suspends with one or more
//! [`Interrupt`]s. Each one moves through
//! `Raised -> AwaitingDecision -> Resolved` inside an [`InterruptBatch`].
//! Only a fully resolved batch can be turned into a [`ResumeInput`], so a
//! resumption never carries a partial decision set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecisionMismatchError;

/// A suspension point raised during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interrupt {
    /// The tool needs an out-of-band grant (browser flow) before it may run.
    AuthorizationRequired {
        call_id: String,
        tool_name: String,
        authorization_id: String,
        authorization_url: String,
    },
    /// The operator must approve this specific call.
    HumanApprovalRequired {
        call_id: String,
        tool_name: String,
        proposed_input: Value,
    },
}

impl Interrupt {
    /// Id of the tool call that raised this interrupt.
    pub fn call_id(&self) -> &str {
        match self {
            Interrupt::AuthorizationRequired { call_id, .. }
            | Interrupt::HumanApprovalRequired { call_id, .. } => call_id,
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            Interrupt::AuthorizationRequired { tool_name, .. }
            | Interrupt::HumanApprovalRequired { tool_name, .. } => tool_name,
        }
    }
}

/// The resolution of one interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub authorized: bool,
}

impl Decision {
    pub const GRANTED: Decision = Decision { authorized: true };
    pub const DENIED: Decision = Decision { authorized: false };

    pub fn new(authorized: bool) -> Self {
        Self { authorized }
    }
}

/// What is submitted to resume a suspended turn.
///
/// Serializes as a bare decision when one interrupt was outstanding and as
/// an ordered list otherwise. The engine matches entries to calls by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResumePayload {
    Single(Decision),
    Many(Vec<Decision>),
}

impl ResumePayload {
    fn from_decisions(mut decisions: Vec<Decision>) -> Self {
        if decisions.len() == 1 {
            ResumePayload::Single(decisions.remove(0))
        } else {
            ResumePayload::Many(decisions)
        }
    }

    /// Decisions in interrupt order.
    pub fn decisions(&self) -> &[Decision] {
        match self {
            ResumePayload::Single(decision) => std::slice::from_ref(decision),
            ResumePayload::Many(decisions) => decisions,
        }
    }

    pub fn len(&self) -> usize {
        self.decisions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptState {
    Raised,
    AwaitingDecision,
    Resolved(Decision),
}

#[derive(Debug, Clone)]
struct PendingInterrupt {
    interrupt: Interrupt,
    state: InterruptState,
}

/// All interrupts raised by one driver run, in raise order.
#[derive(Debug, Clone)]
pub struct InterruptBatch {
    entries: Vec<PendingInterrupt>,
}

impl InterruptBatch {
    /// Returns `None` when there is nothing to decide.
    pub fn new(interrupts: Vec<Interrupt>) -> Option<Self> {
        if interrupts.is_empty() {
            return None;
        }
        let entries = interrupts
            .into_iter()
            .map(|interrupt| PendingInterrupt {
                interrupt,
                state: InterruptState::Raised,
            })
            .collect();
        Some(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn interrupts(&self) -> impl Iterator<Item = &Interrupt> {
        self.entries.iter().map(|entry| &entry.interrupt)
    }

    pub fn state(&self, index: usize) -> Option<InterruptState> {
        self.entries.get(index).map(|entry| entry.state)
    }

    /// Moves a raised interrupt to `AwaitingDecision` and returns it.
    ///
    /// Returns `None` for an unknown index or an interrupt already past `Raised`.
    pub fn begin(&mut self, index: usize) -> Option<&Interrupt> {
        let entry = self.entries.get_mut(index)?;
        if entry.state != InterruptState::Raised {
            return None;
        }
        entry.state = InterruptState::AwaitingDecision;
        Some(&entry.interrupt)
    }

    /// Records the decision for an interrupt. `Resolved` is terminal: a second
    /// decision for the same index is ignored and `false` is returned.
    pub fn resolve(&mut self, index: usize, decision: Decision) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        if matches!(entry.state, InterruptState::Resolved(_)) {
            return false;
        }
        entry.state = InterruptState::Resolved(decision);
        true
    }

    /// Builds the resumption input. Fails unless every interrupt is resolved.
    ///
    /// # Errors
    /// Returns `DecisionMismatchError::Unresolved` for a partial decision set.
    pub fn into_resume(self) -> Result<ResumeInput, DecisionMismatchError> {
        let expected = self.entries.len();
        let unresolved = self
            .entries
            .iter()
            .filter(|entry| !matches!(entry.state, InterruptState::Resolved(_)))
            .count();
        if unresolved > 0 {
            return Err(DecisionMismatchError::Unresolved {
                expected,
                unresolved,
            });
        }

        let mut interrupts = Vec::with_capacity(expected);
        let mut decisions = Vec::with_capacity(expected);
        for entry in self.entries {
            if let InterruptState::Resolved(decision) = entry.state {
                interrupts.push(entry.interrupt);
                decisions.push(decision);
            }
        }

        Ok(ResumeInput {
            interrupts,
            payload: ResumePayload::from_decisions(decisions),
        })
    }
}

/// A complete, ordered set of decisions paired with the interrupts they answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeInput {
    interrupts: Vec<Interrupt>,
    payload: ResumePayload,
}

impl ResumeInput {
    pub fn interrupts(&self) -> &[Interrupt] {
        &self.interrupts
    }

    pub fn payload(&self) -> &ResumePayload {
        &self.payload
    }

    /// Interrupts with their decisions, in raise order.
    pub fn pairs(&self) -> impl Iterator<Item = (&Interrupt, Decision)> {
        self.interrupts
            .iter()
            .zip(self.payload.decisions().iter().copied())
    }
}
