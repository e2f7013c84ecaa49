//! Per-call record of resolved decisions.
//!
//! The driver records every resolved interrupt here before resuming. The tool
//! gateway consults it on every invocation and refuses gated calls without a
//! positive decision for that exact call id, or an earlier authorization
//! grant for the same tool on this thread.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::interrupt::{Decision, Interrupt};
use crate::tools::ToolDefinition;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantLedger {
    authorizations: HashMap<String, Decision>,
    approvals: HashMap<String, Decision>,
    /// Lowercased names of tools whose authorization was granted.
    authorized_tools: HashSet<String>,
}

impl GrantLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the decision for the call that raised `interrupt`.
    pub fn record(&mut self, interrupt: &Interrupt, decision: Decision) {
        let call_id = interrupt.call_id().to_string();
        match interrupt {
            Interrupt::AuthorizationRequired { tool_name, .. } => {
                if decision.authorized {
                    self.grant_tool(tool_name);
                }
                self.authorizations.insert(call_id, decision);
            }
            Interrupt::HumanApprovalRequired { .. } => {
                self.approvals.insert(call_id, decision);
            }
        }
    }

    /// Marks a tool as authorized for the rest of the thread.
    pub fn grant_tool(&mut self, tool_name: &str) {
        self.authorized_tools.insert(tool_name.to_ascii_lowercase());
    }

    pub fn is_tool_authorized(&self, tool_name: &str) -> bool {
        self.authorized_tools
            .contains(&tool_name.to_ascii_lowercase())
    }

    pub fn authorization(&self, call_id: &str) -> Option<Decision> {
        self.authorizations.get(call_id).copied()
    }

    pub fn approval(&self, call_id: &str) -> Option<Decision> {
        self.approvals.get(call_id).copied()
    }

    /// Checks whether `call_id` may invoke `tool`.
    ///
    /// # Errors
    /// Returns the first gate the call has not passed.
    pub fn check(&self, call_id: &str, tool: &ToolDefinition) -> Result<(), Denial> {
        if tool.requires_authorization {
            match self.authorization(call_id) {
                Some(Decision { authorized: true }) => {}
                Some(Decision { authorized: false }) => return Err(Denial::AuthorizationDenied),
                None if self.is_tool_authorized(&tool.name) => {}
                None => return Err(Denial::AuthorizationMissing),
            }
        }
        if tool.requires_approval {
            match self.approval(call_id) {
                Some(Decision { authorized: true }) => {}
                Some(Decision { authorized: false }) => return Err(Denial::ApprovalDenied),
                None => return Err(Denial::ApprovalMissing),
            }
        }
        Ok(())
    }
}

/// Why a gated call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    AuthorizationMissing,
    AuthorizationDenied,
    ApprovalMissing,
    ApprovalDenied,
}

impl Denial {
    /// Error code reported to the model in the tool result.
    pub fn code(self) -> &'static str {
        match self {
            Denial::AuthorizationMissing | Denial::AuthorizationDenied => "not_authorized",
            Denial::ApprovalMissing | Denial::ApprovalDenied => "not_approved",
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::AuthorizationMissing => write!(f, "no authorization decision for this call"),
            Denial::AuthorizationDenied => write!(f, "the user did not authorize this tool"),
            Denial::ApprovalMissing => write!(f, "no approval decision for this call"),
            Denial::ApprovalDenied => write!(f, "the user rejected this tool call"),
        }
    }
}
