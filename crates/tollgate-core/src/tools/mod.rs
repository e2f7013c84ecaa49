//! Tool gateway: the closed set of tools a session may call.
//!
//! Tools come from a remote [`ToolProvider`]. [`ToolGateway::resolve`] fetches
//! the configured toolkits and individual tools once, merges them, and hands
//! out an immutable catalog for the rest of the process. Every invocation
//! goes through [`ToolGateway::invoke`], which refuses gated calls the
//! [`GrantLedger`] has not cleared.

pub mod arcade;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::events::ToolOutput;
use crate::core::grants::GrantLedger;
use crate::core::message::ToolCall;
use crate::error::{AuthorizationWaitError, ConfigurationError};

/// A callable tool as presented to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Model-facing name (`Dropbox_DownloadFile`).
    pub name: String,
    /// Provider-facing name (`Dropbox.DownloadFile`).
    pub qualified_name: String,
    pub description: String,
    pub input_schema: Value,
    pub requires_authorization: bool,
    /// Every call must be approved by the operator.
    #[serde(default)]
    pub requires_approval: bool,
}

/// Result of executing a tool, in the shape the model API expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_use_id: String,
    /// JSON envelope produced by [`ToolOutput::to_json_string`].
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn from_output(tool_use_id: impl Into<String>, output: &ToolOutput) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: output.to_json_string(),
            is_error: !output.is_ok(),
        }
    }
}

/// One page of a toolkit listing.
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub tools: Vec<ToolDefinition>,
    /// Tools the provider has for this query, including ones not returned.
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Pending,
    Completed,
    Failed,
}

/// Handle for an authorization flow started with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationTicket {
    pub id: String,
    /// Browser URL the user must visit. Absent once the grant exists.
    #[serde(default)]
    pub url: Option<String>,
    pub status: AuthorizationStatus,
}

/// Remote source of tools and authorization flows.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Lists the tools in `toolkit` visible to `user_id`.
    async fn list_toolkit(&self, toolkit: &str, user_id: &str, limit: usize)
    -> Result<CatalogPage>;

    /// Fetches a single tool by name.
    async fn get_tool(&self, name: &str, user_id: &str) -> Result<ToolDefinition>;

    /// Starts (or looks up) the authorization flow for `tool`.
    async fn authorize(&self, tool: &ToolDefinition, user_id: &str)
    -> Result<AuthorizationTicket>;

    /// Blocks until the flow completes, fails, or `timeout` elapses.
    async fn wait_for_completion(
        &self,
        authorization_id: &str,
        timeout: Duration,
    ) -> std::result::Result<(), AuthorizationWaitError>;

    /// Runs the tool. Tool-level failures come back as `ToolOutput::Failure`;
    /// `Err` is reserved for transport problems.
    async fn execute(&self, tool: &ToolDefinition, input: &Value, user_id: &str)
    -> Result<ToolOutput>;
}

/// Which tools to resolve, and for whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSelection {
    pub toolkits: Vec<String>,
    pub tools: Vec<String>,
    pub limit: usize,
    pub user_id: Option<String>,
    /// Tools whose every call needs operator approval.
    pub approval: Vec<String>,
    /// Keep the first `limit` tools instead of failing when the catalog is larger.
    pub allow_truncation: bool,
}

impl Default for ToolSelection {
    fn default() -> Self {
        Self {
            toolkits: vec!["Dropbox".to_string()],
            tools: Vec::new(),
            limit: 100,
            user_id: None,
            approval: Vec::new(),
            allow_truncation: false,
        }
    }
}

/// Recorded when the catalog was cut down to the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    pub limit: usize,
    pub available: usize,
}

struct GatewayInner {
    provider: Arc<dyn ToolProvider>,
    definitions: Vec<ToolDefinition>,
    user_id: String,
    truncation: Option<Truncation>,
}

/// Resolved tool catalog. Cheap to clone.
#[derive(Clone)]
pub struct ToolGateway {
    inner: Arc<GatewayInner>,
}

impl std::fmt::Debug for ToolGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolGateway")
            .field("tools", &self.inner.definitions.len())
            .field("user_id", &self.inner.user_id)
            .field("truncation", &self.inner.truncation)
            .finish_non_exhaustive()
    }
}

impl ToolGateway {
    /// Resolves `selection` against `provider`.
    ///
    /// # Errors
    /// `ConfigurationError::MissingIdentity` for a blank user id,
    /// `ConfigurationError::ToolLimitExceeded` when the catalog is larger than
    /// the limit and truncation is not allowed, or any provider failure.
    pub async fn resolve(provider: Arc<dyn ToolProvider>, selection: &ToolSelection) -> Result<Self> {
        let user_id = selection
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ConfigurationError::MissingIdentity)?
            .to_string();

        let mut fetched = Vec::new();
        let mut hidden = 0usize;
        for toolkit in &selection.toolkits {
            let page = provider
                .list_toolkit(toolkit, &user_id, selection.limit)
                .await
                .with_context(|| format!("list toolkit {toolkit}"))?;
            hidden += page.total.saturating_sub(page.tools.len());
            debug!(toolkit, returned = page.tools.len(), total = page.total, "listed toolkit");
            fetched.extend(page.tools);
        }
        for name in &selection.tools {
            let tool = provider
                .get_tool(name, &user_id)
                .await
                .with_context(|| format!("fetch tool {name}"))?;
            fetched.push(tool);
        }

        let mut seen = HashSet::new();
        let mut definitions: Vec<ToolDefinition> = fetched
            .into_iter()
            .filter(|tool| seen.insert(tool.name.to_ascii_lowercase()))
            .collect();

        let available = definitions.len() + hidden;
        let mut truncation = None;
        if available > selection.limit {
            if !selection.allow_truncation {
                return Err(ConfigurationError::ToolLimitExceeded {
                    limit: selection.limit,
                    available,
                }
                .into());
            }
            warn!(
                limit = selection.limit,
                available, "tool catalog truncated to the configured limit"
            );
            definitions.truncate(selection.limit);
            truncation = Some(Truncation {
                limit: selection.limit,
                available,
            });
        }

        for name in &selection.approval {
            match definitions
                .iter_mut()
                .find(|tool| tool.name.eq_ignore_ascii_case(name))
            {
                Some(tool) => tool.requires_approval = true,
                None => warn!(tool = %name, "approval list names a tool that is not loaded"),
            }
        }

        Ok(Self {
            inner: Arc::new(GatewayInner {
                provider,
                definitions,
                user_id,
                truncation,
            }),
        })
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.inner.definitions
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.inner
            .definitions
            .iter()
            .find(|tool| tool.name.eq_ignore_ascii_case(name))
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn truncation(&self) -> Option<Truncation> {
        self.inner.truncation
    }

    /// Tools that need an authorization grant.
    pub fn gated(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.inner
            .definitions
            .iter()
            .filter(|tool| tool.requires_authorization)
    }

    /// Starts authorization for `tool` on behalf of the session user.
    ///
    /// # Errors
    /// Returns an error if the provider request fails.
    pub async fn authorize(&self, tool: &ToolDefinition) -> Result<AuthorizationTicket> {
        self.inner
            .provider
            .authorize(tool, &self.inner.user_id)
            .await
            .with_context(|| format!("authorize {}", tool.name))
    }

    /// Waits for an authorization flow to complete.
    ///
    /// # Errors
    /// Returns the wait failure; callers turn it into a denial.
    pub async fn wait_for_authorization(
        &self,
        authorization_id: &str,
        timeout: Duration,
    ) -> std::result::Result<(), AuthorizationWaitError> {
        self.inner
            .provider
            .wait_for_completion(authorization_id, timeout)
            .await
    }

    /// Executes `call` if the ledger clears it. Never fails: every refusal or
    /// provider problem becomes a failed `ToolOutput` for the model.
    pub async fn invoke(&self, call: &ToolCall, grants: &GrantLedger) -> ToolOutput {
        let Some(tool) = self.get(&call.name) else {
            return ToolOutput::failure(
                "unknown_tool",
                format!("Unknown tool: {}", call.name),
                None,
            );
        };

        if let Err(denial) = grants.check(&call.id, tool) {
            warn!(tool = %tool.name, call_id = %call.id, %denial, "refused gated tool call");
            return ToolOutput::failure(denial.code(), denial.to_string(), None);
        }

        debug!(tool = %tool.name, call_id = %call.id, "executing tool");
        match self
            .inner
            .provider
            .execute(tool, &call.input, &self.inner.user_id)
            .await
        {
            Ok(output) => output,
            Err(err) => {
                warn!(tool = %tool.name, "tool execution failed: {err:#}");
                ToolOutput::failure("provider_error", format!("{err:#}"), None)
            }
        }
    }
}
