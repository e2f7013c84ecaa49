//! In-memory tool provider for unit tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{AuthorizationStatus, AuthorizationTicket, CatalogPage, ToolDefinition, ToolProvider};
use crate::core::events::ToolOutput;
use crate::error::AuthorizationWaitError;

pub fn tool(name: &str, requires_authorization: bool) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        qualified_name: name.replacen('_', ".", 1),
        description: format!("{name} test tool"),
        input_schema: json!({"type": "object", "properties": {}}),
        requires_authorization,
        requires_approval: false,
    }
}

#[derive(Default)]
struct FakeState {
    total: Option<usize>,
    individual: Vec<ToolDefinition>,
    failing_auth: HashSet<String>,
    granted: HashSet<String>,
    refused: HashSet<String>,
    authorize_requests: Vec<String>,
    waits: Vec<String>,
    executed: Vec<String>,
}

pub struct FakeToolProvider {
    toolkit: Vec<ToolDefinition>,
    state: Mutex<FakeState>,
}

impl FakeToolProvider {
    pub fn new(toolkit: Vec<ToolDefinition>) -> Self {
        Self {
            toolkit,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn set_total(&self, total: usize) {
        self.state.lock().unwrap().total = Some(total);
    }

    pub fn add_individual(&self, tool: ToolDefinition) {
        self.state.lock().unwrap().individual.push(tool);
    }

    /// Authorization waits for this tool fail.
    pub fn fail_auth(&self, tool_name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_auth
            .insert(tool_name.to_string());
    }

    /// The provider already holds a grant for this tool.
    pub fn grant(&self, tool_name: &str) {
        self.state
            .lock()
            .unwrap()
            .granted
            .insert(tool_name.to_string());
    }

    /// The provider refuses to start authorization for this tool.
    pub fn refuse(&self, tool_name: &str) {
        self.state
            .lock()
            .unwrap()
            .refused
            .insert(tool_name.to_string());
    }

    pub fn authorize_requests(&self) -> Vec<String> {
        self.state.lock().unwrap().authorize_requests.clone()
    }

    pub fn waits(&self) -> Vec<String> {
        self.state.lock().unwrap().waits.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }
}

#[async_trait]
impl ToolProvider for FakeToolProvider {
    async fn list_toolkit(
        &self,
        _toolkit: &str,
        _user_id: &str,
        _limit: usize,
    ) -> Result<CatalogPage> {
        let total = self.state.lock().unwrap().total;
        Ok(CatalogPage {
            tools: self.toolkit.clone(),
            total: total.unwrap_or(self.toolkit.len()),
        })
    }

    async fn get_tool(&self, name: &str, _user_id: &str) -> Result<ToolDefinition> {
        self.state
            .lock()
            .unwrap()
            .individual
            .iter()
            .find(|tool| tool.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| anyhow!("tool {name} not found"))
    }

    async fn authorize(&self, tool: &ToolDefinition, _user_id: &str) -> Result<AuthorizationTicket> {
        let mut state = self.state.lock().unwrap();
        state.authorize_requests.push(tool.name.clone());
        let status = if state.refused.contains(&tool.name) {
            AuthorizationStatus::Failed
        } else if state.granted.contains(&tool.name) {
            AuthorizationStatus::Completed
        } else {
            AuthorizationStatus::Pending
        };
        Ok(AuthorizationTicket {
            id: format!("auth_{}", tool.name),
            url: (status == AuthorizationStatus::Pending)
                .then(|| format!("https://auth.example.com/{}", tool.name)),
            status,
        })
    }

    async fn wait_for_completion(
        &self,
        authorization_id: &str,
        _timeout: Duration,
    ) -> std::result::Result<(), AuthorizationWaitError> {
        let mut state = self.state.lock().unwrap();
        state.waits.push(authorization_id.to_string());
        let tool_name = authorization_id.trim_start_matches("auth_");
        if state.failing_auth.contains(tool_name) {
            return Err(AuthorizationWaitError::Failed {
                authorization_id: authorization_id.to_string(),
            });
        }
        state.granted.insert(tool_name.to_string());
        Ok(())
    }

    async fn execute(
        &self,
        tool: &ToolDefinition,
        input: &Value,
        _user_id: &str,
    ) -> Result<ToolOutput> {
        self.state.lock().unwrap().executed.push(tool.name.clone());
        Ok(ToolOutput::success(json!({"tool": tool.name, "input": input})))
    }
}
