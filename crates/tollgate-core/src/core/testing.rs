//! Scripted collaborators for core unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use serde_json::Value;

use crate::core::engine::{ReasoningEngine, TurnRequest, TurnUpdate, UpdateStream};
use crate::core::interrupt::Interrupt;
use crate::core::resolver::Approver;
use crate::tools::testing::{FakeToolProvider, tool};
use crate::tools::{ToolGateway, ToolSelection};

/// Engine that replays one prepared update list per run.
pub struct ScriptedEngine {
    scripts: Mutex<VecDeque<Vec<Result<TurnUpdate>>>>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedEngine {
    pub fn new(scripts: Vec<Vec<Result<TurnUpdate>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ReasoningEngine for ScriptedEngine {
    fn run_turn(&self, request: TurnRequest) -> UpdateStream {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        stream::iter(script).boxed()
    }
}

/// Approver that answers from a queue and records what it was asked.
pub struct ScriptedApprover {
    answers: VecDeque<bool>,
    pub asked: Vec<String>,
}

impl ScriptedApprover {
    pub fn new(answers: Vec<bool>) -> Self {
        Self {
            answers: answers.into(),
            asked: Vec::new(),
        }
    }
}

#[async_trait]
impl Approver for ScriptedApprover {
    async fn approve(&mut self, tool_name: &str, _proposed_input: &Value) -> Result<bool> {
        self.asked.push(tool_name.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("operator input closed"))
    }
}

pub fn auth_interrupt(call_id: &str) -> Interrupt {
    Interrupt::AuthorizationRequired {
        call_id: call_id.to_string(),
        tool_name: "Dropbox_DownloadFile".to_string(),
        authorization_id: "auth_Dropbox_DownloadFile".to_string(),
        authorization_url: "https://auth.example.com/Dropbox_DownloadFile".to_string(),
    }
}

pub fn approval_interrupt(call_id: &str) -> Interrupt {
    Interrupt::HumanApprovalRequired {
        call_id: call_id.to_string(),
        tool_name: "Dropbox_ListItemsInFolder".to_string(),
        proposed_input: Value::Null,
    }
}

pub fn dropbox_provider() -> Arc<FakeToolProvider> {
    Arc::new(FakeToolProvider::new(vec![
        tool("Dropbox_ListItemsInFolder", false),
        tool("Dropbox_DownloadFile", true),
    ]))
}

pub async fn gateway_for(provider: Arc<FakeToolProvider>) -> ToolGateway {
    let selection = ToolSelection {
        user_id: Some("user@example.com".to_string()),
        ..ToolSelection::default()
    };
    ToolGateway::resolve(provider, &selection).await.unwrap()
}

pub async fn gateway() -> ToolGateway {
    gateway_for(dropbox_provider()).await
}
