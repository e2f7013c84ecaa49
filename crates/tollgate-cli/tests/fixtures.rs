//! Shared fixtures for CLI integration tests.
//!
//! Chat-completions streams come from `.sse` templates in `tests/fixtures/`;
//! tool catalog payloads mirror the tool provider's JSON shapes.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SSE_TEXT: &str = include_str!("fixtures/chat_text.sse");
pub const SSE_TOOL_CALL: &str = include_str!("fixtures/chat_tool_call.sse");

pub const USER_ID: &str = "tester@example.com";
pub const AUTH_URL: &str = "https://auth.example.com/authorize/ac_1";

/// A model reply that only carries text.
pub fn text_sse(text: &str) -> String {
    SSE_TEXT.replace("{{TEXT}}", &escape_json(text))
}

/// A model reply with a single tool call.
pub fn tool_call_sse(tool_id: &str, tool_name: &str, input_json: &str) -> String {
    SSE_TOOL_CALL
        .replace("{{TOOL_ID}}", tool_id)
        .replace("{{TOOL_NAME}}", tool_name)
        .replace("{{INPUT_JSON}}", &escape_json(input_json))
}

pub fn sse_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

/// Escape a string for embedding in a JSON string literal.
pub fn escape_json(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

pub fn can_bind_localhost() -> bool {
    std::net::TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Serves `replies` to successive chat-completions requests. Requests past
/// the end get a plain "done" reply.
pub async fn mount_model(server: &MockServer, replies: Vec<String>) {
    let count = Arc::new(AtomicUsize::new(0));
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(move |_: &wiremock::Request| {
            let n = count.fetch_add(1, Ordering::SeqCst);
            let body = replies.get(n).cloned().unwrap_or_else(|| text_sse("done"));
            sse_response(&body)
        })
        .mount(server)
        .await;
}

pub fn list_folder_tool() -> Value {
    json!({
        "name": "ListItemsInFolder",
        "qualified_name": "Dropbox.ListItemsInFolder",
        "description": "List the items in a folder.\nReturns names and paths.",
        "toolkit": {"name": "Dropbox"},
        "input": {"parameters": [
            {"name": "folder_path", "required": true, "description": "Folder to list",
             "value_schema": {"val_type": "string"}}
        ]},
        "requirements": {"authorization": null}
    })
}

pub fn download_tool() -> Value {
    json!({
        "name": "DownloadFile",
        "qualified_name": "Dropbox.DownloadFile",
        "description": "Download a file.",
        "toolkit": {"name": "Dropbox"},
        "input": {"parameters": [
            {"name": "file_path", "required": true, "value_schema": {"val_type": "string"}}
        ]},
        "requirements": {"authorization": {"provider_id": "dropbox", "provider_type": "oauth2"}}
    })
}

/// Mounts the Dropbox catalog listing with `total_count` reported.
pub async fn mount_catalog(server: &MockServer, total_count: usize) {
    Mock::given(method("GET"))
        .and(path("/v1/tools"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [list_folder_tool(), download_tool()],
            "total_count": total_count
        })))
        .mount(server)
        .await;
}

/// Mounts an authorization flow that the user completes immediately.
pub async fn mount_authorization(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/tools/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ac_1",
            "url": AUTH_URL,
            "status": "pending"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "ac_1", "status": "completed"})),
        )
        .mount(server)
        .await;
}

/// Mounts a tool execution endpoint returning `value`.
pub async fn mount_execute(server: &MockServer, value: Value) {
    Mock::given(method("POST"))
        .and(path("/v1/tools/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "output": {"value": value}
        })))
        .mount(server)
        .await;
}

/// The `tollgate` binary wired to mock servers and an isolated home.
pub fn tollgate(home: &Path, openai: &MockServer, arcade: &MockServer) -> Command {
    let mut cmd = cargo_bin_cmd!("tollgate");
    cmd.env("TOLLGATE_HOME", home)
        .env("OPENAI_API_KEY", "sk-test")
        .env("OPENAI_BASE_URL", openai.uri())
        .env("OPENAI_MODEL", "gpt-4o-mini")
        .env("ARCADE_API_KEY", "arc-test")
        .env("ARCADE_BASE_URL", arcade.uri())
        .env("ARCADE_USER_ID", USER_ID)
        .env_remove("RUST_LOG")
        .env_remove("TOLLGATE_LOG");
    cmd
}
