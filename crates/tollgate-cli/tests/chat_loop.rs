//! End-to-end runs of the interactive loop against mock model and tool servers.

mod fixtures;

use std::fs;

use fixtures::{
    AUTH_URL, USER_ID, can_bind_localhost, mount_authorization, mount_catalog, mount_execute,
    mount_model, text_sse, tollgate, tool_call_sse,
};
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Servers {
    home: TempDir,
    openai: MockServer,
    arcade: MockServer,
}

async fn servers() -> Servers {
    let arcade = MockServer::start().await;
    mount_catalog(&arcade, 2).await;
    Servers {
        home: TempDir::new().expect("create temp tollgate home"),
        openai: MockServer::start().await,
        arcade,
    }
}

#[tokio::test]
async fn test_gated_tool_waits_for_authorization_then_answers() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let s = servers().await;
    mount_authorization(&s.arcade).await;
    mount_execute(&s.arcade, json!({"content": "quarterly numbers"})).await;
    mount_model(
        &s.openai,
        vec![
            tool_call_sse(
                "call_1",
                "Dropbox_DownloadFile",
                r#"{"file_path": "/report.pdf"}"#,
            ),
            text_sse("The report contains quarterly numbers."),
        ],
    )
    .await;

    tollgate(s.home.path(), &s.openai, &s.arcade)
        .write_stdin("download report.pdf\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Welcome to the chatbot!"))
        .stdout(predicate::str::contains(
            "Authorization required for tool call Dropbox_DownloadFile",
        ))
        .stdout(predicate::str::contains(format!(
            "Please authorize in your browser {AUTH_URL}"
        )))
        .stdout(predicate::str::contains("Authorization granted. Resuming execution..."))
        .stdout(predicate::str::contains("Dropbox_DownloadFile finished"))
        .stdout(predicate::str::contains("The report contains quarterly numbers."))
        .stdout(predicate::str::contains("Bye..."));
}

#[tokio::test]
async fn test_approval_answer_is_read_from_stdin() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let s = servers().await;
    fs::write(
        s.home.path().join("config.toml"),
        "[tools]\napproval = [\"Dropbox_ListItemsInFolder\"]\n",
    )
    .unwrap();
    mount_execute(&s.arcade, json!(["a.txt", "b.txt"])).await;
    mount_model(
        &s.openai,
        vec![
            tool_call_sse(
                "call_1",
                "Dropbox_ListItemsInFolder",
                r#"{"folder_path": "/"}"#,
            ),
            text_sse("Found a.txt and b.txt."),
        ],
    )
    .await;

    tollgate(s.home.path(), &s.openai, &s.arcade)
        .write_stdin("list root\nmaybe\ny\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Human in the loop required for tool call Dropbox_ListItemsInFolder",
        ))
        .stdout(predicate::str::contains("Please answer y or n."))
        .stdout(predicate::str::contains("Tool call approved."))
        .stdout(predicate::str::contains("Dropbox_ListItemsInFolder finished"))
        .stdout(predicate::str::contains("Found a.txt and b.txt."));
}

#[tokio::test]
async fn test_rejected_call_reports_not_approved_to_the_model() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let s = servers().await;
    fs::write(
        s.home.path().join("config.toml"),
        "[tools]\napproval = [\"Dropbox_ListItemsInFolder\"]\n",
    )
    .unwrap();
    Mock::given(method("POST"))
        .and(path("/v1/tools/execute"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&s.arcade)
        .await;
    mount_model(
        &s.openai,
        vec![
            tool_call_sse(
                "call_1",
                "Dropbox_ListItemsInFolder",
                r#"{"folder_path": "/"}"#,
            ),
            text_sse("Okay, I will not list that folder."),
        ],
    )
    .await;

    tollgate(s.home.path(), &s.openai, &s.arcade)
        .write_stdin("list root\nn\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tool call rejected."))
        .stdout(predicate::str::contains(
            "Dropbox_ListItemsInFolder failed (not_approved)",
        ))
        .stdout(predicate::str::contains("Okay, I will not list that folder."));
}

#[tokio::test]
async fn test_exit_ends_session_without_model_calls() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let s = servers().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&s.openai)
        .await;

    tollgate(s.home.path(), &s.openai, &s.arcade)
        .write_stdin("\n   \nEXIT\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Bye..."));
}

#[tokio::test]
async fn test_end_of_input_ends_session() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let s = servers().await;
    mount_model(&s.openai, vec![text_sse("Hello!")]).await;

    tollgate(s.home.path(), &s.openai, &s.arcade)
        .write_stdin("hi")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello!"))
        .stdout(predicate::str::contains("Bye..."));
}

#[tokio::test]
async fn test_model_error_is_reported_and_loop_continues() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let s = servers().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .expect(2)
        .mount(&s.openai)
        .await;

    tollgate(s.home.path(), &s.openai, &s.arcade)
        .write_stdin("first\nsecond\nexit\n")
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "Error [http_status]: HTTP 401: Incorrect API key provided",
        ))
        .stdout(predicate::str::contains("Bye..."));
}

#[tokio::test]
async fn test_missing_user_id_fails_before_the_loop() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let s = servers().await;

    tollgate(s.home.path(), &s.openai, &s.arcade)
        .env_remove("ARCADE_USER_ID")
        .write_stdin("hi\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Missing ARCADE_USER_ID"))
        .stdout(predicate::str::contains("Welcome").not());
}

#[tokio::test]
async fn test_preauthorize_grants_gated_tools_up_front() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let s = servers().await;
    mount_authorization(&s.arcade).await;

    tollgate(s.home.path(), &s.openai, &s.arcade)
        .arg("--preauthorize")
        .write_stdin("exit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "Please authorize in your browser {AUTH_URL}"
        )))
        .stdout(predicate::str::contains("Authorization granted."));
}

#[tokio::test]
async fn test_tools_command_lists_catalog() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let s = servers().await;

    tollgate(s.home.path(), &s.openai, &s.arcade)
        .arg("tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("Dropbox_ListItemsInFolder\n"))
        .stdout(predicate::str::contains("    List the items in a folder."))
        .stdout(predicate::str::contains("Dropbox_DownloadFile [auth]"))
        .stdout(predicate::str::contains(format!("2 tools for {USER_ID}")));
}

#[tokio::test]
async fn test_oversized_catalog_is_rejected() {
    if !can_bind_localhost() {
        eprintln!("Skipping: cannot bind localhost TCP port in this environment.");
        return;
    }
    let home = TempDir::new().unwrap();
    let openai = MockServer::start().await;
    let arcade = MockServer::start().await;
    mount_catalog(&arcade, 150).await;

    tollgate(home.path(), &openai, &arcade)
        .arg("tools")
        .assert()
        .failure()
        .stderr(predicate::str::contains("the limit is 100"));
}
