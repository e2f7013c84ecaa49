//! Chat command handler.

use std::sync::Arc;

use anyhow::{Context, Result};
use tollgate_core::config::Overrides;
use tollgate_core::core::driver::ExecutionDriver;
use tollgate_core::core::session::SessionStore;
use tollgate_core::engine::ChatEngine;
use tollgate_core::providers::OpenAIChatCompletionsClient;
use tracing::info;

use super::{load_settings, resolve_tools};
use crate::modes::approval::InputLines;
use crate::modes::chat::{self, ChatOptions};

pub async fn run(overrides: &Overrides, preauthorize: bool) -> Result<()> {
    let settings = load_settings(overrides)?;
    let tools = resolve_tools(&settings).await?;
    info!(
        model = %settings.model,
        thread_id = %settings.thread_id,
        tools = tools.definitions().len(),
        "starting chat"
    );

    let engine = ChatEngine::new(
        OpenAIChatCompletionsClient::new(settings.openai.clone()),
        settings.max_steps,
    );
    let driver = ExecutionDriver::new(
        Arc::new(engine),
        tools,
        Arc::new(SessionStore::new()),
        settings.system_prompt.clone(),
    );

    let options = ChatOptions {
        thread_id: settings.thread_id.clone(),
        auth_wait_timeout: settings.auth_wait_timeout,
        preauthorize,
    };
    chat::run(&driver, InputLines::stdin(), &options)
        .await
        .context("interactive chat failed")
}
