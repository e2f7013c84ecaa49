//! CLI command handlers.

pub mod chat;
pub mod config;
pub mod tools;

use std::sync::Arc;

use anyhow::{Context, Result};
use tollgate_core::config::{Config, Overrides, Settings};
use tollgate_core::tools::arcade::ArcadeClient;
use tollgate_core::tools::ToolGateway;

/// Loads the config file and resolves it with env and flags.
fn load_settings(overrides: &Overrides) -> Result<Settings> {
    let config = Config::load().context("load config")?;
    Ok(config.resolve(overrides)?)
}

/// Fetches the session's tool catalog from the tool provider.
async fn resolve_tools(settings: &Settings) -> Result<ToolGateway> {
    let provider = Arc::new(ArcadeClient::new(settings.arcade.clone()));
    ToolGateway::resolve(provider, &settings.tools)
        .await
        .context("resolve tools")
}
