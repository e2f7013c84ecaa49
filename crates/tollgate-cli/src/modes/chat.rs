//! Interactive prompt loop.
//!
//! Each non-blank line is one user turn, driven through every interrupt it
//! raises before the next prompt. `exit` or end of input ends the session.

use std::io::{Write, stdout};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::style::Stylize;
use tollgate_core::core::driver::ExecutionDriver;
use tollgate_core::core::resolver::DecisionResolver;
use tollgate_core::core::resume::run_to_completion;
use tollgate_core::error::TurnExecutionError;
use tokio::sync::Notify;
use tracing::{info, warn};

use super::approval::{InputLines, StdinApprover};
use super::render::RenderTask;

const WELCOME: &str = "Welcome to the chatbot! Type 'exit' to quit.";
const FAREWELL: &str = "👋 Bye...";

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub thread_id: String,
    pub auth_wait_timeout: Duration,
    pub preauthorize: bool,
}

/// Whether `line` asks to leave the loop.
pub fn is_exit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("exit")
}

pub async fn run(driver: &ExecutionDriver, input: InputLines, options: &ChatOptions) -> Result<()> {
    let mut out = stdout();
    let prompt_shown = Arc::new(Notify::new());
    let mut resolver = DecisionResolver::new(
        driver.tools().clone(),
        StdinApprover::new(input.clone(), stdout(), Arc::clone(&prompt_shown)),
        options.auth_wait_timeout,
    );

    writeln!(out, "{}", WELCOME.green())?;

    if options.preauthorize {
        let render = RenderTask::start(&prompt_shown);
        let granted = resolver.preauthorize(render.sender()).await;
        render.finish().await;
        info!(granted = granted.len(), "pre-authorization finished");
        driver
            .record_tool_grants(&options.thread_id, &granted)
            .await;
    }

    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = input.next_line().await? else {
            break;
        };
        if is_exit(&line) {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let render = RenderTask::start(&prompt_shown);
        let result =
            run_to_completion(driver, &mut resolver, &options.thread_id, text, render.sender())
                .await;
        render.finish().await;

        if let Err(err) = result {
            warn!(thread_id = %options.thread_id, "turn failed: {err:#}");
            // Engine failures were already rendered from their error event.
            if err.downcast_ref::<TurnExecutionError>().is_none() {
                eprintln!("Error: {err:#}");
            }
        }
    }

    writeln!(out, "{}", FAREWELL.red())?;
    Ok(())
}
