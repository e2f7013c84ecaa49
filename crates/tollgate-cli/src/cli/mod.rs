//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use tollgate_core::config::{self, Overrides};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(version)]
#[command(about = "Terminal agent with authorization-gated tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override the chat model (beats OPENAI_MODEL and config)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Identity tool calls are authorized for (beats ARCADE_USER_ID and config)
    #[arg(long, value_name = "ID", global = true)]
    user_id: Option<String>,

    /// Conversation thread id
    #[arg(long, value_name = "ID", global = true)]
    thread: Option<String>,

    /// Override the system prompt from config
    #[arg(long, global = true)]
    system_prompt: Option<String>,

    /// Authorize every gated tool before the first prompt
    #[arg(long)]
    preauthorize: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start an interactive conversation (default)
    Chat,
    /// Resolve and list the tools a session would carry
    Tools,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logging();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli).await })
}

/// Installs the file logger under `$TOLLGATE_HOME/logs`.
///
/// Logging is best effort: a home that cannot be written to leaves the
/// process without a subscriber rather than failing startup.
fn init_logging() -> Option<WorkerGuard> {
    let filter = std::env::var("TOLLGATE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let dir = config::paths::logs_dir();
    std::fs::create_dir_all(&dir).ok()?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, "tollgate.log"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;
    Some(guard)
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        command,
        model,
        user_id,
        thread,
        system_prompt,
        preauthorize,
    } = cli;
    let overrides = Overrides {
        model,
        user_id,
        thread_id: thread,
        system_prompt,
    };

    // default to chat mode
    match command.unwrap_or(Commands::Chat) {
        Commands::Chat => commands::chat::run(&overrides, preauthorize).await,
        Commands::Tools => commands::tools::run(&overrides).await,
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
