//! `tollgate tools`: print the resolved tool set.

use anyhow::Result;
use tollgate_core::config::Overrides;

use super::{load_settings, resolve_tools};

pub async fn run(overrides: &Overrides) -> Result<()> {
    let settings = load_settings(overrides)?;
    let tools = resolve_tools(&settings).await?;

    for tool in tools.definitions() {
        let mut flags = Vec::new();
        if tool.requires_authorization {
            flags.push("auth");
        }
        if tool.requires_approval {
            flags.push("approval");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("{}{flags}", tool.name);
        let description = tool.description.lines().next().unwrap_or("").trim();
        if !description.is_empty() {
            println!("    {description}");
        }
    }

    println!(
        "{} tools for {}",
        tools.definitions().len(),
        tools.user_id()
    );
    if let Some(truncation) = tools.truncation() {
        println!(
            "Truncated: {} tools available, kept the first {}",
            truncation.available, truncation.limit
        );
    }
    Ok(())
}
