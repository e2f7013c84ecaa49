//! Configuration management for tollgate.
//!
//! Loads `${TOLLGATE_HOME}/config.toml` with defaults, then resolves it
//! together with the environment and command-line overrides into validated
//! [`Settings`].

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::chat::DEFAULT_MAX_STEPS;
use crate::error::ConfigurationError;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use crate::providers::{OpenAIChatCompletionsConfig, openai, resolve_api_key, resolve_base_url};
use crate::tools::ToolSelection;
use crate::tools::arcade::{self, ArcadeConfig};

/// Default config template with comments, embedded at compile time.
const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("default_config.toml");

pub mod paths {
    //! Path resolution for tollgate configuration and logs.
    //!
    //! `TOLLGATE_HOME` resolution order:
    //! 1. `TOLLGATE_HOME` environment variable (if set)
    //! 2. ~/.config/tollgate (default)

    use std::path::PathBuf;

    /// Returns the tollgate home directory.
    pub fn tollgate_home() -> PathBuf {
        if let Ok(home) = std::env::var("TOLLGATE_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("tollgate")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        tollgate_home().join("config.toml")
    }

    /// Returns the directory the log file is written to.
    pub fn logs_dir() -> PathBuf {
        tollgate_home().join("logs")
    }
}

/// `[tools]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Toolkits loaded in full
    pub toolkits: Vec<String>,
    /// Individual tools, by qualified name
    pub tools: Vec<String>,
    /// Most tools a session may carry
    pub limit: usize,
    /// Keep the first `limit` tools instead of failing
    pub allow_truncation: bool,
    /// Tools whose every call needs operator approval
    pub approval: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let selection = ToolSelection::default();
        Self {
            toolkits: selection.toolkits,
            tools: selection.tools,
            limit: selection.limit,
            allow_truncation: selection.allow_truncation,
            approval: selection.approval,
        }
    }
}

/// `[auth]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub wait_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: 300,
        }
    }
}

/// Credentials and endpoint for one remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: ProviderConfig,
    pub arcade: ProviderConfig,
}

/// Main configuration structure, as read from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat model id
    pub model: Option<String>,

    /// Identity tool calls are authorized for
    pub user_id: Option<String>,

    /// Conversation thread id (fresh per process when unset)
    pub thread_id: Option<String>,

    /// Maximum tokens per model reply
    pub max_tokens: Option<u32>,

    /// Model requests allowed per run
    pub max_steps: usize,

    /// Optional inline system prompt
    pub system_prompt: Option<String>,

    /// Optional path to a file containing the system prompt
    pub system_prompt_file: Option<String>,

    pub tools: ToolsConfig,
    pub auth: AuthConfig,
    pub providers: ProvidersConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: None,
            user_id: None,
            thread_id: None,
            max_tokens: None,
            max_steps: DEFAULT_MAX_STEPS,
            system_prompt: None,
            system_prompt_file: None,
            tools: ToolsConfig::default(),
            auth: AuthConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

/// Values given on the command line. They beat both env and file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    pub system_prompt: Option<String>,
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub model: String,
    pub user_id: String,
    pub thread_id: String,
    pub max_steps: usize,
    pub system_prompt: Option<String>,
    pub tools: ToolSelection,
    pub auth_wait_timeout: Duration,
    pub openai: OpenAIChatCompletionsConfig,
    pub arcade: ArcadeConfig,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Returns the configured system prompt, preferring the file if both are set.
    pub fn effective_system_prompt(&self) -> Result<Option<String>> {
        if let Some(path_str) = &self.system_prompt_file {
            let content = fs::read_to_string(path_str)
                .with_context(|| format!("Failed to read system prompt file: {path_str}"))?;
            let trimmed = content.trim();
            return Ok((!trimmed.is_empty()).then(|| trimmed.to_string()));
        }

        let trimmed = self.system_prompt.as_deref().unwrap_or("").trim();
        Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
    }

    /// Resolves against the process environment.
    ///
    /// # Errors
    /// See [`Config::resolve_with`].
    pub fn resolve(&self, overrides: &Overrides) -> Result<Settings, ConfigurationError> {
        self.resolve_with(overrides, &|key| std::env::var(key).ok())
    }

    /// Resolves into [`Settings`], reading environment variables through `env`.
    ///
    /// # Errors
    /// `MissingModel` or `MissingIdentity` when those are unset everywhere,
    /// `Invalid` for anything else that cannot be used (no API key, a bad
    /// base URL, an unreadable prompt file, zero limits).
    pub fn resolve_with(
        &self,
        overrides: &Overrides,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Settings, ConfigurationError> {
        let model = non_blank(overrides.model.clone())
            .or_else(|| non_blank(env("OPENAI_MODEL")))
            .or_else(|| non_blank(self.model.clone()))
            .ok_or(ConfigurationError::MissingModel)?;

        let user_id = non_blank(overrides.user_id.clone())
            .or_else(|| non_blank(env("ARCADE_USER_ID")))
            .or_else(|| non_blank(self.user_id.clone()))
            .ok_or(ConfigurationError::MissingIdentity)?;

        let thread_id = non_blank(overrides.thread_id.clone())
            .or_else(|| non_blank(self.thread_id.clone()))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if self.max_steps == 0 {
            return Err(ConfigurationError::Invalid(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if self.tools.limit == 0 {
            return Err(ConfigurationError::Invalid(
                "[tools].limit must be at least 1".to_string(),
            ));
        }

        let system_prompt = match non_blank(overrides.system_prompt.clone()) {
            Some(prompt) => Some(prompt),
            None => Some(
                self.effective_system_prompt()
                    .map_err(invalid)?
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.trim().to_string()),
            ),
        };

        let openai = OpenAIChatCompletionsConfig {
            api_key: resolve_api_key(
                self.providers.openai.api_key.as_deref(),
                "OPENAI_API_KEY",
                "openai",
                env,
            )
            .map_err(invalid)?,
            base_url: resolve_base_url(
                self.providers.openai.base_url.as_deref(),
                "OPENAI_BASE_URL",
                openai::DEFAULT_BASE_URL,
                "OpenAI",
                env,
            )
            .map_err(invalid)?,
            model: model.clone(),
            max_tokens: self.max_tokens,
            include_usage: true,
        };

        let arcade = ArcadeConfig {
            api_key: resolve_api_key(
                self.providers.arcade.api_key.as_deref(),
                "ARCADE_API_KEY",
                "arcade",
                env,
            )
            .map_err(invalid)?,
            base_url: resolve_base_url(
                self.providers.arcade.base_url.as_deref(),
                "ARCADE_BASE_URL",
                arcade::DEFAULT_BASE_URL,
                "Arcade",
                env,
            )
            .map_err(invalid)?,
        };

        let tools = ToolSelection {
            toolkits: self.tools.toolkits.clone(),
            tools: self.tools.tools.clone(),
            limit: self.tools.limit,
            user_id: Some(user_id.clone()),
            approval: self.tools.approval.clone(),
            allow_truncation: self.tools.allow_truncation,
        };

        Ok(Settings {
            model,
            user_id,
            thread_id,
            max_steps: self.max_steps,
            system_prompt,
            tools,
            auth_wait_timeout: Duration::from_secs(self.auth.wait_timeout_secs),
            openai,
            arcade,
        })
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, DEFAULT_CONFIG_TEMPLATE)
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename).
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

#[allow(clippy::needless_pass_by_value)]
fn invalid(err: anyhow::Error) -> ConfigurationError {
    ConfigurationError::Invalid(format!("{err:#}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn keyed_env() -> impl Fn(&str) -> Option<String> {
        env_of(&[
            ("OPENAI_API_KEY", "sk-env"),
            ("ARCADE_API_KEY", "arc-env"),
            ("OPENAI_MODEL", "gpt-4o-mini"),
            ("ARCADE_USER_ID", "env@example.com"),
        ])
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nonexistent.toml")).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.tools.toolkits, vec!["Dropbox"]);
        assert_eq!(config.tools.limit, 100);
        assert_eq!(config.auth.wait_timeout_secs, 300);
        assert_eq!(config.max_steps, 25);
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            "model = \"gpt-4o\"\n[tools]\napproval = [\"Dropbox_DownloadFile\"]\n",
        )
        .unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.tools.approval, vec!["Dropbox_DownloadFile"]);
        assert_eq!(config.tools.limit, 100);
    }

    #[test]
    fn test_default_template_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_init_creates_config_and_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();
        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("wait_timeout_secs"));
        assert!(!config_path.with_extension("toml.tmp").exists());

        let err = Config::init(&config_path).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_env_beats_file_and_flags_beat_env() {
        let config = Config {
            model: Some("from-file".to_string()),
            user_id: Some("file@example.com".to_string()),
            ..Config::default()
        };

        let settings = config
            .resolve_with(&Overrides::default(), &keyed_env())
            .unwrap();
        assert_eq!(settings.model, "gpt-4o-mini");
        assert_eq!(settings.user_id, "env@example.com");

        let overrides = Overrides {
            model: Some("from-flag".to_string()),
            user_id: Some("flag@example.com".to_string()),
            ..Overrides::default()
        };
        let settings = config.resolve_with(&overrides, &keyed_env()).unwrap();
        assert_eq!(settings.model, "from-flag");
        assert_eq!(settings.openai.model, "from-flag");
        assert_eq!(settings.user_id, "flag@example.com");
        assert_eq!(settings.tools.user_id.as_deref(), Some("flag@example.com"));
    }

    #[test]
    fn test_missing_identity_is_fatal() {
        let env = env_of(&[("OPENAI_MODEL", "gpt-4o-mini"), ("ARCADE_USER_ID", "  ")]);
        let err = Config::default()
            .resolve_with(&Overrides::default(), &env)
            .unwrap_err();
        assert_eq!(err, ConfigurationError::MissingIdentity);
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let env = env_of(&[("ARCADE_USER_ID", "u@example.com")]);
        let err = Config::default()
            .resolve_with(&Overrides::default(), &env)
            .unwrap_err();
        assert_eq!(err, ConfigurationError::MissingModel);
    }

    #[test]
    fn test_missing_api_key_is_invalid() {
        let env = env_of(&[
            ("OPENAI_MODEL", "gpt-4o-mini"),
            ("ARCADE_USER_ID", "u@example.com"),
            ("OPENAI_API_KEY", "sk"),
        ]);
        let err = Config::default()
            .resolve_with(&Overrides::default(), &env)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid(msg) if msg.contains("ARCADE_API_KEY")));
    }

    #[test]
    fn test_thread_id_defaults_to_fresh_uuid() {
        let settings = Config::default()
            .resolve_with(&Overrides::default(), &keyed_env())
            .unwrap();
        assert!(uuid::Uuid::parse_str(&settings.thread_id).is_ok());

        let config = Config {
            thread_id: Some("1".to_string()),
            ..Config::default()
        };
        let settings = config
            .resolve_with(&Overrides::default(), &keyed_env())
            .unwrap();
        assert_eq!(settings.thread_id, "1");
    }

    #[test]
    fn test_api_key_prefers_config_and_base_url_prefers_env() {
        let config = Config {
            providers: ProvidersConfig {
                openai: ProviderConfig {
                    api_key: Some("sk-config".to_string()),
                    base_url: Some("https://config.example.com/v1/".to_string()),
                },
                arcade: ProviderConfig::default(),
            },
            ..Config::default()
        };
        let env = env_of(&[
            ("OPENAI_API_KEY", "sk-env"),
            ("ARCADE_API_KEY", "arc-env"),
            ("OPENAI_MODEL", "m"),
            ("ARCADE_USER_ID", "u"),
            ("ARCADE_BASE_URL", "http://127.0.0.1:9000/"),
        ]);

        let settings = config.resolve_with(&Overrides::default(), &env).unwrap();
        assert_eq!(settings.openai.api_key, "sk-config");
        assert_eq!(settings.openai.base_url, "https://config.example.com/v1");
        assert_eq!(settings.arcade.api_key, "arc-env");
        assert_eq!(settings.arcade.base_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let env = env_of(&[
            ("OPENAI_API_KEY", "sk"),
            ("ARCADE_API_KEY", "arc"),
            ("OPENAI_MODEL", "m"),
            ("ARCADE_USER_ID", "u"),
            ("OPENAI_BASE_URL", "not a url"),
        ]);
        let err = Config::default()
            .resolve_with(&Overrides::default(), &env)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid(msg) if msg.contains("Invalid OpenAI base URL")));
    }

    #[test]
    fn test_system_prompt_file_wins_over_inline() {
        let dir = tempdir().unwrap();
        let prompt_file = dir.path().join("prompt.txt");
        fs::write(&prompt_file, "file prompt\n").unwrap();

        let config = Config {
            system_prompt_file: Some(prompt_file.to_str().unwrap().to_string()),
            system_prompt: Some("inline prompt".to_string()),
            ..Config::default()
        };
        let settings = config
            .resolve_with(&Overrides::default(), &keyed_env())
            .unwrap();
        assert_eq!(settings.system_prompt.as_deref(), Some("file prompt"));
    }

    #[test]
    fn test_builtin_prompt_used_when_unset() {
        let settings = Config::default()
            .resolve_with(&Overrides::default(), &keyed_env())
            .unwrap();
        let prompt = settings.system_prompt.unwrap();
        assert!(prompt.contains("Dropbox_DownloadFile"));
    }

    #[test]
    fn test_zero_limits_are_invalid() {
        let config = Config {
            max_steps: 0,
            ..Config::default()
        };
        let err = config
            .resolve_with(&Overrides::default(), &keyed_env())
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid(_)));
    }

    #[test]
    fn test_settings_carry_tool_selection() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[tools]
toolkits = ["Dropbox", "Gmail"]
tools = ["Slack.SendMessage"]
limit = 20
allow_truncation = true
approval = ["Dropbox_DownloadFile"]

[auth]
wait_timeout_secs = 30
"#,
        )
        .unwrap();

        let settings = Config::load_from(&config_path)
            .unwrap()
            .resolve_with(&Overrides::default(), &keyed_env())
            .unwrap();
        assert_eq!(settings.tools.toolkits, vec!["Dropbox", "Gmail"]);
        assert_eq!(settings.tools.tools, vec!["Slack.SendMessage"]);
        assert_eq!(settings.tools.limit, 20);
        assert!(settings.tools.allow_truncation);
        assert_eq!(settings.tools.approval, vec!["Dropbox_DownloadFile"]);
        assert_eq!(settings.auth_wait_timeout, Duration::from_secs(30));
    }
}
