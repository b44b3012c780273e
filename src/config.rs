use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_relay_config")]
    pub relay: RelayConfig,
    pub telegram: TelegramConfig,
    pub github: GithubConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Port the webhook listener binds to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of upload workers draining the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the bounded job queue between the webhook handler
    /// and the workers.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a seen update_id suppresses redeliveries, in seconds.
    #[serde(default = "default_dedupe_window_secs")]
    pub dedupe_window_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Base URL of the local Bot API server, e.g. "http://localhost:8080".
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// When true the gateway serves files from local storage and the
    /// public Bot API's 20 MiB getFile ceiling does not apply.
    #[serde(default = "default_local_mode")]
    pub local_mode: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default)]
    pub token: String,
    /// Target repository as "owner/repo".
    #[serde(default)]
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Leading path component for uploaded files inside the repo.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// Maximum publish attempts for transient failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// First backoff delay in milliseconds; grows exponentially up to
    /// retry_max_delay_ms.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// If non-empty, only files with one of these extensions (lowercase,
    /// without the dot) are uploaded; others get a usage hint.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
}

fn default_port() -> u16 {
    10000
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_dedupe_window_secs() -> u64 {
    300
}

fn default_api_base() -> String {
    "http://localhost:8080".to_string()
}

fn default_local_mode() -> bool {
    true
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_path_prefix() -> String {
    "uploads".to_string()
}

fn default_max_attempts() -> usize {
    5
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    10_000
}

fn default_relay_config() -> RelayConfig {
    RelayConfig {
        port: default_port(),
        workers: default_workers(),
        queue_capacity: default_queue_capacity(),
        dedupe_window_secs: default_dedupe_window_secs(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Same as [`Config::load`] but starting from an empty TOML document,
    /// so a deployment can run on environment variables alone.
    pub fn from_env() -> Result<Self> {
        let mut config: Config =
            toml::from_str("[telegram]\n[github]\n").context("Failed to build default config")?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for the deploy-time facts: tokens and the
    /// gateway endpoint come from the process environment when present.
    /// Takes a lookup closure so tests don't touch the real environment.
    pub fn apply_env_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Some(v) = get("TELEGRAM_API_BASE") {
            self.telegram.api_base = v;
        }
        if let Some(v) = get("GITHUB_TOKEN") {
            self.github.token = v;
        }
        if let Some(v) = get("GITHUB_REPO") {
            self.github.repo = v;
        }
        if let Some(v) = get("PORT") {
            if let Ok(port) = v.parse() {
                self.relay.port = port;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.telegram.bot_token.trim().is_empty() {
            missing.push("telegram.bot_token (or BOT_TOKEN)");
        }
        if self.github.token.trim().is_empty() {
            missing.push("github.token (or GITHUB_TOKEN)");
        }
        if self.github.repo.trim().is_empty() {
            missing.push("github.repo (or GITHUB_REPO)");
        }
        if !missing.is_empty() {
            anyhow::bail!("Missing required settings: {}", missing.join(", "));
        }
        if self.github.max_attempts == 0 {
            anyhow::bail!("github.max_attempts must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
[telegram]
bot_token = "123:abc"

[github]
token = "ghp_test"
repo = "user/files"
"#
    }

    #[test]
    fn test_defaults_applied() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.relay.port, 10000);
        assert_eq!(config.relay.workers, 4);
        assert_eq!(config.relay.dedupe_window_secs, 300);
        assert_eq!(config.telegram.api_base, "http://localhost:8080");
        assert!(config.telegram.local_mode);
        assert_eq!(config.github.branch, "main");
        assert_eq!(config.github.path_prefix, "uploads");
        assert_eq!(config.github.max_attempts, 5);
        assert!(config.github.allowed_extensions.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.apply_env_overrides(|name| match name {
            "BOT_TOKEN" => Some("456:def".to_string()),
            "GITHUB_REPO" => Some("other/repo".to_string()),
            "TELEGRAM_API_BASE" => Some("http://gateway:8081".to_string()),
            "PORT" => Some("9000".to_string()),
            _ => None,
        });
        assert_eq!(config.telegram.bot_token, "456:def");
        assert_eq!(config.github.repo, "other/repo");
        assert_eq!(config.telegram.api_base, "http://gateway:8081");
        assert_eq!(config.relay.port, 9000);
        // Untouched values survive.
        assert_eq!(config.github.token, "ghp_test");
    }

    #[test]
    fn test_validate_names_missing_settings() {
        let config: Config = toml::from_str("[telegram]\n[github]\n").unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("BOT_TOKEN"));
        assert!(err.contains("GITHUB_TOKEN"));
        assert!(err.contains("GITHUB_REPO"));
    }

    #[test]
    fn test_explicit_sections_parse() {
        let config: Config = toml::from_str(
            r#"
[relay]
port = 10001
workers = 2
queue_capacity = 8
dedupe_window_secs = 60

[telegram]
bot_token = "t"
api_base = "http://localhost:8080"
local_mode = false

[github]
token = "g"
repo = "a/b"
branch = "uploads"
path_prefix = "incoming"
allowed_extensions = ["ipa"]
"#,
        )
        .unwrap();
        assert_eq!(config.relay.port, 10001);
        assert!(!config.telegram.local_mode);
        assert_eq!(config.github.branch, "uploads");
        assert_eq!(config.github.allowed_extensions, vec!["ipa"]);
    }
}
