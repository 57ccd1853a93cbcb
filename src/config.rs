//! Configuration loader and validator for the relay bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::broadcast::{EngineConfig, PacingPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    #[serde(default)]
    pub broadcast: Broadcast,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

impl App {
    /// `data_dir` with a leading `~/` expanded.
    pub fn resolved_data_dir(&self) -> String {
        match (self.data_dir.strip_prefix("~/"), std::env::var("HOME")) {
            (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
            _ => self.data_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// The single user allowed to run owner-only commands.
    pub owner_id: i64,
}

/// Broadcast tuning. Every field falls back to the engine default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Broadcast {
    pub concurrency: usize,
    pub pace_every: usize,
    pub pace_pause_ms: u64,
    /// 0 disables the per-chat deadline.
    pub delivery_timeout_secs: u64,
}

impl Default for Broadcast {
    fn default() -> Self {
        Self {
            concurrency: 15,
            pace_every: 25,
            pace_pause_ms: 1000,
            delivery_timeout_secs: 30,
        }
    }
}

impl Broadcast {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            concurrency: self.concurrency,
            pacing: PacingPolicy {
                every: self.pace_every,
                pause: Duration::from_millis(self.pace_pause_ms),
            },
            delivery_timeout: (self.delivery_timeout_secs > 0)
                .then(|| Duration::from_secs(self.delivery_timeout_secs)),
        }
    }
}

/// Links shown to regular users on /start.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Links {
    pub support_url: Option<String>,
    pub promo_url: Option<String>,
}

impl Config {
    /// Ensure `app.data_dir` exists.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// `DATABASE_URL` if set, otherwise a SQLite file inside the data dir.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!("sqlite://{}/relaybot.db", self.app.resolved_data_dir())
        })
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.owner_id <= 0 {
        return Err(ConfigError::Invalid("telegram.owner_id must be a positive user id"));
    }
    if cfg.broadcast.concurrency == 0 {
        return Err(ConfigError::Invalid("broadcast.concurrency must be > 0"));
    }
    Ok(())
}

/// Example configuration, also used by tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  owner_id: 123456789

broadcast:
  concurrency: 15
  pace_every: 25
  pace_pause_ms: 1000
  delivery_timeout_secs: 30

links:
  support_url: "https://t.me/YourSupportHandle"
  promo_url: "https://t.me/YourPromoHandle"
"#
}
