//! Configuration loader and validator for the notice push bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    pub fib_api: FibApi,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub database_url: String,
    /// Cadence of the push job, in seconds.
    pub push_interval_secs: u64,
    /// Seconds past the top of the minute to wait before the first fetch of
    /// a run, to tolerate upstream clock skew.
    pub clock_skew_wait_secs: u32,
    /// Base URL the bot redirects `mailto:` links through. A trailing `?` or
    /// `&` is appended at load time so query parameters can be concatenated.
    pub mailto_redirect_url: String,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
}

/// FIB API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FibApi {
    /// Client ID used for the public (unauthenticated) API endpoints.
    pub public_client_id: String,
}

/// Load configuration from a YAML file, validate it, and normalize the
/// mailto redirect URL.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    cfg.app.mailto_redirect_url = normalize_mailto_redirect_url(&cfg.app.mailto_redirect_url)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.database_url.trim().is_empty() {
        return Err(ConfigError::Invalid("app.database_url must be non-empty"));
    }
    if cfg.app.push_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.push_interval_secs must be > 0"));
    }
    if cfg.app.mailto_redirect_url.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.mailto_redirect_url must be non-empty",
        ));
    }
    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.fib_api.public_client_id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "fib_api.public_client_id must be non-empty",
        ));
    }
    Ok(())
}

/// Ensure the redirect URL ends with `?` or `&` so encoded parameters can be
/// appended directly.
fn normalize_mailto_redirect_url(raw: &str) -> Result<String, ConfigError> {
    let parsed = Url::parse(raw)
        .map_err(|_| ConfigError::Invalid("app.mailto_redirect_url is not a valid URL"))?;
    let suffix = if parsed.query().is_some() { "&" } else { "?" };
    Ok(format!("{raw}{suffix}"))
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  database_url: "sqlite://./data/raco-notify.db"
  push_interval_secs: 60
  clock_skew_wait_secs: 5
  mailto_redirect_url: "https://raco-notify.example.com/mailto"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"

fib_api:
  public_client_id: "YOUR_FIB_API_PUBLIC_CLIENT_ID"
"#
}
