use std::path::PathBuf;
use std::time::Duration;

use dotenv::dotenv;
use thiserror::Error;

use crate::idle::IdlePolicy;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_CONCURRENT_RENDERS: usize = 4;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BODY_LIMIT_BYTES: usize = 20 * 1024 * 1024;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Process-wide settings, read once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// Shared secret expected in `x-api-key`. `None` keeps the server up but
    /// every request is refused.
    pub api_key: Option<String>,
    pub max_concurrent_renders: usize,
    pub render_timeout: Duration,
    pub network_idle: IdlePolicy,
    pub body_limit: usize,
    pub chrome_executable: Option<PathBuf>,
    pub chrome_no_sandbox: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            api_key: None,
            max_concurrent_renders: DEFAULT_MAX_CONCURRENT_RENDERS,
            render_timeout: Duration::from_secs(DEFAULT_RENDER_TIMEOUT_SECS),
            network_idle: IdlePolicy::default(),
            body_limit: DEFAULT_BODY_LIMIT_BYTES,
            chrome_executable: None,
            chrome_no_sandbox: true,
        }
    }
}

impl AppConfig {
    /// Load from the process environment, after merging an optional `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(port) = lookup("PORT") {
            config.port = parse("PORT", &port)?;
        }

        config.api_key = lookup("API_KEY").filter(|key| !key.is_empty());

        if let Some(value) = lookup("MAX_CONCURRENT_RENDERS") {
            config.max_concurrent_renders = parse_positive("MAX_CONCURRENT_RENDERS", &value)?;
        }
        if let Some(value) = lookup("RENDER_TIMEOUT_SECS") {
            config.render_timeout =
                Duration::from_secs(parse_positive("RENDER_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("NETWORK_IDLE_TIMEOUT_SECS") {
            config.network_idle.timeout =
                Duration::from_secs(parse_positive("NETWORK_IDLE_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("NETWORK_IDLE_WINDOW_MS") {
            config.network_idle.quiet_window =
                Duration::from_millis(parse("NETWORK_IDLE_WINDOW_MS", &value)?);
        }
        if let Some(value) = lookup("NETWORK_IDLE_MAX_INFLIGHT") {
            config.network_idle.max_inflight = parse("NETWORK_IDLE_MAX_INFLIGHT", &value)?;
        }
        if let Some(value) = lookup("BODY_LIMIT_BYTES") {
            config.body_limit = parse_positive("BODY_LIMIT_BYTES", &value)?;
        }

        config.chrome_executable = lookup("CHROME_PATH")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        if let Some(value) = lookup("CHROME_NO_SANDBOX") {
            config.chrome_no_sandbox = parse_bool("CHROME_NO_SANDBOX", &value)?;
        }

        Ok(config)
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_positive<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let parsed: T = parse(key, value)?;
    if parsed == T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
