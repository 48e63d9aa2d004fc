use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::constants;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} not found. Please set it in the environment or the .env file.")]
    MissingCredential(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Process-wide settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    /// Bounds both the HTTP request and the controller's wait for a reply.
    pub timeout: Duration,
    /// Idle time after which a web session is evicted.
    pub session_ttl: Duration,
    pub templates_dir: PathBuf,
    pub background_path: PathBuf,
}

impl Config {
    /// Reads the configuration from the process environment. Call after `dotenvy::dotenv()`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(
            env::var(constants::API_KEY_VAR).ok(),
            env::var(constants::TIMEOUT_VAR).ok(),
            env::var(constants::SESSION_TTL_VAR).ok(),
        )
    }

    fn build(
        api_key: Option<String>,
        timeout: Option<String>,
        session_ttl: Option<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingCredential(constants::API_KEY_VAR))?;

        let timeout_secs = parse_secs(constants::TIMEOUT_VAR, timeout, constants::DEFAULT_TIMEOUT_SECS)?;
        let ttl_secs = parse_secs(
            constants::SESSION_TTL_VAR,
            session_ttl,
            constants::DEFAULT_SESSION_TTL_SECS,
        )?;

        Ok(Self {
            api_key,
            model: constants::GEMINI_MODEL.clone(),
            api_base: constants::GEMINI_API_BASE.clone(),
            timeout: Duration::from_secs(timeout_secs),
            session_ttl: Duration::from_secs(ttl_secs),
            templates_dir: PathBuf::from(constants::TEMPLATES_DIR.as_str()),
            background_path: PathBuf::from(constants::BACKGROUND_PATH.as_str()),
        })
    }
}

/// Positive whole seconds, or `default` when unset.
fn parse_secs(name: &'static str, raw: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or(ConfigError::InvalidValue { name, value: raw }),
        None => Ok(default),
    }
}
