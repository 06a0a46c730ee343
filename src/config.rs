//! Environment configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AgentError;

pub const SHELL_TIMEOUT_ENV_VAR: &str = "AGENT_STREAM_SHELL_TIMEOUT_MS";
pub const RATE_LIMIT_MAX_ENV_VAR: &str = "AGENT_STREAM_RATE_LIMIT_MAX";
pub const RATE_LIMIT_WINDOW_ENV_VAR: &str = "AGENT_STREAM_RATE_LIMIT_WINDOW_MS";
pub const QUIESCENCE_ENV_VAR: &str = "AGENT_STREAM_QUIESCENCE_MS";
pub const HISTORY_CAP_ENV_VAR: &str = "AGENT_STREAM_HISTORY_CAP";
pub const DISPLAY_WINDOW_ENV_VAR: &str = "AGENT_STREAM_DISPLAY_WINDOW";
pub const LOG_FILTER_ENV_VAR: &str = "AGENT_STREAM_LOG";
pub const LOG_FILE_ENV_VAR: &str = "AGENT_STREAM_LOG_FILE";
pub const WORKSPACE_ENV_VAR: &str = "AGENT_STREAM_WORKSPACE";

pub const DEFAULT_SHELL_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RATE_LIMIT_MAX: usize = 30;
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_QUIESCENCE_MS: u64 = 50;
pub const DEFAULT_HISTORY_CAP: usize = 100;
pub const DEFAULT_DISPLAY_WINDOW: usize = 20;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub shell_timeout: Duration,
    pub rate_limit_max: usize,
    pub rate_limit_window: Duration,
    pub quiescence: Duration,
    pub history_cap: usize,
    pub display_window: usize,
    pub log_filter: String,
    pub log_file: Option<PathBuf>,
    pub workspace_root: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            shell_timeout: Duration::from_millis(DEFAULT_SHELL_TIMEOUT_MS),
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            rate_limit_window: Duration::from_millis(DEFAULT_RATE_LIMIT_WINDOW_MS),
            quiescence: Duration::from_millis(DEFAULT_QUIESCENCE_MS),
            history_cap: DEFAULT_HISTORY_CAP,
            display_window: DEFAULT_DISPLAY_WINDOW,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_file: None,
            workspace_root: None,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, AgentError> {
        let config = Self {
            shell_timeout: Duration::from_millis(env_u64(
                SHELL_TIMEOUT_ENV_VAR,
                DEFAULT_SHELL_TIMEOUT_MS,
            )?),
            rate_limit_max: env_usize(RATE_LIMIT_MAX_ENV_VAR, DEFAULT_RATE_LIMIT_MAX)?,
            rate_limit_window: Duration::from_millis(env_u64(
                RATE_LIMIT_WINDOW_ENV_VAR,
                DEFAULT_RATE_LIMIT_WINDOW_MS,
            )?),
            quiescence: Duration::from_millis(env_u64(QUIESCENCE_ENV_VAR, DEFAULT_QUIESCENCE_MS)?),
            history_cap: env_usize(HISTORY_CAP_ENV_VAR, DEFAULT_HISTORY_CAP)?,
            display_window: env_usize(DISPLAY_WINDOW_ENV_VAR, DEFAULT_DISPLAY_WINDOW)?,
            log_filter: env_string_opt(LOG_FILTER_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            log_file: env_string_opt(LOG_FILE_ENV_VAR).map(PathBuf::from),
            workspace_root: env_string_opt(WORKSPACE_ENV_VAR).map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.shell_timeout.is_zero() {
            return Err(AgentError::configuration("shell timeout must be > 0"));
        }
        if self.rate_limit_max == 0 || self.rate_limit_window.is_zero() {
            return Err(AgentError::configuration(
                "rate limit max and window must be > 0",
            ));
        }
        if self.quiescence.is_zero() {
            return Err(AgentError::configuration("quiescence must be > 0"));
        }
        if self.history_cap == 0 {
            return Err(AgentError::configuration("history cap must be > 0"));
        }
        if self.display_window == 0 || self.display_window > self.history_cap {
            return Err(AgentError::configuration(format!(
                "display window must be within 1..={} (got {})",
                self.history_cap, self.display_window
            )));
        }

        Ok(())
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(key: &str, default: u64) -> Result<u64, AgentError> {
    match env_string_opt(key) {
        Some(value) => value
            .parse::<u64>()
            .map_err(|error| AgentError::configuration(format!("{key}={value}: {error}"))),
        None => Ok(default),
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize, AgentError> {
    match env_string_opt(key) {
        Some(value) => value
            .parse::<usize>()
            .map_err(|error| AgentError::configuration(format!("{key}={value}: {error}"))),
        None => Ok(default),
    }
}
