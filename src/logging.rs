//! Structured logging setup.
//!
//! Logs go to stderr unless a log file is configured; a line-mode host that
//! owns stdout should always configure a file.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::AgentConfig;
use crate::error::AgentError;

/// Installs the global `tracing` subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed.
pub fn init(config: &AgentConfig) -> Result<bool, AgentError> {
    let filter = EnvFilter::try_new(&config.log_filter).map_err(|error| {
        AgentError::configuration(format!("invalid log filter '{}': {error}", config.log_filter))
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|error| {
                    AgentError::configuration(format!(
                        "cannot open log file {}: {error}",
                        path.display()
                    ))
                })?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .is_ok()
        }
        None => builder.with_writer(std::io::stderr).try_init().is_ok(),
    };

    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_filter_is_a_configuration_error() {
        let config = AgentConfig {
            log_filter: "agent_stream=verbose".to_string(),
            ..AgentConfig::default()
        };

        assert!(matches!(init(&config), Err(AgentError::Configuration(_))));
    }
}
