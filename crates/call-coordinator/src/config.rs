//! Coordinator configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default websocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8787";

/// Default grace delay before an empty room's storage is cleared.
///
/// Kept configurable so rapid reconnects (page reloads, flaky links)
/// do not lose roster and chat history.
pub const DEFAULT_EMPTY_GRACE_SECONDS: u64 = 30;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Websocket server bind address (default: "0.0.0.0:8787").
    pub bind_address: String,

    /// Grace delay before an empty room's storage is cleared.
    pub empty_grace: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error for unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error for unparseable values.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("COORDINATOR_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let empty_grace_seconds = match vars.get("ROOM_EMPTY_GRACE_SECONDS") {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::InvalidValue("ROOM_EMPTY_GRACE_SECONDS", raw.clone())
            })?,
            None => DEFAULT_EMPTY_GRACE_SECONDS,
        };

        Ok(Config {
            bind_address,
            empty_grace: Duration::from_secs(empty_grace_seconds),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("defaults should load");
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(
            config.empty_grace,
            Duration::from_secs(DEFAULT_EMPTY_GRACE_SECONDS)
        );
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            (
                "COORDINATOR_BIND_ADDRESS".to_string(),
                "127.0.0.1:9900".to_string(),
            ),
            ("ROOM_EMPTY_GRACE_SECONDS".to_string(), "5".to_string()),
        ]);
        let config = Config::from_vars(&vars).expect("custom values should load");
        assert_eq!(config.bind_address, "127.0.0.1:9900");
        assert_eq!(config.empty_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_from_vars_invalid_grace() {
        let vars = HashMap::from([(
            "ROOM_EMPTY_GRACE_SECONDS".to_string(),
            "soon".to_string(),
        )]);
        let result = Config::from_vars(&vars);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue("ROOM_EMPTY_GRACE_SECONDS", _))
        ));
    }
}
