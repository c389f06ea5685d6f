//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener configuration
    pub listener: Option<ListenerConfig>,
    /// Connector configuration
    pub connector: Option<ConnectorConfig>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Listener (public side) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Signaling address to bind
    pub listen: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7000".to_string(),
        }
    }
}

/// Connector (private side) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Signaling address of the listener host
    pub server: String,
    /// Target service to expose, as `host` or `host:port`
    pub target: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:7000".to_string(),
            target: "127.0.0.1:443".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Split a `host[:port]` target spec, defaulting the port when absent.
pub fn parse_target(spec: &str) -> Result<(String, u16), crate::Error> {
    match spec.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(crate::Error::Config(format!(
                    "Target '{}' has no host",
                    spec
                )));
            }
            let port = port.parse::<u16>().map_err(|_| {
                crate::Error::Config(format!("Invalid target port in '{}'", spec))
            })?;
            Ok((host.to_string(), port))
        }
        None if spec.is_empty() => {
            Err(crate::Error::Config("Empty target address".to_string()))
        }
        None => Ok((spec.to_string(), crate::DEFAULT_TARGET_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_with_port() {
        assert_eq!(
            parse_target("10.0.0.5:8080").unwrap(),
            ("10.0.0.5".to_string(), 8080)
        );
    }

    #[test]
    fn test_parse_target_default_port() {
        assert_eq!(
            parse_target("internal.example").unwrap(),
            ("internal.example".to_string(), crate::DEFAULT_TARGET_PORT)
        );
    }

    #[test]
    fn test_parse_target_rejects_garbage() {
        assert!(parse_target("").is_err());
        assert!(parse_target(":8080").is_err());
        assert!(parse_target("host:notaport").is_err());
        assert!(parse_target("host:70000").is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [listener]
            listen = "0.0.0.0:9000"

            [connector]
            server = "203.0.113.1:9000"
            target = "127.0.0.1:22"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.unwrap().listen, "0.0.0.0:9000");
        let connector = config.connector.unwrap();
        assert_eq!(connector.server, "203.0.113.1:9000");
        assert_eq!(connector.target, "127.0.0.1:22");
        assert_eq!(config.logging.level, "info");
    }
}
