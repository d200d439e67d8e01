//! Configuration management for Slidegate.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `SLIDEGATE__*` environment variables (`SLIDEGATE__STORE__REDIS_URL`, ...).

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SlidegateError};

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "SLIDEGATE";

/// Main configuration for the gateway binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidegateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Rate-limited routes
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteLimit>,
}

impl Default for SlidegateConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            log: LogConfig::default(),
            routes: default_routes(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Key clients by validated forwarded-for headers
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            trust_forwarded_for: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 1234))
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix applied to every attempt-record key
    #[serde(default)]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            key_prefix: String::new(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A route served behind its own sliding window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLimit {
    /// Request path, e.g. `/one`
    pub path: String,
    /// Attempts admitted per window
    pub max_calls: u64,
    /// Window length in seconds
    pub window_secs: u64,
    /// Response body for admitted requests
    #[serde(default)]
    pub body: String,
}

impl RouteLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_routes() -> Vec<RouteLimit> {
    vec![
        RouteLimit {
            path: "/one".to_string(),
            max_calls: 2,
            window_secs: 10,
            body: "one".to_string(),
        },
        RouteLimit {
            path: "/two".to_string(),
            max_calls: 5,
            window_secs: 1,
            body: "two".to_string(),
        },
    ]
}

impl SlidegateConfig {
    /// Load defaults, then `path` (if given), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: SlidegateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SlidegateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document without consulting the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SlidegateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SlidegateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject routes that could never admit anything or never match.
    pub fn validate(&self) -> Result<()> {
        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(SlidegateError::Config(format!(
                    "route path {:?} must start with '/'",
                    route.path
                )));
            }
            if route.max_calls == 0 {
                return Err(SlidegateError::Config(format!(
                    "route {} must allow at least one call",
                    route.path
                )));
            }
            if route.window_secs == 0 {
                return Err(SlidegateError::Config(format!(
                    "route {} needs a non-zero window",
                    route.path
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SlidegateConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:1234".parse().unwrap());
        assert!(!config.server.trust_forwarded_for);
        assert_eq!(config.store.redis_url, "redis://127.0.0.1:6379/");
        assert_eq!(config.log.level, "info");
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].window(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  listen_addr: 0.0.0.0:9000
  trust_forwarded_for: true
store:
  redis_url: redis://cache:6379/2
  key_prefix: "gate:"
log:
  level: debug
  json: true
routes:
  - path: /api
    max_calls: 100
    window_secs: 60
    body: hello
"#;
        let config = SlidegateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert!(config.server.trust_forwarded_for);
        assert_eq!(config.store.key_prefix, "gate:");
        assert!(config.log.json);
        assert_eq!(
            config.routes,
            vec![RouteLimit {
                path: "/api".to_string(),
                max_calls: 100,
                window_secs: 60,
                body: "hello".to_string(),
            }]
        );
    }

    #[test]
    fn test_rejects_zero_max_calls() {
        let yaml = r#"
routes:
  - path: /api
    max_calls: 0
    window_secs: 1
"#;
        let err = SlidegateConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, SlidegateError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_window() {
        let yaml = r#"
routes:
  - path: /api
    max_calls: 3
    window_secs: 0
"#;
        assert!(SlidegateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_relative_path() {
        let yaml = r#"
routes:
  - path: api
    max_calls: 3
    window_secs: 1
"#;
        assert!(SlidegateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = SlidegateConfig::load(None).unwrap();
        assert_eq!(config.routes.len(), 2);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = SlidegateConfig::load(Some(Path::new("/nonexistent/slidegate.yaml")))
            .unwrap_err();
        assert!(matches!(err, SlidegateError::Config(_)));
    }
}
