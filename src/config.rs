//! Application configuration loaded from environment variables.
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Deadline Propagation
//!
//! - `DEADLINE_HEADER_NAME`: Header carrying the deadline (default: `Deadline`)
//! - `DEADLINE_DEFAULT_TIMEOUT_MS`: Deadline applied when none is given (default: 0 = none)
//! - `DEADLINE_MAX_TIMEOUT_MS`: Upper bound on any deadline (default: 0 = unbounded)
//!
//! # Access Logging
//!
//! - `ACCESS_LOG_SKIP_PATHS`: Comma-separated exact paths to skip (default: `/health`)
//! - `ACCESS_LOG_SKIP_ROUTES`: Comma-separated route patterns to skip (default: none)

use std::env;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::error::{AppError, AppResult};
use crate::middleware::{AccessLogConfig, DeadlineConfig};

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" | "" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?} (expected pretty or json)")),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Deadline Configuration
    // =========================================================================
    /// Shared by the inbound and outbound deadline stages
    pub deadline: DeadlineConfig,

    // =========================================================================
    // Access Log Configuration
    // =========================================================================
    /// Request paths that produce no access record (default: ["/health"])
    pub access_log_skip_paths: Vec<String>,

    /// Matched route patterns that produce no access record
    pub access_log_skip_routes: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Human-readable or JSON log lines
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value is invalid
    /// (e.g., non-numeric PORT value, malformed header name).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let deadline = DeadlineConfig::builder()
            .header_name(env::var("DEADLINE_HEADER_NAME").unwrap_or_default())
            .default_timeout(Duration::from_millis(Self::parse_env(
                "DEADLINE_DEFAULT_TIMEOUT_MS",
                0,
            )?))
            .max_timeout(Duration::from_millis(Self::parse_env(
                "DEADLINE_MAX_TIMEOUT_MS",
                0,
            )?))
            .build()?;

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,

            // Deadline
            deadline,

            // Access log
            access_log_skip_paths: Self::parse_list("ACCESS_LOG_SKIP_PATHS", "/health"),
            access_log_skip_routes: Self::parse_list("ACCESS_LOG_SKIP_ROUTES", ""),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::Pretty)?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    fn validate(&self) -> AppResult<()> {
        EnvFilter::try_new(&self.log_level)
            .map_err(|e| AppError::ConfigError(format!("Invalid RUST_LOG: {e}")))?;

        if let Some(path) = self
            .access_log_skip_paths
            .iter()
            .find(|path| !path.starts_with('/'))
        {
            return Err(AppError::ConfigError(format!(
                "ACCESS_LOG_SKIP_PATHS entries must start with '/': {path:?}"
            )));
        }

        if self.metrics_enabled() && self.metrics_port == self.port {
            return Err(AppError::ConfigError(format!(
                "METRICS_PORT ({}) must differ from PORT",
                self.metrics_port
            )));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Tracing filter built from `log_level`, falling back to `info`.
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Access log settings derived from the skip lists.
    pub fn access_log_config(&self) -> AccessLogConfig {
        AccessLogConfig::default()
            .with_path_filter(self.access_log_skip_paths.iter().cloned())
            .with_route_filter(self.access_log_skip_routes.iter().cloned())
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, dropping empty entries.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        split_list(&env::var(name).unwrap_or_else(|_| default.to_string()))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            deadline: DeadlineConfig::default(),
            access_log_skip_paths: vec!["/health".to_string()],
            access_log_skip_routes: Vec::new(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server_addr(), "0.0.0.0:3000");
        assert!(config.metrics_addr().is_none());
    }

    #[test]
    fn test_validate_rejects_relative_skip_path() {
        let config = Config {
            access_log_skip_paths: vec!["health".to_string()],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_port_clash() {
        let config = Config {
            metrics_port: 3000,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metrics_addr_enabled() {
        let config = Config {
            metrics_port: 9100,
            ..Config::default()
        };
        assert_eq!(config.metrics_addr().unwrap().port(), 9100);
    }

    #[test]
    fn test_log_filter_uses_log_level() {
        let config = Config {
            log_level: "warn,edge_middleware=debug".to_string(),
            ..Config::default()
        };
        let filter = config.log_filter().to_string().to_lowercase();
        assert!(filter.contains("edge_middleware=debug"), "{filter}");
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let config = Config {
            log_level: "edge_middleware=loud".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" /health, ,/ready ,"),
            vec!["/health".to_string(), "/ready".to_string()]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
