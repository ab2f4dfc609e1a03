//! Common command-line arguments for syncsrv binaries
//!
//! Provides a unified argument structure that individual binaries flatten
//! into their own `clap` parsers.

#[cfg(feature = "cli")]
use clap::Args;

/// Common startup arguments
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Args))]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    #[cfg_attr(
        feature = "cli",
        arg(short = 'l', long, default_value = "info", env = "RUST_LOG", global = true)
    )]
    pub log_level: String,

    /// Configuration file (YAML)
    #[cfg_attr(feature = "cli", arg(short = 'c', long, env = "SYNCSRV_CONFIG", global = true))]
    pub config: Option<String>,

    /// Custom database path override
    #[cfg_attr(feature = "cli", arg(long, env = "SYNCSRV_DB_PATH", global = true))]
    pub db_path: Option<String>,

    /// Log directory override
    #[cfg_attr(feature = "cli", arg(long, env = "SYNCSRV_LOG_DIR", global = true))]
    pub log_dir: Option<String>,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            config: None,
            db_path: None,
            log_dir: None,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Get database path: CLI flag, then `DATABASE_DIR`, then the configured default
    pub fn get_db_path(&self, configured: &str) -> String {
        if let Some(path) = &self.db_path {
            return path.clone();
        }

        if let Ok(dir) = std::env::var("DATABASE_DIR") {
            return format!("{}/mirror.db", dir);
        }

        configured.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = ServiceArgs::default();
        assert_eq!(args.parse_log_level(), tracing::Level::INFO);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_parse_log_level() {
        let args = ServiceArgs {
            log_level: "WARNING".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::WARN);
    }

    #[test]
    fn test_db_path_override_wins() {
        let args = ServiceArgs {
            db_path: Some("/tmp/override.db".to_string()),
            ..Default::default()
        };
        assert_eq!(args.get_db_path("data/mirror.db"), "/tmp/override.db");
    }
}
