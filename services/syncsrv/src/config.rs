//! syncsrv configuration
//!
//! Loaded with `common::config_loader::load_layered`: defaults, then
//! `config/syncsrv.yaml`, then `SYNCSRV_*` environment variables
//! (`SYNCSRV_SOURCE__TOKEN`, `SYNCSRV_COLLECTOR__LIMIT`, ...).

use std::path::Path;

use errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

use crate::collector::CollectorConfig;
use crate::source::HttpSourceConfig;

pub const SERVICE_NAME: &str = "syncsrv";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file holding the mirror
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/mirror.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write a daily log file besides the console
    pub file: bool,
    /// JSON lines instead of text in the log file
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: true,
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub source: HttpSourceConfig,
    pub database: DatabaseConfig,
    pub collector: CollectorConfig,
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Load and validate the layered configuration
    pub fn load(path: Option<&Path>) -> SyncResult<Self> {
        let config: Self = common::config_loader::load_layered(SERVICE_NAME, path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        let url = self.source.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid("source.base_url", "must start with http:// or https://"));
        }
        if self.source.page_size == 0 {
            return Err(invalid("source.page_size", "must be at least 1"));
        }
        if self.source.request_timeout_secs == 0 {
            return Err(invalid("source.request_timeout_secs", "must be at least 1"));
        }
        if self.database.path.trim().is_empty() {
            return Err(invalid("database.path", "must not be empty"));
        }
        if self.collector.limit == 0 {
            return Err(invalid("collector.limit", "must be at least 1"));
        }
        if self.collector.window_hours == 0 {
            return Err(invalid("collector.window_hours", "must be at least 1"));
        }
        if self.collector.source_timeout_ms == 0 {
            return Err(invalid("collector.source_timeout_ms", "must be at least 1"));
        }
        if let Some((key, _)) = self
            .collector
            .ontology
            .iter()
            .find(|(_, name)| name.trim().is_empty())
        {
            return Err(invalid(
                "collector.ontology",
                &format!("empty ontology name for {}", key),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> SyncError {
    SyncError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
