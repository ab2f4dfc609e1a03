//! Configuration loading helper functions
//!
//! Layered loading with figment: struct defaults, then the YAML file, then
//! prefixed environment variables.

use errors::{SyncError, SyncResult};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Load a configuration for `service_name`.
///
/// Priority (highest to lowest):
/// 1. `{SERVICE}_`-prefixed environment variables (nested keys split on `__`)
/// 2. The YAML file at `path` (or `config/{service}.yaml` when `path` is None)
/// 3. `T::default()`
///
/// A missing file is not an error; a malformed one is.
pub fn load_layered<T>(service_name: &str, path: Option<&Path>) -> SyncResult<T>
where
    T: Serialize + for<'de> Deserialize<'de> + Default,
{
    let default_path = format!("config/{}.yaml", service_name);
    let file = path.unwrap_or_else(|| Path::new(&default_path));

    if path.is_some() && !file.exists() {
        return Err(SyncError::Configuration(format!(
            "Config file not found: {}",
            file.display()
        )));
    }
    if file.exists() {
        info!("Loading configuration from {}", file.display());
    } else {
        debug!("No config file at {}, using defaults", file.display());
    }

    let prefix = format!("{}_", service_name.to_uppercase());
    Figment::from(Serialized::defaults(T::default()))
        .merge(Yaml::file(file))
        .merge(Env::prefixed(&prefix).split("__"))
        .extract()
        .map_err(|e| SyncError::Configuration(format!("Failed to load configuration: {}", e)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Demo {
        name: String,
        limit: u32,
    }

    impl Default for Demo {
        fn default() -> Self {
            Self {
                name: "demo".to_string(),
                limit: 10,
            }
        }
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(load_layered::<Demo>("demotest", Some(&missing)).is_err());
    }

    #[test]
    fn test_defaults_without_file() {
        // No config/demotest.yaml next to the crate, so only defaults apply
        let cfg: Demo = load_layered("demotest", None).unwrap();
        assert_eq!(cfg, Demo::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "limit: 42").unwrap();

        let cfg: Demo = load_layered("demotest", Some(&path)).unwrap();
        assert_eq!(cfg.limit, 42);
        assert_eq!(cfg.name, "demo");
    }
}
