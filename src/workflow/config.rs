//! Engine configuration
//!
//! Loaded from `engine.yaml` (or any path passed to `EngineConfig::load`).
//! Every field is optional:
//!
//! ```yaml
//! worker_pool_size: 4
//! scheduler_tick_ms: 1000
//! enforce_step_timeouts: true
//! max_step_executions: 500
//! definitions_dir: ./workflows
//!
//! display:
//!   max_list_items: 20
//!   redacted_keys: [password, secret, token, key, auth, cookie]
//!
//! http:
//!   default_timeout_seconds: 10
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::loader::LoadError;

/// Redaction and truncation applied to externally visible views
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    #[serde(default = "default_max_list_items")]
    pub max_list_items: usize,

    /// Case-insensitive substrings marking a variable key as sensitive
    #[serde(default = "default_redacted_keys")]
    pub redacted_keys: Vec<String>,
}

fn default_max_list_items() -> usize {
    10
}

fn default_redacted_keys() -> Vec<String> {
    ["password", "secret", "token", "key", "auth"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            max_list_items: default_max_list_items(),
            redacted_keys: default_redacted_keys(),
        }
    }
}

/// Settings for the built-in `http_request` handler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub default_timeout_seconds: u64,
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_http_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Number of step workers; 1 serializes every step of every instance
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    #[serde(default = "default_scheduler_tick_ms")]
    pub scheduler_tick_ms: u64,

    /// Cancel handlers that run past their step's `timeout_seconds`
    #[serde(default)]
    pub enforce_step_timeouts: bool,

    /// Per-instance cap on step entries (guards against goto loops).
    /// Retries of a step do not count.
    #[serde(default = "default_max_step_executions")]
    pub max_step_executions: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions_dir: Option<PathBuf>,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

fn default_worker_pool_size() -> usize {
    1
}

fn default_scheduler_tick_ms() -> u64 {
    1000
}

fn default_max_step_executions() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            scheduler_tick_ms: default_scheduler_tick_ms(),
            enforce_step_timeouts: false,
            max_step_executions: default_max_step_executions(),
            definitions_dir: None,
            display: DisplayConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            serde_yaml::from_str(&content).map_err(|e| LoadError::Yaml {
                file: path.display().to_string(),
                error: e,
            })?;
        Ok(config)
    }

    /// Worker count, never less than one
    pub fn workers(&self) -> usize {
        self.worker_pool_size.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_pool_size, 1);
        assert_eq!(config.scheduler_tick_ms, 1000);
        assert!(!config.enforce_step_timeouts);
        assert_eq!(config.max_step_executions, 1000);
        assert_eq!(config.display.max_list_items, 10);
        assert_eq!(config.display.redacted_keys.len(), 5);
        assert_eq!(config.http.default_timeout_seconds, 30);
    }

    #[test]
    fn test_parse_partial_config() {
        let yaml = r#"
worker_pool_size: 4
display:
  max_list_items: 3
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.display.max_list_items, 3);
        assert_eq!(config.display.redacted_keys, default_redacted_keys());
        assert_eq!(config.scheduler_tick_ms, 1000);
    }

    #[test]
    fn test_workers_never_zero() {
        let config: EngineConfig = serde_yaml::from_str("worker_pool_size: 0").unwrap();
        assert_eq!(config.workers(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "enforce_step_timeouts: true\ndefinitions_dir: ./flows\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert!(config.enforce_step_timeouts);
        assert_eq!(config.definitions_dir, Some(PathBuf::from("./flows")));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "worker_pool_size: [").unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(LoadError::Yaml { .. })
        ));
    }
}
