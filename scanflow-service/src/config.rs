// Engine Configuration
// Work root, worker pool, external indexes and logging, from YAML plus environment

use crate::logging::LoggingConfig;
use crate::steps::index::{JsonPackageIndex, JsonVulnerabilityIndex};
use crate::steps::ExternalServices;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use std::{env, fs};
use thiserror::Error;
use tracing::{debug, warn};

/// Configuration file looked up in the work root
pub const CONFIG_FILE: &str = "scanflow.yml";

/// Prefix of the environment overrides
pub const ENV_PREFIX: &str = "SCANFLOW_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Holds the persisted state, stop markers and project work directories
    pub work_root: PathBuf,

    /// Runs executed concurrently by the queue
    pub workers: usize,

    /// Wall-clock ceiling per run, in seconds; 0 disables it
    pub run_timeout: u64,

    /// JSON package index used by the matching pipeline
    pub package_index: Option<PathBuf>,

    /// JSON advisory index used by the vulnerability pipeline
    pub vulnerability_index: Option<PathBuf>,

    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let work_root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".scanflow");

        Self {
            work_root,
            workers: 2,
            run_timeout: 24 * 3600,
            package_index: None,
            vulnerability_index: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults, then `scanflow.yml` (explicit path or in the work root), then environment
    pub fn load(explicit: Option<&Path>) -> ConfigResult<Self> {
        let vars: HashMap<String, String> = env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();

        // The work root itself may come from the environment
        let default_root = vars
            .get("SCANFLOW_WORK_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::default().work_root);

        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_root.join(CONFIG_FILE));

        let mut config = if path.exists() {
            debug!(path = %path.display(), "loading config file");
            Self::from_file(&path)?
        } else {
            if explicit.is_some() {
                return Err(ConfigError::Read {
                    path,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                });
            }
            Self {
                work_root: default_root,
                ..Default::default()
            }
        };
        config.apply_overrides(&vars)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    /// Apply `SCANFLOW_*` variables on top of the current values
    pub fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> ConfigResult<()> {
        for (key, value) in vars {
            let invalid = || ConfigError::InvalidValue {
                key: key.clone(),
                value: value.clone(),
            };
            match key.trim_start_matches(ENV_PREFIX) {
                "WORK_ROOT" => self.work_root = PathBuf::from(value),
                "WORKERS" => self.workers = value.parse().map_err(|_| invalid())?,
                "RUN_TIMEOUT" => self.run_timeout = value.parse().map_err(|_| invalid())?,
                "PACKAGE_INDEX" => self.package_index = Some(PathBuf::from(value)),
                "VULNERABILITY_INDEX" => self.vulnerability_index = Some(PathBuf::from(value)),
                "LOG_LEVEL" => self.logging.level = value.clone(),
                "LOG_JSON" => {
                    self.logging.json = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes")
                }
                other => debug!(variable = other, "ignoring unknown override"),
            }
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "workers".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn state_file(&self) -> PathBuf {
        self.work_root.join("state.json")
    }

    pub fn stop_dir(&self) -> PathBuf {
        self.work_root.join("stops")
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.run_timeout > 0).then(|| Duration::from_secs(self.run_timeout))
    }

    /// External indexes; an unreadable index is left out so the step reports it
    pub fn services(&self) -> ExternalServices {
        let mut services = ExternalServices::new();
        if let Some(path) = &self.package_index {
            match JsonPackageIndex::open(path) {
                Ok(index) => services = services.with_package_index(Arc::new(index)),
                Err(e) => warn!(error = %e, "package index unavailable"),
            }
        }
        if let Some(path) = &self.vulnerability_index {
            match JsonVulnerabilityIndex::open(path) {
                Ok(index) => services = services.with_vulnerability_index(Arc::new(index)),
                Err(e) => warn!(error = %e, "vulnerability index unavailable"),
            }
        }
        services
    }
}
