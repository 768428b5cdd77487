//! Node manager configuration
//!
//! One TOML document with a section per actor:
//!
//! ```toml
//! current_runtime = ".NETCoreApp,Version=v1.1"
//!
//! [coordinator]
//! upgradable_part_percent = 20
//!
//! [orchestrator]
//! working_directory = "/var/lib/ccp/migrators"
//! ```
//!
//! A top-level `current_runtime` overrides the runtime of both sections.

use ccp_coordinator::CoordinatorConfig;
use ccp_migration::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading a [`NodeManagerConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings of a whole node manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeManagerConfig {
    /// Runtime migrators run on, applied to both actors when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_runtime: Option<String>,
    /// Capacity of the orchestrator to coordinator notification channel
    pub notification_capacity: usize,
    pub coordinator: CoordinatorConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Default for NodeManagerConfig {
    fn default() -> Self {
        Self {
            current_runtime: None,
            notification_capacity: 64,
            coordinator: CoordinatorConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl NodeManagerConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// - `ConfigError::Parse` if the document is not valid TOML for this shape
    /// - `ConfigError::Invalid` if the runtimes are inconsistent
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.normalized()
    }

    /// Read and validate a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - see [`NodeManagerConfig::from_toml_str`]
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Set the runtime of both actors
    #[must_use]
    pub fn with_current_runtime(mut self, runtime: impl Into<String>) -> Self {
        let runtime = runtime.into();
        self.coordinator.current_runtime.clone_from(&runtime);
        self.orchestrator.current_runtime.clone_from(&runtime);
        self.current_runtime = Some(runtime);
        self
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if serialization fails
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    fn normalized(self) -> Result<Self, ConfigError> {
        let config = match self.current_runtime.clone() {
            Some(runtime) => self.with_current_runtime(runtime),
            None => self,
        };

        if config.coordinator.current_runtime != config.orchestrator.current_runtime {
            return Err(ConfigError::Invalid(format!(
                "coordinator runs on {} but the orchestrator extracts for {}",
                config.coordinator.current_runtime, config.orchestrator.current_runtime
            )));
        }
        if !config
            .coordinator
            .supported_runtimes
            .contains(&config.coordinator.current_runtime)
        {
            return Err(ConfigError::Invalid(format!(
                "runtime {} is not among the supported runtimes",
                config.coordinator.current_runtime
            )));
        }
        if config.notification_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notification_capacity must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}
