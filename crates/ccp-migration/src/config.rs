//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings of the migration orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Root for extracted migrator templates
    pub working_directory: PathBuf,
    /// Entry point name handed to the repository when building executors
    pub executor_entry: String,
    /// Runtime id migrators are extracted for
    pub current_runtime: String,
    /// Limit for one executor call
    pub executor_timeout_secs: u64,
    /// Orchestrator mailbox capacity
    pub mailbox_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            working_directory: std::env::temp_dir().join("ccp-migrators"),
            executor_entry: "ccp-migrator-executor".to_string(),
            current_runtime: ".NETCoreApp,Version=v1.1".to_string(),
            executor_timeout_secs: 300,
            mailbox_capacity: 64,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = dir.into();
        self
    }

    #[must_use]
    pub fn with_executor_entry(mut self, entry: impl Into<String>) -> Self {
        self.executor_entry = entry.into();
        self
    }

    #[must_use]
    pub fn with_current_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.current_runtime = runtime.into();
        self
    }
}
