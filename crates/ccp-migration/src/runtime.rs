//! Migrator runtime capability
//!
//! The orchestrator talks to migrator code only through [`MigratorRuntime`].
//! [`ProcessRuntime`](crate::process::ProcessRuntime) runs the extracted
//! executor as a child process; [`InProcessRuntime`] dispatches to hosts
//! registered in memory.

use crate::error::RuntimeError;
use crate::host::MigratorHost;
use crate::planner::MigratorCommand;
use crate::state::MigratorConfigurationState;
use async_trait::async_trait;
use ccp_model::{ConfigurationId, MigrationLogRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Result of a state collection call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectedState {
    pub migrators: Vec<MigratorConfigurationState>,
    pub errors: Vec<MigrationLogRecord>,
}

/// Result of an execution call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// One record per resource command, successful or not
    pub operations: Vec<MigrationLogRecord>,
    /// Failures outside individual resource moves
    pub errors: Vec<MigrationLogRecord>,
}

/// Access to migrator code installed in a template directory
#[async_trait]
pub trait MigratorRuntime: Send + Sync {
    /// Report every migrator with its checkpoints and resources
    async fn collect_state(&self, template_dir: &Path) -> Result<CollectedState, RuntimeError>;

    /// Move resources to the requested checkpoints
    async fn execute(
        &self,
        template_dir: &Path,
        commands: &[MigratorCommand],
    ) -> Result<ExecutionReport, RuntimeError>;
}

/// Runtime backed by hosts living in this process
///
/// Hosts are keyed by the last two components of the template directory,
/// `<configuration id>/<template code>`.
#[derive(Clone, Default)]
pub struct InProcessRuntime {
    hosts: HashMap<String, Arc<MigratorHost>>,
}

impl InProcessRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the host serving a template of a configuration
    #[must_use]
    pub fn with_host(
        mut self,
        configuration_id: ConfigurationId,
        template_code: &str,
        host: Arc<MigratorHost>,
    ) -> Self {
        self.hosts
            .insert(format!("{configuration_id}/{template_code}"), host);
        self
    }

    fn host(&self, template_dir: &Path) -> Result<&Arc<MigratorHost>, RuntimeError> {
        let mut parts = template_dir
            .components()
            .rev()
            .map(|c| c.as_os_str().to_string_lossy());
        let key = match (parts.next(), parts.next()) {
            (Some(code), Some(configuration)) => format!("{configuration}/{code}"),
            _ => template_dir.display().to_string(),
        };
        self.hosts
            .get(&key)
            .ok_or(RuntimeError::UnknownTemplate(key))
    }
}

#[async_trait]
impl MigratorRuntime for InProcessRuntime {
    async fn collect_state(&self, template_dir: &Path) -> Result<CollectedState, RuntimeError> {
        Ok(self.host(template_dir)?.collect_state().await)
    }

    async fn execute(
        &self,
        template_dir: &Path,
        commands: &[MigratorCommand],
    ) -> Result<ExecutionReport, RuntimeError> {
        Ok(self.host(template_dir)?.execute(commands).await)
    }
}
