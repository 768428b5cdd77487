//! Running node manager
//!
//! Starts the migration orchestrator and the cluster coordinator, and
//! bridges orchestrator notifications into the coordinator mailbox.

use crate::config::NodeManagerConfig;
use ccp_coordinator::{
    ClusterCoordinator, CoordinatorError, CoordinatorHandle, NodeMessenger, RandomSource,
};
use ccp_migration::{
    MigrationOrchestrator, MigratorRuntime, OrchestratorError, OrchestratorHandle,
    OrchestratorNotification,
};
use ccp_model::{ConfigurationStore, PackageRepository};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// Failures of a stopped node manager
#[derive(Debug, Error)]
pub enum NodeManagerError {
    #[error("coordinator stopped: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("orchestrator stopped: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("actor task failed: {0}")]
    Join(#[from] JoinError),
}

/// External collaborators of a node manager
pub struct Collaborators {
    pub store: Arc<dyn ConfigurationStore>,
    pub repository: Arc<dyn PackageRepository>,
    pub runtime: Arc<dyn MigratorRuntime>,
    pub messenger: Arc<dyn NodeMessenger>,
    pub random: Box<dyn RandomSource>,
}

/// Orchestrator and coordinator running side by side
pub struct NodeManager {
    coordinator: CoordinatorHandle,
    orchestrator: OrchestratorHandle,
    coordinator_task: JoinHandle<Result<(), CoordinatorError>>,
    orchestrator_task: JoinHandle<Result<(), OrchestratorError>>,
    forwarder: JoinHandle<()>,
}

impl NodeManager {
    /// Spawn both actors on the current runtime
    #[must_use]
    pub fn start(config: NodeManagerConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            repository,
            runtime,
            messenger,
            random,
        } = collaborators;

        let (notifications_tx, notifications) = mpsc::channel(config.notification_capacity.max(1));
        let (orchestrator, orchestrator_task) = MigrationOrchestrator::new(
            config.orchestrator,
            Arc::clone(&store),
            repository,
            runtime,
            notifications_tx,
        )
        .spawn();

        let (coordinator, coordinator_task) = ClusterCoordinator::new(
            config.coordinator,
            store,
            orchestrator.clone(),
            messenger,
            random,
        )
        .spawn();

        let forwarder = tokio::spawn(forward(notifications, coordinator.clone()));
        info!(version = crate::VERSION, "node manager started");

        Self {
            coordinator,
            orchestrator,
            coordinator_task,
            orchestrator_task,
            forwarder,
        }
    }

    #[inline]
    #[must_use]
    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    #[inline]
    #[must_use]
    pub fn orchestrator(&self) -> &OrchestratorHandle {
        &self.orchestrator
    }

    /// Stop both actors and wait for them
    ///
    /// # Errors
    /// Returns the first failure reported by either actor
    pub async fn shutdown(self) -> Result<(), NodeManagerError> {
        if let Err(e) = self.coordinator.shutdown().await {
            debug!(error = %e, "coordinator already stopped");
        }
        if let Err(e) = self.orchestrator.shutdown().await {
            debug!(error = %e, "orchestrator already stopped");
        }
        self.join().await
    }

    /// Wait until both actors stop on their own
    ///
    /// # Errors
    /// Returns the first failure reported by either actor
    pub async fn join(self) -> Result<(), NodeManagerError> {
        let Self {
            coordinator,
            orchestrator,
            coordinator_task,
            orchestrator_task,
            forwarder,
        } = self;
        drop(coordinator);
        drop(orchestrator);

        let coordinator_result = coordinator_task.await?;
        let orchestrator_result = orchestrator_task.await?;
        forwarder.await?;

        coordinator_result?;
        orchestrator_result?;
        info!("node manager stopped");
        Ok(())
    }
}

async fn forward(
    mut notifications: mpsc::Receiver<OrchestratorNotification>,
    coordinator: CoordinatorHandle,
) {
    while let Some(notification) = notifications.recv().await {
        if let Err(e) = coordinator.orchestrator_notification(notification).await {
            warn!(error = %e, "dropping orchestrator notifications");
            break;
        }
    }
}
