//! Error types for CCP Coordinator

use ccp_migration::OrchestratorError;
use ccp_model::StoreError;

/// Coordinator failures
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Active migration row vanished or changed under the coordinator
    #[error("Database synchronization failed for active migration")]
    DatabaseDesync,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Coordinator is no longer running
    #[error("coordinator mailbox closed")]
    MailboxClosed,

    /// Request was dropped without an answer
    #[error("coordinator did not answer the request")]
    NoReply,
}

impl CoordinatorError {
    /// Errors that stop the coordinator
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DatabaseDesync)
    }
}

/// Reasons a cluster configuration switch is refused
#[derive(Debug, thiserror::Error)]
pub enum UpdateClusterError {
    #[error("Resources are still checking")]
    ResourcesChecking,

    #[error("Resources state is unknown")]
    ResourceStateUnknown,

    #[error("The migration cannot be created at this time")]
    CannotCreateMigration,

    #[error("There is already a pending migration")]
    MigrationPending,

    #[error("This release is already set")]
    AlreadySet,

    #[error("Configuration not found")]
    ConfigurationNotFound,

    #[error("cluster cannot be migrated to draft release")]
    DraftConfiguration,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Coordinator could not process the request
    #[error("{0}")]
    Unavailable(String),
}
