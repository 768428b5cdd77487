//! Messages exchanged with the migration orchestrator

use crate::planner::ResourceUpgrade;
use crate::state::{ConfigurationResourceState, MigrationResourceState};
use ccp_model::MigrationLogRecord;
use tokio::sync::oneshot;

/// Requests accepted by the orchestrator mailbox
#[derive(Debug)]
pub enum OrchestratorCommand {
    /// Re-derive the mode and resource state from persistence
    RecheckState,
    /// Move the listed resources
    UpgradeResources {
        requests: Vec<ResourceUpgrade>,
        /// Receives the acknowledgment, when the caller wants one
        reply: Option<oneshot::Sender<UpgradeReply>>,
    },
    Shutdown,
}

/// Immediate answer to an upgrade request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeReply {
    /// Work started; logs follow as a notification
    Acknowledged,
    /// Request could not be planned
    Declined(Vec<MigrationLogRecord>),
}

/// Notifications pushed to the supervising coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorNotification {
    /// Long-running work started
    ProcessingTheRequest,
    /// Resource state of the active configuration, outside migrations
    ConfigurationState(ConfigurationResourceState),
    /// Merged state of the active migration
    MigrationState(MigrationResourceState),
    /// State could not be collected; a recheck is needed
    InitializationFailed(Vec<MigrationLogRecord>),
    /// Results of executed work
    Logs(Vec<MigrationLogRecord>),
}
