//! Error types for CCP Migration
//!
//! - Migrator runtime failures (process spawn, framing, timeouts)
//! - Migrator code extraction failures
//! - Orchestrator failures, including persistence desync

use ccp_model::{RepositoryError, StoreError};
use std::time::Duration;

/// Failure talking to a migrator runtime
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Executor process could not be started
    #[error("failed to start migrator executor {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Executor closed its output before signalling readiness
    #[error("migrator executor exited before it was ready")]
    NotReady,

    /// Malformed or missing response
    #[error("migrator executor protocol error: {0}")]
    Protocol(String),

    /// Executor reported a failure instead of a result
    #[error("migrator executor failed: {0}")]
    Remote(String),

    /// No answer within the allotted time
    #[error("migrator executor timed out after {0:?}")]
    Timeout(Duration),

    /// No in-process host registered for a template directory
    #[error("no migrator host registered for {0}")]
    UnknownTemplate(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Check if the failure may go away on retry
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::NotReady | Self::Io(_))
    }
}

/// Failure preparing a migrator template directory
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// Template has no packages for the runtime
    #[error("Framework {0} is not supported")]
    UnsupportedFramework(String),

    /// Repository could not build the executor service
    #[error("error on creating service: {0}")]
    CreateService(#[source] RepositoryError),

    #[error("error on extracting template: {0}")]
    Io(#[from] std::io::Error),
}

/// Orchestrator failures
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Active migration row vanished or changed under the running state
    #[error("Database synchronization failed for active migration")]
    DatabaseDesync,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Orchestrator is no longer running
    #[error("orchestrator mailbox closed")]
    MailboxClosed,

    /// Request was dropped without an answer
    #[error("orchestrator did not answer the request")]
    NoReply,
}

impl OrchestratorError {
    /// Errors that stop the orchestrator
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DatabaseDesync | Self::MailboxClosed)
    }
}
