//! Error types shared across the control plane
//!
//! Validation never fails with an error value. Problems found while
//! checking a configuration are collected as field-addressed
//! [`ErrorDescription`]s so a UI can map them back to input fields.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Field-addressed validation problem
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorDescription {
    /// Path of the offending field, e.g. `configuration.packages["p1"]`
    pub field: String,
    pub message: String,
}

impl ErrorDescription {
    #[inline]
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Persistence collaborator errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Row not found
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Write conflicts with stored data
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend failure
    #[error("store backend failed: {0}")]
    Backend(String),
}

/// Package repository collaborator errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Feed unreachable or returned garbage
    #[error("package feed failed: {0}")]
    Feed(String),

    /// Package not present in the feed
    #[error("package not found: {0}")]
    PackageNotFound(String),

    /// Installation into the target directory failed
    #[error("install failed: {0}")]
    Install(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RepositoryError {
    /// Check if the failure may go away on retry
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Feed(_) | Self::Io(_))
    }
}
