//! Migrations between configurations and the migration audit log

use crate::configuration::ConfigurationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Migration identifier
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MigrationId(pub i64);

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted migration lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationState {
    /// Created, resource state not inspected yet
    #[default]
    Preparing,
    /// Direction known, operator driven steps allowed
    Ready,
    Completed,
    Failed,
}

/// Direction of resource checkpoints between two configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationDirection {
    /// Checkpoints are identical on both sides
    Stay,
    /// Destination extends source
    Upgrade,
    /// Source extends destination
    Downgrade,
    /// Histories diverge
    Undefined,
}

/// A tracked switch of the cluster from one configuration to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub id: MigrationId,
    pub from_configuration_id: ConfigurationId,
    pub to_configuration_id: ConfigurationId,
    pub is_active: bool,
    pub state: MigrationState,
    pub direction: Option<MigrationDirection>,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
}

impl Migration {
    /// New active migration in `Preparing`; the store assigns the id
    #[must_use]
    pub fn start(from: ConfigurationId, to: ConfigurationId) -> Self {
        Self {
            id: MigrationId::default(),
            from_configuration_id: from,
            to_configuration_id: to,
            is_active: true,
            state: MigrationState::Preparing,
            direction: None,
            started: Utc::now(),
            finished: None,
        }
    }

    /// Close the migration with `state`
    pub fn close(&mut self, state: MigrationState) {
        self.state = state;
        self.is_active = false;
        self.finished = Some(Utc::now());
    }
}

/// Kind of log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogRecordType {
    /// Resource moved between checkpoints
    Operation,
    /// Resource move failed
    OperationError,
    /// Failure outside a resource move
    Error,
}

/// Append-only audit entry of migration work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationLogRecord {
    pub record_type: LogRecordType,
    #[serde(default)]
    pub configuration_id: Option<ConfigurationId>,
    #[serde(default)]
    pub migration_id: Option<MigrationId>,
    #[serde(default)]
    pub migrator_template_code: Option<String>,
    #[serde(default)]
    pub migrator_template_name: Option<String>,
    #[serde(default)]
    pub migrator_type_name: Option<String>,
    #[serde(default)]
    pub migrator_name: Option<String>,
    #[serde(default)]
    pub resource_code: Option<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub source_point: Option<String>,
    #[serde(default)]
    pub destination_point: Option<String>,
    pub message: String,
    /// Failure detail text
    #[serde(default)]
    pub error: Option<String>,
    pub started: DateTime<Utc>,
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
}

impl MigrationLogRecord {
    fn with_type(record_type: LogRecordType, message: impl Into<String>) -> Self {
        Self {
            record_type,
            configuration_id: None,
            migration_id: None,
            migrator_template_code: None,
            migrator_template_name: None,
            migrator_type_name: None,
            migrator_name: None,
            resource_code: None,
            resource_name: None,
            source_point: None,
            destination_point: None,
            message: message.into(),
            error: None,
            started: Utc::now(),
            finished: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_type(LogRecordType::Error, message)
    }

    #[must_use]
    pub fn operation(message: impl Into<String>) -> Self {
        Self::with_type(LogRecordType::Operation, message)
    }

    #[must_use]
    pub fn operation_error(message: impl Into<String>) -> Self {
        Self::with_type(LogRecordType::OperationError, message)
    }

    #[must_use]
    pub fn with_configuration(mut self, id: ConfigurationId) -> Self {
        self.configuration_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_migration(mut self, id: Option<MigrationId>) -> Self {
        self.migration_id = id;
        self
    }

    #[must_use]
    pub fn with_template(mut self, code: impl Into<String>, name: impl Into<String>) -> Self {
        self.migrator_template_code = Some(code.into());
        self.migrator_template_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_migrator(mut self, type_name: impl Into<String>, name: impl Into<String>) -> Self {
        self.migrator_type_name = Some(type_name.into());
        self.migrator_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_resource(mut self, code: impl Into<String>, name: impl Into<String>) -> Self {
        self.resource_code = Some(code.into());
        self.resource_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_points(mut self, source: Option<String>, destination: Option<String>) -> Self {
        self.source_point = source;
        self.destination_point = destination;
        self
    }

    #[must_use]
    pub fn with_error_detail(mut self, detail: impl Into<String>) -> Self {
        self.error = Some(detail.into());
        self
    }

    /// Mark the record finished now
    #[must_use]
    pub fn finish(mut self) -> Self {
        self.finished = Some(Utc::now());
        self
    }

    /// Record describes a failure
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(
            self.record_type,
            LogRecordType::Error | LogRecordType::OperationError
        )
    }
}
