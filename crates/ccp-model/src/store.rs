//! Persistence collaborator
//!
//! The control plane never owns storage. Implement this trait over the
//! relational store that holds configurations, migrations and logs.

use crate::configuration::{Configuration, ConfigurationId, ConfigurationState};
use crate::error::StoreError;
use crate::migration::{Migration, MigrationId, MigrationLogRecord};

/// CRUD access to configurations, migrations and migration logs
#[async_trait::async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Configuration by id, with its backward compatibility list
    async fn configuration(&self, id: ConfigurationId)
        -> Result<Option<Configuration>, StoreError>;

    /// All configurations ordered by id
    async fn configurations(&self) -> Result<Vec<Configuration>, StoreError>;

    /// Insert a configuration, assigning its id
    async fn insert_configuration(
        &self,
        configuration: Configuration,
    ) -> Result<Configuration, StoreError>;

    /// Overwrite a stored configuration
    async fn update_configuration(&self, configuration: &Configuration) -> Result<(), StoreError>;

    async fn migration(&self, id: MigrationId) -> Result<Option<Migration>, StoreError>;

    /// The migration with `is_active` set, if any
    async fn active_migration(&self) -> Result<Option<Migration>, StoreError>;

    /// Insert a migration, assigning its id
    async fn insert_migration(&self, migration: Migration) -> Result<Migration, StoreError>;

    async fn update_migration(&self, migration: &Migration) -> Result<(), StoreError>;

    /// Append records to the migration log
    async fn append_log_records(&self, records: Vec<MigrationLogRecord>)
        -> Result<(), StoreError>;

    /// Log records of a migration, or of idle-mode work when `None`
    async fn log_records(
        &self,
        migration: Option<MigrationId>,
    ) -> Result<Vec<MigrationLogRecord>, StoreError>;

    /// Configurations in `state`
    async fn configurations_in_state(
        &self,
        state: ConfigurationState,
    ) -> Result<Vec<Configuration>, StoreError> {
        Ok(self
            .configurations()
            .await?
            .into_iter()
            .filter(|c| c.state == state)
            .collect())
    }

    /// The configuration currently running in the cluster
    async fn active_configuration(&self) -> Result<Option<Configuration>, StoreError> {
        Ok(self
            .configurations_in_state(ConfigurationState::Active)
            .await?
            .into_iter()
            .next())
    }
}
