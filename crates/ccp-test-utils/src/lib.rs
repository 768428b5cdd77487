//! Testing utilities for the CCP workspace
//!
//! Shared fixtures and in-memory collaborators:
//! - [`MemoryStore`]: a [`ConfigurationStore`] over plain vectors
//! - [`package_catalog`] and [`test_configuration`]: a small consistent feed
//!   and a draft configuration that resolves against it
//! - [`ScriptedMigrator`]: a migrator over a shared [`ResourceBook`]
//! - [`ScriptedRandom`] and [`RecordingMessenger`] for the coordinator seams

#![allow(missing_docs)]

use async_trait::async_trait;
use ccp_coordinator::{NodeMessenger, RandomSource};
use ccp_migration::{Migrator, ResourceId};
use ccp_model::{
    Configuration, ConfigurationId, ConfigurationStore, Migration, MigrationId,
    MigrationLogRecord, NodeAddress, NodeTemplate, PackageDependency, PackageDescription,
    PackageMetadata, PackageRequirement, StoreError, VersionRange,
};
use ccp_resolver::{PackageCatalog, DEFAULT_EXECUTOR_PACKAGE};
use parking_lot::Mutex;
use semver::Version;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

pub const NET46: &str = ".NETFramework,Version=v4.6";
pub const NET_CORE: &str = ".NETCoreApp,Version=v1.1";
pub const EXECUTOR_PACKAGE: &str = DEFAULT_EXECUTOR_PACKAGE;

#[derive(Default)]
struct Tables {
    configurations: Vec<Configuration>,
    migrations: Vec<Migration>,
    logs: Vec<MigrationLogRecord>,
}

/// In-memory configuration store
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `configurations`; ids of 0 are assigned
    pub fn with_configurations(configurations: impl IntoIterator<Item = Configuration>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.lock();
            for mut configuration in configurations {
                if configuration.id.0 == 0 {
                    configuration.id = ConfigurationId(tables.configurations.len() as i64 + 1);
                }
                tables.configurations.push(configuration);
            }
        }
        store
    }

    pub fn migrations(&self) -> Vec<Migration> {
        self.tables.lock().migrations.clone()
    }

    pub fn logs(&self) -> Vec<MigrationLogRecord> {
        self.tables.lock().logs.clone()
    }

    /// Insert a migration row directly, bypassing the coordinator
    pub fn put_migration(&self, migration: Migration) -> Migration {
        let mut tables = self.tables.lock();
        let mut migration = migration;
        migration.id = MigrationId(tables.migrations.len() as i64 + 1);
        tables.migrations.push(migration.clone());
        migration
    }

    /// Drop every migration row
    pub fn clear_migrations(&self) {
        self.tables.lock().migrations.clear();
    }
}

#[async_trait]
impl ConfigurationStore for MemoryStore {
    async fn configuration(
        &self,
        id: ConfigurationId,
    ) -> Result<Option<Configuration>, StoreError> {
        Ok(self
            .tables
            .lock()
            .configurations
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn configurations(&self) -> Result<Vec<Configuration>, StoreError> {
        let mut configurations = self.tables.lock().configurations.clone();
        configurations.sort_by_key(|c| c.id);
        Ok(configurations)
    }

    async fn insert_configuration(
        &self,
        mut configuration: Configuration,
    ) -> Result<Configuration, StoreError> {
        let mut tables = self.tables.lock();
        let next = tables.configurations.iter().map(|c| c.id.0).max().unwrap_or(0) + 1;
        configuration.id = ConfigurationId(next);
        tables.configurations.push(configuration.clone());
        Ok(configuration)
    }

    async fn update_configuration(&self, configuration: &Configuration) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let stored = tables
            .configurations
            .iter_mut()
            .find(|c| c.id == configuration.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "configuration",
                id: configuration.id.to_string(),
            })?;
        *stored = configuration.clone();
        Ok(())
    }

    async fn migration(&self, id: MigrationId) -> Result<Option<Migration>, StoreError> {
        Ok(self
            .tables
            .lock()
            .migrations
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn active_migration(&self) -> Result<Option<Migration>, StoreError> {
        Ok(self
            .tables
            .lock()
            .migrations
            .iter()
            .find(|m| m.is_active)
            .cloned())
    }

    async fn insert_migration(&self, migration: Migration) -> Result<Migration, StoreError> {
        if migration.is_active && self.active_migration().await?.is_some() {
            return Err(StoreError::Conflict("an active migration already exists".into()));
        }
        Ok(self.put_migration(migration))
    }

    async fn update_migration(&self, migration: &Migration) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let stored = tables
            .migrations
            .iter_mut()
            .find(|m| m.id == migration.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "migration",
                id: migration.id.to_string(),
            })?;
        *stored = migration.clone();
        Ok(())
    }

    async fn append_log_records(&self, records: Vec<MigrationLogRecord>) -> Result<(), StoreError> {
        self.tables.lock().logs.extend(records);
        Ok(())
    }

    async fn log_records(
        &self,
        migration: Option<MigrationId>,
    ) -> Result<Vec<MigrationLogRecord>, StoreError> {
        Ok(self
            .tables
            .lock()
            .logs
            .iter()
            .filter(|r| r.migration_id == migration)
            .cloned()
            .collect())
    }
}

fn version(major: u64) -> Version {
    Version::new(major, 0, 0)
}

/// Packages of the test feed: `p1 -> dp1`, `p2 -> dp2` for both runtimes,
/// the migrator executor and a migrator package `m1`
pub fn feed_packages() -> Vec<PackageMetadata> {
    let at_least = |major| VersionRange::at_least(version(major));
    vec![
        PackageMetadata::new("p1", version(1))
            .with_dependencies(NET46, [PackageDependency::new("dp1", at_least(1))])
            .with_dependencies(NET_CORE, [PackageDependency::new("dp1", at_least(1))]),
        PackageMetadata::new("p2", version(1))
            .with_dependencies(NET46, [PackageDependency::new("dp2", at_least(1))])
            .with_dependencies(NET_CORE, [PackageDependency::new("dp2", at_least(1))]),
        PackageMetadata::new("dp1", version(1)),
        PackageMetadata::new("dp2", version(1)),
        PackageMetadata::new(EXECUTOR_PACKAGE, version(1)),
        PackageMetadata::new("m1", version(1)),
    ]
}

/// Catalog over [`feed_packages`]
pub fn package_catalog() -> PackageCatalog {
    PackageCatalog::from_packages(feed_packages())
}

/// Draft whose single node template requires `p1` and `p2 1.0.0`
pub fn test_configuration() -> Configuration {
    let mut configuration = Configuration::draft("test");
    configuration.settings.packages = ["p1", "p2", "dp1", "dp2", EXECUTOR_PACKAGE, "m1"]
        .into_iter()
        .map(|id| PackageDescription::new(id, "1.0.0"))
        .collect();
    configuration.settings.node_templates = vec![NodeTemplate::new("worker")
        .with_container_types(["worker"])
        .with_requirement(PackageRequirement::new("p1"))
        .with_requirement(PackageRequirement::pinned("p2", "1.0.0"))
        .with_instances(1, Some(5))];
    configuration.settings.seed_addresses = vec!["seed-1".into()];
    configuration.settings.nuget_feed = "http://nuget.local/".into();
    configuration
}

/// Current checkpoint of every resource, shared by migrators of both sides
#[derive(Debug, Clone, Default)]
pub struct ResourceBook {
    points: Arc<Mutex<BTreeMap<String, String>>>,
}

impl ResourceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, code: &str, point: &str) -> Self {
        self.points.lock().insert(code.into(), point.into());
        self
    }

    pub fn point(&self, code: &str) -> Option<String> {
        self.points.lock().get(code).cloned()
    }
}

/// Migrator with fixed checkpoints over a [`ResourceBook`]
pub struct ScriptedMigrator {
    type_name: String,
    points: Vec<String>,
    book: ResourceBook,
    failure: Option<String>,
}

impl ScriptedMigrator {
    pub fn new(type_name: &str, points: &[&str], book: ResourceBook) -> Self {
        Self {
            type_name: type_name.into(),
            points: points.iter().map(ToString::to_string).collect(),
            book,
            failure: None,
        }
    }

    /// Make every `migrate` call fail with `message`
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.into());
        self
    }
}

#[async_trait]
impl Migrator for ScriptedMigrator {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn name(&self) -> &str {
        &self.type_name
    }

    async fn migration_points(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.points.clone())
    }

    async fn migratable_resources(&self) -> anyhow::Result<Vec<ResourceId>> {
        Ok(self
            .book
            .points
            .lock()
            .keys()
            .map(|code| ResourceId::new(code.clone(), code.to_uppercase()))
            .collect())
    }

    async fn current_point(&self, resource: &ResourceId) -> anyhow::Result<Option<String>> {
        Ok(self.book.point(&resource.code))
    }

    async fn migrate(&self, resource: &ResourceId, point: &str) -> anyhow::Result<()> {
        if let Some(message) = &self.failure {
            anyhow::bail!("{message}");
        }
        if !self.points.iter().any(|p| p == point) {
            anyhow::bail!("unknown checkpoint {point}");
        }
        self.book
            .points
            .lock()
            .insert(resource.code.clone(), point.into());
        Ok(())
    }
}

/// Random source replaying scripted values; shuffling reverses
#[derive(Debug, Default)]
pub struct ScriptedRandom {
    values: VecDeque<f64>,
}

impl ScriptedRandom {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }
}

impl RandomSource for ScriptedRandom {
    fn next_f64(&mut self) -> f64 {
        self.values.pop_front().unwrap_or(0.0)
    }

    fn shuffle(&mut self, items: &mut [String]) {
        items.reverse();
    }
}

/// Message sent through [`RecordingMessenger`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    RequestDescription(NodeAddress),
    Shutdown(NodeAddress),
}

/// Node messenger that records every message
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn shutdowns(&self) -> Vec<NodeAddress> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                SentMessage::Shutdown(address) => Some(address.clone()),
                SentMessage::RequestDescription(_) => None,
            })
            .collect()
    }

    pub fn description_requests(&self, address: &NodeAddress) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| matches!(m, SentMessage::RequestDescription(a) if a == address))
            .count()
    }
}

impl NodeMessenger for RecordingMessenger {
    fn request_description(&self, address: &NodeAddress) {
        self.sent
            .lock()
            .push(SentMessage::RequestDescription(address.clone()));
    }

    fn shutdown(&self, address: &NodeAddress) {
        self.sent.lock().push(SentMessage::Shutdown(address.clone()));
    }
}
