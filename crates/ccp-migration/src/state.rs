//! Resource state reported by migrators and merged migration state
//!
//! Collected state describes one configuration: for each migrator template,
//! every migrator with its ordered checkpoints and the current checkpoint of
//! each resource it manages. Merged state compares two configurations and
//! records, per resource, where it stands and which side can move it.

use ccp_model::{ConfigurationId, Migration, MigrationDirection, MigrationId};
use serde::{Deserialize, Serialize};

/// One side of a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The configuration the cluster migrates from
    Source,
    /// The configuration the cluster migrates to
    Destination,
}

/// Ordering between a resource and the code that uses it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyType {
    /// Code needs the resource migrated before it starts
    #[default]
    CodeDependsOnResource,
    /// Resource migration needs the new code running first
    ResourceDependsOnCode,
}

/// Resource as reported by a migrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfigurationState {
    pub code: String,
    pub name: String,
    /// `None` when the resource was never created
    pub current_point: Option<String>,
}

/// Migrator as reported by the migrator runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigratorConfigurationState {
    pub type_name: String,
    pub name: String,
    /// Ordered checkpoints the migrator knows
    pub migration_points: Vec<String>,
    pub last_defined_point: Option<String>,
    pub resources: Vec<ResourceConfigurationState>,
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub dependency_type: DependencyType,
}

/// Migrators of one migrator template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigratorTemplateConfigurationState {
    pub code: String,
    pub name: String,
    pub priority: f64,
    pub migrators: Vec<MigratorConfigurationState>,
}

/// Resource state of the active configuration, used outside migrations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationResourceState {
    pub configuration_id: ConfigurationId,
    pub templates: Vec<MigratorTemplateConfigurationState>,
}

impl ConfigurationResourceState {
    /// Resources whose current checkpoint is not the migrator's latest
    pub fn unmigrated_resources(
        &self,
    ) -> impl Iterator<Item = (&MigratorConfigurationState, &ResourceConfigurationState)> {
        self.templates
            .iter()
            .flat_map(|t| t.migrators.iter())
            .flat_map(|m| m.resources.iter().map(move |r| (m, r)))
            .filter(|(m, r)| r.current_point != m.last_defined_point)
    }
}

/// Where a resource stands relative to both configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourcePosition {
    /// Resource does not exist yet
    NotCreated,
    /// Resource is unknown to the destination
    Obsolete,
    /// At the latest checkpoint of both sides
    SourceAndDestination,
    /// At the source's latest checkpoint
    Source,
    /// At the destination's latest checkpoint
    Destination,
    /// Between checkpoints, but some side can move it
    InScope,
    /// Neither side can handle the current checkpoint
    Undefined,
}

/// Presence of a template or migrator across the two sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MergePosition {
    /// Only on the destination side
    New,
    /// Only on the source side
    Obsolete,
    /// On both sides
    Merged,
}

/// Resource compared across both sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMigrationState {
    pub code: String,
    pub name: String,
    pub current_point: Option<String>,
    /// Checkpoint the source configuration expects
    pub source_point: Option<String>,
    /// Checkpoint the destination configuration expects
    pub destination_point: Option<String>,
    pub position: ResourcePosition,
    /// Side able to bring the resource to `source_point`
    pub migration_to_source_executor: Option<Side>,
    /// Side able to bring the resource to `destination_point`
    pub migration_to_destination_executor: Option<Side>,
}

impl ResourceMigrationState {
    /// Side able to bring the resource to `target`
    #[inline]
    #[must_use]
    pub fn executor_for(&self, target: Side) -> Option<Side> {
        match target {
            Side::Source => self.migration_to_source_executor,
            Side::Destination => self.migration_to_destination_executor,
        }
    }

    /// Checkpoint expected by `target`
    #[inline]
    #[must_use]
    pub fn point_for(&self, target: Side) -> Option<&str> {
        match target {
            Side::Source => self.source_point.as_deref(),
            Side::Destination => self.destination_point.as_deref(),
        }
    }
}

/// Migrator compared across both sides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigratorMigrationState {
    pub type_name: String,
    pub name: String,
    pub position: MergePosition,
    pub direction: MigrationDirection,
    pub source_points: Vec<String>,
    pub destination_points: Vec<String>,
    pub priority: f64,
    pub dependency_type: DependencyType,
    pub resources: Vec<ResourceMigrationState>,
}

/// Migrator template compared across both sides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigratorTemplateMigrationState {
    pub code: String,
    pub name: String,
    pub position: MergePosition,
    pub priority: f64,
    pub migrators: Vec<MigratorMigrationState>,
}

impl MigratorTemplateMigrationState {
    /// Whether the template's code is installed on `side`
    #[inline]
    #[must_use]
    pub fn exists_on(&self, side: Side) -> bool {
        match side {
            Side::Source => self.position != MergePosition::New,
            Side::Destination => self.position != MergePosition::Obsolete,
        }
    }
}

/// Aggregate position of every resource in a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationPosition {
    /// Every resource already fits both configurations
    NoMigrationNeeded,
    /// Every resource fits the source configuration
    Source,
    /// Every resource fits the destination configuration
    Destination,
    /// Resources are spread between positions
    Mixed,
}

/// Resource state of an active migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationResourceState {
    pub migration_id: MigrationId,
    pub from_configuration_id: ConfigurationId,
    pub to_configuration_id: ConfigurationId,
    pub templates: Vec<MigratorTemplateMigrationState>,
    pub position: MigrationPosition,
}

impl MigrationResourceState {
    /// Build the state, computing the aggregate position
    #[must_use]
    pub fn new(migration: &Migration, templates: Vec<MigratorTemplateMigrationState>) -> Self {
        let position = aggregate_position(&templates);
        Self {
            migration_id: migration.id,
            from_configuration_id: migration.from_configuration_id,
            to_configuration_id: migration.to_configuration_id,
            templates,
            position,
        }
    }

    /// Every merged migrator across templates
    pub fn migrators(&self) -> impl Iterator<Item = &MigratorMigrationState> {
        self.templates.iter().flat_map(|t| t.migrators.iter())
    }

    /// Configuration installed on `side`
    #[inline]
    #[must_use]
    pub fn configuration_id(&self, side: Side) -> ConfigurationId {
        match side {
            Side::Source => self.from_configuration_id,
            Side::Destination => self.to_configuration_id,
        }
    }
}

fn aggregate_position(templates: &[MigratorTemplateMigrationState]) -> MigrationPosition {
    let positions: Vec<ResourcePosition> = templates
        .iter()
        .flat_map(|t| t.migrators.iter())
        .flat_map(|m| m.resources.iter())
        .map(|r| r.position)
        .filter(|p| !matches!(p, ResourcePosition::NotCreated | ResourcePosition::Obsolete))
        .collect();

    let all = |allowed: &[ResourcePosition]| positions.iter().all(|p| allowed.contains(p));

    if all(&[ResourcePosition::SourceAndDestination]) {
        MigrationPosition::NoMigrationNeeded
    } else if all(&[ResourcePosition::Source, ResourcePosition::SourceAndDestination]) {
        MigrationPosition::Source
    } else if all(&[ResourcePosition::Destination, ResourcePosition::SourceAndDestination]) {
        MigrationPosition::Destination
    } else {
        MigrationPosition::Mixed
    }
}
