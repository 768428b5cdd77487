//! Operator-facing view of resources and migration gates
//!
//! Combines the latest state reported by the orchestrator with facts the
//! coordinator owns (active configuration, active migration, obsolete
//! nodes) into boolean gates and the current migration step.
//!
//! Step sequences per migration direction:
//! - Upgrade: Start, ResourcesUpdating, ResourcesUpdated, NodesUpdating, Finish
//! - Downgrade: Start, NodesUpdating, NodesUpdated, ResourcesUpdating, Finish
//! - Stay: Start, NodesUpdating, Finish

use ccp_migration::{ConfigurationResourceState, MigrationPosition, MigrationResourceState};
use ccp_model::{ConfigurationId, Migration, MigrationDirection, MigrationState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationStep {
    Start,
    ResourcesUpdating,
    ResourcesUpdated,
    NodesUpdating,
    NodesUpdated,
    Finish,
    /// Resources move in conflicting directions; operator must intervene
    Broken,
}

/// Ordered steps of a migration going in `direction`
#[must_use]
pub fn migration_steps(direction: MigrationDirection) -> Vec<MigrationStep> {
    use MigrationStep::{Finish, NodesUpdated, NodesUpdating, ResourcesUpdated, ResourcesUpdating, Start};
    match direction {
        MigrationDirection::Upgrade => vec![
            Start,
            ResourcesUpdating,
            ResourcesUpdated,
            NodesUpdating,
            Finish,
        ],
        MigrationDirection::Downgrade => vec![
            Start,
            NodesUpdating,
            NodesUpdated,
            ResourcesUpdating,
            Finish,
        ],
        MigrationDirection::Stay => vec![Start, NodesUpdating, Finish],
        MigrationDirection::Undefined => vec![MigrationStep::Broken],
    }
}

/// Overall direction of a freshly merged migration
///
/// `None` when migrators disagree or any migrator is undefined.
#[must_use]
pub fn overall_direction(state: &MigrationResourceState) -> Option<MigrationDirection> {
    let directions: Vec<MigrationDirection> = state.migrators().map(|m| m.direction).collect();
    let upgrading = directions.contains(&MigrationDirection::Upgrade);
    let downgrading = directions.contains(&MigrationDirection::Downgrade);
    let broken = directions.contains(&MigrationDirection::Undefined);

    match (upgrading, downgrading, broken) {
        (_, _, true) | (true, true, _) => None,
        (true, false, false) => Some(MigrationDirection::Upgrade),
        (false, true, false) => Some(MigrationDirection::Downgrade),
        (false, false, false) => Some(MigrationDirection::Stay),
    }
}

/// Coordinator facts the gates depend on
#[derive(Debug, Clone, Copy)]
pub struct GateInputs<'a> {
    pub configuration_id: Option<ConfigurationId>,
    pub migration: Option<&'a Migration>,
    pub any_obsolete_node: bool,
}

/// Current resource state and allowed operator actions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// A resource check or operation is running; every gate is closed
    pub operation_is_in_progress: bool,
    /// Resource state of the active configuration outside migrations
    pub configuration_state: Option<ConfigurationResourceState>,
    /// Merged state of the active migration
    pub migration_state: Option<MigrationResourceState>,
    pub can_create_migration: bool,
    pub can_cancel_migration: bool,
    pub can_finish_migration: bool,
    pub can_migrate_resources: bool,
    pub can_update_nodes_to_source: bool,
    pub can_update_nodes_to_destination: bool,
    pub current_migration_step: Option<MigrationStep>,
    pub migration_steps: Option<Vec<MigrationStep>>,
}

impl ResourceState {
    /// Initial state, waiting for the first orchestrator report
    #[must_use]
    pub fn checking() -> Self {
        Self {
            operation_is_in_progress: true,
            ..Self::default()
        }
    }

    /// Close every gate
    pub fn close_gates(&mut self) {
        self.can_create_migration = false;
        self.can_cancel_migration = false;
        self.can_finish_migration = false;
        self.can_migrate_resources = false;
        self.can_update_nodes_to_source = false;
        self.can_update_nodes_to_destination = false;
    }

    /// Mark work in progress and forget reported state
    pub fn start_operation(&mut self) {
        self.operation_is_in_progress = true;
        self.configuration_state = None;
        self.migration_state = None;
        self.current_migration_step = None;
        self.migration_steps = None;
        self.close_gates();
    }

    /// Close every gate and report the migration as broken
    pub fn mark_broken(&mut self) {
        self.close_gates();
        self.migration_steps = Some(vec![MigrationStep::Broken]);
        self.current_migration_step = Some(MigrationStep::Broken);
    }

    /// Recompute gates from the coordinator facts
    pub fn refresh(&mut self, inputs: GateInputs<'_>) {
        if self.operation_is_in_progress {
            self.close_gates();
            return;
        }
        match inputs.migration {
            Some(migration) => self.refresh_migration(migration, inputs),
            None => self.refresh_configuration(inputs),
        }
    }

    fn refresh_configuration(&mut self, inputs: GateInputs<'_>) {
        self.migration_state = None;
        self.current_migration_step = None;
        self.migration_steps = None;
        self.close_gates();

        let Some(state) = self.configuration_state.as_ref() else {
            return;
        };

        if state.unmigrated_resources().next().is_none() {
            self.can_create_migration = !inputs.any_obsolete_node;
            return;
        }

        self.can_migrate_resources = state
            .templates
            .iter()
            .flat_map(|t| t.migrators.iter())
            .all(|m| {
                m.resources.iter().all(|r| {
                    r.current_point
                        .as_ref()
                        .is_some_and(|p| m.migration_points.contains(p))
                })
            });
    }

    fn refresh_migration(&mut self, migration: &Migration, inputs: GateInputs<'_>) {
        self.configuration_state = None;
        self.close_gates();

        let Some(state) = self.migration_state.as_ref() else {
            self.can_cancel_migration = migration.state == MigrationState::Preparing;
            self.current_migration_step = None;
            self.migration_steps = None;
            return;
        };

        let direction = match migration.direction {
            Some(direction) if direction != MigrationDirection::Undefined => direction,
            _ => {
                tracing::error!(migration_id = %migration.id, "migration has no valid direction");
                self.mark_broken();
                return;
            }
        };

        let position = state.position;
        let on_source = inputs.configuration_id == Some(migration.from_configuration_id);
        let on_destination = inputs.configuration_id == Some(migration.to_configuration_id);
        let obsolete = inputs.any_obsolete_node;

        self.migration_steps = Some(migration_steps(direction));

        self.can_cancel_migration = matches!(
            position,
            MigrationPosition::Source | MigrationPosition::NoMigrationNeeded
        ) && on_source
            && !obsolete;

        self.can_finish_migration = matches!(
            position,
            MigrationPosition::Destination | MigrationPosition::NoMigrationNeeded
        ) && on_destination
            && !obsolete;

        let cannot_migrate_resources = direction == MigrationDirection::Stay
            || (direction == MigrationDirection::Upgrade
                && position == MigrationPosition::Destination
                && on_destination)
            || (direction == MigrationDirection::Downgrade
                && position == MigrationPosition::Source
                && on_source)
            || obsolete;
        self.can_migrate_resources = !cannot_migrate_resources;

        self.can_update_nodes_to_destination = on_source
            && match direction {
                MigrationDirection::Upgrade => position == MigrationPosition::Destination,
                _ => true,
            };

        self.can_update_nodes_to_source = on_destination
            && match direction {
                MigrationDirection::Downgrade => position == MigrationPosition::Source,
                _ => true,
            };

        self.current_migration_step = Some(self.current_step(direction, position, obsolete));
    }

    fn current_step(
        &self,
        direction: MigrationDirection,
        position: MigrationPosition,
        obsolete: bool,
    ) -> MigrationStep {
        if self.can_cancel_migration {
            return MigrationStep::Start;
        }
        if self.can_finish_migration {
            return MigrationStep::Finish;
        }
        match direction {
            MigrationDirection::Upgrade if position != MigrationPosition::Destination => {
                MigrationStep::ResourcesUpdating
            }
            MigrationDirection::Upgrade if obsolete => MigrationStep::NodesUpdating,
            MigrationDirection::Upgrade => MigrationStep::ResourcesUpdated,
            MigrationDirection::Downgrade if obsolete => MigrationStep::NodesUpdating,
            MigrationDirection::Downgrade if position != MigrationPosition::Source => {
                MigrationStep::ResourcesUpdating
            }
            MigrationDirection::Downgrade => MigrationStep::NodesUpdated,
            MigrationDirection::Stay => MigrationStep::NodesUpdating,
            MigrationDirection::Undefined => MigrationStep::Broken,
        }
    }
}
