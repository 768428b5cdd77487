//! Migration planning
//!
//! Two pure steps:
//! - **Merge**: compare the resource state collected from the source and the
//!   destination configuration and decide, per resource, its position and
//!   which side can move it toward each target.
//! - **Plan**: turn a list of operator resource-upgrade requests into
//!   per-side command batches grouped by template and migrator.
//!
//! # Executor selection
//!
//! A side can move a resource only if its migrator knows both the current
//! checkpoint and the target checkpoint. During an upgrade the destination
//! code knows every checkpoint, so it moves resources both ways; during a
//! downgrade the source code does.

use crate::state::{
    ConfigurationResourceState, MergePosition, MigrationResourceState, MigratorConfigurationState,
    MigratorMigrationState, MigratorTemplateConfigurationState, MigratorTemplateMigrationState,
    ResourceConfigurationState, ResourceMigrationState, ResourcePosition, Side,
};
use ccp_model::{ConfigurationId, MigrationDirection, MigrationId, MigrationLogRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Direction between two ordered checkpoint histories
///
/// Histories are compared as sequences, so checkpoint names may contain
/// any characters.
#[must_use]
pub fn migration_direction(source: &[String], destination: &[String]) -> MigrationDirection {
    if source == destination {
        MigrationDirection::Stay
    } else if destination.starts_with(source) {
        MigrationDirection::Upgrade
    } else if source.starts_with(destination) {
        MigrationDirection::Downgrade
    } else {
        MigrationDirection::Undefined
    }
}

/// Merge the collected state of both configurations
#[must_use]
pub fn compute_migration_state(
    source: &[MigratorTemplateConfigurationState],
    destination: &[MigratorTemplateConfigurationState],
) -> Vec<MigratorTemplateMigrationState> {
    let mut templates = Vec::with_capacity(destination.len());

    for destination_template in destination {
        let merged = match source.iter().find(|t| t.code == destination_template.code) {
            Some(source_template) => merge_template(source_template, destination_template),
            None => single_template(destination_template, MergePosition::New),
        };
        templates.push(merged);
    }

    for source_template in source {
        if destination.iter().all(|t| t.code != source_template.code) {
            templates.push(single_template(source_template, MergePosition::Obsolete));
        }
    }

    templates
}

fn merge_template(
    source: &MigratorTemplateConfigurationState,
    destination: &MigratorTemplateConfigurationState,
) -> MigratorTemplateMigrationState {
    let mut migrators = Vec::with_capacity(destination.migrators.len());

    for destination_migrator in &destination.migrators {
        let merged = match source
            .migrators
            .iter()
            .find(|m| m.type_name == destination_migrator.type_name)
        {
            Some(source_migrator) => merge_migrator(source_migrator, destination_migrator),
            None => single_migrator(destination_migrator, MergePosition::New),
        };
        migrators.push(merged);
    }

    for source_migrator in &source.migrators {
        if destination
            .migrators
            .iter()
            .all(|m| m.type_name != source_migrator.type_name)
        {
            migrators.push(single_migrator(source_migrator, MergePosition::Obsolete));
        }
    }

    MigratorTemplateMigrationState {
        code: destination.code.clone(),
        name: destination.name.clone(),
        position: MergePosition::Merged,
        priority: destination.priority,
        migrators,
    }
}

fn single_template(
    template: &MigratorTemplateConfigurationState,
    position: MergePosition,
) -> MigratorTemplateMigrationState {
    MigratorTemplateMigrationState {
        code: template.code.clone(),
        name: template.name.clone(),
        position,
        priority: template.priority,
        migrators: template
            .migrators
            .iter()
            .map(|m| single_migrator(m, position))
            .collect(),
    }
}

fn merge_migrator(
    source: &MigratorConfigurationState,
    destination: &MigratorConfigurationState,
) -> MigratorMigrationState {
    let mut resources = Vec::with_capacity(destination.resources.len());

    for destination_resource in &destination.resources {
        let merged = match source
            .resources
            .iter()
            .find(|r| r.code == destination_resource.code)
        {
            Some(source_resource) => {
                merge_resource(source, destination, source_resource, destination_resource)
            }
            None => single_resource(destination, destination_resource, MergePosition::New),
        };
        resources.push(merged);
    }

    for source_resource in &source.resources {
        if destination
            .resources
            .iter()
            .all(|r| r.code != source_resource.code)
        {
            resources.push(single_resource(source, source_resource, MergePosition::Obsolete));
        }
    }

    let nothing_to_move = resources.iter().all(|r| {
        matches!(
            r.position,
            ResourcePosition::NotCreated | ResourcePosition::Obsolete
        )
    });
    let direction = if nothing_to_move {
        MigrationDirection::Stay
    } else {
        migration_direction(&source.migration_points, &destination.migration_points)
    };

    MigratorMigrationState {
        type_name: destination.type_name.clone(),
        name: destination.name.clone(),
        position: MergePosition::Merged,
        direction,
        source_points: source.migration_points.clone(),
        destination_points: destination.migration_points.clone(),
        priority: destination.priority,
        dependency_type: destination.dependency_type,
        resources,
    }
}

fn single_migrator(
    migrator: &MigratorConfigurationState,
    position: MergePosition,
) -> MigratorMigrationState {
    let (source_points, destination_points) = match position {
        MergePosition::Obsolete => (migrator.migration_points.clone(), Vec::new()),
        _ => (Vec::new(), migrator.migration_points.clone()),
    };

    MigratorMigrationState {
        type_name: migrator.type_name.clone(),
        name: migrator.name.clone(),
        position,
        direction: MigrationDirection::Stay,
        source_points,
        destination_points,
        priority: migrator.priority,
        dependency_type: migrator.dependency_type,
        resources: migrator
            .resources
            .iter()
            .map(|r| single_resource(migrator, r, position))
            .collect(),
    }
}

fn contains(points: &[String], point: Option<&str>) -> bool {
    point.is_some_and(|p| points.iter().any(|known| known == p))
}

/// Resource known to both sides
fn merge_resource(
    source: &MigratorConfigurationState,
    destination: &MigratorConfigurationState,
    source_resource: &ResourceConfigurationState,
    destination_resource: &ResourceConfigurationState,
) -> ResourceMigrationState {
    let current = destination_resource
        .current_point
        .clone()
        .or_else(|| source_resource.current_point.clone());
    let current_ref = current.as_deref();
    let source_last = source.last_defined_point.as_deref();
    let destination_last = destination.last_defined_point.as_deref();

    let to_source = if current_ref == source_last {
        None
    } else if contains(&destination.migration_points, current_ref)
        && contains(&destination.migration_points, source_last)
    {
        Some(Side::Destination)
    } else if contains(&source.migration_points, current_ref) {
        Some(Side::Source)
    } else {
        None
    };

    let to_destination = if current_ref == destination_last {
        None
    } else if contains(&destination.migration_points, current_ref) {
        Some(Side::Destination)
    } else if contains(&source.migration_points, current_ref)
        && contains(&source.migration_points, destination_last)
    {
        Some(Side::Source)
    } else {
        None
    };

    let mut state = ResourceMigrationState {
        code: destination_resource.code.clone(),
        name: destination_resource.name.clone(),
        current_point: current,
        source_point: source.last_defined_point.clone(),
        destination_point: destination.last_defined_point.clone(),
        position: ResourcePosition::Undefined,
        migration_to_source_executor: to_source,
        migration_to_destination_executor: to_destination,
    };
    state.position = resource_position(&state);
    state
}

/// Resource known to one side only
fn single_resource(
    migrator: &MigratorConfigurationState,
    resource: &ResourceConfigurationState,
    position: MergePosition,
) -> ResourceMigrationState {
    let current = resource.current_point.as_deref();
    let last = migrator.last_defined_point.as_deref();
    let at_last = current == last;

    let to_source = (!at_last
        && position == MergePosition::Obsolete
        && contains(&migrator.migration_points, current))
    .then_some(Side::Source);
    let to_destination = (!at_last && position == MergePosition::New).then_some(Side::Destination);

    let mut state = ResourceMigrationState {
        code: resource.code.clone(),
        name: resource.name.clone(),
        current_point: resource.current_point.clone(),
        source_point: (position != MergePosition::New)
            .then(|| migrator.last_defined_point.clone())
            .flatten(),
        destination_point: (position != MergePosition::Obsolete)
            .then(|| migrator.last_defined_point.clone())
            .flatten(),
        position: ResourcePosition::Undefined,
        migration_to_source_executor: to_source,
        migration_to_destination_executor: to_destination,
    };
    state.position = resource_position(&state);
    state
}

fn resource_position(state: &ResourceMigrationState) -> ResourcePosition {
    let Some(current) = state.current_point.as_deref() else {
        return ResourcePosition::NotCreated;
    };
    let Some(destination) = state.destination_point.as_deref() else {
        return ResourcePosition::Obsolete;
    };
    let at_source = state.source_point.as_deref() == Some(current);
    let at_destination = destination == current;

    match (at_source, at_destination) {
        (true, true) => ResourcePosition::SourceAndDestination,
        (true, false) => ResourcePosition::Source,
        (false, true) => ResourcePosition::Destination,
        (false, false)
            if state.migration_to_source_executor.is_some()
                || state.migration_to_destination_executor.is_some() =>
        {
            ResourcePosition::InScope
        }
        (false, false) => ResourcePosition::Undefined,
    }
}

/// Operator request to move one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpgrade {
    pub template_code: String,
    pub migrator_type_name: String,
    pub resource_code: String,
    /// Side whose checkpoint the resource should reach
    pub target: Side,
}

/// Resources one migrator should move, with their target checkpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratorCommand {
    pub type_name: String,
    /// Resource code to target checkpoint
    pub resources: BTreeMap<String, String>,
}

/// Commands for one migrator template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateBatch {
    pub template_code: String,
    pub template_name: String,
    /// Commands by migrator type name
    pub commands: BTreeMap<String, MigratorCommand>,
}

/// Command batches grouped by executing side and template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    batches: BTreeMap<Side, BTreeMap<String, TemplateBatch>>,
}

impl ExecutionPlan {
    /// Batches executed by the code of `side`
    pub fn batches(&self, side: Side) -> impl Iterator<Item = &TemplateBatch> {
        self.batches.get(&side).into_iter().flat_map(BTreeMap::values)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.values().all(BTreeMap::is_empty)
    }

    fn add(
        &mut self,
        side: Side,
        template_code: &str,
        template_name: &str,
        type_name: &str,
        resource_code: &str,
        point: &str,
    ) {
        let batch = self
            .batches
            .entry(side)
            .or_default()
            .entry(template_code.to_string())
            .or_insert_with(|| TemplateBatch {
                template_code: template_code.to_string(),
                template_name: template_name.to_string(),
                commands: BTreeMap::new(),
            });
        batch
            .commands
            .entry(type_name.to_string())
            .or_insert_with(|| MigratorCommand {
                type_name: type_name.to_string(),
                resources: BTreeMap::new(),
            })
            .resources
            .insert(resource_code.to_string(), point.to_string());
    }
}

fn plan_error(
    message: &str,
    request: &ResourceUpgrade,
    configuration_id: ConfigurationId,
    migration_id: Option<MigrationId>,
) -> MigrationLogRecord {
    let mut record = MigrationLogRecord::error(message)
        .with_configuration(configuration_id)
        .with_migration(migration_id);
    record.migrator_template_code = Some(request.template_code.clone());
    record.migrator_type_name = Some(request.migrator_type_name.clone());
    record.resource_code = Some(request.resource_code.clone());
    record
}

/// Plan for the active configuration outside a migration
///
/// Every resource moves to its migrator's latest checkpoint on the single
/// installed side; the requested target is not consulted.
#[must_use]
pub fn plan_configuration(
    requests: &[ResourceUpgrade],
    state: &ConfigurationResourceState,
) -> (ExecutionPlan, Vec<MigrationLogRecord>) {
    let mut plan = ExecutionPlan::default();
    let mut errors = Vec::new();
    let error = |message, request| plan_error(message, request, state.configuration_id, None);

    for request in requests {
        let Some(template) = state
            .templates
            .iter()
            .find(|t| t.code == request.template_code)
        else {
            errors.push(error("Migrator template was not found", request));
            continue;
        };
        let Some(migrator) = template
            .migrators
            .iter()
            .find(|m| m.type_name == request.migrator_type_name)
        else {
            errors.push(error("Migrator was not found", request));
            continue;
        };
        if migrator
            .resources
            .iter()
            .all(|r| r.code != request.resource_code)
        {
            errors.push(error("Resource was not found", request));
            continue;
        }
        let Some(point) = migrator.last_defined_point.as_deref() else {
            errors.push(error("Resource can not be migrated", request));
            continue;
        };

        plan.add(
            Side::Source,
            &template.code,
            &template.name,
            &migrator.type_name,
            &request.resource_code,
            point,
        );
    }

    (plan, errors)
}

/// Plan for an active migration
///
/// Each resource is routed to the side able to reach the requested target.
#[must_use]
pub fn plan_migration(
    requests: &[ResourceUpgrade],
    state: &MigrationResourceState,
) -> (ExecutionPlan, Vec<MigrationLogRecord>) {
    let mut plan = ExecutionPlan::default();
    let mut errors = Vec::new();
    let error = |message, request| {
        plan_error(
            message,
            request,
            state.to_configuration_id,
            Some(state.migration_id),
        )
    };

    for request in requests {
        let Some(template) = state
            .templates
            .iter()
            .find(|t| t.code == request.template_code)
        else {
            errors.push(error("Migrator template was not found", request));
            continue;
        };
        let Some(migrator) = template
            .migrators
            .iter()
            .find(|m| m.type_name == request.migrator_type_name)
        else {
            errors.push(error("Migrator was not found", request));
            continue;
        };
        let Some(resource) = migrator
            .resources
            .iter()
            .find(|r| r.code == request.resource_code)
        else {
            errors.push(error("Resource was not found", request));
            continue;
        };
        let (Some(executor), Some(point)) = (
            resource.executor_for(request.target),
            resource.point_for(request.target),
        ) else {
            errors.push(error("Resource can not be migrated", request));
            continue;
        };

        plan.add(
            executor,
            &template.code,
            &template.name,
            &migrator.type_name,
            &resource.code,
            point,
        );
    }

    (plan, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DependencyType;
    use pretty_assertions::assert_eq;

    fn points(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn migrator(names: &[&str], current: Option<&str>) -> MigratorConfigurationState {
        MigratorConfigurationState {
            type_name: "Db".into(),
            name: "Database".into(),
            migration_points: points(names),
            last_defined_point: names.last().map(ToString::to_string),
            resources: vec![ResourceConfigurationState {
                code: "main".into(),
                name: "Main".into(),
                current_point: current.map(ToString::to_string),
            }],
            priority: 1.0,
            dependency_type: DependencyType::CodeDependsOnResource,
        }
    }

    fn template(migrator: MigratorConfigurationState) -> MigratorTemplateConfigurationState {
        MigratorTemplateConfigurationState {
            code: "m1".into(),
            name: "M1".into(),
            priority: 1.0,
            migrators: vec![migrator],
        }
    }

    fn merged(
        source: MigratorConfigurationState,
        destination: MigratorConfigurationState,
    ) -> MigratorMigrationState {
        let templates = compute_migration_state(&[template(source)], &[template(destination)]);
        templates[0].migrators[0].clone()
    }

    #[test]
    fn direction_compares_sequences() {
        let d = |s: &[&str], t: &[&str]| migration_direction(&points(s), &points(t));
        assert_eq!(d(&["a"], &["a"]), MigrationDirection::Stay);
        assert_eq!(d(&["a"], &["a", "b"]), MigrationDirection::Upgrade);
        assert_eq!(d(&["a", "b"], &["a"]), MigrationDirection::Downgrade);
        assert_eq!(d(&["a", "b"], &["a", "c"]), MigrationDirection::Undefined);
    }

    #[test]
    fn direction_handles_delimiters_in_names() {
        let source = points(&["a,\"b\""]);
        let destination = points(&["a", "\"b\"", "c"]);
        assert_eq!(
            migration_direction(&source, &destination),
            MigrationDirection::Undefined
        );

        let source = points(&["v1, \"x\""]);
        let destination = points(&["v1, \"x\"", "v2"]);
        assert_eq!(
            migration_direction(&source, &destination),
            MigrationDirection::Upgrade
        );
    }

    #[test]
    fn upgrade_resource_is_at_source_and_moved_by_destination() {
        let state = merged(
            migrator(&["first"], Some("first")),
            migrator(&["first", "second"], Some("first")),
        );
        assert_eq!(state.direction, MigrationDirection::Upgrade);

        let resource = &state.resources[0];
        assert_eq!(resource.position, ResourcePosition::Source);
        assert_eq!(resource.migration_to_destination_executor, Some(Side::Destination));
        assert_eq!(resource.migration_to_source_executor, None);
    }

    #[test]
    fn upgraded_resource_can_roll_back_through_destination() {
        let state = merged(
            migrator(&["first"], Some("second")),
            migrator(&["first", "second"], Some("second")),
        );
        let resource = &state.resources[0];
        assert_eq!(resource.position, ResourcePosition::Destination);
        assert_eq!(resource.migration_to_destination_executor, None);
        assert_eq!(resource.migration_to_source_executor, Some(Side::Destination));
    }

    #[test]
    fn downgrade_resource_is_moved_by_source() {
        let state = merged(
            migrator(&["first", "second"], Some("second")),
            migrator(&["first"], Some("second")),
        );
        assert_eq!(state.direction, MigrationDirection::Downgrade);
        let resource = &state.resources[0];
        assert_eq!(resource.position, ResourcePosition::Source);
        assert_eq!(resource.migration_to_destination_executor, Some(Side::Source));
    }

    #[test]
    fn identical_points_stay() {
        let state = merged(migrator(&["a", "b"], Some("b")), migrator(&["a", "b"], Some("b")));
        assert_eq!(state.direction, MigrationDirection::Stay);
        assert_eq!(state.resources[0].position, ResourcePosition::SourceAndDestination);
    }

    #[test]
    fn uncreated_resources_force_stay() {
        let state = merged(migrator(&["a"], None), migrator(&["a", "b"], None));
        assert_eq!(state.direction, MigrationDirection::Stay);
        assert_eq!(state.resources[0].position, ResourcePosition::NotCreated);
    }

    #[test]
    fn unknown_checkpoint_is_undefined() {
        let state = merged(migrator(&["a"], Some("zzz")), migrator(&["a", "b"], Some("zzz")));
        let resource = &state.resources[0];
        assert_eq!(resource.position, ResourcePosition::Undefined);
        assert_eq!(resource.migration_to_source_executor, None);
        assert_eq!(resource.migration_to_destination_executor, None);
    }

    #[test]
    fn one_sided_templates_and_migrators() {
        let source = template(migrator(&["a"], Some("a")));
        let mut destination = template(migrator(&["x"], None));
        destination.code = "m2".into();
        destination.migrators[0].type_name = "Queue".into();

        let templates = compute_migration_state(&[source], &[destination]);
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].position, MergePosition::New);
        assert_eq!(templates[1].position, MergePosition::Obsolete);

        let created = &templates[0].migrators[0].resources[0];
        assert_eq!(created.position, ResourcePosition::NotCreated);
        assert_eq!(created.migration_to_destination_executor, Some(Side::Destination));

        let dropped = &templates[1].migrators[0].resources[0];
        assert_eq!(dropped.position, ResourcePosition::Obsolete);
        assert_eq!(dropped.migration_to_source_executor, None);
    }

    #[test]
    fn configuration_plan_targets_latest_point() {
        let state = ConfigurationResourceState {
            configuration_id: ConfigurationId(1),
            templates: vec![template(migrator(&["a", "b"], Some("a")))],
        };
        let request = ResourceUpgrade {
            template_code: "m1".into(),
            migrator_type_name: "Db".into(),
            resource_code: "main".into(),
            target: Side::Destination,
        };

        let (plan, errors) = plan_configuration(&[request], &state);
        assert!(errors.is_empty());
        let batch: Vec<_> = plan.batches(Side::Source).collect();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].commands["Db"].resources["main"], "b");
        assert_eq!(plan.batches(Side::Destination).count(), 0);
    }

    #[test]
    fn unresolved_requests_are_reported() {
        let state = ConfigurationResourceState {
            configuration_id: ConfigurationId(7),
            templates: vec![template(migrator(&["a"], Some("a")))],
        };
        let request = |template: &str, migrator: &str, resource: &str| ResourceUpgrade {
            template_code: template.into(),
            migrator_type_name: migrator.into(),
            resource_code: resource.into(),
            target: Side::Source,
        };

        let (plan, errors) = plan_configuration(
            &[
                request("nope", "Db", "main"),
                request("m1", "nope", "main"),
                request("m1", "Db", "nope"),
            ],
            &state,
        );

        assert!(plan.is_empty());
        let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            [
                "Migrator template was not found",
                "Migrator was not found",
                "Resource was not found"
            ]
        );
        assert!(errors
            .iter()
            .all(|e| e.configuration_id == Some(ConfigurationId(7))));
    }
}
