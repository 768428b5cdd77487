//! Cluster migrations driven through the coordinator handle, with the
//! orchestrator replaced by a channel the tests answer themselves

use ccp_coordinator::{
    ClusterCoordinator, CoordinatorConfig, CoordinatorHandle, MigrationStep, UpdateClusterError,
};
use ccp_migration::{
    compute_migration_state, ConfigurationResourceState, DependencyType, MigrationResourceState,
    MigratorConfigurationState, MigratorTemplateConfigurationState, OrchestratorCommand,
    OrchestratorHandle, OrchestratorNotification, ResourceConfigurationState, ResourceUpgrade,
    Side, UpgradeReply,
};
use ccp_model::{
    ConfigurationId, ConfigurationState, ConfigurationStore, Migration, MigrationDirection,
    MigrationId, MigrationLogRecord, MigrationState, NodeAddress, NodeDescription, NodeId,
};
use ccp_test_utils::{test_configuration, MemoryStore, RecordingMessenger, ScriptedRandom};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Cluster {
    store: Arc<MemoryStore>,
    coordinator: CoordinatorHandle,
    commands: mpsc::Receiver<OrchestratorCommand>,
}

impl Cluster {
    fn new(states: &[ConfigurationState]) -> Self {
        let store = Arc::new(MemoryStore::with_configurations(states.iter().map(|state| {
            let mut configuration = test_configuration();
            configuration.state = *state;
            configuration
        })));
        let (sender, commands) = mpsc::channel(16);
        let (coordinator, _task) = ClusterCoordinator::new(
            CoordinatorConfig::default(),
            store.clone(),
            OrchestratorHandle::new(sender),
            Arc::new(RecordingMessenger::new()),
            Box::new(ScriptedRandom::default()),
        )
        .spawn();
        Self {
            store,
            coordinator,
            commands,
        }
    }

    /// Deliver a notification and wait until the coordinator handled it
    async fn notify(&self, notification: OrchestratorNotification) {
        self.coordinator
            .orchestrator_notification(notification)
            .await
            .unwrap();
        self.coordinator.resource_state().await.unwrap();
    }

    /// Report a configuration whose resources are all up to date
    async fn idle(&self, configuration_id: i64) {
        self.notify(OrchestratorNotification::ConfigurationState(ConfigurationResourceState {
            configuration_id: ConfigurationId(configuration_id),
            templates: Vec::new(),
        }))
        .await;
    }

    async fn next_command(&mut self) -> OrchestratorCommand {
        tokio::time::timeout(Duration::from_secs(5), self.commands.recv())
            .await
            .expect("no orchestrator command")
            .expect("coordinator stopped")
    }

    async fn join_node(&self, address: &str, configuration_id: i64) {
        let address = NodeAddress::new(address);
        self.coordinator
            .member_up(address.clone(), vec!["worker".into()])
            .await
            .unwrap();
        self.coordinator
            .node_description(NodeDescription {
                node_id: Some(NodeId::new()),
                node_address: Some(address),
                node_template: "worker".into(),
                configuration_id: ConfigurationId(configuration_id),
                container_type: "worker".into(),
                ..NodeDescription::default()
            })
            .await
            .unwrap();
    }

    /// Create a migration from 1 to 2 and swallow the recheck it triggers
    async fn start_migration(&mut self) -> Migration {
        self.idle(1).await;
        let migration = self
            .coordinator
            .update_cluster(ConfigurationId(2))
            .await
            .unwrap();
        assert!(matches!(self.next_command().await, OrchestratorCommand::RecheckState));
        migration
    }

    async fn stored_migration(&self, migration: &Migration) -> Migration {
        self.store.migration(migration.id).await.unwrap().unwrap()
    }
}

fn side(points: &[&str], current: &str) -> Vec<MigratorTemplateConfigurationState> {
    vec![MigratorTemplateConfigurationState {
        code: "m1".into(),
        name: "M1".into(),
        priority: 1.0,
        migrators: vec![MigratorConfigurationState {
            type_name: "Db".into(),
            name: "Db".into(),
            migration_points: points.iter().map(ToString::to_string).collect(),
            last_defined_point: points.last().map(ToString::to_string),
            resources: vec![ResourceConfigurationState {
                code: "main".into(),
                name: "Main".into(),
                current_point: Some(current.into()),
            }],
            priority: 1.0,
            dependency_type: DependencyType::CodeDependsOnResource,
        }],
    }]
}

fn migration_state(
    migration: &Migration,
    source: &[&str],
    destination: &[&str],
    current: &str,
) -> OrchestratorNotification {
    OrchestratorNotification::MigrationState(MigrationResourceState::new(
        migration,
        compute_migration_state(&side(source, current), &side(destination, current)),
    ))
}

/// Play the orchestrator for one upgrade request
async fn answer(commands: &mut mpsc::Receiver<OrchestratorCommand>, reply: UpgradeReply) {
    match commands.recv().await {
        Some(OrchestratorCommand::UpgradeResources {
            reply: Some(sender),
            ..
        }) => {
            let _ = sender.send(reply);
        }
        other => panic!("expected an upgrade request, got {other:?}"),
    }
}

fn upgrade_request() -> ResourceUpgrade {
    ResourceUpgrade {
        template_code: "m1".into(),
        migrator_type_name: "Db".into(),
        resource_code: "main".into(),
        target: Side::Destination,
    }
}

#[tokio::test]
async fn cluster_update_is_checked_in_order() {
    use ConfigurationState::{Active, Draft, Ready};
    let mut cluster = Cluster::new(&[Active, Ready, Draft]);
    let update = |id| cluster.coordinator.update_cluster(ConfigurationId(id));

    assert!(matches!(update(2).await, Err(UpdateClusterError::ResourcesChecking)));

    cluster
        .notify(OrchestratorNotification::InitializationFailed(Vec::new()))
        .await;
    assert!(matches!(update(2).await, Err(UpdateClusterError::ResourceStateUnknown)));

    cluster
        .notify(OrchestratorNotification::ConfigurationState(ConfigurationResourceState {
            configuration_id: ConfigurationId(1),
            templates: side(&["first", "second"], "first"),
        }))
        .await;
    assert!(matches!(update(2).await, Err(UpdateClusterError::CannotCreateMigration)));

    cluster.idle(1).await;
    assert!(matches!(update(1).await, Err(UpdateClusterError::AlreadySet)));
    assert!(matches!(update(9).await, Err(UpdateClusterError::ConfigurationNotFound)));
    assert!(matches!(update(3).await, Err(UpdateClusterError::DraftConfiguration)));

    let migration = update(2).await.unwrap();
    assert_eq!(migration.from_configuration_id, ConfigurationId(1));
    assert_eq!(migration.to_configuration_id, ConfigurationId(2));
    assert_eq!(migration.state, MigrationState::Preparing);
    assert!(migration.is_active);
    assert!(matches!(cluster.next_command().await, OrchestratorCommand::RecheckState));

    let state = cluster.coordinator.resource_state().await.unwrap();
    assert!(state.operation_is_in_progress);
    assert!(!state.can_create_migration);
    assert_eq!(cluster.store.migrations().len(), 1);
}

#[tokio::test]
async fn second_active_migration_is_declined() {
    use ConfigurationState::{Active, Ready};
    let cluster = Cluster::new(&[Active, Ready]);
    cluster.idle(1).await;
    let state = cluster.coordinator.resource_state().await.unwrap();
    assert!(state.can_create_migration);

    // row appears after the coordinator read the store
    cluster
        .store
        .put_migration(Migration::start(ConfigurationId(1), ConfigurationId(2)));

    let result = cluster.coordinator.update_cluster(ConfigurationId(2)).await;
    assert!(matches!(result, Err(UpdateClusterError::MigrationPending)));
    assert_eq!(cluster.store.migrations().len(), 1);
}

#[tokio::test]
async fn obsolete_nodes_block_new_migrations() {
    use ConfigurationState::{Active, Obsolete, Ready};
    let cluster = Cluster::new(&[Obsolete, Active, Ready]);
    cluster.join_node("node-1", 1).await;
    cluster.idle(2).await;

    let state = cluster.coordinator.resource_state().await.unwrap();
    assert!(!state.can_create_migration);
    let result = cluster.coordinator.update_cluster(ConfigurationId(3)).await;
    assert!(matches!(result, Err(UpdateClusterError::CannotCreateMigration)));
}

#[tokio::test]
async fn stay_migration_walks_start_nodes_finish() {
    use ConfigurationState::{Active, Obsolete, Ready};
    let mut cluster = Cluster::new(&[Active, Ready]);
    cluster.join_node("node-1", 1).await;
    let migration = cluster.start_migration().await;

    cluster.notify(migration_state(&migration, &["a"], &["a"], "a")).await;
    let stored = cluster.stored_migration(&migration).await;
    assert_eq!(stored.state, MigrationState::Ready);
    assert_eq!(stored.direction, Some(MigrationDirection::Stay));

    let state = cluster.coordinator.resource_state().await.unwrap();
    assert_eq!(
        state.migration_steps,
        Some(vec![MigrationStep::Start, MigrationStep::NodesUpdating, MigrationStep::Finish])
    );
    assert_eq!(state.current_migration_step, Some(MigrationStep::Start));
    assert!(state.can_cancel_migration);
    assert!(state.can_update_nodes_to_destination);
    assert!(!state.can_migrate_resources);
    assert!(!state.can_finish_migration);

    assert!(cluster.coordinator.update_nodes(Side::Destination).await.unwrap());
    let configurations = cluster.store.configurations().await.unwrap();
    assert_eq!(configurations[0].state, Obsolete);
    assert_eq!(configurations[1].state, Active);

    let state = cluster.coordinator.resource_state().await.unwrap();
    assert_eq!(state.current_migration_step, Some(MigrationStep::NodesUpdating));
    assert!(!cluster.coordinator.finish_migration().await.unwrap());

    cluster
        .coordinator
        .member_down(NodeAddress::new("node-1"))
        .await
        .unwrap();
    let state = cluster.coordinator.resource_state().await.unwrap();
    assert_eq!(state.current_migration_step, Some(MigrationStep::Finish));
    assert!(state.can_finish_migration);

    assert!(cluster.coordinator.finish_migration().await.unwrap());
    let stored = cluster.stored_migration(&migration).await;
    assert_eq!(stored.state, MigrationState::Completed);
    assert!(!stored.is_active);
    assert!(stored.finished.is_some());
    assert!(matches!(cluster.next_command().await, OrchestratorCommand::RecheckState));
    assert!(cluster.coordinator.resource_state().await.unwrap().operation_is_in_progress);
}

#[tokio::test]
async fn cancel_rolls_back_a_started_migration() {
    use ConfigurationState::{Active, Ready};
    let mut cluster = Cluster::new(&[Active, Ready]);
    let migration = cluster.start_migration().await;

    cluster
        .notify(migration_state(&migration, &["first"], &["first", "second"], "first"))
        .await;
    let state = cluster.coordinator.resource_state().await.unwrap();
    assert_eq!(state.current_migration_step, Some(MigrationStep::Start));
    assert!(state.can_migrate_resources);
    assert!(!state.can_update_nodes_to_destination);

    assert!(cluster.coordinator.cancel_migration().await.unwrap());
    let stored = cluster.stored_migration(&migration).await;
    assert_eq!(stored.state, MigrationState::Failed);
    assert_eq!(stored.direction, Some(MigrationDirection::Upgrade));
    assert!(!stored.is_active);
    assert!(matches!(cluster.next_command().await, OrchestratorCommand::RecheckState));

    let active = cluster.store.active_configuration().await.unwrap().unwrap();
    assert_eq!(active.id, ConfigurationId(1));
}

#[tokio::test]
async fn resource_upgrades_go_through_the_orchestrator() {
    use ConfigurationState::{Active, Ready};
    let mut cluster = Cluster::new(&[Active, Ready]);
    let migration = cluster.start_migration().await;
    let reported = migration_state(&migration, &["first"], &["first", "second"], "first");
    cluster.notify(reported.clone()).await;

    let (accepted, ()) = tokio::join!(
        cluster.coordinator.upgrade_resources(vec![upgrade_request()]),
        answer(&mut cluster.commands, UpgradeReply::Acknowledged)
    );
    assert!(accepted.unwrap());
    let state = cluster.coordinator.resource_state().await.unwrap();
    assert!(state.operation_is_in_progress);
    assert_eq!(state.current_migration_step, Some(MigrationStep::ResourcesUpdating));
    assert!(!cluster
        .coordinator
        .upgrade_resources(vec![upgrade_request()])
        .await
        .unwrap());

    cluster.notify(reported).await;
    let declined = MigrationLogRecord::error("Resource was not found");
    let (accepted, ()) = tokio::join!(
        cluster.coordinator.upgrade_resources(vec![upgrade_request()]),
        answer(&mut cluster.commands, UpgradeReply::Declined(vec![declined.clone()]))
    );
    assert!(!accepted.unwrap());
    assert_eq!(cluster.store.logs(), [declined]);
}

#[tokio::test]
async fn empty_resource_upgrade_is_refused() {
    use ConfigurationState::{Active, Ready};
    let mut cluster = Cluster::new(&[Active, Ready]);
    let migration = cluster.start_migration().await;
    cluster
        .notify(migration_state(&migration, &["first"], &["first", "second"], "first"))
        .await;

    assert!(!cluster.coordinator.upgrade_resources(Vec::new()).await.unwrap());
}

#[tokio::test]
async fn conflicting_directions_break_the_migration() {
    use ConfigurationState::{Active, Ready};
    let mut cluster = Cluster::new(&[Active, Ready]);
    let migration = cluster.start_migration().await;

    cluster
        .notify(migration_state(&migration, &["a", "b"], &["a", "c"], "a"))
        .await;
    let stored = cluster.stored_migration(&migration).await;
    assert_eq!(stored.state, MigrationState::Preparing);
    assert_eq!(stored.direction, None);

    let state = cluster.coordinator.resource_state().await.unwrap();
    assert_eq!(state.current_migration_step, Some(MigrationStep::Broken));
    assert!(!state.can_cancel_migration);
    assert!(!state.can_migrate_resources);
    assert!(!cluster.coordinator.cancel_migration().await.unwrap());
    assert!(!cluster.coordinator.finish_migration().await.unwrap());
    assert!(!cluster.coordinator.update_nodes(Side::Destination).await.unwrap());
}

#[tokio::test]
async fn state_of_another_migration_is_ignored() {
    use ConfigurationState::{Active, Ready};
    let mut cluster = Cluster::new(&[Active, Ready]);
    let migration = cluster.start_migration().await;

    let mut other = migration.clone();
    other.id = MigrationId(99);
    cluster.notify(migration_state(&other, &["a"], &["a"], "a")).await;
    cluster.idle(1).await;

    let state = cluster.coordinator.resource_state().await.unwrap();
    assert!(state.operation_is_in_progress);
    assert!(state.migration_state.is_none());
    assert!(state.configuration_state.is_none());
    assert_eq!(cluster.stored_migration(&migration).await.state, MigrationState::Preparing);
}

#[tokio::test]
async fn failed_initialization_is_stored_as_log() {
    use ConfigurationState::Active;
    let cluster = Cluster::new(&[Active]);
    let failure = MigrationLogRecord::error("Error while requesting migration state: missing host");

    cluster
        .notify(OrchestratorNotification::InitializationFailed(vec![failure.clone()]))
        .await;

    let state = cluster.coordinator.resource_state().await.unwrap();
    assert!(!state.operation_is_in_progress);
    assert!(!state.can_create_migration);
    assert_eq!(cluster.store.logs(), [failure]);
}
