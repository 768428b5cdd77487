//! Coordinator and orchestrator wired together over in-memory collaborators

use ccp_coordinator::{MigrationStep, ResourceState};
use ccp_migration::{InProcessRuntime, MigratorHost, ResourceUpgrade, Side};
use ccp_model::{
    Configuration, ConfigurationId, ConfigurationState, ConfigurationStore, LogRecordType,
    MigrationDirection, MigrationState, MigratorTemplate, NodeAddress, NodeDescription, NodeId,
    PackageDescription,
};
use ccp_node_manager::{Collaborators, NodeManager, NodeManagerConfig};
use ccp_test_utils::{
    package_catalog, MemoryStore, RecordingMessenger, ResourceBook, ScriptedMigrator,
    ScriptedRandom, NET_CORE,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn configuration(state: ConfigurationState) -> Configuration {
    let mut configuration = Configuration::draft("release");
    configuration.state = state;
    let mut template = MigratorTemplate::new("m1").with_configuration("connection=db");
    template
        .packages_to_install
        .insert(NET_CORE.into(), vec![PackageDescription::new("m1", "1.0.0")]);
    configuration.settings.migrator_templates.push(template);
    configuration
}

fn host(points: &[&str], book: &ResourceBook) -> Arc<MigratorHost> {
    Arc::new(MigratorHost::new(vec![Arc::new(ScriptedMigrator::new(
        "Db",
        points,
        book.clone(),
    ))]))
}

fn start(store: &Arc<MemoryStore>, runtime: InProcessRuntime, workdir: &TempDir) -> NodeManager {
    let mut config = NodeManagerConfig::default().with_current_runtime(NET_CORE);
    config.orchestrator = config.orchestrator.with_working_directory(workdir.path());
    NodeManager::start(
        config,
        Collaborators {
            store: store.clone(),
            repository: Arc::new(package_catalog()),
            runtime: Arc::new(runtime),
            messenger: Arc::new(RecordingMessenger::new()),
            random: Box::new(ScriptedRandom::default()),
        },
    )
}

/// Poll the resource state until `done` holds
async fn eventually(
    manager: &NodeManager,
    done: impl Fn(&ResourceState) -> bool,
) -> ResourceState {
    let poll = async {
        loop {
            let state = manager.coordinator().resource_state().await.unwrap();
            if done(&state) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), poll)
        .await
        .expect("resource state never settled")
}

#[tokio::test]
async fn idle_cluster_reports_its_configuration() {
    let workdir = tempfile::tempdir().unwrap();
    let book = ResourceBook::new().with("r1", "first");
    let store = Arc::new(MemoryStore::with_configurations([configuration(
        ConfigurationState::Active,
    )]));
    let runtime =
        InProcessRuntime::new().with_host(ConfigurationId(1), "m1", host(&["first"], &book));
    let manager = start(&store, runtime, &workdir);

    let state = eventually(&manager, |s| s.configuration_state.is_some()).await;
    assert_eq!(
        state.configuration_state.map(|c| c.configuration_id),
        Some(ConfigurationId(1))
    );
    assert!(state.can_create_migration);
    assert!(!state.operation_is_in_progress);

    let address = NodeAddress::new("node-1");
    let coordinator = manager.coordinator();
    coordinator.member_up(address.clone(), Vec::new()).await.unwrap();
    coordinator
        .node_description(NodeDescription {
            node_id: Some(NodeId::new()),
            node_address: Some(address),
            node_template: "worker".into(),
            configuration_id: ConfigurationId(1),
            ..NodeDescription::default()
        })
        .await
        .unwrap();
    let nodes = coordinator.active_nodes().await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert!(!nodes[0].is_obsolete);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn upgrade_migration_runs_to_completion() {
    let workdir = tempfile::tempdir().unwrap();
    let book = ResourceBook::new().with("r1", "first");
    let store = Arc::new(MemoryStore::with_configurations([
        configuration(ConfigurationState::Active),
        configuration(ConfigurationState::Ready),
    ]));
    let runtime = InProcessRuntime::new()
        .with_host(ConfigurationId(1), "m1", host(&["first"], &book))
        .with_host(ConfigurationId(2), "m1", host(&["first", "second"], &book));
    let manager = start(&store, runtime, &workdir);
    let coordinator = manager.coordinator();

    eventually(&manager, |s| s.can_create_migration).await;
    let migration = coordinator.update_cluster(ConfigurationId(2)).await.unwrap();

    let state = eventually(&manager, |s| s.can_migrate_resources).await;
    assert_eq!(state.current_migration_step, Some(MigrationStep::Start));
    let stored = store.migration(migration.id).await.unwrap().unwrap();
    assert_eq!(stored.state, MigrationState::Ready);
    assert_eq!(stored.direction, Some(MigrationDirection::Upgrade));

    let accepted = coordinator
        .upgrade_resources(vec![ResourceUpgrade {
            template_code: "m1".into(),
            migrator_type_name: "Db".into(),
            resource_code: "r1".into(),
            target: Side::Destination,
        }])
        .await
        .unwrap();
    assert!(accepted);

    let state = eventually(&manager, |s| {
        s.current_migration_step == Some(MigrationStep::ResourcesUpdated)
    })
    .await;
    assert!(state.can_update_nodes_to_destination);
    assert_eq!(book.point("r1").as_deref(), Some("second"));
    let logs = store.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].record_type, LogRecordType::Operation);
    assert_eq!(logs[0].source_point.as_deref(), Some("first"));
    assert_eq!(logs[0].destination_point.as_deref(), Some("second"));

    assert!(coordinator.update_nodes(Side::Destination).await.unwrap());
    eventually(&manager, |s| s.can_finish_migration).await;
    assert!(coordinator.finish_migration().await.unwrap());

    let state = eventually(&manager, |s| s.configuration_state.is_some()).await;
    assert_eq!(
        state.configuration_state.map(|c| c.configuration_id),
        Some(ConfigurationId(2))
    );
    let stored = store.migration(migration.id).await.unwrap().unwrap();
    assert_eq!(stored.state, MigrationState::Completed);
    assert!(!stored.is_active);
    let active = store.active_configuration().await.unwrap().unwrap();
    assert_eq!(active.id, ConfigurationId(2));

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn missing_configuration_is_reported_and_shutdown_stops_both_actors() {
    let workdir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let manager = start(&store, InProcessRuntime::new(), &workdir);

    let state = eventually(&manager, |s| !s.operation_is_in_progress).await;
    assert!(state.configuration_state.is_none());
    assert!(!state.can_create_migration);
    let logs = store.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "There is no active configuration");

    let orchestrator = manager.orchestrator().clone();
    manager.shutdown().await.unwrap();
    assert!(orchestrator.recheck_state().await.is_err());
}
