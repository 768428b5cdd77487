//! Orchestrator driven end to end over an in-memory store and in-process migrators

use ccp_migration::{
    InProcessRuntime, MigrationOrchestrator, MigrationPosition, MigratorHost, OrchestratorConfig,
    OrchestratorHandle, OrchestratorNotification, ResourcePosition, ResourceUpgrade, Side,
    UpgradeReply,
};
use ccp_model::{
    Configuration, ConfigurationId, ConfigurationState, LogRecordType, Migration,
    MigrationLogRecord, MigratorTemplate, PackageDescription,
};
use ccp_test_utils::{package_catalog, MemoryStore, ResourceBook, ScriptedMigrator, NET_CORE};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn configuration(id: i64, state: ConfigurationState) -> Configuration {
    let mut configuration = Configuration::draft(format!("release {id}"));
    configuration.id = ConfigurationId(id);
    configuration.state = state;

    let mut template = MigratorTemplate::new("m1").with_configuration("connection=db");
    template
        .packages_to_install
        .insert(NET_CORE.into(), vec![PackageDescription::new("m1", "1.0.0")]);
    configuration.settings.migrator_templates.push(template);
    configuration
}

fn host(points: &[&str], book: &ResourceBook, failing: Option<&str>) -> Arc<MigratorHost> {
    let migrator = ScriptedMigrator::new("Db", points, book.clone());
    let migrator = match failing {
        Some(message) => migrator.failing(message),
        None => migrator,
    };
    Arc::new(MigratorHost::new(vec![Arc::new(migrator)]))
}

struct Harness {
    handle: OrchestratorHandle,
    notifications: mpsc::Receiver<OrchestratorNotification>,
    store: Arc<MemoryStore>,
    _workdir: TempDir,
}

impl Harness {
    fn start(store: MemoryStore, runtime: InProcessRuntime) -> Self {
        let workdir = tempfile::tempdir().unwrap();
        let store = Arc::new(store);
        let (tx, notifications) = mpsc::channel(32);
        let config = OrchestratorConfig::default()
            .with_working_directory(workdir.path())
            .with_current_runtime(NET_CORE);
        let (handle, _task) = MigrationOrchestrator::new(
            config,
            store.clone(),
            Arc::new(package_catalog()),
            Arc::new(runtime),
            tx,
        )
        .spawn();
        Self {
            handle,
            notifications,
            store,
            _workdir: workdir,
        }
    }

    async fn next(&mut self) -> OrchestratorNotification {
        tokio::time::timeout(Duration::from_secs(5), self.notifications.recv())
            .await
            .expect("orchestrator went quiet")
            .expect("orchestrator stopped")
    }

    /// Skip progress notifications
    async fn next_state(&mut self) -> OrchestratorNotification {
        loop {
            match self.next().await {
                OrchestratorNotification::ProcessingTheRequest => continue,
                other => return other,
            }
        }
    }

    async fn next_logs(&mut self) -> Vec<MigrationLogRecord> {
        match self.next_state().await {
            OrchestratorNotification::Logs(records) => records,
            other => panic!("expected logs, got {other:?}"),
        }
    }
}

fn upgrade(target: Side) -> Vec<ResourceUpgrade> {
    vec![ResourceUpgrade {
        template_code: "m1".into(),
        migrator_type_name: "Db".into(),
        resource_code: "r1".into(),
        target,
    }]
}

fn migration_harness(book: &ResourceBook, failing: Option<&str>) -> Harness {
    let store = MemoryStore::with_configurations([
        configuration(1, ConfigurationState::Active),
        configuration(2, ConfigurationState::Ready),
    ]);
    store.put_migration(Migration::start(ConfigurationId(1), ConfigurationId(2)));

    let runtime = InProcessRuntime::new()
        .with_host(ConfigurationId(1), "m1", host(&["first"], book, None))
        .with_host(ConfigurationId(2), "m1", host(&["first", "second"], book, failing));
    Harness::start(store, runtime)
}

#[tokio::test]
async fn idle_state_reports_the_active_configuration() {
    let book = ResourceBook::new().with("r1", "first");
    let store = MemoryStore::with_configurations([configuration(1, ConfigurationState::Active)]);
    let runtime = InProcessRuntime::new().with_host(
        ConfigurationId(1),
        "m1",
        host(&["first", "second"], &book, None),
    );
    let mut harness = Harness::start(store, runtime);

    let OrchestratorNotification::ConfigurationState(state) = harness.next_state().await else {
        panic!("expected configuration state");
    };
    assert_eq!(state.configuration_id, ConfigurationId(1));
    let unmigrated: Vec<_> = state
        .unmigrated_resources()
        .map(|(_, resource)| resource.code.clone())
        .collect();
    assert_eq!(unmigrated, ["r1"]);

    let reply = harness
        .handle
        .upgrade_resources(upgrade(Side::Source))
        .await
        .unwrap();
    assert_eq!(reply, UpgradeReply::Acknowledged);

    let logs = harness.next_logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].record_type, LogRecordType::Operation);
    assert_eq!(logs[0].destination_point.as_deref(), Some("second"));
    assert_eq!(book.point("r1").as_deref(), Some("second"));

    let OrchestratorNotification::ConfigurationState(state) = harness.next_state().await else {
        panic!("expected configuration state");
    };
    assert_eq!(state.unmigrated_resources().count(), 0);
}

#[tokio::test]
async fn unknown_resources_are_declined_in_idle_state() {
    let book = ResourceBook::new().with("r1", "first");
    let store = MemoryStore::with_configurations([configuration(1, ConfigurationState::Active)]);
    let runtime =
        InProcessRuntime::new().with_host(ConfigurationId(1), "m1", host(&["first"], &book, None));
    let mut harness = Harness::start(store, runtime);
    harness.next_state().await;

    let mut requests = upgrade(Side::Source);
    requests[0].resource_code = "missing".into();
    let reply = harness.handle.upgrade_resources(requests).await.unwrap();

    let UpgradeReply::Declined(errors) = reply else {
        panic!("expected a declined request");
    };
    assert_eq!(errors[0].message, "Resource was not found");
}

#[tokio::test]
async fn upgrade_moves_the_resource_with_destination_code() {
    let book = ResourceBook::new().with("r1", "first");
    let mut harness = migration_harness(&book, None);

    let OrchestratorNotification::MigrationState(state) = harness.next_state().await else {
        panic!("expected migration state");
    };
    assert_eq!(state.position, MigrationPosition::Source);
    let resource = &state.templates[0].migrators[0].resources[0];
    assert_eq!(resource.position, ResourcePosition::Source);
    assert_eq!(resource.migration_to_destination_executor, Some(Side::Destination));

    let reply = harness
        .handle
        .upgrade_resources(upgrade(Side::Destination))
        .await
        .unwrap();
    assert_eq!(reply, UpgradeReply::Acknowledged);

    let logs = harness.next_logs().await;
    assert_eq!(logs.len(), 1);
    let record = &logs[0];
    assert_eq!(record.record_type, LogRecordType::Operation);
    assert_eq!(record.source_point.as_deref(), Some("first"));
    assert_eq!(record.destination_point.as_deref(), Some("second"));
    assert_eq!(record.configuration_id, Some(ConfigurationId(2)));
    assert_eq!(record.migrator_template_code.as_deref(), Some("m1"));

    let OrchestratorNotification::MigrationState(state) = harness.next_state().await else {
        panic!("expected migration state");
    };
    assert_eq!(state.position, MigrationPosition::Destination);

    // Back to the source checkpoint through the destination code
    harness
        .handle
        .upgrade_resources(upgrade(Side::Source))
        .await
        .unwrap();
    let logs = harness.next_logs().await;
    assert_eq!(logs[0].destination_point.as_deref(), Some("first"));
    assert_eq!(book.point("r1").as_deref(), Some("first"));
}

#[tokio::test]
async fn failing_migrator_keeps_the_checkpoint() {
    let book = ResourceBook::new().with("r1", "first");
    let mut harness = migration_harness(&book, Some("disk full"));
    harness.next_state().await;

    harness
        .handle
        .upgrade_resources(upgrade(Side::Destination))
        .await
        .unwrap();

    let logs = harness.next_logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].record_type, LogRecordType::OperationError);
    assert_eq!(logs[0].message, "Exception while migrating resource: disk full");
    assert_eq!(book.point("r1").as_deref(), Some("first"));
}

#[tokio::test]
async fn missing_runtime_host_fails_initialization() {
    let book = ResourceBook::new().with("r1", "first");
    let store = MemoryStore::with_configurations([
        configuration(1, ConfigurationState::Active),
        configuration(2, ConfigurationState::Ready),
    ]);
    store.put_migration(Migration::start(ConfigurationId(1), ConfigurationId(2)));
    let runtime =
        InProcessRuntime::new().with_host(ConfigurationId(1), "m1", host(&["first"], &book, None));
    let mut harness = Harness::start(store, runtime);

    let OrchestratorNotification::InitializationFailed(errors) = harness.next_state().await else {
        panic!("expected an initialization failure");
    };
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .message
        .starts_with("Error while requesting migration state:"));
    assert_eq!(errors[0].configuration_id, Some(ConfigurationId(2)));
    assert!(errors[0].migration_id.is_some());

    // Recheck after the migration is gone lands in the idle state
    harness.store.clear_migrations();
    harness.handle.recheck_state().await.unwrap();
    assert!(matches!(
        harness.next_state().await,
        OrchestratorNotification::ConfigurationState(_)
    ));
}

#[tokio::test]
async fn unsupported_runtime_is_reported_per_template() {
    let mut active = configuration(1, ConfigurationState::Active);
    active.settings.migrator_templates[0].packages_to_install.clear();
    let mut harness = Harness::start(
        MemoryStore::with_configurations([active]),
        InProcessRuntime::new(),
    );

    let OrchestratorNotification::InitializationFailed(errors) = harness.next_state().await else {
        panic!("expected an initialization failure");
    };
    assert_eq!(errors[0].message, format!("Framework {NET_CORE} is not supported"));
}

#[tokio::test]
async fn shutdown_stops_the_orchestrator() {
    let store = MemoryStore::with_configurations([configuration(1, ConfigurationState::Active)]);
    let mut harness = Harness::start(store, InProcessRuntime::new());
    harness.next_state().await;

    harness.handle.shutdown().await.unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(5), harness.notifications.recv())
        .await
        .unwrap();
    assert!(closed.is_none());
}
