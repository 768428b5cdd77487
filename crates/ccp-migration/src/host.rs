//! Executor side of migrations
//!
//! A [`MigratorHost`] owns the user migrators of one migrator template. It
//! answers the two runtime calls: report the state of every resource, and
//! move resources to requested checkpoints. Migrator failures never escape
//! the host; each becomes a log record.

use crate::planner::MigratorCommand;
use crate::runtime::{CollectedState, ExecutionReport};
use crate::state::{DependencyType, MigratorConfigurationState, ResourceConfigurationState};
use async_trait::async_trait;
use ccp_model::MigrationLogRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Resource managed by a migrator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub code: String,
    pub name: String,
}

impl ResourceId {
    #[inline]
    #[must_use]
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

/// User code that migrates one kind of external resource
///
/// Checkpoints are ordered; the last one is the checkpoint this code
/// expects resources to be at.
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Stable identity used to match migrators across configurations
    fn type_name(&self) -> &str;

    fn name(&self) -> &str;

    fn priority(&self) -> f64 {
        1.0
    }

    fn dependency_type(&self) -> DependencyType {
        DependencyType::default()
    }

    /// Every checkpoint this code knows, oldest first
    async fn migration_points(&self) -> anyhow::Result<Vec<String>>;

    async fn migratable_resources(&self) -> anyhow::Result<Vec<ResourceId>>;

    /// Current checkpoint, `None` when the resource does not exist
    async fn current_point(&self, resource: &ResourceId) -> anyhow::Result<Option<String>>;

    async fn migrate(&self, resource: &ResourceId, point: &str) -> anyhow::Result<()>;
}

/// Serves runtime calls for the migrators of one template
#[derive(Clone)]
pub struct MigratorHost {
    migrators: Vec<Arc<dyn Migrator>>,
}

impl MigratorHost {
    #[must_use]
    pub fn new(migrators: Vec<Arc<dyn Migrator>>) -> Self {
        Self { migrators }
    }

    fn migrator(&self, type_name: &str) -> Option<&Arc<dyn Migrator>> {
        self.migrators.iter().find(|m| m.type_name() == type_name)
    }

    /// Checkpoints and resource positions of every migrator
    pub async fn collect_state(&self) -> CollectedState {
        let mut state = CollectedState::default();

        for migrator in &self.migrators {
            let error = |message: String| {
                MigrationLogRecord::error(message).with_migrator(migrator.type_name(), migrator.name())
            };

            let resources = match migrator.migratable_resources().await {
                Ok(resources) => resources,
                Err(e) => {
                    state.errors.push(error(format!(
                        "Error on requesting migratable resources: {e}"
                    )));
                    continue;
                }
            };
            let points = match migrator.migration_points().await {
                Ok(points) => points,
                Err(e) => {
                    state.errors.push(error(format!(
                        "Error on requesting available migration points: {e}"
                    )));
                    continue;
                }
            };

            let mut resource_states = Vec::with_capacity(resources.len());
            for resource in resources {
                match migrator.current_point(&resource).await {
                    Ok(current_point) => resource_states.push(ResourceConfigurationState {
                        code: resource.code,
                        name: resource.name,
                        current_point,
                    }),
                    Err(e) => state.errors.push(
                        error(format!("Error on requesting resource current point: {e}"))
                            .with_resource(resource.code, resource.name),
                    ),
                }
            }

            state.migrators.push(MigratorConfigurationState {
                type_name: migrator.type_name().to_string(),
                name: migrator.name().to_string(),
                last_defined_point: points.last().cloned(),
                migration_points: points,
                resources: resource_states,
                priority: migrator.priority(),
                dependency_type: migrator.dependency_type(),
            });
        }

        state
    }

    /// Apply commands resource by resource
    ///
    /// A failing resource never stops the remaining ones.
    pub async fn execute(&self, commands: &[MigratorCommand]) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for command in commands {
            let Some(migrator) = self.migrator(&command.type_name) else {
                report.errors.push(
                    MigrationLogRecord::error("Migrator is not defined")
                        .with_migrator(command.type_name.clone(), String::new()),
                );
                continue;
            };
            self.execute_command(migrator.as_ref(), command, &mut report)
                .await;
        }

        report
    }

    async fn execute_command(
        &self,
        migrator: &dyn Migrator,
        command: &MigratorCommand,
        report: &mut ExecutionReport,
    ) {
        let migrator_error =
            |message: String| MigrationLogRecord::error(message).with_migrator(migrator.type_name(), migrator.name());

        let resources = match migrator.migratable_resources().await {
            Ok(resources) => resources,
            Err(e) => {
                report.errors.push(migrator_error(format!(
                    "Error on requesting migratable resources: {e}"
                )));
                return;
            }
        };
        let points = match migrator.migration_points().await {
            Ok(points) => points,
            Err(e) => {
                report.errors.push(migrator_error(format!(
                    "Error on requesting available migration points: {e}"
                )));
                return;
            }
        };

        for (code, point) in &command.resources {
            let operation_error = |message: String| {
                MigrationLogRecord::operation_error(message)
                    .with_migrator(migrator.type_name(), migrator.name())
            };

            let Some(resource) = resources.iter().find(|r| &r.code == code) else {
                report.operations.push(
                    operation_error("Resource is not defined in the migrator".into())
                        .with_resource(code.clone(), String::new())
                        .finish(),
                );
                continue;
            };
            let record = |message: String| {
                operation_error(message).with_resource(resource.code.clone(), resource.name.clone())
            };

            let current = match migrator.current_point(resource).await {
                Ok(current) => current,
                Err(e) => {
                    report.operations.push(
                        record(format!(
                            "Exception while checking resource current point: {e}"
                        ))
                        .with_error_detail(format!("{e:#}"))
                        .finish(),
                    );
                    continue;
                }
            };
            if !points.contains(point) {
                report.operations.push(
                    record("Resource cannot migrate to point".into())
                        .with_points(current, Some(point.clone()))
                        .finish(),
                );
                continue;
            }
            if current.as_deref() == Some(point.as_str()) {
                tracing::debug!(resource = %code, point = %point, "resource already at checkpoint");
                report.operations.push(
                    MigrationLogRecord::operation("Resource is already at point")
                        .with_migrator(migrator.type_name(), migrator.name())
                        .with_resource(resource.code.clone(), resource.name.clone())
                        .with_points(current, Some(point.clone()))
                        .finish(),
                );
                continue;
            }

            match migrator.migrate(resource, point).await {
                Ok(()) => report.operations.push(
                    MigrationLogRecord::operation("Migrated")
                        .with_migrator(migrator.type_name(), migrator.name())
                        .with_resource(resource.code.clone(), resource.name.clone())
                        .with_points(current, Some(point.clone()))
                        .finish(),
                ),
                Err(e) => report.operations.push(
                    record(format!("Exception while migrating resource: {e}"))
                        .with_points(current, Some(point.clone()))
                        .with_error_detail(format!("{e:#}"))
                        .finish(),
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccp_model::LogRecordType;
    use std::collections::BTreeMap;
    use tokio::sync::Mutex;

    struct Counter {
        points: Vec<String>,
        current: Mutex<Option<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Migrator for Counter {
        fn type_name(&self) -> &str {
            "Counter"
        }

        fn name(&self) -> &str {
            "Counter migrator"
        }

        async fn migration_points(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.points.clone())
        }

        async fn migratable_resources(&self) -> anyhow::Result<Vec<ResourceId>> {
            Ok(vec![ResourceId::new("main", "Main")])
        }

        async fn current_point(&self, _resource: &ResourceId) -> anyhow::Result<Option<String>> {
            Ok(self.current.lock().await.clone())
        }

        async fn migrate(&self, _resource: &ResourceId, point: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            *self.current.lock().await = Some(point.to_string());
            Ok(())
        }
    }

    fn host(fail: bool) -> (MigratorHost, Arc<Counter>) {
        let counter = Arc::new(Counter {
            points: vec!["first".into(), "second".into()],
            current: Mutex::new(Some("first".into())),
            fail,
        });
        (MigratorHost::new(vec![counter.clone()]), counter)
    }

    fn command(resource: &str, point: &str) -> MigratorCommand {
        MigratorCommand {
            type_name: "Counter".into(),
            resources: BTreeMap::from([(resource.to_string(), point.to_string())]),
        }
    }

    #[tokio::test]
    async fn collects_points_and_resources() {
        let (host, _) = host(false);
        let state = host.collect_state().await;

        assert!(state.errors.is_empty());
        let migrator = &state.migrators[0];
        assert_eq!(migrator.last_defined_point.as_deref(), Some("second"));
        assert_eq!(migrator.resources[0].current_point.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn successful_migration_records_both_points() {
        let (host, counter) = host(false);
        let report = host.execute(&[command("main", "second")]).await;

        assert!(report.errors.is_empty());
        let record = &report.operations[0];
        assert_eq!(record.record_type, LogRecordType::Operation);
        assert_eq!(record.source_point.as_deref(), Some("first"));
        assert_eq!(record.destination_point.as_deref(), Some("second"));
        assert_eq!(counter.current.lock().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn resource_at_target_is_still_recorded() {
        let (host, counter) = host(true);
        let report = host.execute(&[command("main", "first")]).await;

        assert!(report.errors.is_empty());
        assert_eq!(report.operations.len(), 1);
        let record = &report.operations[0];
        assert_eq!(record.record_type, LogRecordType::Operation);
        assert_eq!(record.resource_code.as_deref(), Some("main"));
        assert_eq!(record.source_point.as_deref(), Some("first"));
        assert_eq!(record.destination_point.as_deref(), Some("first"));
        // a failing migrator proves migrate was never called
        assert_eq!(counter.current.lock().await.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn failing_migration_keeps_checkpoint() {
        let (host, counter) = host(true);
        let report = host.execute(&[command("main", "second")]).await;

        let record = &report.operations[0];
        assert_eq!(record.record_type, LogRecordType::OperationError);
        assert_eq!(record.message, "Exception while migrating resource: disk full");
        assert_eq!(counter.current.lock().await.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn unknown_targets_are_reported() {
        let (host, _) = host(false);
        let mut unknown_type = command("main", "second");
        unknown_type.type_name = "Queue".into();

        let report = host
            .execute(&[
                unknown_type,
                command("other", "second"),
                command("main", "third"),
            ])
            .await;

        assert_eq!(report.errors[0].message, "Migrator is not defined");
        let messages: Vec<_> = report.operations.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(
            messages,
            [
                "Resource is not defined in the migrator",
                "Resource cannot migrate to point"
            ]
        );
    }
}
