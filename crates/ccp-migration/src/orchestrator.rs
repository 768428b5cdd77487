//! Migration orchestrator driver
//!
//! Owns the state machine and performs its effects: extraction and state
//! collection through the [`MigratorRuntime`], execution of command
//! batches, replies and notifications to the supervising coordinator. One
//! event is processed at a time; effect results are handled before the next
//! mailbox message.

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::extraction::{template_dir, ExtractedTemplate, MigratorExtractor};
use crate::fsm::{self, Effect, Event, ExecutionMode, LoadOutcome, State};
use crate::messages::{OrchestratorCommand, OrchestratorNotification, UpgradeReply};
use crate::planner::{ExecutionPlan, ResourceUpgrade};
use crate::runtime::MigratorRuntime;
use crate::state::{ConfigurationResourceState, MigratorTemplateConfigurationState, Side};
use ccp_model::{
    Configuration, ConfigurationId, ConfigurationStore, MigrationId, MigrationLogRecord,
    PackageRepository,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Cloneable handle to a running orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    sender: mpsc::Sender<OrchestratorCommand>,
}

impl OrchestratorHandle {
    #[must_use]
    pub fn new(sender: mpsc::Sender<OrchestratorCommand>) -> Self {
        Self { sender }
    }

    async fn send(&self, command: OrchestratorCommand) -> Result<(), OrchestratorError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| OrchestratorError::MailboxClosed)
    }

    /// Re-derive state from persistence
    ///
    /// # Errors
    /// - `OrchestratorError::MailboxClosed` if the orchestrator stopped
    pub async fn recheck_state(&self) -> Result<(), OrchestratorError> {
        self.send(OrchestratorCommand::RecheckState).await
    }

    /// Submit resource upgrades and wait for the acknowledgment
    ///
    /// # Errors
    /// - `OrchestratorError::MailboxClosed` if the orchestrator stopped
    /// - `OrchestratorError::NoReply` if the request was dropped unanswered
    pub async fn upgrade_resources(
        &self,
        requests: Vec<ResourceUpgrade>,
    ) -> Result<UpgradeReply, OrchestratorError> {
        let (reply, response) = oneshot::channel();
        self.send(OrchestratorCommand::UpgradeResources {
            requests,
            reply: Some(reply),
        })
        .await?;
        response.await.map_err(|_| OrchestratorError::NoReply)
    }

    /// Submit resource upgrades without waiting; results arrive as notifications
    ///
    /// # Errors
    /// - `OrchestratorError::MailboxClosed` if the orchestrator stopped
    pub async fn submit_resources(
        &self,
        requests: Vec<ResourceUpgrade>,
    ) -> Result<(), OrchestratorError> {
        self.send(OrchestratorCommand::UpgradeResources {
            requests,
            reply: None,
        })
        .await
    }

    /// # Errors
    /// - `OrchestratorError::MailboxClosed` if the orchestrator already stopped
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        self.send(OrchestratorCommand::Shutdown).await
    }
}

/// Single-threaded migration orchestrator
pub struct MigrationOrchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn ConfigurationStore>,
    extractor: MigratorExtractor,
    runtime: Arc<dyn MigratorRuntime>,
    notifications: mpsc::Sender<OrchestratorNotification>,
}

impl MigrationOrchestrator {
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn ConfigurationStore>,
        repository: Arc<dyn PackageRepository>,
        runtime: Arc<dyn MigratorRuntime>,
        notifications: mpsc::Sender<OrchestratorNotification>,
    ) -> Self {
        let extractor = MigratorExtractor::new(
            repository,
            config.current_runtime.clone(),
            config.executor_entry.clone(),
        );
        Self {
            config,
            store,
            extractor,
            runtime,
            notifications,
        }
    }

    /// Start the orchestrator on the current runtime
    #[must_use]
    pub fn spawn(self) -> (OrchestratorHandle, JoinHandle<Result<(), OrchestratorError>>) {
        let (sender, mailbox) = mpsc::channel(self.config.mailbox_capacity.max(1));
        let task = tokio::spawn(self.run(mailbox));
        (OrchestratorHandle::new(sender), task)
    }

    /// Process the mailbox until shutdown
    ///
    /// # Errors
    /// - `OrchestratorError::DatabaseDesync` if the active migration changed underneath
    pub async fn run(
        self,
        mut mailbox: mpsc::Receiver<OrchestratorCommand>,
    ) -> Result<(), OrchestratorError> {
        let (mut state, mut data, effects) = fsm::start();
        let mut pending = VecDeque::new();
        self.apply(effects, &mut pending).await?;

        loop {
            let event = match pending.pop_front() {
                Some(event) => event,
                None => match mailbox.recv().await {
                    Some(command) => Event::Command(command),
                    None => break,
                },
            };

            let (next, next_data, effects) = fsm::transition(state, data, event);
            if next != state {
                tracing::debug!(from = ?state, to = ?next, "orchestrator state changed");
            }
            state = next;
            data = next_data;

            if let Err(e) = self.apply(effects, &mut pending).await {
                tracing::error!(error = %e, "orchestrator stopped");
                return Err(e);
            }
            if state == State::Stopped {
                break;
            }
        }

        tracing::info!("orchestrator stopped");
        Ok(())
    }

    async fn apply(
        &self,
        effects: Vec<Effect>,
        pending: &mut VecDeque<Event>,
    ) -> Result<(), OrchestratorError> {
        for effect in effects {
            match effect {
                Effect::Notify(notification) => {
                    if self.notifications.send(notification).await.is_err() {
                        tracing::debug!("orchestrator supervisor is gone");
                    }
                }
                Effect::Reply { to, reply } => {
                    let _ = to.send(reply);
                }
                Effect::LoadState { force_extract } => {
                    pending.push_back(Event::Loaded(self.load_state(force_extract).await));
                }
                Effect::Execute { plan, mode } => {
                    pending.push_back(Event::Executed(self.execute(&plan, mode).await?));
                }
                Effect::Unhandled { state, event } => {
                    tracing::warn!(?state, event, "unhandled orchestrator event");
                }
            }
        }
        Ok(())
    }

    async fn load_state(&self, force_extract: bool) -> LoadOutcome {
        let failed = |message: String| LoadOutcome::Failed(vec![MigrationLogRecord::error(message)]);

        let migration = match self.store.active_migration().await {
            Ok(migration) => migration,
            Err(e) => return failed(format!("Error while reading active migration: {e}")),
        };

        let Some(migration) = migration else {
            let configuration = match self.store.active_configuration().await {
                Ok(Some(configuration)) => configuration,
                Ok(None) => return failed("There is no active configuration".into()),
                Err(e) => return failed(format!("Error while reading active configuration: {e}")),
            };
            let (templates, errors) = self
                .prepare(&configuration, force_extract, None)
                .await;
            if !errors.is_empty() {
                return LoadOutcome::Failed(errors);
            }
            return LoadOutcome::Configuration(ConfigurationResourceState {
                configuration_id: configuration.id,
                templates,
            });
        };

        let (source, destination) = match (
            self.configuration(migration.from_configuration_id).await,
            self.configuration(migration.to_configuration_id).await,
        ) {
            (Ok(source), Ok(destination)) => (source, destination),
            (Err(message), _) | (_, Err(message)) => return failed(message),
        };

        let (source_state, mut errors) = self
            .prepare(&source, force_extract, Some(migration.id))
            .await;
        let (destination_state, destination_errors) = self
            .prepare(&destination, force_extract, Some(migration.id))
            .await;
        errors.extend(destination_errors);
        if !errors.is_empty() {
            return LoadOutcome::Failed(errors);
        }

        LoadOutcome::Migration {
            migration,
            source: source_state,
            destination: destination_state,
        }
    }

    async fn configuration(&self, id: ConfigurationId) -> Result<Configuration, String> {
        match self.store.configuration(id).await {
            Ok(Some(configuration)) => Ok(configuration),
            Ok(None) => Err(format!("Configuration {id} not found")),
            Err(e) => Err(format!("Error while reading configuration {id}: {e}")),
        }
    }

    /// Extract and collect every migrator template of a configuration
    async fn prepare(
        &self,
        configuration: &Configuration,
        force_extract: bool,
        migration_id: Option<MigrationId>,
    ) -> (Vec<MigratorTemplateConfigurationState>, Vec<MigrationLogRecord>) {
        let (mut extracted, mut errors) = self
            .extractor
            .extract(
                configuration,
                &self.config.working_directory,
                force_extract,
                migration_id,
            )
            .await;
        extracted.sort_by(|a, b| b.priority.total_cmp(&a.priority));

        let mut templates = Vec::with_capacity(extracted.len());
        for template in extracted {
            match self.collect(configuration.id, migration_id, &template).await {
                Ok(state) => templates.push(state),
                Err(template_errors) => errors.extend(template_errors),
            }
        }
        (templates, errors)
    }

    async fn collect(
        &self,
        configuration_id: ConfigurationId,
        migration_id: Option<MigrationId>,
        template: &ExtractedTemplate,
    ) -> Result<MigratorTemplateConfigurationState, Vec<MigrationLogRecord>> {
        let enrich = |record: MigrationLogRecord| {
            let mut record = record
                .with_configuration(configuration_id)
                .with_migration(migration_id);
            record.migrator_template_code = Some(template.code.clone());
            record.migrator_template_name = Some(template.name.clone());
            record
        };

        match self.runtime.collect_state(&template.dir).await {
            Ok(state) if state.errors.is_empty() => Ok(MigratorTemplateConfigurationState {
                code: template.code.clone(),
                name: template.name.clone(),
                priority: template.priority,
                migrators: state.migrators,
            }),
            Ok(state) => Err(state.errors.into_iter().map(&enrich).collect()),
            Err(e) => {
                tracing::error!(template = %template.code, error = %e, "migration state request failed");
                Err(vec![enrich(MigrationLogRecord::error(format!(
                    "Error while requesting migration state: {e}"
                )))])
            }
        }
    }

    async fn execute(
        &self,
        plan: &ExecutionPlan,
        mode: ExecutionMode,
    ) -> Result<Vec<MigrationLogRecord>, OrchestratorError> {
        let mut records = Vec::new();

        match mode {
            ExecutionMode::Configuration(configuration_id) => {
                for batch in plan.batches(Side::Source) {
                    records.extend(self.execute_batch(configuration_id, None, batch).await);
                }
            }
            ExecutionMode::Migration {
                migration_id,
                from,
                to,
            } => {
                self.verify_migration(migration_id).await?;
                for batch in plan.batches(Side::Source) {
                    records.extend(self.execute_batch(from, Some(migration_id), batch).await);
                }
                for batch in plan.batches(Side::Destination) {
                    records.extend(self.execute_batch(to, Some(migration_id), batch).await);
                }
            }
        }

        Ok(records)
    }

    async fn verify_migration(&self, migration_id: MigrationId) -> Result<(), OrchestratorError> {
        let active = self.store.active_migration().await?;
        if active.map(|m| m.id) != Some(migration_id) {
            tracing::error!(migration_id = %migration_id, "active migration changed in the database");
            return Err(OrchestratorError::DatabaseDesync);
        }
        Ok(())
    }

    async fn execute_batch(
        &self,
        configuration_id: ConfigurationId,
        migration_id: Option<MigrationId>,
        batch: &crate::planner::TemplateBatch,
    ) -> Vec<MigrationLogRecord> {
        let dir = template_dir(
            &self.config.working_directory,
            configuration_id,
            &batch.template_code,
        );
        let enrich = |record: MigrationLogRecord| {
            let mut record = record
                .with_configuration(configuration_id)
                .with_migration(migration_id);
            record.migrator_template_code = Some(batch.template_code.clone());
            record.migrator_template_name = Some(batch.template_name.clone());
            record
        };
        let commands: Vec<_> = batch.commands.values().cloned().collect();

        let records: Vec<MigrationLogRecord> = match self.runtime.execute(&dir, &commands).await {
            Ok(report) => report
                .operations
                .into_iter()
                .map(&enrich)
                .chain(report.errors.into_iter().map(|mut record| {
                    record.message = format!("Error while executing migration: {}", record.message);
                    enrich(record)
                }))
                .collect(),
            Err(e) => vec![enrich(MigrationLogRecord::error(e.to_string()).finish())],
        };

        for record in &records {
            log_record(record);
        }
        records
    }
}

fn log_record(record: &MigrationLogRecord) {
    let template = record.migrator_template_code.as_deref().unwrap_or_default();
    let resource = record.resource_code.as_deref().unwrap_or_default();
    if record.is_error() {
        tracing::error!(
            template,
            resource,
            error = record.error.as_deref().unwrap_or_default(),
            "{}",
            record.message
        );
    } else {
        tracing::info!(
            template,
            resource,
            "migrated from {} to {}",
            record.source_point.as_deref().unwrap_or("-"),
            record.destination_point.as_deref().unwrap_or("-")
        );
    }
}
