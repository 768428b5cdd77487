//! CCP Migration - resource migrations between configurations
//!
//! Provides:
//! - State collected from migrators and its merge across two configurations
//! - Migration planning: resource positions, directions and command batches
//! - The [`MigratorRuntime`] capability with in-process and child-process
//!   implementations, plus the executor-side [`MigratorHost`]
//! - Extraction of migrator templates into working directories
//! - The migration orchestrator: a pure state machine and its driver
//!
//! # Example
//!
//! ```rust,ignore
//! use ccp_migration::{MigrationOrchestrator, OrchestratorConfig, ProcessRuntime};
//!
//! let (notifications_tx, mut notifications) = tokio::sync::mpsc::channel(64);
//! let orchestrator = MigrationOrchestrator::new(
//!     OrchestratorConfig::default(),
//!     store,
//!     repository,
//!     Arc::new(ProcessRuntime::new("ccp-migrator-executor")),
//!     notifications_tx,
//! );
//! let (handle, _task) = orchestrator.spawn();
//! handle.recheck_state().await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod extraction;
pub mod fsm;
pub mod host;
pub mod messages;
pub mod orchestrator;
pub mod planner;
pub mod process;
pub mod protocol;
pub mod runtime;
pub mod state;

pub use config::OrchestratorConfig;
pub use error::{ExtractionError, OrchestratorError, RuntimeError};
pub use extraction::{template_dir, ExtractedTemplate, MigratorExtractor};
pub use host::{Migrator, MigratorHost, ResourceId};
pub use messages::{OrchestratorCommand, OrchestratorNotification, UpgradeReply};
pub use orchestrator::{MigrationOrchestrator, OrchestratorHandle};
pub use planner::{
    compute_migration_state, migration_direction, plan_configuration, plan_migration,
    ExecutionPlan, MigratorCommand, ResourceUpgrade, TemplateBatch,
};
pub use process::ProcessRuntime;
pub use runtime::{CollectedState, ExecutionReport, InProcessRuntime, MigratorRuntime};
pub use state::{
    ConfigurationResourceState, DependencyType, MergePosition, MigrationPosition,
    MigrationResourceState, MigratorConfigurationState, MigratorMigrationState,
    MigratorTemplateConfigurationState, MigratorTemplateMigrationState,
    ResourceConfigurationState, ResourceMigrationState, ResourcePosition, Side,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
