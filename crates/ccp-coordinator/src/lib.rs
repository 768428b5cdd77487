//! CCP Coordinator - cluster membership and migration gating
//!
//! Provides:
//! - Node identification handshakes and the live node indices
//! - Template selection for new nodes by container type and runtime
//! - Rolling upgrades of obsolete nodes under a minimum-instance floor
//! - The operator-facing resource state with its migration gates
//! - Operator actions: create, cancel and finish migrations, switch nodes,
//!   migrate resources
//!
//! # Example
//!
//! ```rust,ignore
//! use ccp_coordinator::{ClusterCoordinator, CoordinatorConfig, StdRandom};
//!
//! let coordinator = ClusterCoordinator::new(
//!     CoordinatorConfig::default(),
//!     store,
//!     orchestrator,
//!     messenger,
//!     Box::new(StdRandom::new()),
//! );
//! let (handle, _task) = coordinator.spawn();
//! handle.member_up(address, vec!["worker".into()]).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod messages;
pub mod resource_state;
pub mod seams;
pub mod selection;
pub mod upgrade;

pub use config::CoordinatorConfig;
pub use coordinator::{ClusterCoordinator, CoordinatorHandle};
pub use error::{CoordinatorError, UpdateClusterError};
pub use messages::{NewNodeTemplateReply, NodeStartUpConfiguration, TemplateStatistics};
pub use resource_state::{migration_steps, overall_direction, MigrationStep, ResourceState};
pub use seams::{NodeMessenger, RandomSource, StdRandom};
pub use selection::{possible_templates, weighted_pick};
pub use upgrade::{select_for_upgrade, UpgradeGroup};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
