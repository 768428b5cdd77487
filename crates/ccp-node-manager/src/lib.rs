//! CCP Node Manager - one running control plane node
//!
//! Provides:
//! - [`NodeManagerConfig`]: TOML settings for both actors
//! - [`NodeManager`]: the orchestrator and coordinator wired together
//! - [`commands`]: offline configuration checks used by the `ccp` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use ccp_node_manager::{Collaborators, NodeManager, NodeManagerConfig};
//!
//! let config = NodeManagerConfig::from_path("ccp.toml")?;
//! let manager = NodeManager::start(config, collaborators);
//! manager.coordinator().member_up(address, roles).await?;
//! manager.shutdown().await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod commands;
pub mod config;
pub mod manager;

pub use config::{ConfigError, NodeManagerConfig};
pub use manager::{Collaborators, NodeManager, NodeManagerError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
