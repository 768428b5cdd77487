//! Live cluster node descriptions

use crate::configuration::ConfigurationId;
use crate::package::PackageDescription;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Node instance identifier, fresh for every node start
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cluster member address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddress(pub String);

impl NodeAddress {
    #[inline]
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Self-reported description of a cluster node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeDescription {
    pub node_id: Option<NodeId>,
    pub node_address: Option<NodeAddress>,
    /// Empty for nodes not started from a template (e.g. the manager itself)
    #[serde(default)]
    pub node_template: String,
    pub configuration_id: ConfigurationId,
    #[serde(default)]
    pub container_type: String,
    #[serde(default)]
    pub modules: Vec<PackageDescription>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Start time, unix milliseconds
    #[serde(default)]
    pub start_timestamp: i64,
    #[serde(default)]
    pub is_initialized: bool,
    #[serde(default)]
    pub is_obsolete: bool,
    #[serde(default)]
    pub is_cluster_leader: bool,
    #[serde(default)]
    pub leader_in_roles: Vec<String>,
}

impl NodeDescription {
    /// Placeholder for a member that joined but has not described itself
    #[must_use]
    pub fn placeholder(address: NodeAddress) -> Self {
        Self {
            node_address: Some(address),
            ..Self::default()
        }
    }
}
