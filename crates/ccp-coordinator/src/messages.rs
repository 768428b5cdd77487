//! Replies and reports produced by the coordinator

use ccp_model::{ConfigurationId, PackageDescription};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Everything a new node needs to start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStartUpConfiguration {
    pub node_template: String,
    pub configuration_id: ConfigurationId,
    /// Template configuration text
    pub configuration: String,
    /// Seed addresses, shuffled per request
    pub seeds: Vec<String>,
    /// Packages to install for the requested runtime
    pub packages: Vec<PackageDescription>,
    /// Feed the packages are installed from
    pub package_source: String,
}

/// Answer to a new node asking for its template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NewNodeTemplateReply {
    /// No template has room; ask again after the delay
    Wait(Duration),
    StartUp(NodeStartUpConfiguration),
}

/// Node counts of one template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateStatistics {
    pub code: String,
    pub minimum_required: u32,
    pub maximum_needed: Option<u32>,
    /// Live nodes
    pub active: usize,
    /// Live nodes running an incompatible configuration
    pub obsolete: usize,
    /// Nodes shut down for upgrade and not yet replaced
    pub upgrading: usize,
    /// Nodes that received the template and have not joined yet
    pub starting: usize,
}
