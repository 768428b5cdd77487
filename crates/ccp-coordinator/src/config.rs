//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts and limits of the cluster coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Wait suggested to a new node when the cluster is full
    pub full_cluster_wait_timeout_secs: u64,
    /// Time a new node has to join after receiving its template
    pub new_node_join_timeout_secs: u64,
    /// Interval between description requests to a joining node
    pub new_node_request_description_notification_timeout_secs: u64,
    /// Description requests sent before giving up
    pub new_node_request_description_notification_max_requests: u32,
    /// Share of a template's nodes restarted at once, in percent
    pub upgradable_part_percent: u32,
    pub supported_runtimes: Vec<String>,
    /// Runtime this node manager runs migrators on
    pub current_runtime: String,
    pub mailbox_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            full_cluster_wait_timeout_secs: 60,
            new_node_join_timeout_secs: 30,
            new_node_request_description_notification_timeout_secs: 10,
            new_node_request_description_notification_max_requests: 10,
            upgradable_part_percent: 10,
            supported_runtimes: vec![
                ".NETFramework,Version=v4.6".to_string(),
                ".NETCoreApp,Version=v1.1".to_string(),
            ],
            current_runtime: ".NETCoreApp,Version=v1.1".to_string(),
            mailbox_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    #[inline]
    #[must_use]
    pub fn full_cluster_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.full_cluster_wait_timeout_secs)
    }

    #[inline]
    #[must_use]
    pub fn new_node_join_timeout(&self) -> Duration {
        Duration::from_secs(self.new_node_join_timeout_secs)
    }

    #[inline]
    #[must_use]
    pub fn request_description_timeout(&self) -> Duration {
        Duration::from_secs(self.new_node_request_description_notification_timeout_secs)
    }

    /// Time after which an upgrading node that never rejoined is forgotten
    #[inline]
    #[must_use]
    pub fn upgrade_timeout(&self) -> Duration {
        self.new_node_join_timeout() + self.request_description_timeout()
    }

    #[must_use]
    pub fn with_upgradable_part(mut self, percent: u32) -> Self {
        self.upgradable_part_percent = percent;
        self
    }

    #[must_use]
    pub fn with_request_description(mut self, timeout_secs: u64, max_requests: u32) -> Self {
        self.new_node_request_description_notification_timeout_secs = timeout_secs;
        self.new_node_request_description_notification_max_requests = max_requests;
        self
    }

    #[must_use]
    pub fn with_new_node_join_timeout(mut self, timeout_secs: u64) -> Self {
        self.new_node_join_timeout_secs = timeout_secs;
        self
    }

    #[must_use]
    pub fn with_current_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.current_runtime = runtime.into();
        self
    }
}
