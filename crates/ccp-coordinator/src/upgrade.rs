//! Rolling upgrade selection
//!
//! Obsolete nodes of a template are restarted a share at a time, oldest
//! first, and never while the template sits at its minimum instance count.

use ccp_model::NodeDescription;

/// Live nodes of one template as seen by the upgrade sweep
#[derive(Debug, Clone)]
pub struct UpgradeGroup<'a> {
    pub nodes: Vec<&'a NodeDescription>,
    /// `None` when the template is gone from the active configuration
    pub minimum_required: Option<u32>,
    /// Nodes of the template already shut down and not yet replaced
    pub in_flight: usize,
}

impl UpgradeGroup<'_> {
    /// Whether any node of the group needs an upgrade
    #[must_use]
    pub fn needs_upgrade(&self) -> bool {
        self.minimum_required.is_none() || self.nodes.iter().any(|n| n.is_obsolete)
    }
}

/// Nodes to shut down now
///
/// Removed templates count every node as obsolete with no minimum.
/// `is_upgrading` filters nodes already shut down.
#[must_use]
pub fn select_for_upgrade<'a>(
    group: &UpgradeGroup<'a>,
    upgradable_part_percent: u32,
    is_upgrading: impl Fn(&NodeDescription) -> bool,
) -> Vec<&'a NodeDescription> {
    if !group.needs_upgrade() {
        return Vec::new();
    }

    let live = group.nodes.len();
    let minimum = group.minimum_required.unwrap_or(0) as usize;
    if live <= minimum {
        return Vec::new();
    }

    let allowed = (live * upgradable_part_percent as usize).div_ceil(100);
    let count = allowed.saturating_sub(group.in_flight);
    if count == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<&NodeDescription> = group
        .nodes
        .iter()
        .copied()
        .filter(|n| n.node_id.is_some())
        .filter(|n| group.minimum_required.is_none() || n.is_obsolete)
        .filter(|n| !is_upgrading(n))
        .collect();
    candidates.sort_by_key(|n| n.start_timestamp);
    candidates.truncate(count);
    candidates
}
