//! Node template selection for new nodes
//!
//! Templates are first chosen among those below their minimum instance
//! count; once every minimum is met, among those below their maximum (or
//! uncapped). A weighted draw over `priority` picks the final template.

use ccp_model::{Configuration, NodeTemplate};

/// Templates a new node of `container_type` on `runtime` may start with
///
/// `count` returns live plus starting nodes of a template.
#[must_use]
pub fn possible_templates<'a>(
    configuration: &'a Configuration,
    container_type: &str,
    runtime: &str,
    count: impl Fn(&str) -> usize,
) -> Vec<&'a NodeTemplate> {
    let available: Vec<(&NodeTemplate, usize)> = configuration
        .settings
        .node_templates
        .iter()
        .filter(|t| t.container_types.iter().any(|c| c == container_type))
        .filter(|t| t.packages_to_install.contains_key(runtime))
        .map(|t| (t, count(&t.code)))
        .collect();

    if available.is_empty() {
        tracing::info!(container_type, runtime, "no template available for container");
        return Vec::new();
    }

    let below_minimum: Vec<&NodeTemplate> = available
        .iter()
        .filter(|(t, nodes)| {
            t.minimum_required_instances > 0 && *nodes < t.minimum_required_instances as usize
        })
        .map(|(t, _)| *t)
        .collect();
    if !below_minimum.is_empty() {
        return below_minimum;
    }

    let below_maximum: Vec<&NodeTemplate> = available
        .iter()
        .filter(|(t, nodes)| match t.maximum_needed_instances {
            None => true,
            Some(maximum) => maximum > 0 && *nodes < maximum as usize,
        })
        .map(|(t, _)| *t)
        .collect();
    if below_maximum.is_empty() {
        tracing::info!(container_type, runtime, "cluster is full");
    }
    below_maximum
}

/// Pick a template with probability proportional to its priority
///
/// `dice` is a uniform value in `[0, 1)`. Returns `None` only for an empty
/// candidate list.
#[must_use]
pub fn weighted_pick<'a>(templates: &[&'a NodeTemplate], dice: f64) -> Option<&'a NodeTemplate> {
    let total: f64 = templates.iter().map(|t| t.priority).sum();
    let mut threshold = 0.0;
    for template in templates {
        threshold += template.priority / total;
        if dice <= threshold {
            return Some(template);
        }
    }
    templates.last().copied()
}
