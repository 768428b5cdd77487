//! Backward compatibility of node templates between configurations
//!
//! A node template is compatible with an earlier configuration when that
//! configuration has a template with the same code, the same configuration
//! text and the same resolved package closure for every runtime. Nodes
//! started from a compatible template need no restart when the cluster
//! switches configuration.
//!
//! Compatibility never skips a generation: scanning stops at the first
//! earlier configuration that does not match.

use ccp_model::{CompatibleTemplate, Configuration, ConfigurationState, NodeTemplate};

/// Compatible (template, earlier configuration) pairs of `configuration`
///
/// `history` may hold any configurations. Only configurations older than
/// `configuration` that were ever deployed take part, newest first.
#[must_use]
pub fn compatible_templates(
    configuration: &Configuration,
    history: &[Configuration],
) -> Vec<CompatibleTemplate> {
    let mut deployed: Vec<&Configuration> = history
        .iter()
        .filter(|c| c.id < configuration.id)
        .filter(|c| {
            !matches!(
                c.state,
                ConfigurationState::Draft | ConfigurationState::Ready
            )
        })
        .collect();
    deployed.sort_by(|a, b| b.id.cmp(&a.id));

    let mut compatible = Vec::new();
    for template in &configuration.settings.node_templates {
        for earlier in &deployed {
            match earlier.node_template(&template.code) {
                Some(previous) if same_template(template, previous) => {
                    compatible.push(CompatibleTemplate {
                        template_code: template.code.clone(),
                        compatible_configuration_id: earlier.id,
                    });
                }
                _ => break,
            }
        }
    }

    tracing::debug!(
        configuration = %configuration.id,
        compatible = compatible.len(),
        "compatible templates computed"
    );
    compatible
}

fn same_template(current: &NodeTemplate, previous: &NodeTemplate) -> bool {
    current.configuration == previous.configuration
        && current.packages_to_install == previous.packages_to_install
}
