//! Configurations (releases) and their templates
//!
//! A configuration bundles:
//! - Package pins shared by all templates
//! - Node templates (cluster roles)
//! - Migrator templates (external resource migrators)
//! - Cluster bootstrap settings (seed addresses, package feed)

use crate::package::{PackageDescription, PackageRequirement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Configuration identifier
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ConfigurationId(pub i64);

impl fmt::Display for ConfigurationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigurationState {
    /// Authored, editable
    #[default]
    Draft,
    /// Checked and waiting for a migration
    Ready,
    /// Running in the cluster
    Active,
    /// Replaced by a newer configuration
    Obsolete,
    /// Rolled back from
    Faulted,
}

/// Backward compatibility entry
///
/// Nodes of `template_code` running `compatible_configuration_id` can be
/// treated as running the owning configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompatibleTemplate {
    pub template_code: String,
    pub compatible_configuration_id: ConfigurationId,
}

/// Which list a template lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Node,
    Migrator,
}

impl TemplateKind {
    /// Field path of the template collection, used in error descriptions
    #[inline]
    #[must_use]
    pub fn field_root(self) -> &'static str {
        match self {
            Self::Node => "configuration.nodeTemplates",
            Self::Migrator => "configuration.migratorTemplates",
        }
    }
}

/// Common shape of node and migrator templates
pub trait Template {
    /// Collection this template belongs to
    const KIND: TemplateKind;

    fn code(&self) -> &str;
    fn configuration(&self) -> &str;
    fn package_requirements(&self) -> &[PackageRequirement];
    fn package_requirements_mut(&mut self) -> &mut Vec<PackageRequirement>;
    fn packages_to_install(&self) -> &BTreeMap<String, Vec<PackageDescription>>;
    fn packages_to_install_mut(&mut self) -> &mut BTreeMap<String, Vec<PackageDescription>>;

    /// Field path of this template, e.g. `configuration.nodeTemplates["web"]`
    fn field(&self) -> String {
        format!("{}[\"{}\"]", Self::KIND.field_root(), self.code())
    }
}

/// Deployable cluster role
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub container_types: Vec<String>,
    /// Weight of the template in the new-node draw
    #[serde(default = "default_priority")]
    pub priority: f64,
    #[serde(default)]
    pub minimum_required_instances: u32,
    #[serde(default)]
    pub maximum_needed_instances: Option<u32>,
    #[serde(default)]
    pub package_requirements: Vec<PackageRequirement>,
    /// Computed by the dependency check, keyed by runtime id
    #[serde(default)]
    pub packages_to_install: BTreeMap<String, Vec<PackageDescription>>,
    /// Opaque configuration text handed to nodes
    #[serde(default)]
    pub configuration: String,
}

fn default_priority() -> f64 {
    1.0
}

impl NodeTemplate {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            name: code.clone(),
            code,
            priority: default_priority(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_container_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.container_types = types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_requirement(mut self, requirement: PackageRequirement) -> Self {
        self.package_requirements.push(requirement);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_instances(mut self, minimum: u32, maximum: Option<u32>) -> Self {
        self.minimum_required_instances = minimum;
        self.maximum_needed_instances = maximum;
        self
    }

    #[must_use]
    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = configuration.into();
        self
    }
}

impl Template for NodeTemplate {
    const KIND: TemplateKind = TemplateKind::Node;

    fn code(&self) -> &str {
        &self.code
    }

    fn configuration(&self) -> &str {
        &self.configuration
    }

    fn package_requirements(&self) -> &[PackageRequirement] {
        &self.package_requirements
    }

    fn package_requirements_mut(&mut self) -> &mut Vec<PackageRequirement> {
        &mut self.package_requirements
    }

    fn packages_to_install(&self) -> &BTreeMap<String, Vec<PackageDescription>> {
        &self.packages_to_install
    }

    fn packages_to_install_mut(&mut self) -> &mut BTreeMap<String, Vec<PackageDescription>> {
        &mut self.packages_to_install
    }
}

/// External resource migrator unit
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MigratorTemplate {
    pub code: String,
    #[serde(default)]
    pub name: String,
    /// Higher priority templates are inspected first
    #[serde(default = "default_priority")]
    pub priority: f64,
    #[serde(default)]
    pub package_requirements: Vec<PackageRequirement>,
    #[serde(default)]
    pub packages_to_install: BTreeMap<String, Vec<PackageDescription>>,
    #[serde(default)]
    pub configuration: String,
}

impl MigratorTemplate {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            name: code.clone(),
            code,
            priority: default_priority(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_requirement(mut self, requirement: PackageRequirement) -> Self {
        self.package_requirements.push(requirement);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = configuration.into();
        self
    }
}

impl Template for MigratorTemplate {
    const KIND: TemplateKind = TemplateKind::Migrator;

    fn code(&self) -> &str {
        &self.code
    }

    fn configuration(&self) -> &str {
        &self.configuration
    }

    fn package_requirements(&self) -> &[PackageRequirement] {
        &self.package_requirements
    }

    fn package_requirements_mut(&mut self) -> &mut Vec<PackageRequirement> {
        &mut self.package_requirements
    }

    fn packages_to_install(&self) -> &BTreeMap<String, Vec<PackageDescription>> {
        &self.packages_to_install
    }

    fn packages_to_install_mut(&mut self) -> &mut BTreeMap<String, Vec<PackageDescription>> {
        &mut self.packages_to_install
    }
}

/// Authored body of a configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigurationSettings {
    #[serde(default)]
    pub packages: Vec<PackageDescription>,
    #[serde(default)]
    pub node_templates: Vec<NodeTemplate>,
    #[serde(default)]
    pub migrator_templates: Vec<MigratorTemplate>,
    #[serde(default)]
    pub seed_addresses: Vec<String>,
    #[serde(default)]
    pub nuget_feed: String,
}

/// Versioned bundle of templates and package pins
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub id: ConfigurationId,
    #[serde(default)]
    pub minor_version: i32,
    pub name: String,
    #[serde(default)]
    pub state: ConfigurationState,
    #[serde(default)]
    pub is_stable: bool,
    #[serde(default)]
    pub settings: ConfigurationSettings,
    #[serde(default)]
    pub compatible_templates_backward: Vec<CompatibleTemplate>,
}

impl Configuration {
    /// New draft configuration; the store assigns the id
    #[must_use]
    pub fn draft(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn node_template(&self, code: &str) -> Option<&NodeTemplate> {
        self.settings.node_templates.iter().find(|t| t.code == code)
    }

    #[inline]
    #[must_use]
    pub fn migrator_template(&self, code: &str) -> Option<&MigratorTemplate> {
        self.settings
            .migrator_templates
            .iter()
            .find(|t| t.code == code)
    }

    /// Whether nodes of `template_code` on `configuration_id` may keep running
    #[must_use]
    pub fn is_compatible_with(&self, template_code: &str, configuration_id: ConfigurationId) -> bool {
        self.compatible_templates_backward.iter().any(|c| {
            c.template_code == template_code && c.compatible_configuration_id == configuration_id
        })
    }
}
