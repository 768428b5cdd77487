//! Offline commands of the `ccp` binary

use anyhow::{Context, Result};
use ccp_model::{CompatibleTemplate, Configuration, ErrorDescription, PackageDescription};
use ccp_resolver::{compatible_templates, DependencyResolver, PackageCatalog};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Result of checking one configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub errors: Vec<ErrorDescription>,
    /// Resolved packages per template code, then per runtime
    pub packages_to_install: BTreeMap<String, BTreeMap<String, Vec<PackageDescription>>>,
}

impl CheckReport {
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Read a configuration JSON document
///
/// # Errors
/// Fails if the file is unreadable or not a configuration
pub fn read_configuration(path: &Path) -> Result<Configuration> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading configuration {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing configuration {}", path.display()))
}

/// Read a JSON array of configurations
///
/// # Errors
/// Fails if the file is unreadable or not a list of configurations
pub fn read_history(path: &Path) -> Result<Vec<Configuration>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading configuration history {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing configuration history {}", path.display()))
}

/// Read a package feed snapshot
///
/// # Errors
/// Fails if the file is unreadable or not a package list
pub fn read_feed(path: &Path) -> Result<PackageCatalog> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading feed {}", path.display()))?;
    let catalog =
        PackageCatalog::from_json(&text).with_context(|| format!("parsing feed {}", path.display()))?;
    debug!(packages = catalog.len(), "feed loaded");
    Ok(catalog)
}

/// Validate `configuration` against `catalog` for `runtimes`
///
/// # Errors
/// Fails only when the catalog itself fails
pub async fn check(
    mut configuration: Configuration,
    catalog: &PackageCatalog,
    runtimes: &[String],
) -> Result<CheckReport> {
    let resolver = DependencyResolver::new(runtimes.iter().cloned());
    let errors = resolver
        .check_all(&mut configuration, catalog)
        .await
        .context("resolving packages")?;

    let packages_to_install = configuration
        .settings
        .node_templates
        .into_iter()
        .map(|template| (template.code, template.packages_to_install))
        .collect();

    info!(
        configuration = %configuration.name,
        errors = errors.len(),
        "configuration checked"
    );
    Ok(CheckReport {
        errors,
        packages_to_install,
    })
}

/// Templates of `configuration` that earlier configurations in `history` share
#[must_use]
pub fn compatible(configuration: &Configuration, history: &[Configuration]) -> Vec<CompatibleTemplate> {
    compatible_templates(configuration, history)
}

/// Human-readable rendering of a check report
#[must_use]
pub fn render_check(report: &CheckReport) -> String {
    let mut out = String::new();
    if report.is_valid() {
        out.push_str("configuration is valid\n");
        for (template, runtimes) in &report.packages_to_install {
            out.push_str(&format!("{template}\n"));
            for (runtime, packages) in runtimes {
                let packages: Vec<String> = packages
                    .iter()
                    .map(|p| format!("{} {}", p.id, p.version))
                    .collect();
                out.push_str(&format!("  {runtime}: {}\n", packages.join(", ")));
            }
        }
    } else {
        for error in &report.errors {
            out.push_str(&format!("{error}\n"));
        }
    }
    out
}
