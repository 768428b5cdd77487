//! Package dependency resolution
//!
//! Checks run in a fixed order:
//! 1. Structural checks (packages, node templates); the first failure is
//!    returned alone.
//! 2. Every declared package is resolved and every dependency declared by
//!    a resolved package, for a supported runtime, must be declared with a
//!    satisfying version.
//! 3. Every template's requirements are resolved and its transitive
//!    closure is computed per runtime into `packages_to_install`.
//! 4. Cluster bootstrap settings.
//!
//! Steps 2 to 4 accumulate errors over the whole configuration.

use ccp_model::{
    parse_version, Configuration, ErrorDescription, PackageMetadata, PackageRepository,
    PackageRequirement, RepositoryError, Template, TemplateKind,
};
use futures::future::try_join_all;
use std::collections::{BTreeMap, VecDeque};

/// Package every migrator template needs to run its executor
pub const DEFAULT_EXECUTOR_PACKAGE: &str = "CCP.Migrator.Executor";

/// Resolved packages by id
type DefinedPackages = BTreeMap<String, PackageMetadata>;

/// Configuration dependency checker
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    runtimes: Vec<String>,
    executor_package: String,
}

impl DependencyResolver {
    /// Resolver for the given runtime ids
    #[must_use]
    pub fn new<I, S>(runtimes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            runtimes: runtimes.into_iter().map(Into::into).collect(),
            executor_package: DEFAULT_EXECUTOR_PACKAGE.to_string(),
        }
    }

    /// Override the package implicitly required by migrator templates
    #[must_use]
    pub fn with_executor_package(mut self, id: impl Into<String>) -> Self {
        self.executor_package = id.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn runtimes(&self) -> &[String] {
        &self.runtimes
    }

    /// Validate `configuration` and fill every template's `packages_to_install`
    ///
    /// # Returns
    /// Field-addressed validation errors, empty when the configuration is usable
    ///
    /// # Errors
    /// Returns `RepositoryError` only when the repository itself fails
    pub async fn check_all(
        &self,
        configuration: &mut Configuration,
        repository: &dyn PackageRepository,
    ) -> Result<Vec<ErrorDescription>, RepositoryError> {
        let settings = &mut configuration.settings;

        if settings.packages.is_empty() {
            return Ok(vec![ErrorDescription::new(
                "configuration.packages",
                "Packages are not initialized",
            )]);
        }
        if settings.node_templates.is_empty() {
            return Ok(vec![ErrorDescription::new(
                TemplateKind::Node.field_root(),
                "Node templates are not initialized",
            )]);
        }

        let (defined, mut errors) = self.check_packages(configuration, repository).await?;

        let settings = &mut configuration.settings;
        for template in &mut settings.node_templates {
            errors.extend(self.check_template(template, &defined, repository).await?);
        }
        for template in &mut settings.migrator_templates {
            if template
                .package_requirements
                .iter()
                .all(|r| r.id != self.executor_package)
            {
                template
                    .package_requirements
                    .push(PackageRequirement::new(self.executor_package.clone()));
            }
            errors.extend(self.check_template(template, &defined, repository).await?);
        }

        errors.extend(check_settings(configuration));

        tracing::debug!(
            configuration = %configuration.id,
            errors = errors.len(),
            "configuration dependencies checked"
        );
        Ok(errors)
    }

    async fn check_packages(
        &self,
        configuration: &Configuration,
        repository: &dyn PackageRepository,
    ) -> Result<(DefinedPackages, Vec<ErrorDescription>), RepositoryError> {
        let mut errors = Vec::new();
        let mut defined = DefinedPackages::new();

        let lookups = configuration.settings.packages.iter().map(|description| async move {
            let Ok(version) = parse_version(&description.version) else {
                return Ok::<_, RepositoryError>((description, None, None));
            };
            let package = repository.get_version(&description.id, &version).await?;
            Ok((description, Some(version), package))
        });

        for (description, version, package) in try_join_all(lookups).await? {
            let field = format!("configuration.packages[\"{}\"]", description.id);
            match (version, package) {
                (None, _) => {
                    errors.push(ErrorDescription::new(field, "Package version could not be parsed"));
                }
                (Some(_), None) => errors.push(ErrorDescription::new(
                    field,
                    "Package of specified version could not be found in the nuget repository",
                )),
                (Some(_), Some(package)) => {
                    defined.insert(description.id.clone(), package);
                }
            }
        }

        let mut requirements: BTreeMap<&str, Vec<_>> = BTreeMap::new();
        for package in defined.values() {
            for runtime in &self.runtimes {
                let Some(group) = package.dependencies_for(runtime) else {
                    continue;
                };
                for dependency in &group.dependencies {
                    requirements
                        .entry(dependency.id.as_str())
                        .or_default()
                        .push(&dependency.range);
                }
            }
        }

        for (id, ranges) in requirements {
            let field = format!("configuration.packages[\"{id}\"]");
            match defined.get(id) {
                None => errors.push(ErrorDescription::new(field, "Package is not defined")),
                Some(package) if ranges.iter().any(|r| !r.satisfies(&package.version)) => {
                    errors.push(ErrorDescription::new(
                        field,
                        "Package doesn't satisfy other packages version requirements",
                    ));
                }
                Some(_) => {}
            }
        }

        Ok((defined, errors))
    }

    async fn check_template<T: Template + Send + Sync>(
        &self,
        template: &mut T,
        defined: &DefinedPackages,
        repository: &dyn PackageRepository,
    ) -> Result<Vec<ErrorDescription>, RepositoryError> {
        let template_field = template.field();
        let mut errors = Vec::new();

        if template.package_requirements().is_empty() {
            errors.push(ErrorDescription::new(
                template_field,
                "Package requirements are not set",
            ));
            return Ok(errors);
        }

        let mut direct = DefinedPackages::new();
        for requirement in template.package_requirements() {
            let field = format!("{template_field}.packageRequirements[\"{}\"]", requirement.id);
            match &requirement.specific_version {
                None => match defined.get(&requirement.id) {
                    Some(package) => {
                        direct.insert(package.id.clone(), package.clone());
                    }
                    None => errors.push(ErrorDescription::new(
                        field,
                        "Package requirement is not defined in configuration packages",
                    )),
                },
                Some(version) => {
                    let Ok(version) = parse_version(version) else {
                        errors.push(ErrorDescription::new(field, "Package version could not be parsed"));
                        continue;
                    };
                    match repository.get_version(&requirement.id, &version).await? {
                        Some(package) => {
                            direct.insert(package.id.clone(), package);
                        }
                        None => errors.push(ErrorDescription::new(
                            field,
                            "Package could not be found in nuget repository",
                        )),
                    }
                }
            }
        }

        let mut packages_to_install = BTreeMap::new();
        for runtime in &self.runtimes {
            let (closure, closure_errors) = resolve_closure(&template_field, runtime, &direct, defined);
            errors.extend(closure_errors);
            packages_to_install.insert(
                runtime.clone(),
                closure.values().map(PackageMetadata::description).collect(),
            );
        }
        *template.packages_to_install_mut() = packages_to_install;

        Ok(errors)
    }
}

/// Breadth-first transitive closure of `direct` for one runtime
fn resolve_closure(
    template_field: &str,
    runtime: &str,
    direct: &DefinedPackages,
    defined: &DefinedPackages,
) -> (DefinedPackages, Vec<ErrorDescription>) {
    let mut errors = Vec::new();
    let mut closure = direct.clone();
    let mut queue: VecDeque<PackageMetadata> = direct.values().cloned().collect();

    while let Some(package) = queue.pop_front() {
        let field = format!("{template_field}.packageRequirements[\"{}\"]", package.id);
        let Some(group) = package.dependencies_for(runtime) else {
            continue;
        };

        for dependency in &group.dependencies {
            let existing = closure.get(&dependency.id).cloned();
            let resolved = match existing {
                Some(resolved) => resolved,
                None => {
                    let Some(resolved) = defined.get(&dependency.id) else {
                        errors.push(ErrorDescription::new(
                            field.clone(),
                            format!(
                                "Package dependency for {runtime} {} {} is missing",
                                dependency.id, dependency.range
                            ),
                        ));
                        continue;
                    };
                    closure.insert(resolved.id.clone(), resolved.clone());
                    queue.push_back(resolved.clone());
                    resolved.clone()
                }
            };

            if !dependency.range.satisfies(&resolved.version) {
                errors.push(ErrorDescription::new(
                    field.clone(),
                    format!(
                        "Package dependency for {runtime} {resolved} doesn't satisfy version requirements {}.",
                        dependency.range
                    ),
                ));
            }
        }
    }

    (closure, errors)
}

fn check_settings(configuration: &Configuration) -> Vec<ErrorDescription> {
    let mut errors = Vec::new();
    if configuration.settings.seed_addresses.is_empty() {
        errors.push(ErrorDescription::new(
            "configuration.seedAddresses",
            "Seeds addresses is empty",
        ));
    }
    if configuration.settings.nuget_feed.trim().is_empty() {
        errors.push(ErrorDescription::new(
            "configuration.nugetFeed",
            "Nuget feed is empty",
        ));
    }
    errors
}
