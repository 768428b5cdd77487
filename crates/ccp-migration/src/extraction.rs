//! Installation of migrator template code into working directories
//!
//! Layout: `<root>/<configuration id>/<template code>/`, holding the
//! executor service built by the package repository and a `config` file
//! with the template's configuration text. An existing directory counts as
//! extracted unless a forced refresh is requested.

use crate::error::ExtractionError;
use ccp_model::{
    Configuration, ConfigurationId, MigrationId, MigrationLogRecord, MigratorTemplate,
    PackageRepository,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File holding the template configuration text
pub const CONFIG_FILE: &str = "config";

/// Template directory of a configuration
#[inline]
#[must_use]
pub fn template_dir(root: &Path, configuration_id: ConfigurationId, template_code: &str) -> PathBuf {
    root.join(configuration_id.to_string()).join(template_code)
}

/// Migrator template ready to run
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedTemplate {
    pub code: String,
    pub name: String,
    pub priority: f64,
    pub dir: PathBuf,
}

/// Installs migrator templates for one runtime
#[derive(Clone)]
pub struct MigratorExtractor {
    repository: Arc<dyn PackageRepository>,
    runtime: String,
    entry_point: String,
}

impl MigratorExtractor {
    #[must_use]
    pub fn new(
        repository: Arc<dyn PackageRepository>,
        runtime: impl Into<String>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            runtime: runtime.into(),
            entry_point: entry_point.into(),
        }
    }

    /// Extract every migrator template of `configuration`
    ///
    /// Every template is attempted; failures come back as error records.
    pub async fn extract(
        &self,
        configuration: &Configuration,
        root: &Path,
        force: bool,
        migration_id: Option<MigrationId>,
    ) -> (Vec<ExtractedTemplate>, Vec<MigrationLogRecord>) {
        let mut extracted = Vec::new();
        let mut errors = Vec::new();

        for template in &configuration.settings.migrator_templates {
            let dir = template_dir(root, configuration.id, &template.code);
            match self.extract_template(template, &dir, force).await {
                Ok(()) => extracted.push(ExtractedTemplate {
                    code: template.code.clone(),
                    name: template.name.clone(),
                    priority: template.priority,
                    dir,
                }),
                Err(e) => {
                    tracing::error!(
                        configuration = %configuration.id,
                        template = %template.code,
                        error = %e,
                        "migrator template extraction failed"
                    );
                    errors.push(
                        MigrationLogRecord::error(e.to_string())
                            .with_configuration(configuration.id)
                            .with_migration(migration_id)
                            .with_template(template.code.clone(), template.name.clone()),
                    );
                }
            }
        }

        (extracted, errors)
    }

    async fn extract_template(
        &self,
        template: &MigratorTemplate,
        dir: &Path,
        force: bool,
    ) -> Result<(), ExtractionError> {
        let packages = template
            .packages_to_install
            .get(&self.runtime)
            .ok_or_else(|| ExtractionError::UnsupportedFramework(self.runtime.clone()))?;

        if tokio::fs::try_exists(dir).await? {
            if !force {
                return Ok(());
            }
            tokio::fs::remove_dir_all(dir).await?;
        }
        tokio::fs::create_dir_all(dir).await?;

        if let Err(e) = self
            .repository
            .create_service(packages, &self.runtime, dir, &self.entry_point)
            .await
        {
            let _ = tokio::fs::remove_dir_all(dir).await;
            return Err(ExtractionError::CreateService(e));
        }

        if let Err(e) = tokio::fs::write(dir.join(CONFIG_FILE), &template.configuration).await {
            let _ = tokio::fs::remove_dir_all(dir).await;
            return Err(e.into());
        }

        tracing::debug!(template = %template.code, dir = %dir.display(), "migrator template extracted");
        Ok(())
    }
}
