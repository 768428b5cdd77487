//! In-memory package catalog
//!
//! A [`PackageRepository`] over a fixed set of package metadata, loaded
//! from code or from a JSON feed snapshot. Installing a service writes a
//! `service.json` manifest describing the packages and entry point.

use async_trait::async_trait;
use ccp_model::{
    PackageDescription, PackageMetadata, PackageRepository, RepositoryError,
};
use semver::Version;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Manifest written by [`PackageCatalog::create_service`]
pub const SERVICE_MANIFEST: &str = "service.json";

#[derive(Serialize)]
struct ServiceManifest<'a> {
    entry_point: &'a str,
    runtime: &'a str,
    packages: &'a [PackageDescription],
}

/// Fixed package feed
#[derive(Debug, Clone, Default)]
pub struct PackageCatalog {
    packages: BTreeMap<String, BTreeMap<Version, PackageMetadata>>,
}

impl PackageCatalog {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_packages(packages: impl IntoIterator<Item = PackageMetadata>) -> Self {
        let mut catalog = Self::new();
        for package in packages {
            catalog.insert(package);
        }
        catalog
    }

    /// Load a JSON array of package metadata
    ///
    /// # Errors
    /// Returns `RepositoryError::Feed` when the snapshot is malformed
    pub fn from_json(json: &str) -> Result<Self, RepositoryError> {
        let packages: Vec<PackageMetadata> =
            serde_json::from_str(json).map_err(|e| RepositoryError::Feed(e.to_string()))?;
        Ok(Self::from_packages(packages))
    }

    pub fn insert(&mut self, package: PackageMetadata) {
        self.packages
            .entry(package.id.clone())
            .or_default()
            .insert(package.version.clone(), package);
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.values().map(BTreeMap::len).sum()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    fn lookup(&self, description: &PackageDescription) -> Result<&PackageMetadata, RepositoryError> {
        let not_found = || RepositoryError::PackageNotFound(description.to_string());
        let version = ccp_model::parse_version(&description.version).map_err(|_| not_found())?;
        self.packages
            .get(&description.id)
            .and_then(|versions| versions.get(&version))
            .ok_or_else(not_found)
    }
}

#[async_trait]
impl PackageRepository for PackageCatalog {
    async fn get(&self, id: &str) -> Result<Option<PackageMetadata>, RepositoryError> {
        Ok(self
            .packages
            .get(id)
            .and_then(|versions| versions.values().next_back())
            .cloned())
    }

    async fn get_version(
        &self,
        id: &str,
        version: &Version,
    ) -> Result<Option<PackageMetadata>, RepositoryError> {
        Ok(self
            .packages
            .get(id)
            .and_then(|versions| versions.get(version))
            .cloned())
    }

    async fn search(
        &self,
        terms: &str,
        include_pre_release: bool,
    ) -> Result<Vec<PackageMetadata>, RepositoryError> {
        let terms = terms.to_lowercase();
        Ok(self
            .packages
            .iter()
            .filter(|(id, _)| id.to_lowercase().contains(&terms))
            .filter_map(|(_, versions)| {
                versions
                    .values()
                    .rev()
                    .find(|p| include_pre_release || p.version.pre.is_empty())
                    .cloned()
            })
            .collect())
    }

    async fn extract_package(
        &self,
        packages: &[PackageDescription],
        runtime: &str,
        target_dir: &Path,
        _temp_dir: &Path,
    ) -> Result<BTreeMap<String, Vec<PathBuf>>, RepositoryError> {
        let mut extracted = BTreeMap::new();
        for description in packages {
            let package = self.lookup(description)?;
            let dir = target_dir.join(&package.id);
            tokio::fs::create_dir_all(&dir).await?;

            let file = dir.join(format!("{}.json", package.id));
            let body = serde_json::to_vec_pretty(package)
                .map_err(|e| RepositoryError::Install(e.to_string()))?;
            tokio::fs::write(&file, body).await?;

            tracing::debug!(package = %package, runtime, "package extracted");
            extracted.insert(description.to_string(), vec![file]);
        }
        Ok(extracted)
    }

    async fn create_service(
        &self,
        packages: &[PackageDescription],
        runtime: &str,
        target_dir: &Path,
        entry_point: &str,
    ) -> Result<(), RepositoryError> {
        for description in packages {
            self.lookup(description)?;
        }

        tokio::fs::create_dir_all(target_dir).await?;
        let manifest = ServiceManifest {
            entry_point,
            runtime,
            packages,
        };
        let body = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| RepositoryError::Install(e.to_string()))?;
        tokio::fs::write(target_dir.join(SERVICE_MANIFEST), body).await?;
        Ok(())
    }
}
