//! Package repository collaborator

use crate::error::RepositoryError;
use crate::package::{PackageDescription, PackageMetadata};
use semver::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Package feed client
///
/// Resolves package metadata and installs packages on disk.
#[async_trait::async_trait]
pub trait PackageRepository: Send + Sync {
    /// Latest version of a package
    async fn get(&self, id: &str) -> Result<Option<PackageMetadata>, RepositoryError>;

    /// Exact package version
    async fn get_version(
        &self,
        id: &str,
        version: &Version,
    ) -> Result<Option<PackageMetadata>, RepositoryError>;

    /// Packages whose id contains `terms`
    async fn search(
        &self,
        terms: &str,
        include_pre_release: bool,
    ) -> Result<Vec<PackageMetadata>, RepositoryError>;

    /// Unpack packages for `runtime` into `target_dir`
    ///
    /// # Returns
    /// Files written, keyed by package identity (`id version`)
    async fn extract_package(
        &self,
        packages: &[PackageDescription],
        runtime: &str,
        target_dir: &Path,
        temp_dir: &Path,
    ) -> Result<BTreeMap<String, Vec<PathBuf>>, RepositoryError>;

    /// Install a runnable service made of `packages` into `target_dir`
    async fn create_service(
        &self,
        packages: &[PackageDescription],
        runtime: &str,
        target_dir: &Path,
        entry_point: &str,
    ) -> Result<(), RepositoryError>;
}
