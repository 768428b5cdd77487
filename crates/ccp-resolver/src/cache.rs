//! Metadata cache in front of a package repository using moka
//!
//! Checking a configuration looks the same `id@version` up many times
//! (declared packages, pinned requirements, every template). The cache
//! keeps both hits and misses so a feed is asked once per identity.

use async_trait::async_trait;
use ccp_model::{PackageDescription, PackageMetadata, PackageRepository, RepositoryError};
use moka::future::Cache;
use semver::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Caching decorator over any [`PackageRepository`]
#[derive(Clone)]
pub struct CachedRepository {
    inner: Arc<dyn PackageRepository>,
    versions: Cache<(String, Version), Option<PackageMetadata>>,
}

impl CachedRepository {
    /// Wrap `inner` with a cache of `max_capacity` entries
    #[inline]
    #[must_use]
    pub fn new(inner: Arc<dyn PackageRepository>, max_capacity: u64) -> Self {
        Self {
            inner,
            versions: Cache::new(max_capacity),
        }
    }

    /// Wrap `inner` with entries expiring after `ttl`
    #[inline]
    #[must_use]
    pub fn with_ttl(inner: Arc<dyn PackageRepository>, max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            versions: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Drop every cached lookup
    #[inline]
    pub fn invalidate_all(&self) {
        self.versions.invalidate_all();
    }
}

#[async_trait]
impl PackageRepository for CachedRepository {
    async fn get(&self, id: &str) -> Result<Option<PackageMetadata>, RepositoryError> {
        self.inner.get(id).await
    }

    async fn get_version(
        &self,
        id: &str,
        version: &Version,
    ) -> Result<Option<PackageMetadata>, RepositoryError> {
        let key = (id.to_string(), version.clone());
        if let Some(cached) = self.versions.get(&key).await {
            return Ok(cached);
        }

        let package = self.inner.get_version(id, version).await?;
        self.versions.insert(key, package.clone()).await;
        Ok(package)
    }

    async fn search(
        &self,
        terms: &str,
        include_pre_release: bool,
    ) -> Result<Vec<PackageMetadata>, RepositoryError> {
        self.inner.search(terms, include_pre_release).await
    }

    async fn extract_package(
        &self,
        packages: &[PackageDescription],
        runtime: &str,
        target_dir: &Path,
        temp_dir: &Path,
    ) -> Result<BTreeMap<String, Vec<PathBuf>>, RepositoryError> {
        self.inner
            .extract_package(packages, runtime, target_dir, temp_dir)
            .await
    }

    async fn create_service(
        &self,
        packages: &[PackageDescription],
        runtime: &str,
        target_dir: &Path,
        entry_point: &str,
    ) -> Result<(), RepositoryError> {
        self.inner
            .create_service(packages, runtime, target_dir, entry_point)
            .await
    }
}
