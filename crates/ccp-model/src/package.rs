//! Package identities, requirements and repository metadata

use crate::version::VersionRange;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Installable package pinned to a version
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageDescription {
    /// Package id
    pub id: String,
    /// Version text as declared
    pub version: String,
}

impl PackageDescription {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PackageDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

/// Template requirement on a package
///
/// Without a specific version the package must be declared in the
/// configuration's package list; with one it is looked up directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRequirement {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_version: Option<String>,
}

impl PackageRequirement {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            specific_version: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn pinned(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            specific_version: Some(version.into()),
        }
    }
}

/// One dependency of a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDependency {
    pub id: String,
    pub range: VersionRange,
}

impl PackageDependency {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, range: VersionRange) -> Self {
        Self {
            id: id.into(),
            range,
        }
    }
}

/// Dependencies of a package for one target runtime
///
/// An empty `target_framework` applies to every runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGroup {
    #[serde(default)]
    pub target_framework: String,
    #[serde(default)]
    pub dependencies: Vec<PackageDependency>,
}

/// Package metadata as published by the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub id: String,
    pub version: Version,
    #[serde(default)]
    pub dependency_groups: Vec<DependencyGroup>,
}

impl PackageMetadata {
    #[must_use]
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            version,
            dependency_groups: Vec::new(),
        }
    }

    /// Add a dependency group for `runtime`
    #[must_use]
    pub fn with_dependencies(
        mut self,
        runtime: impl Into<String>,
        dependencies: impl IntoIterator<Item = PackageDependency>,
    ) -> Self {
        self.dependency_groups.push(DependencyGroup {
            target_framework: runtime.into(),
            dependencies: dependencies.into_iter().collect(),
        });
        self
    }

    /// Dependency group that applies to `runtime`
    ///
    /// An exact runtime match wins over a runtime-agnostic group.
    #[must_use]
    pub fn dependencies_for(&self, runtime: &str) -> Option<&DependencyGroup> {
        self.dependency_groups
            .iter()
            .find(|g| g.target_framework == runtime)
            .or_else(|| {
                self.dependency_groups
                    .iter()
                    .find(|g| g.target_framework.is_empty())
            })
    }

    /// Description of this exact package version
    #[must_use]
    pub fn description(&self) -> PackageDescription {
        PackageDescription::new(self.id.clone(), self.version.to_string())
    }
}

impl fmt::Display for PackageMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_runtime_group_wins() {
        let dep = |id: &str| PackageDependency::new(id, VersionRange::any());
        let package = PackageMetadata::new("p1", Version::new(1, 0, 0))
            .with_dependencies("", [dep("generic")])
            .with_dependencies("net46", [dep("specific")]);

        let group = package.dependencies_for("net46").unwrap();
        assert_eq!(group.dependencies[0].id, "specific");

        let fallback = package.dependencies_for("netcore").unwrap();
        assert_eq!(fallback.dependencies[0].id, "generic");
    }

    #[test]
    fn no_group_for_unknown_runtime() {
        let package = PackageMetadata::new("p1", Version::new(1, 0, 0))
            .with_dependencies("net46", []);
        assert!(package.dependencies_for("netcore").is_none());
    }
}
