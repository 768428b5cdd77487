//! CCP Model - shared vocabulary of the cluster control plane
//!
//! Defines the entities every other crate exchanges:
//! - Configurations (releases) with their node and migrator templates
//! - Packages, package metadata and NuGet-style version ranges
//! - Migrations and the append-only migration log
//! - Live node descriptions
//! - Collaborator traits for persistence and the package repository
//!
//! # Example
//!
//! ```rust,ignore
//! use ccp_model::{Configuration, ConfigurationState, NodeTemplate, PackageRequirement};
//!
//! let mut configuration = Configuration::draft("next release");
//! configuration.settings.node_templates.push(
//!     NodeTemplate::new("worker")
//!         .with_container_types(["worker"])
//!         .with_requirement(PackageRequirement::new("p1")),
//! );
//! assert_eq!(configuration.state, ConfigurationState::Draft);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod configuration;
pub mod error;
pub mod migration;
pub mod node;
pub mod package;
pub mod repository;
pub mod store;
pub mod version;

pub use configuration::{
    CompatibleTemplate, Configuration, ConfigurationId, ConfigurationSettings,
    ConfigurationState, MigratorTemplate, NodeTemplate, Template, TemplateKind,
};
pub use error::{ErrorDescription, RepositoryError, StoreError};
pub use migration::{
    LogRecordType, Migration, MigrationDirection, MigrationId, MigrationLogRecord,
    MigrationState,
};
pub use node::{NodeAddress, NodeDescription, NodeId};
pub use package::{DependencyGroup, PackageDependency, PackageDescription, PackageMetadata,
    PackageRequirement};
pub use repository::PackageRepository;
pub use store::ConfigurationStore;
pub use version::{parse_version, VersionError, VersionRange};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the CCP model
    pub use crate::{
        Configuration, ConfigurationId, ConfigurationState, ConfigurationStore, ErrorDescription,
        Migration, MigrationId, MigrationLogRecord, MigratorTemplate, NodeDescription,
        NodeTemplate, PackageDescription, PackageRepository, PackageRequirement,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
