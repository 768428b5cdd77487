//! CCP Resolver - configuration validation
//!
//! Decides whether a draft configuration is usable:
//! - Resolves declared packages against the package repository
//! - Computes every template's package closure per runtime
//! - Finds prior configurations whose node templates are unchanged
//! - Drives the configuration lifecycle (check, ready, obsolete, stable)
//!
//! # Example
//!
//! ```rust,ignore
//! use ccp_resolver::{DependencyResolver, PackageCatalog};
//!
//! # async fn example(mut configuration: ccp_model::Configuration) -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = PackageCatalog::from_json(include_str!("feed.json"))?;
//! let resolver = DependencyResolver::new([".NETCoreApp,Version=v1.1"]);
//!
//! let errors = resolver.check_all(&mut configuration, &catalog).await?;
//! for error in &errors {
//!     println!("{error}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cache;
pub mod catalog;
pub mod compatibility;
pub mod lifecycle;
pub mod resolver;

pub use cache::CachedRepository;
pub use catalog::PackageCatalog;
pub use compatibility::compatible_templates;
pub use lifecycle::{ConfigurationLifecycle, LifecycleError};
pub use resolver::{DependencyResolver, DEFAULT_EXECUTOR_PACKAGE};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
