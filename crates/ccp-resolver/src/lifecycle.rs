//! Configuration lifecycle actions
//!
//! State changes an operator may apply to a configuration outside of a
//! migration. Promotion to `Active` and demotion on rollback happen only
//! through migrations and are not handled here.

use crate::compatibility::compatible_templates;
use crate::resolver::DependencyResolver;
use ccp_model::{
    Configuration, ConfigurationId, ConfigurationState, ConfigurationStore, ErrorDescription,
    PackageRepository, RepositoryError, StoreError,
};
use std::sync::Arc;

/// Lifecycle action errors
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Configuration does not exist
    #[error("configuration {0} not found")]
    NotFound(ConfigurationId),

    /// Action not allowed in the current state
    #[error("{0}")]
    InvalidState(&'static str),

    /// Dependency check reported problems
    #[error("configuration check failed with {} error(s)", .0.len())]
    CheckFailed(Vec<ErrorDescription>),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Operator actions on stored configurations
#[derive(Clone)]
pub struct ConfigurationLifecycle {
    store: Arc<dyn ConfigurationStore>,
    repository: Arc<dyn PackageRepository>,
    resolver: DependencyResolver,
}

impl ConfigurationLifecycle {
    #[must_use]
    pub fn new(
        store: Arc<dyn ConfigurationStore>,
        repository: Arc<dyn PackageRepository>,
        resolver: DependencyResolver,
    ) -> Self {
        Self {
            store,
            repository,
            resolver,
        }
    }

    async fn load(&self, id: ConfigurationId) -> Result<Configuration, LifecycleError> {
        self.store
            .configuration(id)
            .await?
            .ok_or(LifecycleError::NotFound(id))
    }

    /// Re-run dependency resolution and compatibility for a draft
    ///
    /// The computed package closures and compatibility list are saved even
    /// when errors are reported.
    ///
    /// # Errors
    /// - `LifecycleError::InvalidState` if the configuration is not a draft
    pub async fn check(&self, id: ConfigurationId) -> Result<Vec<ErrorDescription>, LifecycleError> {
        let mut configuration = self.load(id).await?;
        if configuration.state != ConfigurationState::Draft {
            return Err(LifecycleError::InvalidState(
                "Only draft configurations can be checked",
            ));
        }

        let errors = self.check_configuration(&mut configuration).await?;
        self.store.update_configuration(&configuration).await?;
        Ok(errors)
    }

    /// Promote a checked draft to `Ready`
    ///
    /// # Errors
    /// - `LifecycleError::InvalidState` if not a draft or another configuration is ready
    /// - `LifecycleError::CheckFailed` if the dependency check reports problems
    pub async fn set_ready(&self, id: ConfigurationId) -> Result<Configuration, LifecycleError> {
        let mut configuration = self.load(id).await?;
        if configuration.state != ConfigurationState::Draft {
            return Err(LifecycleError::InvalidState(
                "Only draft configurations can be made ready",
            ));
        }
        if !self
            .store
            .configurations_in_state(ConfigurationState::Ready)
            .await?
            .is_empty()
        {
            return Err(LifecycleError::InvalidState(
                "There is an already defined ready configuration. Please remove the previous one.",
            ));
        }

        let errors = self.check_configuration(&mut configuration).await?;
        if !errors.is_empty() {
            return Err(LifecycleError::CheckFailed(errors));
        }

        configuration.state = ConfigurationState::Ready;
        self.store.update_configuration(&configuration).await?;
        tracing::info!(configuration = %id, "configuration is ready");
        Ok(configuration)
    }

    /// Withdraw a ready configuration
    ///
    /// # Errors
    /// - `LifecycleError::InvalidState` if the configuration is not ready
    pub async fn set_obsolete(&self, id: ConfigurationId) -> Result<Configuration, LifecycleError> {
        let mut configuration = self.load(id).await?;
        if configuration.state != ConfigurationState::Ready {
            return Err(LifecycleError::InvalidState(
                "Only ready configurations can be made obsolete manually",
            ));
        }
        configuration.state = ConfigurationState::Obsolete;
        self.store.update_configuration(&configuration).await?;
        Ok(configuration)
    }

    /// Mark the active configuration as stable (or not)
    ///
    /// # Errors
    /// - `LifecycleError::InvalidState` if the configuration is not active
    pub async fn set_stable(
        &self,
        id: ConfigurationId,
        is_stable: bool,
    ) -> Result<Configuration, LifecycleError> {
        let mut configuration = self.load(id).await?;
        if configuration.state != ConfigurationState::Active {
            return Err(LifecycleError::InvalidState(
                "Only active configurations can be marked as stable",
            ));
        }
        configuration.is_stable = is_stable;
        self.store.update_configuration(&configuration).await?;
        Ok(configuration)
    }

    /// Replace the body of a draft
    ///
    /// # Errors
    /// - `LifecycleError::InvalidState` if the stored configuration is not a draft
    pub async fn update(&self, configuration: Configuration) -> Result<(), LifecycleError> {
        let stored = self.load(configuration.id).await?;
        if stored.state != ConfigurationState::Draft
            || configuration.state != ConfigurationState::Draft
        {
            return Err(LifecycleError::InvalidState(
                "Only draft releases can be updated",
            ));
        }
        self.store.update_configuration(&configuration).await?;
        Ok(())
    }

    async fn check_configuration(
        &self,
        configuration: &mut Configuration,
    ) -> Result<Vec<ErrorDescription>, LifecycleError> {
        let errors = self
            .resolver
            .check_all(configuration, self.repository.as_ref())
            .await?;

        let history = self.store.configurations().await?;
        configuration.compatible_templates_backward = compatible_templates(configuration, &history);

        if !errors.is_empty() {
            tracing::warn!(
                configuration = %configuration.id,
                errors = errors.len(),
                "configuration check reported errors"
            );
        }
        Ok(errors)
    }
}
