//! Process-scoped registration of the active context environment.
//!
//! A bootstrap step installs one [`ContextEnvironmentFactory`]; user code
//! then asks the registry for an environment instead of building one itself.

use jobctx_client::SubmissionClient;
use jobctx_core::{Configuration, Result};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::context::ContextEnvironment;
use crate::shutdown::ShutdownHooks;
use crate::slot::ResultSlot;

/// Errors raised by [`ContextRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Another factory is already installed
    #[error("A context environment is already installed for this process")]
    AlreadyInstalled,
}

/// Builds context environments that share one client, configuration,
/// result slot and set of shutdown hooks.
#[derive(Clone)]
pub struct ContextEnvironmentFactory {
    client: Arc<dyn SubmissionClient>,
    configuration: Configuration,
    shutdown_hooks: Arc<ShutdownHooks>,
    result_slot: ResultSlot,
}

impl ContextEnvironmentFactory {
    /// Create a factory.
    pub fn new(
        client: Arc<dyn SubmissionClient>,
        configuration: Configuration,
        shutdown_hooks: Arc<ShutdownHooks>,
        result_slot: ResultSlot,
    ) -> Self {
        Self {
            client,
            configuration,
            shutdown_hooks,
            result_slot,
        }
    }

    /// Build a fresh environment.
    pub fn create(&self) -> Result<ContextEnvironment> {
        ContextEnvironment::new(
            self.client.clone(),
            self.configuration.clone(),
            self.shutdown_hooks.clone(),
            self.result_slot.clone(),
        )
    }

    /// Slot shared by every environment this factory creates.
    pub fn result_slot(&self) -> &ResultSlot {
        &self.result_slot
    }
}

/// Single-slot registry of the active environment factory.
#[derive(Default)]
pub struct ContextRegistry {
    active: RwLock<Option<ContextEnvironmentFactory>>,
}

impl ContextRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `factory` as the active one.
    pub fn install(&self, factory: ContextEnvironmentFactory) -> std::result::Result<(), RegistryError> {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        if active.is_some() {
            return Err(RegistryError::AlreadyInstalled);
        }
        *active = Some(factory);
        info!("Context environment installed");
        Ok(())
    }

    /// Remove the active factory. Returns whether one was installed.
    pub fn uninstall(&self) -> bool {
        let removed = self
            .active
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();
        if removed {
            info!("Context environment uninstalled");
        } else {
            debug!("No context environment to uninstall");
        }
        removed
    }

    /// Whether a factory is installed.
    pub fn is_installed(&self) -> bool {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Create an environment from the installed factory, if any.
    pub fn environment(&self) -> Result<Option<ContextEnvironment>> {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        active.as_ref().map(ContextEnvironmentFactory::create).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobctx_client::LocalClusterClient;
    use jobctx_core::config::{ATTACHED, DEFAULT_PARALLELISM};
    use jobctx_core::{ExecutionResult, Stage};

    fn factory(configuration: Configuration) -> ContextEnvironmentFactory {
        ContextEnvironmentFactory::new(
            Arc::new(LocalClusterClient::new()),
            configuration,
            ShutdownHooks::new(),
            ResultSlot::new(),
        )
    }

    #[test]
    fn test_install_uninstall() {
        let registry = ContextRegistry::new();
        assert!(!registry.is_installed());
        assert!(registry.environment().unwrap().is_none());

        registry.install(factory(Configuration::new())).unwrap();
        assert!(registry.is_installed());
        assert_eq!(
            registry.install(factory(Configuration::new())),
            Err(RegistryError::AlreadyInstalled)
        );

        assert!(registry.uninstall());
        assert!(!registry.uninstall());
        assert!(!registry.is_installed());

        registry.install(factory(Configuration::new())).unwrap();
        assert!(registry.is_installed());
    }

    #[test]
    fn test_uninstall_when_empty() {
        let registry = ContextRegistry::new();
        assert!(!registry.uninstall());
    }

    #[test]
    fn test_environment_uses_factory_configuration() {
        let registry = ContextRegistry::new();
        registry
            .install(factory(Configuration::new().with(&DEFAULT_PARALLELISM, 6)))
            .unwrap();

        let env = registry.environment().unwrap().unwrap();
        assert_eq!(env.parallelism(), Some(6));
        assert_eq!(env.to_string(), "Context Environment (parallelism = 6)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_environments_share_result_slot() {
        let f = factory(Configuration::new().with(&ATTACHED, false));
        let slot = f.result_slot().clone();
        let registry = ContextRegistry::new();
        registry.install(f).unwrap();

        let mut first = registry.environment().unwrap().unwrap();
        first.add_stage(Stage::new("source"));
        let result = first.execute("first").await.unwrap();
        assert!(result.is_detached());
        assert_eq!(slot.get(), Some(result));

        // A separate instance has its own one-shot guard
        let mut second = registry.environment().unwrap().unwrap();
        second.add_stage(Stage::new("source"));
        let result = second.execute("second").await.unwrap();
        assert_eq!(slot.get(), Some(result.clone()));

        second.set_execution_result(ExecutionResult::detached(result.job_id()));
        assert_eq!(slot.get().map(|r| r.job_id()), Some(result.job_id()));
    }
}
