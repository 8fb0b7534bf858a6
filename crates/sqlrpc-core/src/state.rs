//! Shared application state for the router and its transports.

use std::sync::Arc;

use crate::config::Settings;
use crate::registry::{Manifest, RegistryError, ServiceRegistry, ServiceRegistryBuilder};
use crate::validate::Validator;

/// Shared state accessible by all request handlers.
pub struct AppStateInner {
    pub settings: Arc<Settings>,
    pub registry: Arc<ServiceRegistry>,
    pub validator: Validator,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(settings: Settings, registry: ServiceRegistry) -> Self {
        let settings = Arc::new(settings);
        let registry = Arc::new(registry);
        Self {
            validator: Validator::new(registry.clone(), settings.clone()),
            settings,
            registry,
        }
    }

    /// Build state from settings, loading every manifest they list.
    pub fn load(settings: Settings) -> Result<Self, RegistryError> {
        Self::load_with(settings, ServiceRegistry::builder())
    }

    /// Like [`AppStateInner::load`], on top of a builder that already holds
    /// code-registered services.
    pub fn load_with(
        settings: Settings,
        builder: ServiceRegistryBuilder,
    ) -> Result<Self, RegistryError> {
        let builder = settings.manifests.iter().try_fold(builder, |b, path| {
            tracing::info!("Loading service manifest {}", path.display());
            Manifest::from_yaml_file(path).map(|m| b.manifest(m))
        })?;
        Ok(Self::new(settings, builder.build()?))
    }
}
