use std::collections::HashMap;
use std::sync::Arc;
use wflcore::{Backend, Language, LaunchConfig, Launcher, Result, ValidationError};

/// Factory trait for creating launcher instances
pub trait LauncherFactory: Send + Sync {
    /// Create a new launcher configured from `config`
    fn create(&self, config: &LaunchConfig) -> Result<Box<dyn Launcher>>;

    fn backend(&self) -> Backend;

    fn metadata(&self) -> LauncherMetadata {
        LauncherMetadata::default()
    }
}

/// Metadata about a backend
#[derive(Debug, Clone, Default)]
pub struct LauncherMetadata {
    pub description: String,
    pub languages: Vec<Language>,
}

/// Registry of available backends
pub struct LauncherRegistry {
    factories: HashMap<Backend, Arc<dyn LauncherFactory>>,
}

impl LauncherRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a launcher factory, replacing any previous one for the backend
    pub fn register(&mut self, factory: Arc<dyn LauncherFactory>) {
        let backend = factory.backend();
        tracing::debug!("Registering backend: {}", backend);
        self.factories.insert(backend, factory);
    }

    pub fn create_launcher(
        &self,
        backend: Backend,
        config: &LaunchConfig,
    ) -> Result<Box<dyn Launcher>> {
        let factory = self
            .factories
            .get(&backend)
            .ok_or_else(|| ValidationError::NoLauncher(backend.to_string()))?;
        factory.create(config)
    }

    pub fn list_backends(&self) -> Vec<Backend> {
        let mut backends: Vec<Backend> = self.factories.keys().copied().collect();
        backends.sort_by_key(|b| b.name());
        backends
    }

    pub fn get_metadata(&self, backend: Backend) -> Option<LauncherMetadata> {
        self.factories.get(&backend).map(|f| f.metadata())
    }
}

impl Default for LauncherRegistry {
    fn default() -> Self {
        Self::new()
    }
}
