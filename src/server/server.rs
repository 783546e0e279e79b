use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::InMemBackend;
use crate::Registry;
use crate::ResourceService;
use crate::Result;
use crate::Settings;

/// A fully assembled resource store process.
pub struct Server {
    registry: Arc<Registry>,
    backend: Arc<InMemBackend>,
    service: ResourceService<InMemBackend>,
    settings: Arc<Settings>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Server {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("types", &self.registry.len())
            .field("resources", &self.backend.len())
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl Server {
    pub(super) fn new(
        registry: Arc<Registry>,
        backend: Arc<InMemBackend>,
        service: ResourceService<InMemBackend>,
        settings: Arc<Settings>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            backend,
            service,
            settings,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<InMemBackend> {
        &self.backend
    }

    pub fn service(&self) -> &ResourceService<InMemBackend> {
        &self.service
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Ready once the change publisher is dispatching, until shutdown.
    pub fn is_ready(&self) -> bool {
        self.backend.is_running()
    }

    /// Drives change dispatch until the shutdown token fires.
    pub async fn run(&self) -> Result<()> {
        info!(types = self.registry.len(), "Resource store running");
        let result = self.backend.run(self.shutdown.clone()).await;
        info!("Resource store stopped");
        result
    }
}
