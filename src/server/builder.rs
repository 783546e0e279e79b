//! A builder for assembling a [`Server`].
//!
//! [`ServerBuilder`] starts from loaded [`Settings`] and lets callers swap in
//! their own registry or backend before `build()` fills in the defaults.
//!
//! ## Example
//! ```ignore
//! let shutdown = CancellationToken::new();
//! let server = ServerBuilder::new(None, shutdown.clone())?
//!     .registry(registry)
//!     .build()
//!     .start_metrics_server()
//!     .ready()?;
//! server.run().await?;
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::Server;
use crate::metrics;
use crate::InMemBackend;
use crate::Registry;
use crate::ResourceService;
use crate::Result;
use crate::Settings;
use crate::SystemError;

pub struct ServerBuilder {
    pub(super) settings: Settings,
    pub(super) registry: Option<Arc<Registry>>,
    pub(super) backend: Option<InMemBackend>,
    pub(super) shutdown: CancellationToken,
    pub(super) server: Option<Arc<Server>>,
}

impl ServerBuilder {
    /// Loads settings from the environment, layering `config_path` on top
    /// when given.
    pub fn new(
        config_path: Option<&str>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let mut settings = Settings::new()?;
        if let Some(p) = config_path {
            info!("with_override_config from: {}", p);
            settings = settings.with_override_config(p)?;
        }
        Ok(Self::init(settings, shutdown))
    }

    /// Core initialization shared by all construction paths
    pub fn init(
        settings: Settings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            registry: None,
            backend: None,
            shutdown,
            server: None,
        }
    }

    /// Uses a pre-populated type registry
    pub fn registry(
        mut self,
        registry: Arc<Registry>,
    ) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Uses an existing backend; its registry wins over [`Self::registry`]
    pub fn backend(
        mut self,
        backend: InMemBackend,
    ) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replaces the settings
    pub fn settings(
        mut self,
        settings: Settings,
    ) -> Self {
        self.settings = settings;
        self
    }

    /// Assembles the server, creating defaults for anything not supplied.
    pub fn build(mut self) -> Self {
        let backend = match (self.backend.take(), self.registry.take()) {
            (Some(backend), Some(registry)) => {
                if !Arc::ptr_eq(backend.registry(), &registry) {
                    warn!("Both a backend and a registry were supplied; using the backend's registry");
                }
                backend
            }
            (Some(backend), None) => backend,
            (None, registry) => InMemBackend::new(registry.unwrap_or_default(), self.settings.watch.clone()),
        };
        let backend = Arc::new(backend);
        let registry = backend.registry().clone();
        debug!(types = registry.len(), "Server components assembled");

        let service = ResourceService::new(
            registry.clone(),
            backend.clone(),
            self.settings.watch.clone(),
            self.shutdown.child_token(),
        );

        self.server = Some(Arc::new(Server::new(
            registry,
            backend,
            service,
            Arc::new(self.settings.clone()),
            self.shutdown.clone(),
        )));
        self
    }

    /// Serves Prometheus metrics when `monitoring.prometheus_enabled` is set.
    pub fn start_metrics_server(self) -> Self {
        if !self.settings.monitoring.prometheus_enabled {
            debug!("Prometheus exporter disabled");
            return self;
        }

        let port = self.settings.monitoring.prometheus_port;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            metrics::start_server(port, shutdown).await;
        });
        self
    }

    /// Returns the built server.
    pub fn ready(self) -> Result<Arc<Server>> {
        self.server
            .ok_or_else(|| SystemError::ServerStartFailed("build() was not called".to_string()).into())
    }
}
