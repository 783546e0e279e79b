//! Configuration management for the resource store.
//!
//! Settings are merged from several sources, later ones winning:
//! 1. Default values (hardcoded)
//! 2. The file named by `CONFIG_PATH`, when set
//! 3. Environment variables prefixed with `RSTORE__`
//!
//! `with_override_config` layers one more file on top of an existing value.

mod monitoring;
mod retry;
mod server;
mod watch;
pub use monitoring::*;
pub use retry::*;
pub use server::*;
pub use watch::*;


//---
use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "RSTORE";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    /// Process level settings (log location)
    #[serde(default)]
    pub server: ServerConfig,
    /// Subscription and stream buffer sizing
    #[serde(default)]
    pub watch: WatchConfig,
    /// Caller-side CAS retry policies
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Metrics and monitoring settings
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Settings {
    /// Loads settings from defaults, `CONFIG_PATH` and `RSTORE__*` variables.
    ///
    /// No validation happens here; call [`Settings::validate`] once every
    /// override is applied.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Merges an extra configuration file over the current values.
    ///
    /// Environment variables are applied again afterwards so they keep the
    /// highest priority.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.watch.validate()?;
        self.retry.validate()?;
        self.monitoring.validate()?;
        Ok(())
    }
}
