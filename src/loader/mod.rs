// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level entry-point – "turn the key and go".
//!
//! The [`SidecarLoader`] consumes configuration, initialises logging, loads
//! the API description, wires up the [`ProxyCore`] and returns a
//! [`Sidecar`] whose [`start`](Sidecar::start) serves until signalled.


use std::env;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{Config, ConfigError, ConfigProvider, EnvConfigProvider, FileConfigProvider, SidecarConfig};
use crate::core::{ForwardingEngine, ProxyCore, ProxyError};
use crate::logging::config::parse_level;
use crate::logging::{init_with_config, log_debug, log_error, log_info};
use crate::server::ProxyServer;
use crate::spec::{SpecError, SpecLoader, SpecModel};
use crate::validator::{AuthenticationPolicy, RequestValidator};
use crate::info_fmt;

/// Errors that can occur while bringing the sidecar up.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// The API description could not be loaded
    #[error("API description error: {0}")]
    SpecError(#[from] SpecError),

    /// Proxy error
    #[error("proxy error: {0}")]
    ProxyError(#[from] ProxyError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Builder for initializing and configuring the sidecar.
#[derive(Debug, Default)]
pub struct SidecarLoader {
    config: Option<Config>,
    providers: Vec<Arc<dyn ConfigProvider>>,
    config_file_path: Option<String>,
    use_env_vars: bool,
    env_prefix: Option<String>,
    spec: Option<SpecModel>,
    authentication: Option<Arc<dyn AuthenticationPolicy>>,
}

impl SidecarLoader {
    /// Create a new loader with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a ready-made configuration instead of building one.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set a configuration file to load.
    pub fn with_config_file(mut self, file_path: &str) -> Self {
        self.config_file_path = Some(file_path.to_string());
        self
    }

    /// Enable environment variable configuration (`PROXY_PORT`, ...).
    pub fn with_env_vars(mut self) -> Self {
        self.use_env_vars = true;
        self
    }

    /// Set a custom prefix for environment variables (default is none).
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.use_env_vars = true;
        self
    }

    /// Add a custom configuration provider; it overrides env and file values.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Use an already-built contract instead of loading `openapi.path`.
    pub fn with_spec(mut self, spec: SpecModel) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Replace the default accept-all authentication policy.
    pub fn with_authentication(mut self, policy: Arc<dyn AuthenticationPolicy>) -> Self {
        self.authentication = Some(policy);
        self
    }

    fn build_config(&mut self) -> Result<Config, LoaderError> {
        if let Some(config) = self.config.take() {
            return Ok(config);
        }

        let mut builder = Config::builder();

        if let Some(file_path) = &self.config_file_path {
            builder = builder.with_provider(FileConfigProvider::new(file_path)?);
        }

        if self.use_env_vars {
            let env_provider = match &self.env_prefix {
                Some(prefix) => EnvConfigProvider::new(prefix),
                None => EnvConfigProvider::default(),
            };
            builder = builder.with_provider(env_provider);
        }

        for provider in self.providers.drain(..) {
            builder = builder.with_shared_provider(provider);
        }

        Ok(builder.build())
    }

    /// Build and initialize the sidecar.
    ///
    /// Every failure here is fatal: the sidecar never serves without a
    /// valid contract.
    pub async fn build(mut self) -> Result<Sidecar, LoaderError> {
        let config = self.build_config()?;
        let settings = SidecarConfig::from_config(&config)?;

        // RUST_LOG_LEVEL beats the configured level
        let log_level = env::var("RUST_LOG_LEVEL")
            .ok()
            .and_then(|l| parse_level(&l))
            .unwrap_or_else(|| settings.logging.level_filter());
        init_with_config(log_level, &settings.logging);

        info_fmt!(
            "Startup",
            "OpenAPI sidecar starting: proxy port {}, service port {}, spec {}",
            settings.proxy_port,
            settings.service_port,
            settings.openapi_path
        );

        let spec = match self.spec.take() {
            Some(spec) => {
                log_debug("Startup", "Using prebuilt API description");
                spec
            }
            None => SpecLoader::new()
                .load(&settings.openapi_path, settings.service_port)
                .await
                .map_err(|e| log_error("Failed to load API description", e))?,
        };
        log_info("Startup", format!("Enforcing {} operations", spec.len()));

        let forwarder = ForwardingEngine::new(settings.service_port, settings.timeout())?;
        let mut core = ProxyCore::new(Arc::new(spec), forwarder).with_server_name(&settings.server_name)?;
        if let Some(policy) = self.authentication.take() {
            core = core.with_validator(RequestValidator::with_authentication(policy));
        }

        let server = ProxyServer::new(settings.server_config(), Arc::new(core));

        Ok(Sidecar {
            config: Arc::new(config),
            settings,
            server,
        })
    }
}

/// A fully initialised sidecar, ready to serve.
#[derive(Debug, Clone)]
pub struct Sidecar {
    config: Arc<Config>,
    settings: SidecarConfig,
    server: ProxyServer,
}

impl Sidecar {
    /// Create a new loader for initializing the sidecar.
    pub fn loader() -> SidecarLoader {
        SidecarLoader::new()
    }

    /// The raw layered configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The typed settings the sidecar was built from.
    pub fn settings(&self) -> &SidecarConfig {
        &self.settings
    }

    pub fn server(&self) -> &ProxyServer {
        &self.server
    }

    /// Start the proxy server.
    pub async fn start(&self) -> Result<(), LoaderError> {
        self.server.start().await.map_err(LoaderError::ProxyError)
    }
}
