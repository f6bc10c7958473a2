// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed view of the sidecar's configuration keys.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};
use crate::core::DEFAULT_SERVER_NAME;
use crate::logging::config::LoggingConfig;
use crate::server::ServerConfig;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Everything the sidecar needs to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarConfig {
    /// Address the proxy listens on.
    pub proxy_host: String,
    /// Port the proxy listens on (`proxy.port`).
    pub proxy_port: u16,
    /// Port of the backend on 127.0.0.1 (`service.port`).
    pub service_port: u16,
    /// Location of the API description (`openapi.path`).
    pub openapi_path: String,
    /// Backend exchange timeout in seconds (`proxy.timeout`).
    pub timeout_secs: u64,
    /// Value of the `Server` header on forwarded responses (`proxy.name`).
    pub server_name: String,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SidecarConfig {
    /// A configuration with defaults for every optional key.
    pub fn new(proxy_port: u16, service_port: u16, openapi_path: &str) -> Self {
        Self {
            proxy_host: DEFAULT_HOST.to_string(),
            proxy_port,
            service_port,
            openapi_path: openapi_path.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            logging: LoggingConfig::default(),
        }
    }

    /// Read the sidecar keys from a layered [`Config`].
    ///
    /// `proxy.port`, `service.port` and `openapi.path` are required.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let proxy_port = required(config, "proxy.port")?;
        let service_port = required(config, "service.port")?;
        let openapi_path: String = required(config, "openapi.path")?;

        let mut logging: LoggingConfig = config.get_or_default("logging", LoggingConfig::default())?;
        if let Some(level) = config.get::<String>("logging.level")? {
            logging.level = level;
        }
        if let Some(format) = config.get::<String>("logging.format")? {
            logging.format = format;
        }
        if let Some(structured) = config.get::<bool>("logging.structured")? {
            logging.structured = structured;
        }

        Ok(Self {
            proxy_host: config.get_or_default("proxy.host", DEFAULT_HOST.to_string())?,
            proxy_port,
            service_port,
            openapi_path,
            timeout_secs: config.get_or_default("proxy.timeout", DEFAULT_TIMEOUT_SECS)?,
            server_name: config.get_or_default("proxy.name", DEFAULT_SERVER_NAME.to_string())?,
            logging,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Listener settings for the HTTP server.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.proxy_host.clone(),
            port: self.proxy_port,
            trace_id_header: self
                .logging
                .propagate_trace_id
                .then(|| self.logging.trace_id_header.clone()),
        }
    }
}

fn required<T: serde::de::DeserializeOwned>(config: &Config, key: &str) -> Result<T, ConfigError> {
    config
        .get(key)?
        .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
}
