// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Environment variable-based configuration provider implementation.
//!
//! Variable names are mapped to dotted keys by stripping the prefix,
//! lowercasing and turning underscores into dots, so with the default
//! (empty) prefix `PROXY_PORT` becomes `proxy.port` and `OPENAPI_PATH`
//! becomes `openapi.path`.

use std::collections::HashMap;
use std::env;

use serde_json::{Value, json};

use super::ConfigError;
use super::ConfigProvider;

/// Configuration provider that retrieves values from environment variables.
#[derive(Debug)]
pub struct EnvConfigProvider {
    /// Prefix for environment variables; empty matches every variable.
    prefix: String,
    /// Cache of environment variables that match the prefix.
    cache: HashMap<String, String>,
}

impl EnvConfigProvider {
    /// Create a new environment variable configuration provider with the specified prefix.
    pub fn new(prefix: &str) -> Self {
        let mut provider = Self {
            prefix: prefix.to_string(),
            cache: HashMap::new(),
        };

        provider.refresh_cache();

        provider
    }

    /// Refresh the cache of environment variables.
    pub fn refresh_cache(&mut self) {
        self.cache.clear();

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(&self.prefix) {
                let config_key = stripped.to_lowercase().replace('_', ".");
                self.cache.insert(config_key, value);
            }
        }
    }

    /// Parse a string value into a JSON Value.
    fn parse_value_to_json(&self, value: &str) -> Value {
        // Try to parse as JSON first
        if let Ok(json_value) = serde_json::from_str(value) {
            return json_value;
        }

        if value.eq_ignore_ascii_case("true") {
            return json!(true);
        } else if value.eq_ignore_ascii_case("false") {
            return json!(false);
        }

        if let Ok(int_val) = value.parse::<i64>() {
            return json!(int_val);
        }

        if let Ok(float_val) = value.parse::<f64>() {
            return json!(float_val);
        }

        json!(value)
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new("")
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.cache.get(key).map(|value| self.parse_value_to_json(value)))
    }

    fn has(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    fn provider_name(&self) -> &str {
        "env"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigProviderExt;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_default_prefix_maps_sidecar_variables() {
        unsafe {
            env::set_var("PROXY_PORT", "8000");
            env::set_var("SERVICE_PORT", "8080");
            env::set_var("OPENAPI_PATH", "/openapi.yaml");
        }

        let provider = EnvConfigProvider::default();

        let proxy_port: u16 = provider.get("proxy.port").unwrap().unwrap();
        assert_eq!(proxy_port, 8000);

        let service_port: u16 = provider.get("service.port").unwrap().unwrap();
        assert_eq!(service_port, 8080);

        let path: String = provider.get("openapi.path").unwrap().unwrap();
        assert_eq!(path, "/openapi.yaml");

        unsafe {
            env::remove_var("PROXY_PORT");
            env::remove_var("SERVICE_PORT");
            env::remove_var("OPENAPI_PATH");
        }
    }

    #[test]
    #[serial]
    fn test_custom_prefix() {
        unsafe {
            env::set_var("SIDECAR_TEST_PROXY_HOST", "127.0.0.1");
        }

        let provider = EnvConfigProvider::new("SIDECAR_TEST_");

        assert!(provider.has("proxy.host"));
        assert!(!provider.has("sidecar.test.proxy.host"));
        let host: String = provider.get("proxy.host").unwrap().unwrap();
        assert_eq!(host, "127.0.0.1");

        unsafe {
            env::remove_var("SIDECAR_TEST_PROXY_HOST");
        }
    }

    #[test]
    #[serial]
    fn test_cache_refresh() {
        let mut provider = EnvConfigProvider::new("SIDECAR_REFRESH_");
        assert!(!provider.has("value"));

        unsafe {
            env::set_var("SIDECAR_REFRESH_VALUE", "42");
        }

        // Still cached
        assert!(!provider.has("value"));

        provider.refresh_cache();
        let value: i32 = provider.get("value").unwrap().unwrap();
        assert_eq!(value, 42);

        unsafe {
            env::remove_var("SIDECAR_REFRESH_VALUE");
        }
    }

    #[test]
    #[serial]
    fn test_different_value_types() {
        unsafe {
            env::set_var("SIDECAR_TYPES_STRING", "hello world");
            env::set_var("SIDECAR_TYPES_FLOAT", "2.5");
            env::set_var("SIDECAR_TYPES_FLAG", "TRUE");
            env::set_var("SIDECAR_TYPES_LIST", "[1, 2, 3]");
            env::set_var("SIDECAR_TYPES_BROKEN", "{invalid json}");
        }

        let provider = EnvConfigProvider::new("SIDECAR_TYPES_");

        let string_val: String = provider.get("string").unwrap().unwrap();
        assert_eq!(string_val, "hello world");

        let float_val: f64 = provider.get("float").unwrap().unwrap();
        assert_eq!(float_val, 2.5);

        let flag: bool = provider.get("flag").unwrap().unwrap();
        assert!(flag);

        let list: Vec<i32> = provider.get("list").unwrap().unwrap();
        assert_eq!(list, vec![1, 2, 3]);

        let broken: String = provider.get("broken").unwrap().unwrap();
        assert_eq!(broken, "{invalid json}");

        unsafe {
            env::remove_var("SIDECAR_TYPES_STRING");
            env::remove_var("SIDECAR_TYPES_FLOAT");
            env::remove_var("SIDECAR_TYPES_FLAG");
            env::remove_var("SIDECAR_TYPES_LIST");
            env::remove_var("SIDECAR_TYPES_BROKEN");
        }
    }

    #[test]
    fn test_missing_key() {
        let provider = EnvConfigProvider::new("SIDECAR_NONEXISTENT_PREFIX_");

        assert!(!provider.has("any.key"));
        let result: Option<String> = provider.get("any.key").unwrap();
        assert!(result.is_none());
        assert_eq!(provider.provider_name(), "env");
    }
}
