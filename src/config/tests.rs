// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[cfg(test)]
mod tests {
    use crate::config::{
        Config, ConfigError, ConfigProvider, FileConfigProvider, FileFormat, SidecarConfig,
    };
    use serde_json::{Value, json};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    // Simple in-memory provider keyed by dotted names
    #[derive(Debug)]
    struct MockConfigProvider {
        values: serde_json::Map<String, Value>,
        name: String,
    }

    impl MockConfigProvider {
        fn new(name: &str) -> Self {
            Self {
                values: serde_json::Map::new(),
                name: name.to_string(),
            }
        }

        fn with(mut self, key: &str, value: Value) -> Self {
            self.values.insert(key.to_string(), value);
            self
        }
    }

    impl ConfigProvider for MockConfigProvider {
        fn has(&self, key: &str) -> bool {
            self.values.contains_key(key)
        }

        fn provider_name(&self) -> &str {
            &self.name
        }

        fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
            Ok(self.values.get(key).cloned())
        }
    }

    fn temp_config(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn required_keys(name: &str) -> MockConfigProvider {
        MockConfigProvider::new(name)
            .with("proxy.port", json!(8000))
            .with("service.port", json!(8080))
            .with("openapi.path", json!("/openapi.yaml"))
    }

    #[test]
    fn test_later_provider_wins() {
        let config = Config::builder()
            .with_provider(required_keys("first").with("proxy.host", json!("127.0.0.1")))
            .with_provider(MockConfigProvider::new("second").with("proxy.port", json!(9000)))
            .build();

        assert_eq!(config.get::<u16>("proxy.port").unwrap(), Some(9000));
        assert_eq!(
            config.get::<String>("proxy.host").unwrap().as_deref(),
            Some("127.0.0.1")
        );
    }

    #[test]
    fn test_config_get_or_default() {
        let config = Config::builder().with_provider(required_keys("test")).build();

        assert_eq!(config.get_or_default("proxy.port", 1234).unwrap(), 8000);
        assert_eq!(config.get_or_default("proxy.timeout", 30u64).unwrap(), 30);
    }

    #[test]
    fn test_type_mismatch_is_parse_error() {
        let config = Config::builder()
            .with_provider(MockConfigProvider::new("test").with("proxy.port", json!("eighty")))
            .build();

        match config.get::<u16>("proxy.port") {
            Err(ConfigError::ParseError(msg)) => assert!(msg.contains("proxy.port")),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_sidecar_config_defaults() {
        let config = Config::builder().with_provider(required_keys("test")).build();
        let sidecar = SidecarConfig::from_config(&config).unwrap();

        assert_eq!(sidecar, SidecarConfig::new(8000, 8080, "/openapi.yaml"));
        assert_eq!(sidecar.proxy_host, "0.0.0.0");
        assert_eq!(sidecar.timeout(), Duration::from_secs(30));
        assert_eq!(sidecar.server_name, "openapi-sidecar");
    }

    #[test]
    fn test_sidecar_config_missing_required_key() {
        let config = Config::builder()
            .with_provider(
                MockConfigProvider::new("test")
                    .with("proxy.port", json!(8000))
                    .with("service.port", json!(8080)),
            )
            .build();

        match SidecarConfig::from_config(&config) {
            Err(ConfigError::MissingKey(key)) => assert_eq!(key, "openapi.path"),
            other => panic!("expected MissingKey, got {other:?}"),
        }
    }

    #[test]
    fn test_sidecar_config_overrides() {
        let config = Config::builder()
            .with_provider(
                required_keys("test")
                    .with("proxy.host", json!("127.0.0.1"))
                    .with("proxy.timeout", json!(5))
                    .with("proxy.name", json!("contract-guard"))
                    .with("logging.level", json!("debug")),
            )
            .build();
        let sidecar = SidecarConfig::from_config(&config).unwrap();

        assert_eq!(sidecar.timeout(), Duration::from_secs(5));
        assert_eq!(sidecar.server_name, "contract-guard");
        assert_eq!(sidecar.logging.level, "debug");

        let server = sidecar.server_config();
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 8000);
        assert_eq!(server.trace_id_header.as_deref(), Some("X-Trace-ID"));
    }

    #[test]
    fn test_file_provider_toml_nested_keys() {
        let file = temp_config(
            ".toml",
            r#"
            [proxy]
            port = 8000
            timeout = 10

            [service]
            port = 8080

            [openapi]
            path = "/openapi.yaml"

            [logging]
            structured = true
            format = "json"
            "#,
        );
        let provider = FileConfigProvider::new(file.path().to_str().unwrap()).unwrap();
        assert_eq!(provider.format(), FileFormat::Toml);
        assert!(provider.has("proxy.timeout"));
        assert!(!provider.has("proxy.name"));

        let config = Config::builder().with_provider(provider).build();
        let sidecar = SidecarConfig::from_config(&config).unwrap();
        assert_eq!(sidecar.proxy_port, 8000);
        assert_eq!(sidecar.timeout_secs, 10);
        assert!(sidecar.logging.structured);
        assert_eq!(sidecar.logging.format, "json");
    }

    #[test]
    fn test_file_provider_yaml_and_json() {
        let yaml = temp_config(".yaml", "proxy:\n  port: 7000\n");
        let config = Config::default_file(yaml.path().to_str().unwrap()).unwrap();
        assert_eq!(config.get::<u16>("proxy.port").unwrap(), Some(7000));

        let json_file = temp_config(".json", r#"{"service": {"port": 7001}}"#);
        let config = Config::default_file(json_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.get::<u16>("service.port").unwrap(), Some(7001));
    }

    #[test]
    fn test_file_provider_rejects_unknown_extension_and_scalars() {
        let ini = temp_config(".ini", "port=1");
        assert!(matches!(
            FileConfigProvider::new(ini.path().to_str().unwrap()),
            Err(ConfigError::ProviderError { .. })
        ));

        let scalar = temp_config(".json", "42");
        assert!(matches!(
            FileConfigProvider::new(scalar.path().to_str().unwrap()),
            Err(ConfigError::ProviderError { .. })
        ));

        assert!(FileConfigProvider::new("/definitely/not/here.toml").is_err());
    }
}
