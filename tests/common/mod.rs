// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common helpers for the sidecar integration tests.

use serde_json::{Value, json};
use sidecar::config::{ConfigError, ConfigProvider};
use sidecar::{ProxyError, Sidecar};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PETSTORE: &str = include_str!("../resources/petstore.yaml");

/// In-memory configuration keyed by dotted names
#[allow(dead_code)]
#[derive(Debug, Clone, Default)]
pub struct TestConfigProvider {
    values: HashMap<String, Value>,
}

#[allow(dead_code)]
impl TestConfigProvider {
    /// Required keys for a backend on `service_port`, spec served at `/petstore.yaml`
    pub fn for_backend(service_port: u16) -> Self {
        Self::default()
            .with("proxy.port", json!(0))
            .with("proxy.timeout", json!(2))
            .with("service.port", json!(service_port))
            .with("openapi.path", json!("/petstore.yaml"))
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

impl ConfigProvider for TestConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn provider_name(&self) -> &str {
        "test"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.values.get(key).cloned())
    }
}

/// A backend that serves the petstore description and nothing else yet.
pub async fn start_backend() -> MockServer {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/petstore.yaml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/yaml")
                .set_body_string(PETSTORE),
        )
        .mount(&backend)
        .await;
    backend
}

/// A running sidecar bound to an ephemeral port.
#[allow(dead_code)]
pub struct TestSidecar {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), ProxyError>>,
}

#[allow(dead_code)]
impl TestSidecar {
    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    /// Signal shutdown and wait for the server to drain.
    pub async fn stop(mut self) -> Result<(), ProxyError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle
            .await
            .map_err(|e| ProxyError::Other(e.to_string()))?
    }
}

/// Build a sidecar from `provider` and serve it until stopped.
pub async fn start_sidecar(provider: TestConfigProvider) -> TestSidecar {
    let sidecar = Sidecar::loader()
        .with_provider(provider)
        .build()
        .await
        .expect("sidecar should build");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = sidecar.server().clone();

    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
    });

    TestSidecar {
        addr,
        shutdown: Some(tx),
        handle,
    }
}

/// A port nothing listens on.
#[allow(dead_code)]
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
