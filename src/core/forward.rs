// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Forwarding of validated requests to the local backend.
//!
//! The outbound request reuses the inbound method, the raw path-and-query
//! (never a re-serialization of parsed parts), the end-to-end headers and
//! the body stream.  The backend's response comes back with its body still
//! unread, so large payloads are streamed through rather than buffered.
//! Nothing is retried: a failed exchange is final for that request.

use std::time::Duration;

use http_body_util::BodyExt;
use hyper::Uri;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::{debug, warn};
use reqwest::header::{self, HeaderMap, HeaderName};

use super::{ProxyError, ProxyRequest, ProxyResponse};

/// Headers that describe a single connection hop and must not be relayed.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Sends requests to the backend at a fixed base URL.
///
/// Uses hyper's client directly: the request target is handed over as an
/// already-parsed [`Uri`], so dot segments and query bytes reach the backend
/// exactly as the client sent them.
#[derive(Debug, Clone)]
pub struct ForwardingEngine {
    client: Client<HttpConnector, reqwest::Body>,
    base_url: String,
    timeout: Duration,
}

impl ForwardingEngine {
    /// Engine targeting `http://127.0.0.1:<service_port>`.
    pub fn new(service_port: u16, timeout: Duration) -> Result<Self, ProxyError> {
        Self::with_base_url(&format!("http://127.0.0.1:{service_port}"), timeout)
    }

    /// Engine targeting an arbitrary base URL (scheme, host and port only).
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ProxyError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let base: Uri = base_url
            .parse()
            .map_err(|e| ProxyError::Other(format!("invalid backend URL {base_url}: {e}")))?;
        if base.scheme_str() != Some("http") || base.authority().is_none() {
            return Err(ProxyError::Other(format!(
                "backend URL must be http://host:port, got {base_url}"
            )));
        }

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Outbound URI for a raw request target, bytes unchanged.
    pub fn target_url(&self, path_and_query: &str) -> Result<Uri, ProxyError> {
        format!("{}{}", self.base_url, path_and_query)
            .parse()
            .map_err(|e| ProxyError::Other(format!("invalid request target {path_and_query}: {e}")))
    }

    /// Execute `request` against the backend.
    ///
    /// The timeout covers the exchange up to the response head; the body is
    /// streamed afterwards for as long as the caller keeps reading it.
    pub async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let uri = self.target_url(&request.path_and_query)?;

        let mut headers = request.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        debug!("[{}] forwarding {} {}", request.info.trace_id, request.method, uri);

        let body = request.body.into_reqwest_body().unwrap_or_default();
        let mut outbound = hyper::Request::new(body);
        *outbound.method_mut() = request.method;
        *outbound.uri_mut() = uri;
        *outbound.headers_mut() = headers;

        let resp = tokio::time::timeout(self.timeout, self.client.request(outbound))
            .await
            .map_err(|_| {
                warn!("[{}] backend timed out after {:?}", request.info.trace_id, self.timeout);
                ProxyError::Timeout(self.timeout)
            })?
            .map_err(|e| {
                warn!("[{}] backend request failed: {}", request.info.trace_id, e);
                ProxyError::ClientError(e)
            })?;

        let (parts, body) = resp.into_parts();
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        Ok(ProxyResponse {
            status: parts.status.as_u16(),
            headers,
            body: reqwest::Body::wrap_stream(body.into_data_stream()),
        })
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
