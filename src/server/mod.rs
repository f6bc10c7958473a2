// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP server for the sidecar.
//!
//! The server is a *thin* wrapper around **hyper-util**.  It owns the
//! listening socket and translates between Hyper's body types and the
//! [`ProxyRequest`] / [`ProxyResponse`] types that the core uses.
//!
//! **Protocol support**
//! Uses `hyper_util::server::conn::auto::Builder`, so the same
//! connection transparently handles both HTTP/1.1 *and* HTTP/2.
//!
//! ## Body streaming
//! Inbound bodies are streamed straight into the backend connection and
//! backend bodies straight back to the client.  At most the first chunk of
//! an inbound body is held while checking that a required body is present.
//!
//! ## Error mapping
//! | outcome | status | body |
//! |---------|--------|------|
//! | contract violation | 400 | `{"code":"400","message":"…"}` (JSON) |
//! | backend unreachable / timed out | 502 | plain text |
//! | anything else | 500 | plain text |


use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, TryStreamExt};
use http_body_util::BodyExt;
use hyper::body::{Body as _, Incoming};
use hyper::header::{self, HeaderValue};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use log::{debug, error, info, trace, warn};
use reqwest::Body;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::core::{ErrorMessage, ProxyCore, ProxyError, ProxyRequest, ProxyResponse, RequestBody};
use crate::logging::is_structured_logging;
use crate::logging::structured::{RequestInfo, with_request_context};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long open connections get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Configuration for the HTTP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Inbound header whose value becomes the request's trace id
    #[serde(default)]
    pub trace_id_header: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            host: default_host(),
            port,
            trace_id_header: None,
        }
    }
}

/// HTTP server for the sidecar.
#[derive(Debug, Clone)]
pub struct ProxyServer {
    config: ServerConfig,
    core: Arc<ProxyCore>,
    trace_header: Option<Arc<str>>,
}

impl ProxyServer {
    /// Create a new proxy server with the given configuration and proxy core.
    pub fn new(config: ServerConfig, core: Arc<ProxyCore>) -> Self {
        let trace_header = config
            .trace_id_header
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(Arc::from);
        Self {
            config,
            core,
            trace_header,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn core(&self) -> &Arc<ProxyCore> {
        &self.core
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM.
    pub async fn start(&self) -> Result<(), ProxyError> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| {
                ProxyError::Other(format!(
                    "Failed to bind {}:{}: {}",
                    self.config.host, self.config.port, e
                ))
            })?;

        // On Unix, install the SIGTERM stream before accepting anything
        #[cfg(unix)]
        let mut term_stream = signal(SignalKind::terminate())
            .map_err(|e| ProxyError::Other(format!("Cannot install SIGTERM handler: {}", e)))?;

        let shutdown = async move {
            #[cfg(unix)]
            let sigterm = term_stream.recv();
            #[cfg(not(unix))]
            let sigterm = std::future::pending::<Option<()>>();

            tokio::select! {
                _ = signal::ctrl_c() => info!("Received Ctrl-C; initiating graceful shutdown"),
                _ = sigterm => info!("Received SIGTERM; initiating graceful shutdown"),
            }
        };

        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener` until `shutdown` completes, then
    /// drain the open connections.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()> + Send,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(
                "OpenAPI sidecar listening on http://{} (backend {})",
                addr,
                self.core.forwarder().base_url()
            );
        }

        let (drain_tx, drain_rx) = watch::channel(false);
        let mut join_set = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accept = listener.accept() => {
                    match accept {
                        Ok((stream, remote_addr)) => {
                            let core = self.core.clone();
                            let trace_header = self.trace_header.clone();
                            let mut drain = drain_rx.clone();

                            join_set.spawn(async move {
                                let service = service_fn(move |req: Request<Incoming>| {
                                    trace!("Incoming over {:?}", req.version());
                                    handle_request(req, core.clone(), remote_addr, trace_header.clone())
                                });
                                let builder = AutoBuilder::new(TokioExecutor::new());
                                let conn = builder.serve_connection(TokioIo::new(stream), service);
                                let mut conn = std::pin::pin!(conn);

                                tokio::select! {
                                    res = &mut conn => log_connection_result(res),
                                    _ = drain.changed() => {
                                        debug!("Connection from {} draining", remote_addr);
                                        conn.as_mut().graceful_shutdown();
                                        log_connection_result(conn.await);
                                    }
                                }
                            });
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                Some(res) = join_set.join_next(), if !join_set.is_empty() => {
                    if let Err(e) = res {
                        if !e.is_cancelled() {
                            error!("Connection task failed: {}", e);
                        }
                    }
                }
            }
        }

        // Stop accepting connections and ask the open ones to finish
        drop(listener);
        info!("Shutting down; waiting for {} connection(s)", join_set.len());
        let _ = drain_tx.send(true);

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Some(res) = join_set.join_next().await {
                if let Err(e) = res {
                    if !e.is_cancelled() {
                        error!("Connection task failed during shutdown: {}", e);
                    }
                }
            }
        })
        .await;

        match drained {
            Ok(()) => info!("All connections drained"),
            Err(_) => {
                warn!(
                    "Shutdown timed out after {} seconds, closing remaining connections",
                    DRAIN_TIMEOUT.as_secs()
                );
                join_set.shutdown().await;
            }
        }

        info!("Shutdown complete");
        Ok(())
    }
}

fn log_connection_result<E: std::fmt::Display>(res: Result<(), E>) {
    match res {
        Ok(()) => trace!("Connection closed normally"),
        Err(e) => {
            let err_str = e.to_string();
            if !err_str.contains("connection closed") && !err_str.contains("connection reset") {
                debug!("Connection error: {}", e);
            }
        }
    }
}

/// Convert a hyper request to a proxy request.
///
/// The raw path-and-query is kept verbatim so the backend sees exactly the
/// request target the client sent.
fn convert_hyper_request(
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    trace_header: Option<&str>,
) -> ProxyRequest {
    let (parts, incoming) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let body = if incoming.is_end_stream() {
        RequestBody::empty()
    } else {
        let stream = TryStreamExt::map_err(incoming.into_data_stream(), io::Error::other);
        RequestBody::from_stream(StreamExt::boxed(stream))
    };

    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let request = ProxyRequest::new(parts.method, &path_and_query, parts.headers, body);

    let mut info = RequestInfo::new(
        request.method.to_string(),
        request.path.clone(),
        remote_addr.to_string(),
        user_agent,
    );
    if let Some(trace_id) = trace_header
        .and_then(|name| request.headers.get(name))
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        info = info.with_trace_id(trace_id);
    }

    request.with_info(info)
}

/// Convert a proxy response to a hyper response.
fn convert_proxy_response(resp: ProxyResponse) -> Result<Response<Body>, ProxyError> {
    let status = StatusCode::from_u16(resp.status)
        .map_err(|e| ProxyError::Other(format!("invalid backend status {}: {}", resp.status, e)))?;

    let mut response = Response::new(resp.body);
    *response.status_mut() = status;
    *response.headers_mut() = resp.headers;
    Ok(response)
}

/// Build the client-facing response for a failed request.
fn error_response(err: &ProxyError) -> Response<Body> {
    match err {
        ProxyError::Rejected(_) | ProxyError::RequestBody(_) => {
            let status = err.status();
            match ErrorMessage::new(status, err.to_string()).to_json() {
                Ok(json) => with_body(status, JSON_CONTENT_TYPE, json),
                Err(e) => {
                    error!("Failed to encode error body: {}", e);
                    text_response(500, &e.to_string())
                }
            }
        }
        _ => text_response(err.status(), &err.to_string()),
    }
}

fn text_response(status: u16, message: &str) -> Response<Body> {
    let mut response = with_body(status, TEXT_CONTENT_TYPE, format!("{message}\n").into_bytes());
    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

fn with_body(status: u16, content_type: &'static str, body: Vec<u8>) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Handle an incoming HTTP request.
async fn handle_request(
    req: Request<Incoming>,
    core: Arc<ProxyCore>,
    remote_addr: SocketAddr,
    trace_header: Option<Arc<str>>,
) -> Result<Response<Body>, Infallible> {
    let proxy_req = convert_hyper_request(req, remote_addr, trace_header.as_deref());
    let info = proxy_req.info.clone();
    log_request(&info);

    let response = match core.process_request(proxy_req).await {
        Ok(proxy_resp) => match convert_proxy_response(proxy_resp) {
            Ok(resp) => resp,
            Err(e) => {
                error!("[{}] Failed to convert response: {}", info.trace_id, e);
                error_response(&e)
            }
        },
        Err(e) => {
            log_failure(&info, &e);
            error_response(&e)
        }
    };

    log_response(&info, response.status().as_u16());
    Ok(response)
}

fn log_request(info: &RequestInfo) {
    if is_structured_logging() {
        let logger = with_request_context(&slog_scope::logger(), info);
        slog::debug!(logger, "Request received");
    } else {
        debug!(
            "Request received: {} {} from {} (trace_id: {})",
            info.method, info.path, info.remote_addr, info.trace_id
        );
    }
}

fn log_failure(info: &RequestInfo, err: &ProxyError) {
    match err {
        ProxyError::Rejected(_) | ProxyError::RequestBody(_) => warn!(
            "[{}] Rejected {} {}: {}",
            info.trace_id, info.method, info.path, err
        ),
        ProxyError::ClientError(_) | ProxyError::Timeout(_) => warn!(
            "[{}] Backend failure for {} {}: {}",
            info.trace_id, info.method, info.path, err
        ),
        _ => error!(
            "[{}] Internal error processing {} {}: {}",
            info.trace_id, info.method, info.path, err
        ),
    }
}

fn log_response(info: &RequestInfo, status: u16) {
    let elapsed_ms = info.elapsed_ms();
    if is_structured_logging() {
        let logger = slog_scope::logger();
        slog::info!(logger, "Response completed";
            "trace_id" => &info.trace_id,
            "method" => &info.method,
            "path" => &info.path,
            "status" => status,
            "elapsed_ms" => elapsed_ms as u64
        );
    } else {
        info!(
            "[timing] {} {} -> {} | total={}ms (trace_id: {})",
            info.method, info.path, status, elapsed_ms, info.trace_id
        );
    }
}
