// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core primitives – requests, responses, errors & the per-request pipeline.
//!
//! Everything that physically moves through the sidecar is defined in this
//! module.  No socket handling lives here; that sits in `server` (IO).
//!
//! A request walks a strict sequence:
//!
//! ```text
//! Received → Matching → Validating ─┬─> Rejected            (400, backend untouched)
//!                                   └─> Forwarding → Responding → Done
//! ```
//!
//! [`ProxyCore::process_request`] drives the first three steps and returns
//! either the backend's [`ProxyResponse`] or a [`ProxyError`] that the
//! server maps onto an HTTP status.

pub mod forward;

#[cfg(test)]
mod tests;

pub use forward::ForwardingEngine;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use log::{debug, trace, warn};
use reqwest::header::{HeaderMap, HeaderValue, SERVER};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::structured::RequestInfo;
use crate::router::RouteMatcher;
use crate::spec::SpecModel;
use crate::validator::{RequestParts, RequestValidator, ValidationError, ValidationResult};

/// Value of the `Server` header added to forwarded responses by default.
pub const DEFAULT_SERVER_NAME: &str = "openapi-sidecar";

/// Errors that end the processing of a single request.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The request violates the contract; never empty, first entry is surfaced.
    #[error("{}", first_message(.0))]
    Rejected(Vec<ValidationError>),

    /// The inbound body could not be read while checking for its presence.
    #[error("failed to read request body: {0}")]
    RequestBody(io::Error),

    /// The backend could not be reached or the exchange failed.
    #[error("{0}")]
    ClientError(#[from] hyper_util::client::legacy::Error),

    /// The backend did not answer in time.
    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),

    /// The error body itself could not be encoded.
    #[error("failed to serialize error body: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

fn first_message(errors: &[ValidationError]) -> &str {
    errors.first().map_or("request rejected", |e| e.message.as_str())
}

impl ProxyError {
    /// HTTP status the server answers with for this error.
    pub fn status(&self) -> u16 {
        match self {
            ProxyError::Rejected(_) | ProxyError::RequestBody(_) => 400,
            ProxyError::ClientError(_) | ProxyError::Timeout(_) => 502,
            ProxyError::Serialization(_) | ProxyError::Other(_) => 500,
        }
    }
}

impl From<ValidationError> for ProxyError {
    fn from(err: ValidationError) -> Self {
        ProxyError::Rejected(vec![err])
    }
}

/// JSON body of a rejection: `{"code":"400","message":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
}

impl ErrorMessage {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: status.to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ProxyError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Byte stream of an inbound body.
pub type BodyStream = BoxStream<'static, Result<Bytes, io::Error>>;

/// Inbound request body that can be probed for presence without buffering.
///
/// Probing pulls at most the first non-empty chunk off the stream and keeps
/// it; the chunk is put back in front when the body is forwarded.
pub struct RequestBody {
    peeked: Option<Bytes>,
    stream: Option<BodyStream>,
}

impl RequestBody {
    /// A body known to be empty.
    pub fn empty() -> Self {
        Self {
            peeked: None,
            stream: None,
        }
    }

    /// A fully known body.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            peeked: (!bytes.is_empty()).then_some(bytes),
            stream: None,
        }
    }

    /// A body of unknown length.
    pub fn from_stream(stream: BodyStream) -> Self {
        Self {
            peeked: None,
            stream: Some(stream),
        }
    }

    /// Whether the body carries at least one byte.
    pub async fn is_present(&mut self) -> Result<bool, io::Error> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        while let Some(stream) = self.stream.as_mut() {
            match stream.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    self.peeked = Some(chunk);
                    return Ok(true);
                }
                Some(Err(e)) => return Err(e),
                None => self.stream = None,
            }
        }
        Ok(false)
    }

    /// Outbound body; `None` when the body is known to be empty.
    pub fn into_reqwest_body(self) -> Option<reqwest::Body> {
        match (self.peeked, self.stream) {
            (None, None) => None,
            (Some(bytes), None) => Some(reqwest::Body::from(bytes)),
            (peeked, Some(rest)) => {
                let head = stream::iter(peeked.map(Ok::<Bytes, io::Error>));
                Some(reqwest::Body::wrap_stream(head.chain(rest)))
            }
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("peeked", &self.peeked.as_ref().map(Bytes::len))
            .field("streaming", &self.stream.is_some())
            .finish()
    }
}

/// An inbound request as seen by the pipeline.
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: reqwest::Method,
    /// Raw path, without query.
    pub path: String,
    pub query: Option<String>,
    /// Path and query exactly as received on the wire.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub info: RequestInfo,
}

impl ProxyRequest {
    /// Build a request from a raw request target such as `/pet?x=1`.
    pub fn new(method: reqwest::Method, path_and_query: &str, headers: HeaderMap, body: RequestBody) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path_and_query.to_string(), None),
        };
        let info = RequestInfo::new(
            method.to_string(),
            path.clone(),
            "unknown".to_string(),
            String::new(),
        );
        Self {
            method,
            path,
            query,
            path_and_query: path_and_query.to_string(),
            headers,
            body,
            info,
        }
    }

    /// Replace the logging context.
    pub fn with_info(mut self, info: RequestInfo) -> Self {
        self.info = info;
        self
    }
}

/// The backend's answer, with an unread body stream.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: reqwest::Body,
}

/// The per-request pipeline: match → validate → forward.
///
/// Holds only read-only state, so a single instance is shared by every
/// connection task.
#[derive(Debug, Clone)]
pub struct ProxyCore {
    matcher: RouteMatcher,
    validator: RequestValidator,
    forwarder: ForwardingEngine,
    server_header: HeaderValue,
}

impl ProxyCore {
    /// Create a core over `spec` that forwards with `forwarder`.
    pub fn new(spec: Arc<SpecModel>, forwarder: ForwardingEngine) -> Self {
        Self {
            matcher: RouteMatcher::new(spec),
            validator: RequestValidator::new(),
            forwarder,
            server_header: HeaderValue::from_static(DEFAULT_SERVER_NAME),
        }
    }

    /// Use a specific validator (e.g. a different authentication policy).
    pub fn with_validator(mut self, validator: RequestValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Set the `Server` header value added to forwarded responses.
    pub fn with_server_name(mut self, name: &str) -> Result<Self, ProxyError> {
        self.server_header = HeaderValue::from_str(name)
            .map_err(|e| ProxyError::Other(format!("invalid server name '{name}': {e}")))?;
        Ok(self)
    }

    pub fn matcher(&self) -> &RouteMatcher {
        &self.matcher
    }

    pub fn forwarder(&self) -> &ForwardingEngine {
        &self.forwarder
    }

    /// Match and validate a request without forwarding it.
    ///
    /// May pull the first body chunk to decide whether a body is present;
    /// the request stays forwardable afterwards.  Only an unreadable inbound
    /// body is reported as an error; contract violations are part of the
    /// returned [`ValidationResult`].
    pub async fn validate(&self, request: &mut ProxyRequest) -> Result<ValidationResult, ProxyError> {
        let (operation, binding) = match self.matcher.match_route(&request.method, &request.path) {
            Ok(found) => found,
            Err(e) => return Ok(ValidationResult::Invalid(vec![e.into()])),
        };
        trace!(
            "[{}] {} {} matched {}",
            request.info.trace_id,
            request.method,
            request.path,
            operation.display_name()
        );

        let body_present = match &operation.request_body {
            Some(_) => request.body.is_present().await.map_err(|e| {
                warn!("[{}] Failed to read request body: {}", request.info.trace_id, e);
                ProxyError::RequestBody(e)
            })?,
            None => false,
        };

        let parts = RequestParts {
            query: request.query.as_deref(),
            headers: &request.headers,
            body_present,
        };
        Ok(self.validator.validate(operation, &binding, &parts).await)
    }

    /// Run the whole pipeline for one request.
    pub async fn process_request(&self, mut request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let started = Instant::now();

        if let ValidationResult::Invalid(errors) = self.validate(&mut request).await? {
            debug!(
                "[{}] {} {} rejected with {} violation(s): {:?}",
                request.info.trace_id,
                request.method,
                request.path,
                errors.len(),
                errors.iter().map(|e| format!("{}: {}", e.kind, e.message)).collect::<Vec<_>>()
            );
            return Err(ProxyError::Rejected(errors));
        }

        let trace_id = request.info.trace_id.clone();
        let mut response = self.forwarder.forward(request).await?;
        response.headers.insert(SERVER, self.server_header.clone());

        debug!(
            "[{}] backend answered {} in {:?}",
            trace_id,
            response.status,
            started.elapsed()
        );
        Ok(response)
    }
}
