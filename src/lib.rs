// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OpenAPI sidecar - a contract-enforcing reverse proxy for a single backend
//!
//! The sidecar sits in front of an HTTP service running on `127.0.0.1`,
//! loads the service's OpenAPI 3.x description once at startup and checks
//! every inbound request against it.  Conforming requests are streamed to
//! the backend unchanged; everything else is answered with a `400` and a
//! small JSON body, and never reaches the backend.
//!
//! # Pipeline
//!
//! - [`spec`] loads the description and turns it into an immutable
//!   [`SpecModel`] of operations.
//! - [`router`] resolves `(method, path)` to an operation and binds the path
//!   template's placeholders.
//! - [`validator`] checks parameters, the request body and security
//!   requirements of the matched operation.
//! - [`core`] drives match → validate → forward for one request.
//! - [`server`] owns the socket, the connection tasks and graceful shutdown.
//!
//! # Configuration
//!
//! Settings come from layered [`ConfigProvider`]s (file, environment, your
//! own).  The three required keys are `proxy.port`, `service.port` and
//! `openapi.path`, which the environment provides as `PROXY_PORT`,
//! `SERVICE_PORT` and `OPENAPI_PATH`.
//!
//! ```rust,no_run
//! use sidecar::Sidecar;
//!
//! # async fn run() -> Result<(), sidecar::LoaderError> {
//! let sidecar = Sidecar::loader().with_env_vars().build().await?;
//! sidecar.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Custom authentication
//!
//! Security requirements are delegated to an [`AuthenticationPolicy`].  The
//! default accepts everything; plug in your own when the sidecar should
//! check credentials itself:
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use sidecar::{AuthenticationPolicy, Operation, RequestParts, SecurityRequirement};
//!
//! #[derive(Debug)]
//! struct ApiKeyPresent;
//!
//! #[async_trait]
//! impl AuthenticationPolicy for ApiKeyPresent {
//!     fn name(&self) -> &str {
//!         "api_key_present"
//!     }
//!
//!     async fn authenticate(
//!         &self,
//!         _operation: &Operation,
//!         _requirement: &SecurityRequirement,
//!         parts: &RequestParts<'_>,
//!     ) -> Result<(), String> {
//!         if parts.headers.contains_key("api_key") {
//!             Ok(())
//!         } else {
//!             Err("api_key header missing".to_string())
//!         }
//!     }
//! }
//! ```

// Module declarations
pub mod config;
pub mod core;
pub mod loader;
pub mod logging;
pub mod router;
pub mod server;
pub mod spec;
pub mod validator;

// Re-export key types at the crate root for convenience
pub use config::{ConfigError, ConfigProvider, ConfigProviderExt, SidecarConfig};
pub use core::{
    ErrorMessage, ForwardingEngine, ProxyCore, ProxyError, ProxyRequest, ProxyResponse,
    RequestBody,
};
pub use loader::{LoaderError, Sidecar, SidecarLoader};
pub use router::{PathBinding, RouteError, RouteMatcher};
pub use server::{ProxyServer, ServerConfig};
pub use spec::{
    HttpMethod, Operation, Parameter, ParameterLocation, SecurityRequirement, SpecError,
    SpecLoader, SpecModel,
};
pub use validator::{
    AcceptAllAuthentication, AuthenticationPolicy, RequestParts, RequestValidator,
    ValidationError, ValidationErrorKind, ValidationResult,
};
