// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory API contract.
//!
//! A [`SpecModel`] is the immutable, already-validated view of an OpenAPI
//! document that the rest of the sidecar works against: a set of
//! [`Operation`]s keyed by `(method, path template)` plus the base paths
//! declared under `servers`.  It is built once at startup by the
//! [`SpecLoader`] and shared behind an `Arc` for the lifetime of the process.
//!
//! The constructor enforces the load-time invariants so that the request
//! hot path can assume them:
//!
//! * no two operations share a method and a *normalized* template
//!   (`/pet/{id}` and `/pet/{petId}/` are the same route),
//! * every placeholder in a template is declared as a path parameter and
//!   every declared path parameter appears in the template.

pub mod loader;
mod template;


pub use loader::{SpecLoader, SpecSource};
pub use template::{PathTemplate, Segment, Specificity};
pub(crate) use template::split_path;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while loading or validating an API description.
///
/// All of these are fatal at startup; none can occur while serving.
#[derive(Error, Debug)]
pub enum SpecError {
    /// The document could not be read from disk.
    #[error("failed to read API description: {0}")]
    Io(#[from] std::io::Error),

    /// The document could not be fetched over HTTP.
    #[error("failed to fetch API description: {0}")]
    Fetch(#[from] reqwest::Error),

    /// The document location was fetched but returned a non-success status.
    #[error("failed to fetch API description from {location}: HTTP {status}")]
    FetchStatus { location: String, status: u16 },

    /// The document is not valid YAML/JSON or does not have the OpenAPI shape.
    #[error("failed to parse API description: {0}")]
    Parse(String),

    /// The `openapi` field is not a 3.x version.
    #[error("unsupported OpenAPI version '{0}', expected 3.x")]
    UnsupportedVersion(String),

    /// A `$ref` could not be resolved.
    #[error("invalid reference '{0}'")]
    InvalidReference(String),

    /// A path template is syntactically invalid.
    #[error("invalid path template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// The same operation is declared twice.
    #[error("duplicate operation {method} {template}")]
    DuplicateOperation { method: HttpMethod, template: String },

    /// Two templates are indistinguishable for the same method.
    #[error("ambiguous routes for {method}: '{first}' and '{second}'")]
    AmbiguousRoute {
        method: HttpMethod,
        first: String,
        second: String,
    },

    /// A template placeholder has no matching `in: path` parameter.
    #[error("operation {method} {template} does not declare path parameter '{name}'")]
    UndeclaredPathParameter {
        method: HttpMethod,
        template: String,
        name: String,
    },

    /// A declared `in: path` parameter does not appear in the template.
    #[error("operation {method} {template} declares path parameter '{name}' missing from the template")]
    MissingPathParameter {
        method: HttpMethod,
        template: String,
        name: String,
    },
}

/// HTTP methods an OpenAPI path item can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    /// All methods in the order they are read from a path item.
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::Get,
        HttpMethod::Put,
        HttpMethod::Post,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Head,
        HttpMethod::Patch,
        HttpMethod::Trace,
    ];

    /// Map a wire method onto a contract method.
    ///
    /// Methods OpenAPI cannot describe (`CONNECT`, extension methods) yield
    /// `None` and therefore never match an operation.
    pub fn from_method(method: &reqwest::Method) -> Option<Self> {
        match *method {
            reqwest::Method::GET => Some(HttpMethod::Get),
            reqwest::Method::PUT => Some(HttpMethod::Put),
            reqwest::Method::POST => Some(HttpMethod::Post),
            reqwest::Method::DELETE => Some(HttpMethod::Delete),
            reqwest::Method::OPTIONS => Some(HttpMethod::Options),
            reqwest::Method::HEAD => Some(HttpMethod::Head),
            reqwest::Method::PATCH => Some(HttpMethod::Patch),
            reqwest::Method::TRACE => Some(HttpMethod::Trace),
            _ => None,
        }
    }

    /// The key used for this method inside an OpenAPI path item.
    pub fn spec_key(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Put => "put",
            HttpMethod::Post => "post",
            HttpMethod::Delete => "delete",
            HttpMethod::Options => "options",
            HttpMethod::Head => "head",
            HttpMethod::Patch => "patch",
            HttpMethod::Trace => "trace",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec_key().to_ascii_uppercase())
    }
}

/// Where a parameter lives in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterLocation::Path => write!(f, "path"),
            ParameterLocation::Query => write!(f, "query"),
            ParameterLocation::Header => write!(f, "header"),
            ParameterLocation::Cookie => write!(f, "cookie"),
        }
    }
}

/// Primitive JSON-schema types a parameter value can be coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Integer,
    Number,
    Boolean,
}

/// Declared shape of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    /// A single primitive value.
    Scalar(SchemaType),
    /// A list of primitive values.
    Array(SchemaType),
}

impl ParameterType {
    /// The primitive type of the value, or of each item for arrays.
    pub fn item_type(&self) -> SchemaType {
        match self {
            ParameterType::Scalar(t) | ParameterType::Array(t) => *t,
        }
    }
}

impl Default for ParameterType {
    fn default() -> Self {
        ParameterType::Scalar(SchemaType::String)
    }
}

/// A declared operation parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub param_type: ParameterType,
    /// Allowed values; empty means unrestricted.
    pub enum_values: Vec<Value>,
}

impl Parameter {
    /// Convenience constructor for an unrestricted scalar parameter.
    pub fn new(name: &str, location: ParameterLocation, required: bool, schema_type: SchemaType) -> Self {
        Self {
            name: name.to_string(),
            location,
            // path parameters are always required
            required: required || location == ParameterLocation::Path,
            param_type: ParameterType::Scalar(schema_type),
            enum_values: Vec::new(),
        }
    }

    /// Turn this parameter into an array of its current item type.
    pub fn array(mut self) -> Self {
        self.param_type = ParameterType::Array(self.param_type.item_type());
        self
    }

    /// Restrict the allowed values.
    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = values;
        self
    }
}

/// Request-body requirement of an operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestBodySpec {
    pub required: bool,
    /// Accepted media types, as declared under `content`.
    pub content_types: Vec<String>,
}

/// One alternative of an operation's `security` list.
pub type SecurityRequirement = BTreeMap<String, Vec<String>>;

/// A declared `(method, path template)` pair with its constraints.
#[derive(Debug, Clone)]
pub struct Operation {
    pub method: HttpMethod,
    pub template: PathTemplate,
    pub operation_id: Option<String>,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBodySpec>,
    pub security: Vec<SecurityRequirement>,
}

impl Operation {
    /// Create an operation with no parameters, body or security.
    pub fn new(method: HttpMethod, template: &str) -> Result<Self, SpecError> {
        Ok(Self {
            method,
            template: PathTemplate::parse(template)?,
            operation_id: None,
            parameters: Vec::new(),
            request_body: None,
            security: Vec::new(),
        })
    }

    /// Add a parameter, keeping declaration order.
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Declare a request body.
    pub fn with_request_body(mut self, body: RequestBodySpec) -> Self {
        self.request_body = Some(body);
        self
    }

    /// Declare a security requirement alternative.
    pub fn with_security(mut self, requirement: SecurityRequirement) -> Self {
        self.security.push(requirement);
        self
    }

    /// Human-readable identifier for logs.
    pub fn display_name(&self) -> String {
        match &self.operation_id {
            Some(id) => format!("{} {} ({})", self.method, self.template, id),
            None => format!("{} {}", self.method, self.template),
        }
    }

    fn check_path_parameters(&self) -> Result<(), SpecError> {
        let declared: HashSet<&str> = self
            .parameters
            .iter()
            .filter(|p| p.location == ParameterLocation::Path)
            .map(|p| p.name.as_str())
            .collect();
        let placeholders: HashSet<&str> = self.template.placeholder_names().collect();

        if let Some(name) = placeholders.iter().find(|n| !declared.contains(*n)) {
            return Err(SpecError::UndeclaredPathParameter {
                method: self.method,
                template: self.template.to_string(),
                name: name.to_string(),
            });
        }
        if let Some(name) = declared.iter().find(|n| !placeholders.contains(*n)) {
            return Err(SpecError::MissingPathParameter {
                method: self.method,
                template: self.template.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// The loaded API contract.
#[derive(Debug, Clone)]
pub struct SpecModel {
    /// Operations ordered from most to least specific.
    operations: Vec<Operation>,
    /// Non-root base paths from `servers`, longest first.
    base_paths: Vec<String>,
    /// Whether `servers` also declares a root (`/`) server.
    root_server: bool,
}

impl SpecModel {
    /// Build a model, enforcing the load-time invariants.
    pub fn new(mut operations: Vec<Operation>, base_paths: Vec<String>) -> Result<Self, SpecError> {
        for op in &operations {
            op.check_path_parameters()?;
        }

        let mut seen: BTreeMap<(HttpMethod, String), &str> = BTreeMap::new();
        for op in &operations {
            let key = (op.method, op.template.normalized());
            if let Some(first) = seen.insert(key, op.template.as_str()) {
                return Err(if first == op.template.as_str() {
                    SpecError::DuplicateOperation {
                        method: op.method,
                        template: first.to_string(),
                    }
                } else {
                    SpecError::AmbiguousRoute {
                        method: op.method,
                        first: first.to_string(),
                        second: op.template.to_string(),
                    }
                });
            }
        }

        operations.sort_by(|a, b| {
            a.template
                .specificity()
                .cmp(&b.template.specificity())
                .then_with(|| a.template.as_str().cmp(b.template.as_str()))
                .then_with(|| a.method.cmp(&b.method))
        });

        let normalized: Vec<String> = base_paths.iter().map(|p| normalize_base_path(p)).collect();
        let root_server = normalized.iter().any(|p| p.is_empty());
        let mut base_paths: Vec<String> = normalized.into_iter().filter(|p| !p.is_empty()).collect();
        base_paths.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        base_paths.dedup();

        Ok(Self {
            operations,
            base_paths,
            root_server,
        })
    }

    /// All operations, most specific first.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Declared non-root base paths, longest first.
    pub fn base_paths(&self) -> &[String] {
        &self.base_paths
    }

    /// True when requests may also arrive without any base path.
    ///
    /// Holds when no non-root server is declared, or when a root server is
    /// declared next to prefixed ones.
    pub fn accepts_unprefixed(&self) -> bool {
        self.base_paths.is_empty() || self.root_server
    }

    /// Look up an operation by method and (raw or normalized) template.
    pub fn find(&self, method: HttpMethod, template: &str) -> Option<&Operation> {
        let wanted = PathTemplate::parse(template).ok()?.normalized();
        self.operations
            .iter()
            .find(|op| op.method == method && op.template.normalized() == wanted)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Strip trailing slashes and make sure a base path starts with `/`.
/// The root path normalizes to the empty string.
fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
