// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request validation against a matched [`Operation`].
//!
//! The validator runs in *multi-error* mode: every declared constraint is
//! checked and every violation is collected, in a stable order (parameters
//! in declaration order, then the body, then security).  Only constraints
//! the operation declares are enforced; undeclared query parameters,
//! headers and cookies are ignored.
//!
//! Authentication is delegated to an [`AuthenticationPolicy`].  The sidecar
//! ships exactly one, [`AcceptAllAuthentication`], which treats every
//! security requirement as satisfied: enforcing credentials is the
//! backend's job, not the contract proxy's.

mod auth;


pub use auth::{AcceptAllAuthentication, AuthenticationPolicy};

use std::fmt;
use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderName};
use serde_json::Value;
use thiserror::Error;

use crate::router::{NO_MATCHING_OPERATION, PathBinding, RouteError};
use crate::spec::{Operation, Parameter, ParameterLocation, ParameterType, SchemaType};

/// Header parameters OpenAPI 3 says must be ignored.
const IGNORED_HEADER_PARAMETERS: [&str; 3] = ["accept", "content-type", "authorization"];

/// Machine-stable reason for a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    NoMatchingOperation,
    MissingParameter,
    InvalidParameterType,
    InvalidParameterValue,
    MissingRequestBody,
    UnsupportedContentType,
    SecurityRequirementFailed,
}

impl ValidationErrorKind {
    /// Stable identifier suitable for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationErrorKind::NoMatchingOperation => "no_matching_operation",
            ValidationErrorKind::MissingParameter => "missing_parameter",
            ValidationErrorKind::InvalidParameterType => "invalid_parameter_type",
            ValidationErrorKind::InvalidParameterValue => "invalid_parameter_value",
            ValidationErrorKind::MissingRequestBody => "missing_request_body",
            ValidationErrorKind::UnsupportedContentType => "unsupported_content_type",
            ValidationErrorKind::SecurityRequirementFailed => "security_requirement_failed",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One contract violation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn no_matching_operation() -> Self {
        Self::new(ValidationErrorKind::NoMatchingOperation, NO_MATCHING_OPERATION)
    }

    fn missing_parameter(name: &str) -> Self {
        Self::new(
            ValidationErrorKind::MissingParameter,
            format!("missing required parameter: {name}"),
        )
    }

    fn invalid_type(name: &str) -> Self {
        Self::new(
            ValidationErrorKind::InvalidParameterType,
            format!("invalid type for parameter: {name}"),
        )
    }

    fn invalid_value(name: &str) -> Self {
        Self::new(
            ValidationErrorKind::InvalidParameterValue,
            format!("invalid value for parameter: {name}"),
        )
    }
}

impl From<RouteError> for ValidationError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::NotFound => ValidationError::no_matching_operation(),
        }
    }
}

/// Outcome of validating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    /// Never empty.
    Invalid(Vec<ValidationError>),
}

impl ValidationResult {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(errors)
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn errors(&self) -> &[ValidationError] {
        match self {
            ValidationResult::Valid => &[],
            ValidationResult::Invalid(errors) => errors,
        }
    }

    pub fn first_error(&self) -> Option<&ValidationError> {
        self.errors().first()
    }

    pub fn into_result(self) -> Result<(), Vec<ValidationError>> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(errors) => Err(errors),
        }
    }
}

/// The parts of an inbound request the validator looks at.
///
/// The body itself is never read here; the caller reports whether a
/// non-empty body is present.
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub body_present: bool,
}

/// Checks requests against the constraints of their matched operation.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    authentication: Arc<dyn AuthenticationPolicy>,
}

impl Default for RequestValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestValidator {
    /// A validator with the [`AcceptAllAuthentication`] policy.
    pub fn new() -> Self {
        Self {
            authentication: Arc::new(AcceptAllAuthentication),
        }
    }

    /// Replace the authentication policy.
    pub fn with_authentication(policy: Arc<dyn AuthenticationPolicy>) -> Self {
        Self {
            authentication: policy,
        }
    }

    pub fn authentication(&self) -> &dyn AuthenticationPolicy {
        self.authentication.as_ref()
    }

    /// Validate a request, collecting every violation.
    pub async fn validate(
        &self,
        operation: &Operation,
        binding: &PathBinding,
        parts: &RequestParts<'_>,
    ) -> ValidationResult {
        let mut errors = Vec::new();
        let query = parse_query(parts.query);
        let cookies = parse_cookies(parts.headers);

        for param in &operation.parameters {
            let values = match param.location {
                ParameterLocation::Path => binding.get(&param.name).map(|v| vec![v.to_string()]),
                ParameterLocation::Query => {
                    let found: Vec<String> = query
                        .iter()
                        .filter(|(k, _)| *k == param.name)
                        .map(|(_, v)| v.clone())
                        .collect();
                    (!found.is_empty()).then_some(found)
                }
                ParameterLocation::Header => {
                    if IGNORED_HEADER_PARAMETERS.contains(&param.name.to_ascii_lowercase().as_str()) {
                        continue;
                    }
                    header_values(parts.headers, &param.name)
                }
                ParameterLocation::Cookie => cookies
                    .iter()
                    .find(|(k, _)| *k == param.name)
                    .map(|(_, v)| vec![v.clone()]),
            };

            match values {
                None if param.required => errors.push(ValidationError::missing_parameter(&param.name)),
                None => {}
                Some(values) => {
                    if let Err(e) = check_parameter(param, &values) {
                        errors.push(e);
                    }
                }
            }
        }

        if let Some(body) = &operation.request_body {
            if !parts.body_present {
                if body.required {
                    errors.push(ValidationError::new(
                        ValidationErrorKind::MissingRequestBody,
                        "missing request body",
                    ));
                }
            } else if !body.content_types.is_empty() {
                let actual = parts
                    .headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok());
                let accepted = actual.is_some_and(|ct| {
                    body.content_types.iter().any(|d| media_type_matches(d, ct))
                });
                if !accepted {
                    errors.push(ValidationError::new(
                        ValidationErrorKind::UnsupportedContentType,
                        format!("unsupported content type: {}", actual.unwrap_or("(none)")),
                    ));
                }
            }
        }

        if !operation.security.is_empty() {
            if let Err(e) = self.check_security(operation, parts).await {
                errors.push(e);
            }
        }

        ValidationResult::from_errors(errors)
    }

    /// Any one satisfied requirement alternative is enough.
    async fn check_security(
        &self,
        operation: &Operation,
        parts: &RequestParts<'_>,
    ) -> Result<(), ValidationError> {
        let mut last_failure = None;
        for requirement in &operation.security {
            match self.authentication.authenticate(operation, requirement, parts).await {
                Ok(()) => return Ok(()),
                Err(reason) => last_failure = Some(reason),
            }
        }
        Err(ValidationError::new(
            ValidationErrorKind::SecurityRequirementFailed,
            format!(
                "security requirements failed: {}",
                last_failure.unwrap_or_default()
            ),
        ))
    }
}

fn check_parameter(param: &Parameter, values: &[String]) -> Result<(), ValidationError> {
    let items: Vec<&str> = match param.param_type {
        ParameterType::Scalar(_) => values.iter().take(1).map(String::as_str).collect(),
        ParameterType::Array(_) if values.len() > 1 => values.iter().map(String::as_str).collect(),
        ParameterType::Array(_) => values[0].split(',').collect(),
    };

    for item in items {
        let coerced = coerce(item, param.param_type.item_type())
            .ok_or_else(|| ValidationError::invalid_type(&param.name))?;
        if !param.enum_values.is_empty() && !param.enum_values.iter().any(|e| enum_matches(e, &coerced)) {
            return Err(ValidationError::invalid_value(&param.name));
        }
    }
    Ok(())
}

/// Coerce a raw textual value to its declared primitive type.
pub fn coerce(value: &str, schema_type: SchemaType) -> Option<Value> {
    match schema_type {
        SchemaType::String => Some(Value::String(value.to_string())),
        SchemaType::Integer => value.parse::<i64>().ok().map(Value::from),
        SchemaType::Number => value
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Value::from),
        SchemaType::Boolean => parse_bool(value).map(Value::Bool),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn enum_matches(declared: &Value, actual: &Value) -> bool {
    match (declared.as_f64(), actual.as_f64()) {
        (Some(d), Some(a)) => d == a,
        _ => declared == actual,
    }
}

/// Does an actual `Content-Type` satisfy a declared media-type key?
///
/// Parameters such as `charset` are ignored, comparison is
/// case-insensitive, and `type/*` and `*/*` act as wildcards.
pub fn media_type_matches(declared: &str, actual: &str) -> bool {
    fn base(media_type: &str) -> String {
        media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }

    let (declared, actual) = (base(declared), base(actual));
    if actual.is_empty() {
        return false;
    }
    if declared == "*/*" {
        return true;
    }
    match declared.strip_suffix("/*") {
        Some(top_level) => actual
            .split_once('/')
            .is_some_and(|(t, _)| t == top_level),
        None => declared == actual,
    }
}

/// `application/x-www-form-urlencoded` query parsing; order is kept.
pub fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    let Some(query) = query else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_form(k), decode_form(v))
        })
        .collect()
}

fn decode_form(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|v| v.into_owned())
        .unwrap_or(spaced)
}

fn parse_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            Some((k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        })
        .collect()
}

fn header_values(headers: &HeaderMap, name: &str) -> Option<Vec<String>> {
    let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
    let values: Vec<String> = headers
        .get_all(&name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string())
        .collect();
    (!values.is_empty()).then_some(values)
}
