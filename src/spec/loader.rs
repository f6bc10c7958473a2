// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Loading an OpenAPI 3.x document into a [`SpecModel`].
//!
//! The document may live on disk, at an absolute URL, or be served by the
//! backend itself (a relative location such as `/openapi.yaml` is fetched
//! from `http://127.0.0.1:<service_port>`).  YAML and JSON are both
//! accepted.  Only the parts of the document that matter for request
//! validation are read: paths, parameters, request bodies, security and
//! server base paths.  Local `$ref`s into `components` are resolved.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;
use serde::de::IgnoredAny;
use serde_json::Value;

use super::{
    HttpMethod, Operation, Parameter, ParameterLocation, ParameterType, PathTemplate,
    RequestBodySpec, SchemaType, SecurityRequirement, SpecError, SpecModel,
};

/// Maximum `$ref` hops before a reference is considered cyclic.
const MAX_REF_DEPTH: usize = 16;

/// Where the API description is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecSource {
    Url(String),
    File(PathBuf),
}

/// Fetches and parses API descriptions.
#[derive(Debug, Clone, Default)]
pub struct SpecLoader {
    client: reqwest::Client,
}

impl SpecLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific HTTP client for remote documents.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Decide where `location` points to.
    ///
    /// Absolute `http(s)://` URLs are used as-is, existing local files are
    /// read from disk, and anything else is resolved against the backend.
    pub fn resolve_location(location: &str, service_port: u16) -> SpecSource {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return SpecSource::Url(location.to_string());
        }
        if Path::new(location).is_file() {
            return SpecSource::File(PathBuf::from(location));
        }
        let path = if location.starts_with('/') {
            location.to_string()
        } else {
            format!("/{location}")
        };
        SpecSource::Url(format!("http://127.0.0.1:{service_port}{path}"))
    }

    /// Resolve, fetch, parse and validate the document at `location`.
    pub async fn load(&self, location: &str, service_port: u16) -> Result<SpecModel, SpecError> {
        let source = Self::resolve_location(location, service_port);
        info!("Loading API description from {source:?}");

        let content = match &source {
            SpecSource::File(path) => tokio::fs::read_to_string(path).await?,
            SpecSource::Url(url) => {
                let response = self.client.get(url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(SpecError::FetchStatus {
                        location: url.clone(),
                        status: status.as_u16(),
                    });
                }
                response.text().await?
            }
        };

        let model = Self::parse(&content)?;
        info!(
            "Loaded {} operation(s) from API description",
            model.len()
        );
        Ok(model)
    }

    /// Parse and validate a YAML or JSON document.
    pub fn parse(content: &str) -> Result<SpecModel, SpecError> {
        let document: Document =
            serde_yaml::from_str(content).map_err(|e| SpecError::Parse(e.to_string()))?;
        document.into_model()
    }
}

/* ---------- raw document shape ---------- */

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RefOr<T> {
    Ref {
        #[serde(rename = "$ref")]
        reference: String,
    },
    Item(T),
}

#[derive(Debug, Deserialize)]
struct Document {
    openapi: String,
    #[serde(default)]
    servers: Vec<Server>,
    #[serde(default)]
    paths: BTreeMap<String, PathItem>,
    #[serde(default)]
    components: Components,
    #[serde(default)]
    security: Vec<SecurityRequirement>,
}

#[derive(Debug, Deserialize)]
struct Server {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Components {
    #[serde(default)]
    parameters: BTreeMap<String, RefOr<RawParameter>>,
    #[serde(default)]
    request_bodies: BTreeMap<String, RefOr<RawRequestBody>>,
    #[serde(default)]
    schemas: BTreeMap<String, RefOr<RawSchema>>,
}

#[derive(Debug, Deserialize)]
struct PathItem {
    #[serde(default)]
    parameters: Vec<RefOr<RawParameter>>,
    get: Option<RawOperation>,
    put: Option<RawOperation>,
    post: Option<RawOperation>,
    delete: Option<RawOperation>,
    options: Option<RawOperation>,
    head: Option<RawOperation>,
    patch: Option<RawOperation>,
    trace: Option<RawOperation>,
}

impl PathItem {
    fn operation(&self, method: HttpMethod) -> Option<&RawOperation> {
        match method {
            HttpMethod::Get => self.get.as_ref(),
            HttpMethod::Put => self.put.as_ref(),
            HttpMethod::Post => self.post.as_ref(),
            HttpMethod::Delete => self.delete.as_ref(),
            HttpMethod::Options => self.options.as_ref(),
            HttpMethod::Head => self.head.as_ref(),
            HttpMethod::Patch => self.patch.as_ref(),
            HttpMethod::Trace => self.trace.as_ref(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOperation {
    operation_id: Option<String>,
    #[serde(default)]
    parameters: Vec<RefOr<RawParameter>>,
    request_body: Option<RefOr<RawRequestBody>>,
    security: Option<Vec<SecurityRequirement>>,
}

#[derive(Debug, Deserialize)]
struct RawParameter {
    name: String,
    #[serde(rename = "in")]
    location: ParameterLocation,
    #[serde(default)]
    required: bool,
    schema: Option<RefOr<RawSchema>>,
}

#[derive(Debug, Deserialize)]
struct RawRequestBody {
    #[serde(default)]
    required: bool,
    #[serde(default)]
    content: BTreeMap<String, IgnoredAny>,
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    #[serde(rename = "type")]
    schema_type: Option<Value>,
    items: Option<Box<RefOr<RawSchema>>>,
    #[serde(rename = "enum", default)]
    enum_values: Vec<Value>,
}

/* ---------- conversion ---------- */

impl Document {
    fn into_model(self) -> Result<SpecModel, SpecError> {
        if !self.openapi.starts_with("3.") {
            return Err(SpecError::UnsupportedVersion(self.openapi));
        }

        let mut operations = Vec::new();
        for (raw_template, item) in &self.paths {
            let template = PathTemplate::parse(raw_template)?;
            let shared = self.resolve_parameters(&item.parameters)?;

            for method in HttpMethod::ALL {
                let Some(raw_op) = item.operation(method) else {
                    continue;
                };

                let own = self.resolve_parameters(&raw_op.parameters)?;
                let request_body = match &raw_op.request_body {
                    Some(body) => {
                        let body = resolve(body, &self.components.request_bodies, "requestBodies")?;
                        Some(RequestBodySpec {
                            required: body.required,
                            content_types: body.content.keys().cloned().collect(),
                        })
                    }
                    None => None,
                };

                let op = Operation {
                    method,
                    template: template.clone(),
                    operation_id: raw_op.operation_id.clone(),
                    parameters: merge_parameters(&shared, own),
                    request_body,
                    security: raw_op.security.clone().unwrap_or_else(|| self.security.clone()),
                };
                debug!("Declared operation {}", op.display_name());
                operations.push(op);
            }
        }

        let base_paths = self.servers.iter().map(|s| server_base_path(&s.url)).collect();
        SpecModel::new(operations, base_paths)
    }

    fn resolve_parameters(&self, raw: &[RefOr<RawParameter>]) -> Result<Vec<Parameter>, SpecError> {
        raw.iter()
            .map(|p| {
                let p = resolve(p, &self.components.parameters, "parameters")?;
                self.convert_parameter(p)
            })
            .collect()
    }

    fn convert_parameter(&self, raw: &RawParameter) -> Result<Parameter, SpecError> {
        let (param_type, enum_values) = match &raw.schema {
            Some(schema) => {
                let schema = resolve(schema, &self.components.schemas, "schemas")?;
                self.convert_schema(schema)?
            }
            // `content`-style parameters are not type checked
            None => (ParameterType::default(), Vec::new()),
        };

        Ok(Parameter {
            name: raw.name.clone(),
            location: raw.location,
            required: raw.required || raw.location == ParameterLocation::Path,
            param_type,
            enum_values,
        })
    }

    fn convert_schema(&self, schema: &RawSchema) -> Result<(ParameterType, Vec<Value>), SpecError> {
        match type_name(schema.schema_type.as_ref()) {
            Some("array") => {
                let item = match &schema.items {
                    Some(items) => resolve(items, &self.components.schemas, "schemas")?,
                    None => return Ok((ParameterType::Array(SchemaType::String), Vec::new())),
                };
                let item_type = primitive(type_name(item.schema_type.as_ref()));
                Ok((ParameterType::Array(item_type), item.enum_values.clone()))
            }
            other => Ok((
                ParameterType::Scalar(primitive(other)),
                schema.enum_values.clone(),
            )),
        }
    }
}

/// Pick the effective type name; OpenAPI 3.1 allows `type: [string, "null"]`.
fn type_name(value: Option<&Value>) -> Option<&str> {
    match value? {
        Value::String(s) => Some(s.as_str()),
        Value::Array(types) => types.iter().filter_map(Value::as_str).find(|t| *t != "null"),
        _ => None,
    }
}

/// Objects and unknown types are passed through unchecked, as strings.
fn primitive(name: Option<&str>) -> SchemaType {
    match name {
        Some("integer") => SchemaType::Integer,
        Some("number") => SchemaType::Number,
        Some("boolean") => SchemaType::Boolean,
        _ => SchemaType::String,
    }
}

/// Operation-level parameters override path-level ones with the same name
/// and location; path-level parameters come first.
fn merge_parameters(shared: &[Parameter], own: Vec<Parameter>) -> Vec<Parameter> {
    let mut merged: Vec<Parameter> = shared
        .iter()
        .filter(|s| !own.iter().any(|o| o.name == s.name && o.location == s.location))
        .cloned()
        .collect();
    merged.extend(own);
    merged
}

/// Follow local `#/components/<section>/<name>` references.
fn resolve<'a, T>(
    item: &'a RefOr<T>,
    section: &'a BTreeMap<String, RefOr<T>>,
    section_name: &str,
) -> Result<&'a T, SpecError> {
    let prefix = format!("#/components/{section_name}/");
    let mut current = item;
    for _ in 0..MAX_REF_DEPTH {
        match current {
            RefOr::Item(value) => return Ok(value),
            RefOr::Ref { reference } => {
                let name = reference
                    .strip_prefix(&prefix)
                    .ok_or_else(|| SpecError::InvalidReference(reference.clone()))?;
                current = section
                    .get(name)
                    .ok_or_else(|| SpecError::InvalidReference(reference.clone()))?;
            }
        }
    }
    match current {
        RefOr::Item(value) => Ok(value),
        RefOr::Ref { reference } => Err(SpecError::InvalidReference(reference.clone())),
    }
}

/// Path component of a `servers[].url`; scheme and host are ignored.
fn server_base_path(url: &str) -> String {
    let without_scheme = match url.find("://") {
        Some(idx) => &url[idx + 3..],
        None => return url.to_string(),
    };
    match without_scheme.find('/') {
        Some(idx) => without_scheme[idx..].to_string(),
        None => String::new(),
    }
}
