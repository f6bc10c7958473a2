// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Route matching – request path & method → declared [`Operation`].
//!
//! Matching is segment by segment against the templates of the loaded
//! [`SpecModel`]:
//!
//! | template segment   | request segment          | result                  |
//! |--------------------|--------------------------|-------------------------|
//! | `pet`              | `pet`                    | literal hit             |
//! | `{petId}`          | `42`                     | binds `petId = "42"`    |
//! | `{name}.json`      | `report.json`            | binds `name = "report"` |
//!
//! Operations are tried from most to least specific, so `/pet/findByStatus`
//! beats `/pet/{petId}`.  A path that matches no template and a path that
//! matches only under another method are reported the same way.


use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use thiserror::Error;

use crate::spec::{HttpMethod, Operation, SpecModel};

/// Message surfaced to callers when nothing matches.
pub const NO_MATCHING_OPERATION: &str = "no matching operation was found";

/// Route resolution failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("no matching operation was found")]
    NotFound,
}

/// Path-template variable → literal value bound from the request path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathBinding {
    values: HashMap<String, String>,
}

impl PathBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound value of a placeholder, percent-decoded.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: &str, value: String) {
        self.values.insert(name.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Resolves requests against a shared, read-only [`SpecModel`].
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    spec: Arc<SpecModel>,
}

impl RouteMatcher {
    pub fn new(spec: Arc<SpecModel>) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &SpecModel {
        &self.spec
    }

    /// Find the operation for `method` + `path` and bind its placeholders.
    ///
    /// `path` may still carry a query string; it is ignored here.
    pub fn match_route(
        &self,
        method: &reqwest::Method,
        path: &str,
    ) -> Result<(&Operation, PathBinding), RouteError> {
        let method = HttpMethod::from_method(method).ok_or(RouteError::NotFound)?;
        let path = path.split_once('?').map_or(path, |(p, _)| p);

        for path in self.candidate_paths(path) {
            let segments = crate::spec::split_path(path);
            for op in self.spec.operations() {
                if op.method != method {
                    continue;
                }
                if let Some(binding) = bind(op, &segments) {
                    trace!("Matched {} {} to {}", method, path, op.display_name());
                    return Ok((op, binding));
                }
            }
        }

        trace!("No operation matches {} {}", method, path);
        Err(RouteError::NotFound)
    }

    /// The request path with each matching base path removed, longest first,
    /// followed by the path itself when a root server is declared.
    fn candidate_paths<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let stripped = self.spec.base_paths().iter().filter_map(move |base| {
            let rest = path.strip_prefix(base.as_str())?;
            if rest.is_empty() {
                Some("/")
            } else if rest.starts_with('/') {
                Some(rest)
            } else {
                None
            }
        });
        stripped.chain(self.spec.accepts_unprefixed().then_some(path))
    }
}

fn bind(op: &Operation, segments: &[&str]) -> Option<PathBinding> {
    let template = op.template.segments();
    if template.len() != segments.len() {
        return None;
    }

    let mut binding = PathBinding::new();
    for (expected, actual) in template.iter().zip(segments) {
        if let Some((name, raw)) = expected.matches(actual)? {
            binding.insert(name, decode(raw));
        }
    }
    Some(binding)
}

/// Percent-decode a bound value; undecodable input is kept verbatim.
fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}
