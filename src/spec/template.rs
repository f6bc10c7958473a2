// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Path templates such as `/pet/{petId}` or `/files/{name}.json`.

use std::cmp::Ordering;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use super::SpecError;

/// `prefix{name}suffix` with exactly one placeholder.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^{}]*)\{([^{}]+)\}([^{}]*)$").expect("static regex"));

/// One `/`-separated piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Must equal the request segment exactly (case-sensitive).
    Literal(String),
    /// `{name}`: binds one whole, non-empty request segment.
    Placeholder(String),
    /// `prefix{name}suffix`: binds the non-empty middle of a request segment.
    Partial {
        prefix: String,
        name: String,
        suffix: String,
    },
}

impl Segment {
    fn parse(raw: &str, template: &str) -> Result<Self, SpecError> {
        if !raw.contains('{') && !raw.contains('}') {
            return Ok(Segment::Literal(raw.to_string()));
        }

        let caps = PLACEHOLDER
            .captures(raw)
            .ok_or_else(|| SpecError::InvalidTemplate {
                template: template.to_string(),
                reason: format!("segment '{raw}' must contain exactly one well-formed placeholder"),
            })?;
        let name = caps[2].trim().to_string();
        if name.is_empty() {
            return Err(SpecError::InvalidTemplate {
                template: template.to_string(),
                reason: "empty placeholder name".to_string(),
            });
        }

        let (prefix, suffix) = (caps[1].to_string(), caps[3].to_string());
        if prefix.is_empty() && suffix.is_empty() {
            Ok(Segment::Placeholder(name))
        } else {
            Ok(Segment::Partial {
                prefix,
                name,
                suffix,
            })
        }
    }

    /// Rank used for specificity ordering; lower is more specific.
    fn rank(&self) -> u8 {
        match self {
            Segment::Literal(_) => 0,
            Segment::Partial { .. } => 1,
            Segment::Placeholder(_) => 2,
        }
    }

    /// Match a single decoded-or-raw request segment.
    ///
    /// Returns `Some(None)` for a literal hit, `Some(Some((name, value)))`
    /// when a placeholder binds, and `None` on a miss.
    pub fn matches<'a>(&'a self, segment: &'a str) -> Option<Option<(&'a str, &'a str)>> {
        match self {
            Segment::Literal(lit) => (lit == segment).then_some(None),
            Segment::Placeholder(name) => {
                (!segment.is_empty()).then_some(Some((name.as_str(), segment)))
            }
            Segment::Partial {
                prefix,
                name,
                suffix,
            } => {
                if segment.len() <= prefix.len() + suffix.len() {
                    return None;
                }
                let value = segment.strip_prefix(prefix.as_str())?.strip_suffix(suffix.as_str())?;
                Some(Some((name.as_str(), value)))
            }
        }
    }

    fn normalized(&self) -> String {
        match self {
            Segment::Literal(lit) => lit.clone(),
            Segment::Placeholder(_) => "{}".to_string(),
            Segment::Partial { prefix, suffix, .. } => format!("{prefix}{{}}{suffix}"),
        }
    }
}

/// A parsed path template.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template, normalizing away a trailing slash.
    pub fn parse(raw: &str) -> Result<Self, SpecError> {
        if !raw.starts_with('/') {
            return Err(SpecError::InvalidTemplate {
                template: raw.to_string(),
                reason: "template must start with '/'".to_string(),
            });
        }

        let segments = split_path(raw)
            .into_iter()
            .map(|s| Segment::parse(s, raw))
            .collect::<Result<Vec<_>, _>>()?;

        let mut names: Vec<&str> = segments.iter().filter_map(placeholder_name).collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(SpecError::InvalidTemplate {
                template: raw.to_string(),
                reason: format!("placeholder '{}' appears more than once", dup[0]),
            });
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The template as written in the document.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholder names in template order.
    pub fn placeholder_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(placeholder_name)
    }

    /// Number of segments containing a placeholder.
    pub fn placeholder_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| !matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Template with placeholder names erased, e.g. `/pet/{}`.
    ///
    /// Two templates with the same normalized form can never be told apart
    /// by a request path.
    pub fn normalized(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        self.segments
            .iter()
            .map(|s| format!("/{}", s.normalized()))
            .collect()
    }

    /// Sort key: fewest placeholders first, then literal-first left to right.
    pub fn specificity(&self) -> Specificity {
        Specificity {
            placeholders: self.placeholder_count(),
            ranks: self.segments.iter().map(Segment::rank).collect(),
        }
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Ordering key produced by [`PathTemplate::specificity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specificity {
    placeholders: usize,
    ranks: Vec<u8>,
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.placeholders
            .cmp(&other.placeholders)
            .then_with(|| self.ranks.cmp(&other.ranks))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn placeholder_name(segment: &Segment) -> Option<&str> {
    match segment {
        Segment::Literal(_) => None,
        Segment::Placeholder(name) | Segment::Partial { name, .. } => Some(name.as_str()),
    }
}

/// Split an absolute path into segments, ignoring one trailing slash.
///
/// `/` yields no segments; `/a/b/` yields `["a", "b"]`.
pub(crate) fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}
