// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration for logging.

use std::collections::HashMap;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::logging::structured::{LogFormat, LoggerConfig};

/// The `logging` section of the sidecar configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Whether to use structured logging
    #[serde(default = "default_false")]
    pub structured: bool,

    /// Log format (terminal or json)
    #[serde(default = "default_format")]
    pub format: String,

    /// Log level
    #[serde(default = "default_level")]
    pub level: String,

    /// Include source code location
    #[serde(default = "default_true")]
    pub include_location: bool,

    /// Include thread ID
    #[serde(default = "default_true")]
    pub include_thread_id: bool,

    /// Take the trace id from the inbound request header when present
    #[serde(default = "default_true")]
    pub propagate_trace_id: bool,

    /// Header name for trace ID
    #[serde(default = "default_trace_header")]
    pub trace_id_header: String,

    /// Static fields to include in all logs
    #[serde(default)]
    pub static_fields: HashMap<String, String>,
}

fn default_false() -> bool {
    false
}

fn default_true() -> bool {
    true
}

fn default_format() -> String {
    "terminal".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

fn default_trace_header() -> String {
    "X-Trace-ID".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            structured: false,
            format: default_format(),
            level: default_level(),
            include_location: true,
            include_thread_id: true,
            propagate_trace_id: true,
            trace_id_header: default_trace_header(),
            static_fields: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// The configured level for the `log` facade; unknown names mean `info`.
    pub fn level_filter(&self) -> LevelFilter {
        parse_level(&self.level).unwrap_or(LevelFilter::Info)
    }

    /// Convert to logger config
    pub fn to_logger_config(&self) -> LoggerConfig {
        let mut static_fields: Vec<(String, String)> = self
            .static_fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        static_fields.sort();

        LoggerConfig {
            format: match self.format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Terminal,
            },
            level: match self.level_filter() {
                LevelFilter::Trace => slog::Level::Trace,
                LevelFilter::Debug => slog::Level::Debug,
                LevelFilter::Info => slog::Level::Info,
                LevelFilter::Warn => slog::Level::Warning,
                LevelFilter::Error | LevelFilter::Off => slog::Level::Error,
            },
            include_location: self.include_location,
            include_thread_id: self.include_thread_id,
            static_fields,
        }
    }
}

/// Parse a level name as used in `RUST_LOG_LEVEL` and the `level` key.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.trim().to_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "error" | "critical" => Some(LevelFilter::Error),
        "off" => Some(LevelFilter::Off),
        _ => None,
    }
}
