// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structured logging for the sidecar.
//!
//! Builds `slog` loggers with terminal or JSON output and carries the
//! per-request context (trace id, method, path, peer) that request and
//! response log lines are tagged with.

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use slog::{Drain, FnValue, Logger, Record, o};
use slog_async::Async;
use slog_json::Json;
use slog_term::{FullFormat, TermDecorator};
use uuid::Uuid;

/// Structured logging format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable terminal output
    Terminal,
    /// JSON formatted output
    Json,
}

/// Structured logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Output format (Terminal or JSON)
    pub format: LogFormat,
    /// Log level
    pub level: slog::Level,
    /// Whether to include source code location
    pub include_location: bool,
    /// Whether to include thread ID
    pub include_thread_id: bool,
    /// Additional static key-value pairs to include in all logs
    pub static_fields: Vec<(String, String)>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Terminal,
            level: slog::Level::Info,
            include_location: true,
            include_thread_id: true,
            static_fields: Vec::new(),
        }
    }
}

/// Create a structured logger with the given configuration
pub fn create_logger(config: &LoggerConfig) -> Logger {
    let logger = match config.format {
        LogFormat::Terminal => create_terminal_logger(config),
        LogFormat::Json => create_json_logger(config),
    };
    with_common_fields(logger, config)
}

fn timestamp_local(out: &mut dyn io::Write) -> io::Result<()> {
    write!(out, "{}", chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"))
}

/// Create a terminal-formatted logger
fn create_terminal_logger(config: &LoggerConfig) -> Logger {
    let decorator = TermDecorator::new().build();
    let drain = FullFormat::new(decorator)
        .use_custom_timestamp(timestamp_local)
        .build()
        .fuse();

    let drain = drain.filter_level(config.level).fuse();
    let drain = Async::new(drain).build().fuse();

    Logger::root(drain, o!())
}

/// Create a JSON-formatted logger
fn create_json_logger(config: &LoggerConfig) -> Logger {
    let drain = Json::new(io::stdout())
        .add_default_keys()
        .build()
        .fuse();

    let drain = drain.filter_level(config.level).fuse();
    let drain = Async::new(drain).build().fuse();

    Logger::root(drain, o!("service" => "openapi-sidecar"))
}

fn with_common_fields(mut logger: Logger, config: &LoggerConfig) -> Logger {
    if config.include_location {
        logger = logger.new(o!("location" => FnValue(|r: &Record<'_>| {
            format!("{}:{}", r.file(), r.line())
        })));
    }
    if config.include_thread_id {
        logger = logger.new(o!("thread" => FnValue(|_: &Record<'_>| {
            format!("{:?}", std::thread::current().id())
        })));
    }

    // slog keys are 'static; the handful of configured fields live for the process
    for (key, value) in &config.static_fields {
        let key_str: &'static str = Box::leak(key.clone().into_boxed_str());
        logger = logger.new(o!(key_str => value.clone()));
    }

    logger
}

/// Generate a new trace ID
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Create a child logger with request context
pub fn with_request_context(logger: &Logger, request_info: &RequestInfo) -> Logger {
    logger.new(o!(
        "trace_id" => request_info.trace_id.clone(),
        "method" => request_info.method.clone(),
        "path" => request_info.path.clone(),
        "remote_addr" => request_info.remote_addr.clone(),
        "user_agent" => request_info.user_agent.clone(),
    ))
}

/// Request information for logging context
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Unique trace ID for the request
    pub trace_id: String,
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Remote address
    pub remote_addr: String,
    /// User agent
    pub user_agent: String,
    /// Start time in milliseconds since epoch
    pub start_time_ms: u128,
}

impl RequestInfo {
    /// Create a new RequestInfo with a fresh trace id
    pub fn new(method: String, path: String, remote_addr: String, user_agent: String) -> Self {
        Self {
            trace_id: generate_trace_id(),
            method,
            path,
            remote_addr,
            user_agent,
            start_time_ms: now_ms(),
        }
    }

    /// Keep an externally supplied trace id instead of the generated one.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    /// Calculate elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        now_ms().saturating_sub(self.start_time_ms)
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Global logger guard that keeps the logger alive
pub struct LoggerGuard {
    _guard: slog_scope::GlobalLoggerGuard,
}

/// Initialize the global structured logger
pub fn init_global_logger(config: &LoggerConfig) -> LoggerGuard {
    let logger = create_logger(config);
    let guard = slog_scope::set_global_logger(logger);

    LoggerGuard { _guard: guard }
}
