// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging utilities for the sidecar.
//!
//! All code logs through the `log` facade.  By default the facade is backed
//! by `env_logger`; with `logging.structured = true` a global `slog` logger
//! is installed instead and `slog-stdlog` forwards every `log` record to it.

pub mod config;
pub mod structured;
pub mod wrapper;

#[cfg(test)]
pub(crate) mod test_logger;


use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{LevelFilter, debug, error, info, warn};
use once_cell::sync::OnceCell;

use self::config::LoggingConfig;
use self::structured::LoggerGuard;

static INIT: Once = Once::new();

/// Whether the structured backend was installed.
pub(crate) static USING_STRUCTURED: AtomicBool = AtomicBool::new(false);

static GLOBAL_GUARD: OnceCell<LoggerGuard> = OnceCell::new();

/// Initialize logging from the `logging` configuration section.
///
/// Only the first call in a process has an effect.
pub fn init_with_config(level: LevelFilter, config: &LoggingConfig) {
    INIT.call_once(|| {
        if !config.structured {
            init_env_logger(level);
            return;
        }

        let guard = structured::init_global_logger(&config.to_logger_config());
        let _ = GLOBAL_GUARD.set(guard);

        let bridge_level = level.to_level().unwrap_or(log::Level::Error);
        match slog_stdlog::init_with_level(bridge_level) {
            Ok(()) => {
                log::set_max_level(level);
                USING_STRUCTURED.store(true, Ordering::SeqCst);
                info!("Structured logging initialized at level: {level}");
            }
            Err(e) => {
                // Another `log` implementation won the race; keep using it.
                USING_STRUCTURED.store(false, Ordering::SeqCst);
                warn!("Structured logging unavailable: {e}");
            }
        }
    });
}

fn init_env_logger(level: LevelFilter) {
    let env = env_logger::Env::default().filter_or("RUST_LOG", level.as_str().to_lowercase());

    let result = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_target(true)
        .try_init();

    if result.is_ok() {
        info!("Logging initialized at level: {}", log::max_level());
    }
}

/// Whether log records end up in the structured `slog` backend.
pub fn is_structured_logging() -> bool {
    USING_STRUCTURED.load(Ordering::SeqCst)
}

/// Log an error with context and return the error.
///
/// This is useful for logging errors in a chain of Results.
pub fn log_error<E: std::fmt::Display>(context: &str, err: E) -> E {
    error!("{}: {}", context, err);
    err
}

/// Log a debug message with context.
pub fn log_debug<M: std::fmt::Display>(context: &str, msg: M) {
    debug!("{}: {}", context, msg);
}

/// Log an info message with context.
pub fn log_info<M: std::fmt::Display>(context: &str, msg: M) {
    info!("{}: {}", context, msg);
}
