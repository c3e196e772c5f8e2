// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Logging setup shared by every grove crate.
//!
//! Usage:
//! - Set GROVE_LOG=off (default) - no logs
//! - Set GROVE_LOG=error|warn|info - operation logs at or above that level
//! - Set GROVE_LOG=debug - per-chunk and per-decision diagnostics

use std::sync::Once;

// Re-export emit so the macros resolve in downstream crates
pub use emit;

static INIT: Once = Once::new();

/// Environment variable consulted by [`init_diagnostics`].
pub const LOG_ENV: &str = "GROVE_LOG";

/// Map a `GROVE_LOG` value to a minimum level. `None` disables logging.
/// Unrecognised values fall back to `Info`.
#[must_use]
pub fn parse_level(value: &str) -> (Option<emit::Level>, bool) {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" => (None, true),
        "error" => (Some(emit::Level::Error), true),
        "warn" => (Some(emit::Level::Warn), true),
        "info" => (Some(emit::Level::Info), true),
        "debug" => (Some(emit::Level::Debug), true),
        _ => (Some(emit::Level::Info), false),
    }
}

/// Initialize logging from `GROVE_LOG`.
///
/// Call once at startup; later calls are ignored.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let raw = std::env::var(LOG_ENV).unwrap_or_default();
        let (level, recognised) = parse_level(&raw);
        let Some(level) = level else {
            return;
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        if !recognised {
            emit::warn!(
                "unknown {var} value {value}, using info",
                var: LOG_ENV,
                value: raw.as_str()
            );
        }

        // The runtime lives for the rest of the process.
        std::mem::forget(rt);
    });
}

/// Operations a user would want to see: stores opened, mutations applied, queries published.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Internal detail: chunk progress, collision decisions, projection diffs.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Recoverable conditions: read-only downgrades, skipped session records, query cleanup.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Failures that disable a feature for the session.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;
