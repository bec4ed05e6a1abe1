//! Logging setup.
//!
//! Rowfence emits `tracing` events and leaves subscriber setup to the
//! application. For quick debugging, [`init`] installs a `tracing-subscriber`
//! configured from the environment (requires the `tracing-subscriber` feature):
//!
//! - `ROWFENCE_DEBUG=true|1|yes` - log at debug level
//! - `ROWFENCE_LOG_LEVEL=trace|debug|info|warn|error` - explicit level
//! - `ROWFENCE_LOG_FORMAT=json|pretty|compact` - output format (default: json)
//!
//! ```rust,no_run
//! rowfence_core::logging::init();
//! ```
//!
//! Events worth knowing about:
//!
//! | Level | Event |
//! |-------|-------|
//! | `warn` | an instance of another tenant was blocked; a registration was overwritten |
//! | `error` | a filter could not be restored on context exit |
//! | `debug` | registrations, late overlays, context entry and exit (with `log_tenant_context`) |
//! | `trace` | per-row store activity |

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "ROWFENCE_DEBUG";
const LEVEL_VAR: &str = "ROWFENCE_LOG_LEVEL";
const FORMAT_VAR: &str = "ROWFENCE_LOG_FORMAT";

/// Output format of the built-in subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    Compact,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("pretty") => Self::Pretty,
            Some("compact") => Self::Compact,
            _ => Self::Json,
        }
    }
}

fn parse_debug(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

fn parse_level(value: Option<&str>, debug: bool) -> &'static str {
    match value.map(str::to_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ if debug => "debug",
        _ => "warn",
    }
}

/// Whether `ROWFENCE_DEBUG` asks for debug logging.
#[inline]
pub fn is_debug_enabled() -> bool {
    parse_debug(env::var(DEBUG_VAR).ok().as_deref())
}

/// Level from `ROWFENCE_LOG_LEVEL`, falling back to debug or warn.
pub fn get_log_level() -> &'static str {
    parse_level(env::var(LEVEL_VAR).ok().as_deref(), is_debug_enabled())
}

/// Format from `ROWFENCE_LOG_FORMAT`.
pub fn get_log_format() -> LogFormat {
    LogFormat::parse(env::var(FORMAT_VAR).ok().as_deref())
}

#[cfg_attr(not(feature = "tracing-subscriber"), allow(dead_code))]
fn directives(level: &str) -> String {
    format!("rowfence={level},rowfence_core={level}")
}

/// Install the built-in subscriber if the environment asks for logging.
///
/// Only the first call does anything. Without `ROWFENCE_DEBUG` or
/// `ROWFENCE_LOG_LEVEL` set, nothing is installed.
pub fn init() {
    if !is_debug_enabled() && env::var(LEVEL_VAR).is_err() {
        return;
    }
    init_with_level(get_log_level());
}

/// Install the built-in subscriber at `level`, ignoring `ROWFENCE_LOG_LEVEL`.
pub fn init_with_level(level: &str) {
    INIT.call_once(|| install(level, get_log_format()));
}

#[cfg(feature = "tracing-subscriber")]
fn install(level: &str, format: LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_new(directives(level)).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };

    if installed.is_ok() {
        tracing::info!(level = level, format = ?format, "Rowfence logging initialized");
    }
}

#[cfg(not(feature = "tracing-subscriber"))]
fn install(_level: &str, _format: LogFormat) {}

/// Trace-level event emitted only when `ROWFENCE_DEBUG` is on.
#[macro_export]
macro_rules! rowfence_trace {
    ($($arg:tt)*) => {
        if $crate::logging::is_debug_enabled() {
            tracing::trace!($($arg)*);
        }
    };
}
