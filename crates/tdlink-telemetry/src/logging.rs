//! Structured log helpers.
//!
//! Every line carries a `subsystem` field (`manager`, `receive_loop`, ...)
//! and client-scoped lines also carry `client`, so JSON output can be
//! filtered per engine instance.

use tracing::Level;

/// The engine's own log verbosity matching a `tracing` level.
///
/// The engine counts 0 (fatal only) through 5 (verbose debugging).
pub fn engine_verbosity(level: Level) -> i32 {
    match level {
        Level::ERROR => 1,
        Level::WARN => 2,
        Level::INFO => 3,
        Level::DEBUG => 4,
        Level::TRACE => 5,
    }
}

/// Helper to create structured log entries with consistent formatting.
#[macro_export]
macro_rules! log_event {
    // Info level with subsystem
    (info, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::info!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };

    // Warn level with subsystem
    (warn, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::warn!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };

    // Error level with subsystem
    (error, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::error!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };

    // Debug level with subsystem
    (debug, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::debug!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log an event about one client handle with standard fields.
#[macro_export]
macro_rules! log_client_event {
    ($level:ident, $subsystem:expr, $msg:expr, $client:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            subsystem = $subsystem,
            client = %$client,
            $($($field)*,)?
            $msg
        )
    };
}
