//! # tdlink Telemetry
//!
//! Log output setup for applications embedding tdlink.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tdlink_telemetry::{init_tracing, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_tracing(&config).expect("Failed to init tracing");
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TDLINK_SERVICE_NAME` | `tdlink` | Service name in logs |
//! | `TDLINK_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `TDLINK_CONSOLE_OUTPUT` | `true` | Write logs to the console |
//! | `TDLINK_JSON_LOGS` | `false` (`true` in containers) | JSON lines output |

mod config;
mod logging;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use logging::engine_verbosity;
pub use tracing_setup::{init_test_tracing, init_tracing};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

impl TelemetryConfig {
    /// The most verbose level the configured filter can enable, for
    /// aligning the engine's own verbosity. Falls back to INFO for complex
    /// directives.
    pub fn max_level(&self) -> tracing::Level {
        self.log_level
            .parse::<tracing::Level>()
            .unwrap_or(tracing::Level::INFO)
    }
}
