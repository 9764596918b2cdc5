//! Domain types for the binding.
//!
//! Pure data: identifiers, requests, decoded objects, configuration, errors,
//! and typed methods. Concurrency lives in the correlator, dispatcher, and
//! receive loop.

pub mod config;
pub mod correlation;
pub mod error;
pub mod methods;
pub mod types;

pub use config::{ClientConfig, ConfigError};
pub use correlation::CorrelationId;
pub use error::{
    ClientError, ClientResult, DecodingError, EncodingError, EngineError, EngineFailure,
};
pub use methods::{get_method_info, is_method_known, Method, MethodInfo, TdResponse};
pub use types::*;
