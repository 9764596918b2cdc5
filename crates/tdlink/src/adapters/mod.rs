//! Engine adapters.
//!
//! - `memory`: scripted in-process engine (always available)
//! - `tdjson`: the native library (feature `tdjson`)

pub mod memory;
#[cfg(feature = "tdjson")]
pub mod tdjson;

pub use memory::{MemoryEngine, Reply, Responder};
#[cfg(feature = "tdjson")]
pub use tdjson::TdJsonEngine;
