//! Request correlation: matching engine responses to the calls that asked
//! for them.
//!
//! Flow:
//! 1. `submit` registers a pending call and gets a fresh token
//! 2. The request is encoded with `"@extra" = token` and handed to the engine
//! 3. The receive loop decodes the echoed token and calls `resolve()`
//! 4. The caller awaits the [`ResponseFuture`] or hits its deadline

pub mod future;
pub mod pending;
mod retired;

pub use future::ResponseFuture;
pub use pending::{Completion, PendingCallStore, PendingStats, Resolution};
