//! tdlink - client binding for a TDLib-style JSON engine.
//!
//! The engine speaks one JSON object per message through four calls
//! (create, send, receive, destroy). This crate turns that into a typed,
//! concurrent API: many callers submit requests at once, each gets its own
//! response back, and push updates fan out to subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        ClientManager                           │
//! │   open / close / submit / call / execute / subscribe           │
//! ├────────────────────────────────────────────────────────────────┤
//! │  per handle:                                                   │
//! │  ┌──────────────────┐   ┌─────────────────┐                    │
//! │  │ PendingCallStore │   │ UpdateDispatcher│──▶ Subscription…   │
//! │  │ (token → oneshot)│   │ (queue per sub) │                    │
//! │  └────────▲─────────┘   └────────▲────────┘                    │
//! │           │ Response             │ Update                      │
//! │        ┌──┴──────────────────────┴──┐                          │
//! │        │   ReceiveLoop (OS thread)  │  codec::decode           │
//! │        └─────────────▲──────────────┘                          │
//! └──────────────────────┼─────────────────────────────────────────┘
//!                        │ receive(timeout)      ▲ submit(frame)
//!                   ┌────┴───────────────────────┴───┐
//!                   │        Engine (port trait)      │
//!                   │  MemoryEngine │ TdJsonEngine    │
//!                   └─────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tdlink::adapters::MemoryEngine;
//! use tdlink::methods::TestSquareInt;
//! use tdlink::{ClientConfig, ClientManager};
//!
//! # async fn run() -> tdlink::ClientResult<()> {
//! let manager = ClientManager::new(MemoryEngine::new(), ClientConfig::default())?;
//! let handle = manager.open()?;
//! let squared = manager.call(handle, &TestSquareInt { x: 7 }, None).await?;
//! assert_eq!(squared.value, 49);
//! manager.close(handle);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod codec;
pub mod correlator;
pub mod dispatcher;
pub mod domain;
pub mod manager;
pub mod ports;
mod receive_loop;
mod session;

pub use correlator::{PendingStats, ResponseFuture};
pub use dispatcher::{Delivery, Subscription, SubscriptionId, TryRecvError, UpdateFilter};
pub use domain::config::{ClientConfig, ConfigError, MAX_REQUEST_TIMEOUT};
pub use domain::correlation::CorrelationId;
pub use domain::error::{
    ClientError, ClientResult, DecodingError, EncodingError, EngineError, EngineFailure,
};
pub use domain::methods::{self, get_method_info, is_method_known, Method, MethodInfo, TdResponse};
pub use domain::types::*;
pub use manager::ClientManager;
pub use ports::Engine;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
