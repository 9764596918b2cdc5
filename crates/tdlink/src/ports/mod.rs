//! Ports: the boundary between the binding and the wrapped engine.

pub mod outbound;

pub use outbound::Engine;
