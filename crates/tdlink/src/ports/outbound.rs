//! Outbound port to the native engine.
//!
//! Mirrors the engine's C JSON interface. Frames are UTF-8 JSON text.
//!
//! Thread-safety contract the binding relies on:
//! - `submit` may be called concurrently from any thread for any live instance;
//! - `receive` is called by exactly one thread per instance at a time;
//! - `destroy_instance` is called once per instance, after its last
//!   `submit`/`receive` has returned.

use crate::domain::error::EngineError;
use crate::domain::types::NativeHandle;
use std::time::Duration;

pub trait Engine: Send + Sync + 'static {
    /// Create a new engine instance.
    fn create_instance(&self) -> Result<NativeHandle, EngineError>;

    /// Queue a request frame on an instance. Does not wait for an answer.
    fn submit(&self, handle: NativeHandle, frame: &str) -> Result<(), EngineError>;

    /// Wait up to `timeout` for the next frame produced by an instance.
    fn receive(&self, handle: NativeHandle, timeout: Duration) -> Option<String>;

    /// Run a request synchronously, bypassing any instance.
    /// Only methods the engine documents as synchronous produce an answer.
    fn execute_sync(&self, frame: &str) -> Option<String>;

    /// Release an instance.
    fn destroy_instance(&self, handle: NativeHandle);
}
