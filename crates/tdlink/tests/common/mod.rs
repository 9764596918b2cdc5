//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tdlink::adapters::MemoryEngine;
use tdlink::{ClientConfig, ClientHandle, ClientManager, CorrelationId, NativeHandle, SessionState};

/// Fast-polling configuration so tests notice closes and sweeps quickly.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        poll_timeout: Duration::from_millis(10),
        default_request_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    }
}

pub fn manager_with(engine: MemoryEngine, config: ClientConfig) -> ClientManager<MemoryEngine> {
    tdlink_telemetry::init_test_tracing();
    ClientManager::new(engine, config).expect("valid config")
}

pub fn manager(engine: MemoryEngine) -> ClientManager<MemoryEngine> {
    manager_with(engine, test_config())
}

/// Manager plus a second reference to its engine, for checks after drop.
pub fn shared_manager(engine: MemoryEngine) -> (Arc<MemoryEngine>, ClientManager<MemoryEngine>) {
    tdlink_telemetry::init_test_tracing();
    let engine = Arc::new(engine);
    let manager =
        ClientManager::with_shared_engine(Arc::clone(&engine), test_config()).expect("valid config");
    (engine, manager)
}

pub fn native(manager: &ClientManager<MemoryEngine>, handle: ClientHandle) -> NativeHandle {
    manager.info(handle).expect("handle is open").native
}

/// A raw response frame as the engine would emit it for `token`.
pub fn response_frame(token: CorrelationId, mut body: Value) -> String {
    body["@extra"] = json!(token.to_string());
    body.to_string()
}

pub fn update_frame(kind: &str, n: u64) -> String {
    json!({"@type": kind, "n": n}).to_string()
}

/// Poll until `handle` reaches `state`; panics after two seconds.
pub async fn wait_for_state(
    manager: &ClientManager<MemoryEngine>,
    handle: ClientHandle,
    state: SessionState,
) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if manager.info(handle).map(|info| info.state) == Some(state) {
            return;
        }
        assert!(Instant::now() < deadline, "handle never reached {state:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until `check` holds; panics after two seconds.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
