//! # Client Lifecycle Tests
//!
//! Open, close, engine-initiated shutdown and graceful shutdown, checked
//! against the in-memory engine's bookkeeping: every instance destroyed
//! exactly once, no engine call after destroy, no concurrent receives.

mod common;

use common::*;
use std::time::Duration;
use tdlink::adapters::MemoryEngine;
use tdlink::methods::{Close, GetLogVerbosityLevel, SetLogVerbosityLevel, TestCallEmpty};
use tdlink::{ClientConfig, ClientError, ClientManager, Request, SessionState, UpdateFilter};

#[tokio::test]
async fn test_open_and_close() {
    let (engine, manager) = shared_manager(MemoryEngine::new());

    let handle = manager.open().unwrap();
    let native = native(&manager, handle);
    assert!(manager.is_valid(handle));
    assert_eq!(engine.live_instances(), 1);

    assert!(manager.close(handle));
    assert!(!manager.is_valid(handle));
    assert!(manager.info(handle).is_none());

    // Idempotent
    assert!(!manager.close(handle));
    assert_eq!(engine.destroy_count(native), 1);
    assert_eq!(engine.live_instances(), 0);
    assert_eq!(engine.contract_violations(), 0);
}

#[tokio::test]
async fn test_use_after_close_is_invalid_handle() {
    let manager = manager(MemoryEngine::new());
    let handle = manager.open().unwrap();
    manager.close(handle);

    assert!(matches!(
        manager.submit(handle, Request::new("testCallEmpty"), None),
        Err(ClientError::InvalidHandle(id)) if id == handle.id()
    ));
    assert!(matches!(
        manager.subscribe(handle, UpdateFilter::all()),
        Err(ClientError::InvalidHandle(_))
    ));
    assert!(matches!(
        manager.shutdown(handle, None).await,
        Err(ClientError::InvalidHandle(_))
    ));
}

#[tokio::test]
async fn test_open_failure_is_retryable() {
    let engine = MemoryEngine::new();
    engine.fail_next_create();
    let manager = manager(engine);

    let err = manager.open().unwrap_err();
    assert!(matches!(err, ClientError::EngineUnavailable(_)));
    assert!(err.is_retryable());

    let handle = manager.open().unwrap();
    assert!(manager.is_valid(handle));
}

#[tokio::test]
async fn test_close_resolves_every_pending_call_with_handle_closed() {
    let (engine, manager) = shared_manager(MemoryEngine::silent());
    let handle = manager.open().unwrap();

    let futures: Vec<_> = (0..10)
        .map(|_| {
            manager
                .submit(handle, Request::new("testCallEmpty"), None)
                .unwrap()
        })
        .collect();
    assert_eq!(manager.info(handle).unwrap().pending_calls, 10);

    manager.close(handle);

    for future in futures {
        assert!(matches!(future.await, Err(ClientError::HandleClosed)));
    }
    assert_eq!(engine.contract_violations(), 0);
}

#[tokio::test]
async fn test_close_leaves_other_handles_alone() {
    let manager = manager(MemoryEngine::silent());
    let closing = manager.open().unwrap();
    let staying = manager.open().unwrap();

    let doomed = manager
        .submit(closing, Request::new("testCallEmpty"), None)
        .unwrap();
    let survivor = manager
        .submit(staying, Request::new("testCallEmpty"), Some(Duration::from_secs(5)))
        .unwrap();
    let token = survivor.token();

    manager.close(closing);
    assert!(matches!(doomed.await, Err(ClientError::HandleClosed)));

    let native = native(&manager, staying);
    manager
        .engine()
        .inject(native, response_frame(token, serde_json::json!({"@type": "ok"})));
    assert!(survivor.await.is_ok());
}

#[tokio::test]
async fn test_handles_close_all_and_drop() {
    let (engine, manager) = shared_manager(MemoryEngine::new());
    let handles: Vec<_> = (0..3).map(|_| manager.open().unwrap()).collect();

    assert_eq!(manager.handles(), handles);
    assert_eq!(manager.close_all(), 3);
    assert!(manager.handles().is_empty());

    manager.open().unwrap();
    manager.open().unwrap();
    drop(manager);

    assert_eq!(engine.live_instances(), 0);
    assert_eq!(engine.contract_violations(), 0);
}

#[tokio::test]
async fn test_engine_shutdown_fails_pending_and_blocks_submissions() {
    let manager = manager(MemoryEngine::new());
    let handle = manager.open().unwrap();

    // Only `close` gets an answer; everything else waits forever.
    manager.engine().set_responder(|method, _| {
        if method == "close" {
            close_replies()
        } else {
            Vec::new()
        }
    });

    let stuck = manager
        .submit(handle, Request::new("testCallEmpty"), None)
        .unwrap();
    manager.call(handle, &Close {}, None).await.unwrap();

    wait_for_state(&manager, handle, SessionState::EngineClosed).await;
    assert!(matches!(stuck.await, Err(ClientError::HandleClosed)));
    assert!(matches!(
        manager.submit(handle, Request::new("testCallEmpty"), None),
        Err(ClientError::HandleClosed)
    ));

    // The handle stays registered until the application closes it.
    assert!(manager.is_valid(handle));
    let native = native(&manager, handle);
    assert!(manager.close(handle));
    assert_eq!(manager.engine().destroy_count(native), 1);
    assert_eq!(manager.engine().contract_violations(), 0);
}

fn close_replies() -> Vec<tdlink::adapters::Reply> {
    use tdlink::adapters::Reply;
    vec![
        Reply::Respond(serde_json::json!({"@type": "ok"})),
        Reply::Push(serde_json::json!({
            "@type": "updateAuthorizationState",
            "authorization_state": {"@type": "authorizationStateClosed"}
        })),
    ]
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let (engine, manager) = shared_manager(MemoryEngine::new());
    let handle = manager.open().unwrap();
    let native = native(&manager, handle);

    manager
        .shutdown(handle, Some(Duration::from_secs(2)))
        .await
        .unwrap();

    assert!(!manager.is_valid(handle));
    assert_eq!(engine.destroy_count(native), 1);
    assert_eq!(engine.contract_violations(), 0);
}

#[tokio::test]
async fn test_graceful_shutdown_with_unbounded_timeout() {
    let (engine, manager) = shared_manager(MemoryEngine::new());
    let handle = manager.open().unwrap();
    let native = native(&manager, handle);

    manager.shutdown(handle, Some(Duration::MAX)).await.unwrap();
    assert!(!manager.is_valid(handle));
    assert_eq!(engine.destroy_count(native), 1);
}

#[tokio::test]
async fn test_graceful_shutdown_gives_up_on_silent_engine() {
    let (engine, manager) = shared_manager(MemoryEngine::silent());
    let handle = manager.open().unwrap();
    let native = native(&manager, handle);

    manager
        .shutdown(handle, Some(Duration::from_millis(50)))
        .await
        .unwrap();

    assert!(!manager.is_valid(handle));
    assert_eq!(engine.destroy_count(native), 1);
}

#[tokio::test]
async fn test_info_reports_bookkeeping() {
    let manager = manager(MemoryEngine::silent());
    let handle = manager.open().unwrap();
    let _sub = manager.subscribe(handle, UpdateFilter::all()).unwrap();
    let _pending = manager
        .submit(handle, Request::new("testCallEmpty"), None)
        .unwrap();

    let info = manager.info(handle).unwrap();
    assert_eq!(info.handle, handle);
    assert_eq!(info.state, SessionState::Open);
    assert_eq!(info.pending_calls, 1);
    assert_eq!(info.subscriptions, 1);
}

#[tokio::test]
async fn test_execute_runs_synchronous_methods() {
    let manager = manager(MemoryEngine::new());

    manager
        .execute_method(&SetLogVerbosityLevel {
            new_verbosity_level: 4,
        })
        .unwrap();
    assert_eq!(manager.engine().log_verbosity(), 4);

    let level = manager.execute_method(&GetLogVerbosityLevel {}).unwrap();
    assert_eq!(level.verbosity_level, 4);

    // Not every method has a synchronous path.
    match manager.execute_method(&TestCallEmpty {}) {
        Err(ClientError::Engine(failure)) => assert_eq!(failure.code, 400),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_execute_without_answer_is_submit_error() {
    let manager = manager(MemoryEngine::with_responder(|_, _| {
        vec![tdlink::adapters::Reply::Push(serde_json::json!({
            "@type": "updateOption",
            "name": "version"
        }))]
    }));

    let err = manager
        .execute(&Request::new("getLogVerbosityLevel"))
        .unwrap_err();
    assert!(matches!(err, ClientError::Submit(ref message) if message.contains("getLogVerbosityLevel")));
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = ClientConfig {
        max_subscriptions: 0,
        ..ClientConfig::default()
    };
    assert!(matches!(
        ClientManager::new(MemoryEngine::new(), config),
        Err(ClientError::Config(_))
    ));
}
