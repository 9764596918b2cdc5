//! Pending call store.
//!
//! Maps correlation tokens to callers waiting for an engine response. An
//! entry leaves the map exactly once, through `resolve`, `expire`, `cancel`
//! or `fail_all`; whoever removes it owns the completion sender, so a call
//! can never be answered twice.

use super::retired::RetiredTokens;
use crate::domain::config::MAX_REQUEST_TIMEOUT;
use crate::domain::correlation::CorrelationId;
use crate::domain::error::{ClientError, ClientResult};
use crate::domain::types::Response;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// What a waiting caller eventually receives.
pub type Completion = ClientResult<Response>;

/// A call waiting for its response.
struct PendingCall {
    sender: oneshot::Sender<Completion>,
    /// Method name (for logging and timeout errors)
    method: String,
    created_at: Instant,
    timeout: Duration,
    deadline: Instant,
}

/// Outcome of routing a response to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Handed to the waiting caller.
    Delivered,
    /// The entry was found but its caller had already gone away.
    Abandoned,
    /// The token had timed out or been cancelled; the answer was discarded.
    Late,
    /// The token is not one this store is tracking.
    Unknown,
}

/// Statistics for the pending call store
#[derive(Debug, Default)]
pub struct PendingStats {
    pub total_registered: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_timeouts: AtomicU64,
    /// Cancelled by the caller (explicitly or by dropping the future)
    pub total_cancelled: AtomicU64,
    /// Failed because the handle closed
    pub total_closed: AtomicU64,
    /// Answers that arrived after their call stopped waiting
    pub total_late: AtomicU64,
}

/// Pending call store for one client handle.
pub struct PendingCallStore {
    pending: DashMap<CorrelationId, PendingCall>,
    retired: RetiredTokens,
    stats: PendingStats,
}

impl PendingCallStore {
    /// `retired_ttl` bounds how long late answers are recognised as such.
    pub fn new(retired_ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            retired: RetiredTokens::new(retired_ttl),
            stats: PendingStats::default(),
        }
    }

    /// Register a call and get the receiver its completion will arrive on.
    ///
    /// Returns the fresh token, the receiver, and the call's deadline.
    /// Timeouts above `MAX_REQUEST_TIMEOUT` are clamped to it.
    pub fn register(
        &self,
        method: &str,
        timeout: Duration,
    ) -> (CorrelationId, oneshot::Receiver<Completion>, Instant) {
        let (tx, rx) = oneshot::channel();
        let timeout = timeout.min(MAX_REQUEST_TIMEOUT);
        let created_at = Instant::now();
        // The platform clock may not reach that far ahead; wait as long as it can.
        let deadline = created_at.checked_add(timeout).unwrap_or_else(|| {
            let mut reach = timeout;
            loop {
                reach /= 2;
                if let Some(deadline) = created_at.checked_add(reach) {
                    break deadline;
                }
            }
        });
        let call = PendingCall {
            sender: tx,
            method: method.to_string(),
            created_at,
            timeout,
            deadline,
        };

        let token = loop {
            let token = CorrelationId::new();
            if let Entry::Vacant(slot) = self.pending.entry(token) {
                slot.insert(call);
                break token;
            }
        };
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(
            correlation_id = %token,
            method = method,
            timeout_ms = timeout.as_millis(),
            "Registered pending call"
        );

        (token, rx, deadline)
    }

    /// Complete the call waiting on `token` with the engine's answer.
    ///
    /// An `error` object completes the call with `ClientError::Engine`.
    pub fn resolve(&self, token: CorrelationId, response: Response) -> Resolution {
        let Some((_, call)) = self.pending.remove(&token) else {
            if self.retired.take(&token) {
                self.stats.total_late.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %token,
                    kind = response.kind(),
                    "Discarding late response"
                );
                return Resolution::Late;
            }
            warn!(
                correlation_id = %token,
                kind = response.kind(),
                "Response for unknown correlation token"
            );
            return Resolution::Unknown;
        };

        let response_time = call.created_at.elapsed();
        let completion = match response.as_failure() {
            Some(failure) => Err(ClientError::Engine(failure)),
            None => Ok(response),
        };

        match call.sender.send(completion) {
            Ok(()) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %token,
                    method = call.method,
                    response_time_ms = response_time.as_millis(),
                    "Completed pending call"
                );
                Resolution::Delivered
            }
            Err(_) => {
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %token,
                    method = call.method,
                    "Pending call receiver dropped"
                );
                Resolution::Abandoned
            }
        }
    }

    /// Time out the call on `token`, if it is still pending.
    pub fn expire(&self, token: &CorrelationId) -> bool {
        let Some((_, call)) = self.pending.remove(token) else {
            return false;
        };
        self.retired.retire(*token);
        self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
        warn!(
            correlation_id = %token,
            method = call.method,
            elapsed_ms = call.created_at.elapsed().as_millis(),
            timeout_ms = call.timeout.as_millis(),
            "Pending call timed out"
        );
        let _ = call.sender.send(Err(ClientError::Timeout {
            method: call.method,
            after: call.timeout,
        }));
        true
    }

    /// Time out every call whose deadline has passed.
    ///
    /// Returns the number of calls removed.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        expired.iter().filter(|token| self.expire(token)).count()
    }

    /// Stop waiting for `token`. The engine call itself is not retracted.
    pub fn cancel(&self, token: &CorrelationId) -> bool {
        if let Some((_, call)) = self.pending.remove(token) {
            self.retired.retire(*token);
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(correlation_id = %token, method = call.method, "Cancelled pending call");
            true
        } else {
            false
        }
    }

    /// Fail every pending call with `HandleClosed`.
    ///
    /// Returns the number of calls failed.
    pub fn fail_all(&self) -> usize {
        let tokens: Vec<CorrelationId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for token in tokens {
            if let Some((_, call)) = self.pending.remove(&token) {
                let _ = call.sender.send(Err(ClientError::HandleClosed));
                failed += 1;
            }
        }
        if failed > 0 {
            self.stats
                .total_closed
                .fetch_add(failed as u64, Ordering::Relaxed);
            debug!(failed = failed, "Failed pending calls on close");
        }
        failed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, token: &CorrelationId) -> bool {
        self.pending.contains_key(token)
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn object(kind: &str, value: Value) -> Response {
        let Value::Object(map) = value else {
            panic!("not an object");
        };
        Response::new(kind, map)
    }

    fn store() -> PendingCallStore {
        PendingCallStore::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let store = store();

        let (token, rx, _) = store.register("testSquareInt", Duration::from_secs(30));
        assert!(store.is_pending(&token));
        assert_eq!(store.pending_count(), 1);

        let resolution = store.resolve(token, object("testInt", json!({"value": 49})));
        assert_eq!(resolution, Resolution::Delivered);

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.get("value"), Some(&json!(49)));
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_second_resolution_is_ignored() {
        let store = store();
        let (token, rx, _) = store.register("testCallEmpty", Duration::from_secs(30));

        assert_eq!(
            store.resolve(token, Response::new("ok", Map::new())),
            Resolution::Delivered
        );
        assert_eq!(
            store.resolve(token, Response::new("ok", Map::new())),
            Resolution::Unknown
        );
        assert!(rx.await.unwrap().is_ok());
        assert_eq!(store.stats().total_completed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_error_object_becomes_engine_error() {
        let store = store();
        let (token, rx, _) = store.register("getMe", Duration::from_secs(30));

        store.resolve(
            token,
            object("error", json!({"code": 401, "message": "Unauthorized"})),
        );

        match rx.await.unwrap() {
            Err(ClientError::Engine(failure)) => {
                assert_eq!(failure.code, 401);
                assert_eq!(failure.message, "Unauthorized");
            }
            other => panic!("unexpected completion: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_unknown_token() {
        let store = store();
        assert_eq!(
            store.resolve(CorrelationId::new(), Response::new("ok", Map::new())),
            Resolution::Unknown
        );
    }

    #[tokio::test]
    async fn test_expire_sends_timeout_and_retires() {
        let store = store();
        let (token, rx, _) = store.register("testCallEmpty", Duration::from_millis(250));

        assert!(store.expire(&token));
        assert!(!store.expire(&token));

        match rx.await.unwrap() {
            Err(ClientError::Timeout { method, after }) => {
                assert_eq!(method, "testCallEmpty");
                assert_eq!(after, Duration::from_millis(250));
            }
            other => panic!("unexpected completion: {other:?}"),
        }

        assert_eq!(
            store.resolve(token, Response::new("ok", Map::new())),
            Resolution::Late
        );
        assert_eq!(store.stats().total_late.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_remove_expired() {
        let store = store();

        let (id1, _rx1, _) = store.register("testCallEmpty", Duration::from_millis(10));
        let (id2, _rx2, _) = store.register("testCallEmpty", Duration::from_millis(10));
        let (id3, _rx3, _) = store.register("testCallEmpty", Duration::from_secs(30));

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.remove_expired(), 2);
        assert!(!store.is_pending(&id1));
        assert!(!store.is_pending(&id2));
        assert!(store.is_pending(&id3));
        assert_eq!(store.stats().total_timeouts.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_cancel() {
        let store = store();

        let (token, _rx, _) = store.register("testCallEmpty", Duration::from_secs(30));
        assert!(store.cancel(&token));
        assert!(!store.is_pending(&token));

        // Cancel again should return false
        assert!(!store.cancel(&token));
        assert_eq!(
            store.resolve(token, Response::new("ok", Map::new())),
            Resolution::Late
        );
    }

    #[tokio::test]
    async fn test_fail_all() {
        let store = store();
        let receivers: Vec<_> = (0..5)
            .map(|_| store.register("testCallEmpty", Duration::from_secs(30)).1)
            .collect();

        assert_eq!(store.fail_all(), 5);
        assert_eq!(store.pending_count(), 0);

        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), Err(ClientError::HandleClosed)));
        }
        assert_eq!(store.stats().total_closed.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_dropped_receiver_is_abandoned() {
        let store = store();
        let (token, rx, _) = store.register("testCallEmpty", Duration::from_secs(30));
        drop(rx);

        assert_eq!(
            store.resolve(token, Response::new("ok", Map::new())),
            Resolution::Abandoned
        );
    }

    #[test]
    fn test_tokens_are_distinct() {
        let store = store();
        let tokens: std::collections::HashSet<_> = (0..1000)
            .map(|_| store.register("testCallEmpty", Duration::from_secs(30)).0)
            .collect();
        assert_eq!(tokens.len(), 1000);
        assert_eq!(store.stats().total_registered.load(Ordering::Relaxed), 1000);
    }

    #[test]
    fn test_unbounded_timeout_is_clamped() {
        let store = store();
        let (token, _rx, deadline) = store.register("testCallEmpty", Duration::MAX);

        assert!(deadline > Instant::now() + Duration::from_secs(24 * 60 * 60));
        assert_eq!(store.remove_expired(), 0);
        assert!(store.is_pending(&token));

        assert!(store.expire(&token));
    }
}
