use super::pending::{Completion, PendingCallStore};
use crate::domain::correlation::CorrelationId;
use crate::domain::error::ClientError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::time::Sleep;

/// The eventual answer to one submitted request.
///
/// Resolves to the engine's response, `ClientError::Engine` if the engine
/// answered with an `error` object, `Timeout` once the deadline passes, or
/// `HandleClosed` if the handle closes first. Dropping the future cancels the
/// call locally; the engine still processes the request and its answer is
/// discarded.
#[must_use = "dropping a ResponseFuture cancels the call"]
pub struct ResponseFuture {
    token: CorrelationId,
    method: String,
    deadline: Instant,
    rx: oneshot::Receiver<Completion>,
    /// Created on first poll so submission works outside a runtime.
    timer: Option<Pin<Box<Sleep>>>,
    store: Arc<PendingCallStore>,
    expired: bool,
    finished: bool,
}

impl ResponseFuture {
    pub(crate) fn new(
        token: CorrelationId,
        method: String,
        deadline: Instant,
        rx: oneshot::Receiver<Completion>,
        store: Arc<PendingCallStore>,
    ) -> Self {
        Self {
            token,
            method,
            deadline,
            rx,
            timer: None,
            store,
            expired: false,
            finished: false,
        }
    }

    /// The correlation token the request was sent with.
    pub fn token(&self) -> CorrelationId {
        self.token
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Stop waiting. Returns false if the call had already completed.
    pub fn cancel(mut self) -> bool {
        self.finished = true;
        self.store.cancel(&self.token)
    }

    fn finish(&mut self, received: Result<Completion, oneshot::error::RecvError>) -> Completion {
        self.finished = true;
        // Every path that removes a pending call sends on it first, so a
        // closed channel means the store itself went away.
        received.unwrap_or(Err(ClientError::HandleClosed))
    }
}

impl Future for ResponseFuture {
    type Output = Completion;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Poll::Ready(received) = Pin::new(&mut this.rx).poll(cx) {
            return Poll::Ready(this.finish(received));
        }
        if this.expired {
            return Poll::Pending;
        }

        let deadline = this.deadline;
        let timer = this.timer.get_or_insert_with(|| {
            Box::pin(tokio::time::sleep(
                deadline.saturating_duration_since(Instant::now()),
            ))
        });
        if timer.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }

        // If a resolver removed the call first it is about to send; the
        // receiver has our waker either way.
        this.expired = true;
        this.store.expire(&this.token);
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(received) => Poll::Ready(this.finish(received)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        if !self.finished {
            self.store.cancel(&self.token);
        }
    }
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("token", &self.token)
            .field("method", &self.method)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Response;
    use serde_json::Map;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn submit(store: &Arc<PendingCallStore>, timeout: Duration) -> ResponseFuture {
        let (token, rx, deadline) = store.register("testCallEmpty", timeout);
        ResponseFuture::new(token, "testCallEmpty".into(), deadline, rx, Arc::clone(store))
    }

    fn store() -> Arc<PendingCallStore> {
        Arc::new(PendingCallStore::new(Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_resolves_with_response() {
        let store = store();
        let future = submit(&store, Duration::from_secs(5));
        store.resolve(future.token(), Response::new("ok", Map::new()));

        let response = future.await.unwrap();
        assert_eq!(response.kind(), "ok");
        assert_eq!(store.stats().total_cancelled.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_times_out_on_its_own() {
        let store = store();
        let future = submit(&store, Duration::from_millis(20));
        let token = future.token();

        let err = future.await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { ref method, .. } if method == "testCallEmpty"));
        assert!(!store.is_pending(&token));
        assert_eq!(store.stats().total_timeouts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_response_racing_deadline_wins_once() {
        let store = store();
        let future = submit(&store, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Answer arrives after the deadline but before the future is polled.
        store.resolve(future.token(), Response::new("ok", Map::new()));
        assert!(future.await.is_ok());
        assert_eq!(store.stats().total_timeouts.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let store = store();
        let future = submit(&store, Duration::from_secs(5));
        let token = future.token();
        drop(future);

        assert!(!store.is_pending(&token));
        assert_eq!(store.stats().total_cancelled.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_explicit_cancel() {
        let store = store();
        let future = submit(&store, Duration::from_secs(5));
        let token = future.token();

        assert!(future.cancel());
        assert!(!store.is_pending(&token));
    }

    #[tokio::test]
    async fn test_fail_all_reaches_future() {
        let store = store();
        let future = submit(&store, Duration::from_secs(5));
        store.fail_all();
        assert!(matches!(future.await, Err(ClientError::HandleClosed)));
    }
}
