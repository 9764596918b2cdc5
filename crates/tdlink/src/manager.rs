//! Client handle manager: the application-facing entry point.
//!
//! Owns every open engine instance together with its receive loop, pending
//! calls and subscribers. Handles are plain identifiers; all state stays
//! here, so a closed handle simply stops resolving.

use crate::codec;
use crate::correlator::ResponseFuture;
use crate::dispatcher::{Subscription, SubscriptionId, UpdateFilter};
use crate::domain::config::ClientConfig;
use crate::domain::error::{ClientError, ClientResult};
use crate::domain::methods::{self, Method, TdResponse};
use crate::domain::types::{
    ClientHandle, ClientId, HandleInfo, HandleStats, Request, Response, SessionState,
};
use crate::ports::outbound::Engine;
use crate::receive_loop::ReceiveLoop;
use crate::session::Session;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Manages engine client instances.
///
/// Cheap to share behind an `Arc`; every method takes `&self` and may be
/// called from any thread or task. Dropping the manager closes every handle
/// it still owns.
pub struct ClientManager<E: Engine> {
    engine: Arc<E>,
    config: ClientConfig,
    sessions: DashMap<ClientId, Arc<Session>>,
    id_counter: AtomicU64,
}

impl<E: Engine> ClientManager<E> {
    /// Create a manager over `engine`, validating `config`.
    pub fn new(engine: E, config: ClientConfig) -> ClientResult<Self> {
        Self::with_shared_engine(Arc::new(engine), config)
    }

    /// Like `new`, for an engine the caller keeps a reference to.
    pub fn with_shared_engine(engine: Arc<E>, config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        Ok(Self {
            engine,
            config,
            sessions: DashMap::new(),
            id_counter: AtomicU64::new(1),
        })
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create an engine instance and start its receive loop.
    pub fn open(&self) -> ClientResult<ClientHandle> {
        let native = self.engine.create_instance().map_err(|e| {
            warn!(error = %e, "Engine rejected instance creation");
            ClientError::EngineUnavailable(e.to_string())
        })?;

        let id = ClientId::new(self.id_counter.fetch_add(1, Ordering::Relaxed));
        let handle = ClientHandle::new(id);
        let session = Arc::new(Session::new(handle, native, &self.config));

        let receive_loop = ReceiveLoop::new(
            Arc::clone(&self.engine),
            Arc::clone(&session),
            self.config.poll_timeout,
        );
        match receive_loop.spawn() {
            Ok(thread) => *session.receiver.lock() = Some(thread),
            Err(e) => {
                error!(client = %handle, error = %e, "Failed to start receive loop");
                self.engine.destroy_instance(native);
                return Err(ClientError::EngineUnavailable(format!(
                    "receive loop could not start: {e}"
                )));
            }
        }

        self.sessions.insert(id, session);
        info!(client = %handle, native = %native, "Opened client");
        Ok(handle)
    }

    /// Close `handle`: stop its receive loop, fail its pending calls with
    /// `HandleClosed`, end its subscriptions and release the engine instance.
    ///
    /// Idempotent; returns false if the handle was not open.
    pub fn close(&self, handle: ClientHandle) -> bool {
        let Some((_, session)) = self.sessions.remove(&handle.id()) else {
            debug!(client = %handle, "Close on a handle that is not open");
            return false;
        };
        self.teardown(&session);
        true
    }

    fn teardown(&self, session: &Session) {
        // No submission can reach the engine once this commits.
        session.transition(SessionState::Closed);
        session.stop.store(true, Ordering::Release);

        if let Some(receiver) = session.receiver.lock().take() {
            if receiver.thread().id() == thread::current().id() {
                warn!(client = %session.handle, "Close called from the receive loop; not joining");
            } else if receiver.join().is_err() {
                error!(client = %session.handle, "Receive loop panicked");
            }
        }

        let failed = session.pending.fail_all();
        session.dispatcher.close();
        self.engine.destroy_instance(session.native);

        info!(
            client = %session.handle,
            failed_calls = failed,
            "Closed client"
        );
    }

    pub fn is_valid(&self, handle: ClientHandle) -> bool {
        self.sessions.contains_key(&handle.id())
    }

    pub fn info(&self, handle: ClientHandle) -> Option<HandleInfo> {
        self.sessions.get(&handle.id()).map(|session| session.info())
    }

    /// Counters for `handle`'s calls and updates since it was opened.
    pub fn stats(&self, handle: ClientHandle) -> Option<HandleStats> {
        self.sessions.get(&handle.id()).map(|session| session.stats())
    }

    /// Every handle currently open, oldest first.
    pub fn handles(&self) -> Vec<ClientHandle> {
        let mut handles: Vec<ClientHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().handle)
            .collect();
        handles.sort_by_key(|handle| handle.id());
        handles
    }

    /// Close every open handle. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        self.handles()
            .into_iter()
            .filter(|handle| self.close(*handle))
            .count()
    }

    fn session(&self, handle: ClientHandle) -> ClientResult<Arc<Session>> {
        self.sessions
            .get(&handle.id())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ClientError::InvalidHandle(handle.id()))
    }

    /// Send `request` and return a future for its response.
    ///
    /// Returns once the engine has accepted the frame. `timeout = None`
    /// applies the configured default.
    pub fn submit(
        &self,
        handle: ClientHandle,
        request: Request,
        timeout: Option<Duration>,
    ) -> ClientResult<ResponseFuture> {
        codec::validate(&request)?;
        let session = self.session(handle)?;

        let state = session.state.read();
        if !state.accepts_requests() {
            return Err(match *state {
                SessionState::Closed => ClientError::InvalidHandle(handle.id()),
                _ => ClientError::HandleClosed,
            });
        }

        let timeout = timeout.unwrap_or(self.config.default_request_timeout);
        let (token, rx, deadline) = session.pending.register(request.method(), timeout);
        let future = ResponseFuture::new(
            token,
            request.method().to_string(),
            deadline,
            rx,
            Arc::clone(&session.pending),
        );
        let frame = codec::encode(&request, Some(token))?;

        let mut attempt = 1;
        loop {
            match self.engine.submit(session.native, &frame) {
                Ok(()) => break,
                Err(e) if e.is_transient() && attempt < self.config.submit_attempts => {
                    debug!(
                        client = %handle,
                        method = request.method(),
                        attempt = attempt,
                        error = %e,
                        "Retrying submission"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        client = %handle,
                        method = request.method(),
                        attempts = attempt,
                        error = %e,
                        "Engine refused submission"
                    );
                    future.cancel();
                    return Err(ClientError::Submit(e.to_string()));
                }
            }
        }
        drop(state);

        debug!(
            client = %handle,
            correlation_id = %token,
            method = request.method(),
            "Submitted request"
        );
        Ok(future)
    }

    /// Send a typed request and wait for its typed response.
    pub async fn call<M: Method>(
        &self,
        handle: ClientHandle,
        method: &M,
        timeout: Option<Duration>,
    ) -> ClientResult<M::Response> {
        let request = Request::from_payload(M::NAME, method)?;
        let response = self.submit(handle, request, timeout)?.await?;
        M::Response::from_object(&response)
    }

    /// Run `request` through the engine's synchronous path, bypassing any
    /// handle. Only some methods support this (see `MethodInfo::synchronous`).
    pub fn execute(&self, request: &Request) -> ClientResult<Response> {
        let frame = codec::encode(request, None)?;
        let raw = self.engine.execute_sync(&frame).ok_or_else(|| {
            ClientError::Submit(format!("engine returned nothing for {}", request.method()))
        })?;
        let object = codec::decode_object(&raw)?;
        match object.as_failure() {
            Some(failure) => Err(ClientError::Engine(failure)),
            None => Ok(object),
        }
    }

    /// Typed form of `execute`.
    pub fn execute_method<M: Method>(&self, method: &M) -> ClientResult<M::Response> {
        let request = Request::from_payload(M::NAME, method)?;
        M::Response::from_object(&self.execute(&request)?)
    }

    /// Subscribe to push updates on `handle`.
    pub fn subscribe(&self, handle: ClientHandle, filter: UpdateFilter) -> ClientResult<Subscription> {
        let session = self.session(handle)?;
        session.dispatcher.subscribe(filter)
    }

    pub fn unsubscribe(&self, handle: ClientHandle, id: SubscriptionId) -> ClientResult<bool> {
        Ok(self.session(handle)?.dispatcher.unsubscribe(id))
    }

    /// Graceful close: ask the engine to shut the instance down, wait (up to
    /// `timeout`, default from config) for its closed signal, then `close`.
    pub async fn shutdown(&self, handle: ClientHandle, timeout: Option<Duration>) -> ClientResult<()> {
        let session = self.session(handle)?;
        let timeout = timeout.unwrap_or(self.config.shutdown_timeout);
        let started = Instant::now();

        let state_changed = session.state_changed.notified();
        tokio::pin!(state_changed);
        state_changed.as_mut().enable();

        if session.state() == SessionState::Open {
            match self.call(handle, &methods::Close {}, Some(timeout)).await {
                Ok(_) | Err(ClientError::HandleClosed) => {}
                Err(e) => warn!(client = %handle, error = %e, "Engine did not acknowledge close"),
            }
        }

        if session.state() == SessionState::Open {
            let remaining = timeout.saturating_sub(started.elapsed());
            if tokio::time::timeout(remaining, state_changed).await.is_err() {
                warn!(
                    client = %handle,
                    timeout_ms = timeout.as_millis(),
                    "Engine did not confirm shutdown in time"
                );
            }
        }

        self.close(handle);
        Ok(())
    }
}

impl<E: Engine> Drop for ClientManager<E> {
    fn drop(&mut self) {
        let closed = self.close_all();
        if closed > 0 {
            debug!(closed = closed, "Closed remaining clients on drop");
        }
    }
}

impl<E: Engine> std::fmt::Debug for ClientManager<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientManager")
            .field("open_handles", &self.sessions.len())
            .field("config", &self.config)
            .finish()
    }
}
