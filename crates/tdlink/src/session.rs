//! Per-handle state shared between the manager and the receive loop.

use crate::correlator::PendingCallStore;
use crate::dispatcher::UpdateDispatcher;
use crate::domain::config::ClientConfig;
use crate::domain::types::{ClientHandle, HandleInfo, HandleStats, NativeHandle, SessionState};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::Notify;

pub(crate) struct Session {
    pub(crate) handle: ClientHandle,
    pub(crate) native: NativeHandle,
    /// Read-held around every engine submission; write-held to change state.
    pub(crate) state: RwLock<SessionState>,
    pub(crate) pending: Arc<PendingCallStore>,
    pub(crate) dispatcher: UpdateDispatcher,
    pub(crate) stop: AtomicBool,
    pub(crate) receiver: Mutex<Option<JoinHandle<()>>>,
    /// Signalled when the session leaves `Open`.
    pub(crate) state_changed: Notify,
}

impl Session {
    pub(crate) fn new(handle: ClientHandle, native: NativeHandle, config: &ClientConfig) -> Self {
        Self {
            handle,
            native,
            state: RwLock::new(SessionState::Open),
            pending: Arc::new(PendingCallStore::new(config.retired_token_ttl)),
            dispatcher: UpdateDispatcher::new(
                config.subscriber_queue_capacity,
                config.max_subscriptions,
            ),
            stop: AtomicBool::new(false),
            receiver: Mutex::new(None),
            state_changed: Notify::new(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Move to `next` unless the session is already `Closed`.
    pub(crate) fn transition(&self, next: SessionState) -> SessionState {
        let mut state = self.state.write();
        let previous = *state;
        if previous != SessionState::Closed {
            *state = next;
        }
        drop(state);
        self.state_changed.notify_waiters();
        previous
    }

    pub(crate) fn info(&self) -> HandleInfo {
        HandleInfo {
            handle: self.handle,
            native: self.native,
            state: self.state(),
            pending_calls: self.pending.pending_count(),
            subscriptions: self.dispatcher.subscription_count(),
        }
    }

    pub(crate) fn stats(&self) -> HandleStats {
        let calls = self.pending.stats();
        let updates = self.dispatcher.stats();
        HandleStats {
            calls_registered: calls.total_registered.load(Ordering::Relaxed),
            calls_completed: calls.total_completed.load(Ordering::Relaxed),
            calls_timed_out: calls.total_timeouts.load(Ordering::Relaxed),
            calls_cancelled: calls.total_cancelled.load(Ordering::Relaxed),
            calls_closed: calls.total_closed.load(Ordering::Relaxed),
            late_responses: calls.total_late.load(Ordering::Relaxed),
            updates_published: updates.total_published.load(Ordering::Relaxed),
            updates_delivered: updates.total_delivered.load(Ordering::Relaxed),
            updates_dropped: updates.total_dropped.load(Ordering::Relaxed),
        }
    }
}
