//! The receive loop: the single consumer of one engine instance's output.
//!
//! Runs on a dedicated OS thread because the engine's `receive` blocks for
//! up to the poll timeout. Each cycle it checks the stop flag, polls once,
//! routes the frame, and sweeps expired pending calls.

use crate::codec;
use crate::domain::methods::is_engine_shutdown;
use crate::domain::types::{Frame, SessionState};
use crate::ports::outbound::Engine;
use crate::session::Session;
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound between expiry sweeps while frames keep arriving.
const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    EngineClosed,
}

pub(crate) struct ReceiveLoop<E: Engine> {
    engine: Arc<E>,
    session: Arc<Session>,
    poll_timeout: Duration,
}

impl<E: Engine> ReceiveLoop<E> {
    pub(crate) fn new(engine: Arc<E>, session: Arc<Session>, poll_timeout: Duration) -> Self {
        Self {
            engine,
            session,
            poll_timeout,
        }
    }

    pub(crate) fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("tdlink-recv-{}", self.session.handle.id().raw()))
            .spawn(move || self.run())
    }

    fn run(self) {
        let client = self.session.handle;
        info!(client = %client, native = %self.session.native, "Receive loop started");

        let mut last_sweep = Instant::now();
        while !self.session.stop.load(Ordering::Acquire) {
            let polled = self.engine.receive(self.session.native, self.poll_timeout);
            let idle = polled.is_none();

            if let Some(raw) = polled {
                if self.route(&raw) == Flow::EngineClosed {
                    self.on_engine_closed();
                    break;
                }
            }

            if idle || last_sweep.elapsed() >= SWEEP_INTERVAL {
                let expired = self.session.pending.remove_expired();
                if expired > 0 {
                    debug!(client = %client, expired = expired, "Swept expired pending calls");
                }
                last_sweep = Instant::now();
            }
        }

        info!(client = %client, "Receive loop stopped");
    }

    fn route(&self, raw: &str) -> Flow {
        match codec::decode(raw) {
            Ok(Frame::Response { token, payload }) => {
                self.session.pending.resolve(token, payload);
                Flow::Continue
            }
            Ok(Frame::Update(update)) => {
                let closed = is_engine_shutdown(&update);
                self.session.dispatcher.publish(update);
                if closed {
                    Flow::EngineClosed
                } else {
                    Flow::Continue
                }
            }
            Err(e) => {
                warn!(
                    client = %self.session.handle,
                    error = %e,
                    frame_len = raw.len(),
                    "Dropping undecodable frame"
                );
                Flow::Continue
            }
        }
    }

    fn on_engine_closed(&self) {
        let previous = self.session.transition(SessionState::EngineClosed);
        let failed = self.session.pending.fail_all();
        self.session.dispatcher.close();
        info!(
            client = %self.session.handle,
            previous = ?previous,
            failed_calls = failed,
            "Engine closed the instance"
        );
    }
}
