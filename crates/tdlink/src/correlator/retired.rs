//! Time-bounded memory of tokens that stopped waiting.
//!
//! A call that timed out or was cancelled may still get answered by the
//! engine. Remembering its token for a while lets the receive loop tell such
//! late answers apart from tokens it never issued.

use crate::domain::correlation::CorrelationId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub(crate) struct RetiredTokens {
    inner: Mutex<Inner>,
    ttl: Duration,
}

struct Inner {
    /// Token -> when it was retired.
    tokens: HashMap<CorrelationId, Instant>,
    last_gc: Instant,
}

impl RetiredTokens {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tokens: HashMap::new(),
                last_gc: Instant::now(),
            }),
            ttl,
        }
    }

    pub(crate) fn retire(&self, token: CorrelationId) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if now.duration_since(inner.last_gc) > self.ttl {
            let ttl = self.ttl;
            inner
                .tokens
                .retain(|_, retired_at| now.duration_since(*retired_at) <= ttl);
            inner.last_gc = now;
        }
        inner.tokens.insert(token, now);
    }

    /// Forget `token`, reporting whether it was retired and still in its window.
    pub(crate) fn take(&self, token: &CorrelationId) -> bool {
        let mut inner = self.inner.lock();
        match inner.tokens.remove(token) {
            Some(retired_at) => retired_at.elapsed() <= self.ttl,
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().tokens.len()
    }
}
