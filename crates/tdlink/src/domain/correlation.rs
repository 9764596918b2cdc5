//! Correlation tokens linking a submitted request to its response.
//!
//! Tokens are UUID v7: time-ordered and unique per process, so a token is
//! never reused while the request that carries it is still pending. On the
//! wire a token travels in the request's `"@extra"` field, which the engine
//! echoes back verbatim on the matching response.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlation token attached to every asynchronous request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh token.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse the canonical hyphenated form produced by `Display`.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Milliseconds since the Unix epoch at which the token was minted.
    pub fn timestamp_ms(&self) -> Option<u64> {
        let bytes = self.0.as_bytes();
        if (bytes[6] >> 4) != 7 {
            return None;
        }
        let ts = bytes[..6]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        Some(ts)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
