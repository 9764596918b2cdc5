//! Core value types: client identifiers, requests, and decoded objects.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{DecodingError, EncodingError, EngineFailure};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Wire key carrying the object discriminator.
pub const TYPE_KEY: &str = "@type";
/// Wire key the engine echoes back verbatim on responses.
pub const EXTRA_KEY: &str = "@extra";
/// Wire key added by multi-client engine builds.
pub const CLIENT_ID_KEY: &str = "@client_id";

/// Keys an application payload may not set itself.
pub const RESERVED_KEYS: [&str; 3] = [TYPE_KEY, EXTRA_KEY, CLIENT_ID_KEY];

/// Manager-scoped identifier of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The engine's own value for an instance (a pointer in the C interface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(usize);

impl NativeHandle {
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Opaque reference to one engine client instance.
///
/// Handles are plain identifiers; all state lives in the `ClientManager`
/// that issued them. Using a handle after `close` yields `InvalidHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle {
    id: ClientId,
    created_at: DateTime<Utc>,
}

impl ClientHandle {
    pub(crate) fn new(id: ClientId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client{}", self.id)
    }
}

/// Liveness of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepting requests, receive loop running.
    Open,
    /// The engine signalled permanent shutdown; only `close` remains.
    EngineClosed,
    /// Closed by the application; the native instance is released.
    Closed,
}

impl SessionState {
    pub fn accepts_requests(self) -> bool {
        self == SessionState::Open
    }
}

/// Snapshot of a handle's bookkeeping.
#[derive(Debug, Clone)]
pub struct HandleInfo {
    pub handle: ClientHandle,
    pub native: NativeHandle,
    pub state: SessionState,
    pub pending_calls: usize,
    pub subscriptions: usize,
}

/// Point-in-time counters for one handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandleStats {
    pub calls_registered: u64,
    pub calls_completed: u64,
    pub calls_timed_out: u64,
    /// Cancelled by the caller, explicitly or by dropping the future
    pub calls_cancelled: u64,
    /// Failed with `HandleClosed`
    pub calls_closed: u64,
    /// Answers that arrived after their call stopped waiting
    pub late_responses: u64,
    pub updates_published: u64,
    pub updates_delivered: u64,
    /// Updates shed from full subscriber queues
    pub updates_dropped: u64,
}

/// An immutable description of one engine method call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: String,
    payload: Map<String, Value>,
}

impl Request {
    /// A request with an empty payload.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            payload: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Build a request from any serializable payload.
    pub fn from_payload<T: Serialize>(
        method: impl Into<String>,
        payload: &T,
    ) -> Result<Self, EncodingError> {
        let value =
            serde_json::to_value(payload).map_err(|e| EncodingError::Serialize(e.to_string()))?;
        let payload = match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(EncodingError::NotAnObject(json_kind(&other))),
        };
        Ok(Self {
            method: method.into(),
            payload,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }
}

/// A decoded engine object: its `@type` plus the remaining fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TdObject {
    kind: String,
    fields: Map<String, Value>,
}

/// An object answering a request.
pub type Response = TdObject;
/// An object pushed by the engine without being asked.
pub type Update = TdObject;

impl TdObject {
    pub fn new(kind: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            fields,
        }
    }

    /// The object's `@type`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }

    /// Interpret an `error` object.
    pub fn as_failure(&self) -> Option<EngineFailure> {
        if !self.is_error() {
            return None;
        }
        let code = self
            .fields
            .get("code")
            .and_then(Value::as_i64)
            .and_then(|c| i32::try_from(c).ok())
            .unwrap_or(0);
        let message = self
            .fields
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(EngineFailure::new(code, message))
    }

    /// Deserialize the fields into a typed value.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, DecodingError> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|e| {
            DecodingError::Shape {
                kind: self.kind.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Rebuild the wire object, `@type` included.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(TYPE_KEY.to_string(), Value::String(self.kind.clone()));
        Value::Object(map)
    }
}

/// One decoded unit of engine output.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Response {
        token: CorrelationId,
        payload: Response,
    },
    Update(Update),
}

impl Frame {
    pub fn kind(&self) -> &str {
        match self {
            Frame::Response { payload, .. } => payload.kind(),
            Frame::Update(update) => update.kind(),
        }
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
