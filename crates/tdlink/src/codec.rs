//! Wire codec for the engine's JSON exchange format.
//!
//! Outbound: a [`Request`] becomes one JSON object whose `@type` is the
//! method name, with the correlation token (if any) in `@extra`.
//!
//! Inbound: an object carrying `@extra` is a response to the request that
//! sent that token; an object without it is a push update.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{DecodingError, EncodingError};
use crate::domain::types::{
    json_kind, Frame, Request, TdObject, CLIENT_ID_KEY, EXTRA_KEY, RESERVED_KEYS, TYPE_KEY,
};
use serde_json::{Map, Value};

/// Check that `method` is a plain engine identifier.
pub fn validate_method(method: &str) -> Result<(), EncodingError> {
    let mut chars = method.chars();
    match chars.next() {
        None => Err(EncodingError::EmptyMethod),
        Some(first) if !first.is_ascii_alphabetic() => {
            Err(EncodingError::InvalidMethod(method.to_string()))
        }
        Some(_) => {
            if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                Ok(())
            } else {
                Err(EncodingError::InvalidMethod(method.to_string()))
            }
        }
    }
}

/// Check everything `encode` checks, without serializing.
pub fn validate(request: &Request) -> Result<(), EncodingError> {
    validate_method(request.method())?;
    match RESERVED_KEYS
        .iter()
        .find(|key| request.payload().contains_key(**key))
    {
        Some(key) => Err(EncodingError::ReservedKey((*key).to_string())),
        None => Ok(()),
    }
}

/// Serialize `request`, tagging it with `token` when it expects an
/// asynchronous answer.
pub fn encode(request: &Request, token: Option<CorrelationId>) -> Result<String, EncodingError> {
    validate(request)?;

    let mut object = Map::with_capacity(request.payload().len() + 2);
    object.insert(
        TYPE_KEY.to_string(),
        Value::String(request.method().to_string()),
    );
    for (key, value) in request.payload() {
        object.insert(key.clone(), value.clone());
    }
    if let Some(token) = token {
        object.insert(EXTRA_KEY.to_string(), Value::String(token.to_string()));
    }

    serde_json::to_string(&Value::Object(object))
        .map_err(|e| EncodingError::Serialize(e.to_string()))
}

/// View raw engine output as text.
pub fn frame_text(raw: &[u8]) -> Result<&str, DecodingError> {
    std::str::from_utf8(raw).map_err(|e| DecodingError::Utf8(e.to_string()))
}

/// Parse one frame of engine output.
pub fn decode(raw: &str) -> Result<Frame, DecodingError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| DecodingError::Json(e.to_string()))?;
    let Value::Object(mut map) = value else {
        return Err(DecodingError::NotAnObject);
    };

    let kind = match map.remove(TYPE_KEY) {
        Some(Value::String(kind)) if !kind.is_empty() => kind,
        _ => return Err(DecodingError::MissingType),
    };
    map.remove(CLIENT_ID_KEY);

    match map.remove(EXTRA_KEY) {
        None => Ok(Frame::Update(TdObject::new(kind, map))),
        Some(Value::String(extra)) => {
            let token = CorrelationId::parse(&extra)
                .map_err(|_| DecodingError::ForeignExtra(extra.clone()))?;
            Ok(Frame::Response {
                token,
                payload: TdObject::new(kind, map),
            })
        }
        Some(other) => Err(DecodingError::ForeignExtra(json_kind(&other).to_string())),
    }
}

/// Parse the answer of a synchronous `execute`, which carries no token.
pub fn decode_object(raw: &str) -> Result<TdObject, DecodingError> {
    match decode(raw)? {
        Frame::Update(object) => Ok(object),
        Frame::Response { payload, .. } => Ok(payload),
    }
}
