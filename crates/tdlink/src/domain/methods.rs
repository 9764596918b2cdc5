//! Typed engine methods and the method registry.
//!
//! A [`Method`] binds a serializable request payload to its wire method name
//! and to the response type the engine answers with. The registry records
//! which methods the engine can run synchronously through `execute`.

use crate::domain::error::{ClientError, ClientResult};
use crate::domain::types::TdObject;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Update kind carrying authorization state transitions.
pub const UPDATE_AUTHORIZATION_STATE: &str = "updateAuthorizationState";
/// Authorization state reported once the engine instance is shut down for good.
pub const AUTHORIZATION_STATE_CLOSED: &str = "authorizationStateClosed";

/// Whether an update is the engine's permanent-shutdown signal.
pub fn is_engine_shutdown(update: &TdObject) -> bool {
    update.kind() == UPDATE_AUTHORIZATION_STATE
        && update
            .get("authorization_state")
            .and_then(|state| state.get("@type"))
            .and_then(|kind| kind.as_str())
            == Some(AUTHORIZATION_STATE_CLOSED)
}

/// A typed request.
pub trait Method: Serialize {
    /// Wire method name (the request's `@type`).
    const NAME: &'static str;

    type Response: TdResponse;
}

/// A typed view of a response object.
pub trait TdResponse: Sized {
    fn from_object(object: &TdObject) -> ClientResult<Self>;
}

fn expect_kind<T>(object: &TdObject, expected: &'static str) -> ClientResult<T>
where
    T: for<'de> Deserialize<'de>,
{
    if object.kind() != expected {
        return Err(ClientError::UnexpectedResponse {
            expected: expected.to_string(),
            got: object.kind().to_string(),
        });
    }
    Ok(object.to_typed()?)
}

// -----------------------------------------------------------------------------
// Responses
// -----------------------------------------------------------------------------

/// The engine's `ok`: the request succeeded and carries no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Done {}

impl TdResponse for Done {
    fn from_object(object: &TdObject) -> ClientResult<Self> {
        expect_kind(object, "ok")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestString {
    pub value: String,
}

impl TdResponse for TestString {
    fn from_object(object: &TdObject) -> ClientResult<Self> {
        expect_kind(object, "testString")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TestInt {
    pub value: i32,
}

impl TdResponse for TestInt {
    fn from_object(object: &TdObject) -> ClientResult<Self> {
        expect_kind(object, "testInt")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestVectorInt {
    pub value: Vec<i32>,
}

impl TdResponse for TestVectorInt {
    fn from_object(object: &TdObject) -> ClientResult<Self> {
        expect_kind(object, "testVectorInt")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LogVerbosityLevel {
    pub verbosity_level: i32,
}

impl TdResponse for LogVerbosityLevel {
    fn from_object(object: &TdObject) -> ClientResult<Self> {
        expect_kind(object, "logVerbosityLevel")
    }
}

/// Value of an engine option. 64-bit integers travel as strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum OptionValue {
    OptionValueBoolean { value: bool },
    OptionValueEmpty {},
    OptionValueInteger { value: String },
    OptionValueString { value: String },
}

impl TdResponse for OptionValue {
    fn from_object(object: &TdObject) -> ClientResult<Self> {
        if !object.kind().starts_with("optionValue") {
            return Err(ClientError::UnexpectedResponse {
                expected: "optionValue*".to_string(),
                got: object.kind().to_string(),
            });
        }
        serde_json::from_value(object.to_value()).map_err(|e| {
            ClientError::Decoding(crate::domain::error::DecodingError::Shape {
                kind: object.kind().to_string(),
                reason: e.to_string(),
            })
        })
    }
}

/// Current authorization state, kept as its `@type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationState {
    pub kind: String,
}

impl AuthorizationState {
    pub fn is_ready(&self) -> bool {
        self.kind == "authorizationStateReady"
    }

    pub fn is_closed(&self) -> bool {
        self.kind == AUTHORIZATION_STATE_CLOSED
    }
}

impl TdResponse for AuthorizationState {
    fn from_object(object: &TdObject) -> ClientResult<Self> {
        if !object.kind().starts_with("authorizationState") {
            return Err(ClientError::UnexpectedResponse {
                expected: "authorizationState*".to_string(),
                got: object.kind().to_string(),
            });
        }
        Ok(Self {
            kind: object.kind().to_string(),
        })
    }
}

/// Untyped passthrough for callers that want the raw object.
impl TdResponse for TdObject {
    fn from_object(object: &TdObject) -> ClientResult<Self> {
        Ok(object.clone())
    }
}

// -----------------------------------------------------------------------------
// Requests
// -----------------------------------------------------------------------------

macro_rules! method {
    ($ty:ident, $name:literal, $resp:ty) => {
        impl Method for $ty {
            const NAME: &'static str = $name;
            type Response = $resp;
        }
    };
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestCallEmpty {}
method!(TestCallEmpty, "testCallEmpty", Done);

#[derive(Debug, Clone, Serialize)]
pub struct TestCallString {
    pub x: String,
}
method!(TestCallString, "testCallString", TestString);

#[derive(Debug, Clone, Serialize)]
pub struct TestSquareInt {
    pub x: i32,
}
method!(TestSquareInt, "testSquareInt", TestInt);

#[derive(Debug, Clone, Serialize)]
pub struct TestCallVectorInt {
    pub x: Vec<i32>,
}
method!(TestCallVectorInt, "testCallVectorInt", TestVectorInt);

#[derive(Debug, Clone, Serialize)]
pub struct GetOption {
    pub name: String,
}
method!(GetOption, "getOption", OptionValue);

#[derive(Debug, Clone, Serialize)]
pub struct SetLogVerbosityLevel {
    pub new_verbosity_level: i32,
}
method!(SetLogVerbosityLevel, "setLogVerbosityLevel", Done);

#[derive(Debug, Clone, Default, Serialize)]
pub struct GetLogVerbosityLevel {}
method!(GetLogVerbosityLevel, "getLogVerbosityLevel", LogVerbosityLevel);

#[derive(Debug, Clone, Default, Serialize)]
pub struct GetAuthorizationState {}
method!(GetAuthorizationState, "getAuthorizationState", AuthorizationState);

/// Asks the engine to shut the instance down; it answers `ok` and later
/// pushes `authorizationStateClosed`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Close {}
method!(Close, "close", Done);

// -----------------------------------------------------------------------------
// Registry
// -----------------------------------------------------------------------------

/// Method metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: &'static str,
    /// Response `@type` (a prefix ending in `*` when it varies).
    pub response: &'static str,
    /// Can be run through the synchronous `execute` path.
    pub synchronous: bool,
    pub description: &'static str,
}

const fn info(
    name: &'static str,
    response: &'static str,
    synchronous: bool,
    description: &'static str,
) -> MethodInfo {
    MethodInfo {
        name,
        response,
        synchronous,
        description,
    }
}

static METHODS: LazyLock<HashMap<&'static str, MethodInfo>> = LazyLock::new(|| {
    [
        info("testCallEmpty", "ok", false, "Round trip with no payload"),
        info("testCallString", "testString", false, "Echoes a string"),
        info("testSquareInt", "testInt", false, "Squares an integer"),
        info("testCallVectorInt", "testVectorInt", false, "Echoes an integer vector"),
        info("getOption", "optionValue*", true, "Reads an engine option"),
        info("setLogVerbosityLevel", "ok", true, "Sets engine log verbosity"),
        info("getLogVerbosityLevel", "logVerbosityLevel", true, "Reads engine log verbosity"),
        info("getAuthorizationState", "authorizationState*", false, "Current authorization state"),
        info("close", "ok", false, "Shuts the instance down"),
    ]
    .into_iter()
    .map(|m| (m.name, m))
    .collect()
});

/// Metadata for a known method.
pub fn get_method_info(name: &str) -> Option<&'static MethodInfo> {
    METHODS.get(name)
}

/// Whether `name` is in the registry. Unknown methods can still be sent.
pub fn is_method_known(name: &str) -> bool {
    METHODS.contains_key(name)
}

/// Whether `name` may be run synchronously.
pub fn is_synchronous(name: &str) -> bool {
    METHODS.get(name).is_some_and(|m| m.synchronous)
}
