//! In-process engine for tests and local development.
//!
//! `MemoryEngine` answers requests through a pluggable responder, lets tests
//! inject arbitrary raw frames (duplicates, garbage, updates), and records
//! contract violations such as two threads receiving on one instance at once.

use crate::domain::error::{codes, EngineError};
use crate::domain::methods::{is_synchronous, AUTHORIZATION_STATE_CLOSED};
use crate::domain::types::{NativeHandle, EXTRA_KEY, TYPE_KEY};
use crate::ports::outbound::Engine;
use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One frame a responder wants the engine to emit.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Answer to the request; the request's `@extra` is copied onto it.
    Respond(Value),
    /// A push update, emitted as-is.
    Push(Value),
}

/// Produces replies for `(method, payload)`.
pub type Responder = dyn Fn(&str, &Map<String, Value>) -> Vec<Reply> + Send + Sync;

struct Instance {
    queue: Mutex<VecDeque<String>>,
    ready: Condvar,
    submitted: Mutex<Vec<String>>,
    receiving: AtomicBool,
}

impl Instance {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            submitted: Mutex::new(Vec::new()),
            receiving: AtomicBool::new(false),
        }
    }

    fn push(&self, frame: String) {
        self.queue.lock().push_back(frame);
        self.ready.notify_one();
    }
}

/// Scripted in-memory engine.
pub struct MemoryEngine {
    next_handle: AtomicUsize,
    instances: Mutex<HashMap<NativeHandle, Arc<Instance>>>,
    destroyed: Mutex<HashMap<NativeHandle, u32>>,
    responder: RwLock<Arc<Responder>>,
    verbosity: Arc<AtomicI32>,
    fail_next_create: AtomicBool,
    transient_submit_failures: AtomicU32,
    contract_violations: AtomicU32,
}

impl MemoryEngine {
    /// An engine answering the built-in test methods.
    pub fn new() -> Self {
        let verbosity = Arc::new(AtomicI32::new(1));
        let responder = default_responder(Arc::clone(&verbosity));
        Self {
            next_handle: AtomicUsize::new(0x1000),
            instances: Mutex::new(HashMap::new()),
            destroyed: Mutex::new(HashMap::new()),
            responder: RwLock::new(responder),
            verbosity,
            fail_next_create: AtomicBool::new(false),
            transient_submit_failures: AtomicU32::new(0),
            contract_violations: AtomicU32::new(0),
        }
    }

    /// An engine that answers through `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) -> Vec<Reply> + Send + Sync + 'static,
    {
        let engine = Self::new();
        engine.set_responder(responder);
        engine
    }

    /// An engine that accepts requests and never answers.
    pub fn silent() -> Self {
        Self::with_responder(|_, _| Vec::new())
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str, &Map<String, Value>) -> Vec<Reply> + Send + Sync + 'static,
    {
        let responder: Arc<Responder> = Arc::new(responder);
        *self.responder.write() = responder;
    }

    /// Queue a raw frame on an instance as if the engine had produced it.
    pub fn inject(&self, handle: NativeHandle, frame: impl Into<String>) -> bool {
        match self.instance(handle) {
            Some(instance) => {
                instance.push(frame.into());
                true
            }
            None => false,
        }
    }

    /// Frames submitted to an instance, in submission order.
    pub fn submitted(&self, handle: NativeHandle) -> Vec<String> {
        self.instance(handle)
            .map(|instance| instance.submitted.lock().clone())
            .unwrap_or_default()
    }

    /// Make the next `create_instance` fail.
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` submissions fail transiently.
    pub fn fail_next_submits(&self, count: u32) {
        self.transient_submit_failures.store(count, Ordering::SeqCst);
    }

    /// Instances created and not yet destroyed.
    pub fn live_instances(&self) -> usize {
        self.instances.lock().len()
    }

    /// How many times `handle` was destroyed.
    pub fn destroy_count(&self, handle: NativeHandle) -> u32 {
        self.destroyed.lock().get(&handle).copied().unwrap_or(0)
    }

    /// Calls that broke the engine's threading contract: concurrent receives
    /// on one instance, or use of a destroyed instance.
    pub fn contract_violations(&self) -> u32 {
        self.contract_violations.load(Ordering::SeqCst)
    }

    pub fn log_verbosity(&self) -> i32 {
        self.verbosity.load(Ordering::SeqCst)
    }

    fn instance(&self, handle: NativeHandle) -> Option<Arc<Instance>> {
        self.instances.lock().get(&handle).cloned()
    }

    fn respond(&self, method: &str, payload: &Map<String, Value>) -> Vec<Reply> {
        let responder: Arc<Responder> = self.responder.read().clone();
        responder(method, payload)
    }
}

/// Split a request frame into its method, `@extra`, and remaining payload.
fn parse_request(frame: &str) -> Result<(String, Option<Value>, Map<String, Value>), EngineError> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| EngineError::Rejected(format!("unparseable request: {e}")))?;
    let Value::Object(mut request) = value else {
        return Err(EngineError::Rejected("request is not an object".into()));
    };
    let method = match request.remove(TYPE_KEY) {
        Some(Value::String(method)) => method,
        _ => return Err(EngineError::Rejected("request has no @type".into())),
    };
    let extra = request.remove(EXTRA_KEY);
    Ok((method, extra, request))
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MemoryEngine {
    fn create_instance(&self) -> Result<NativeHandle, EngineError> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(EngineError::CreateRejected("scripted failure".into()));
        }
        let handle = NativeHandle::new(self.next_handle.fetch_add(0x10, Ordering::SeqCst));
        self.instances.lock().insert(handle, Arc::new(Instance::new()));
        Ok(handle)
    }

    fn submit(&self, handle: NativeHandle, frame: &str) -> Result<(), EngineError> {
        let Some(instance) = self.instance(handle) else {
            self.contract_violations.fetch_add(1, Ordering::SeqCst);
            return Err(EngineError::Rejected(format!("no instance {handle}")));
        };

        let failing = self
            .transient_submit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EngineError::Transient("scripted transient failure".into()));
        }

        instance.submitted.lock().push(frame.to_string());
        let (method, extra, payload) = parse_request(frame)?;
        for reply in self.respond(&method, &payload) {
            match reply {
                Reply::Respond(mut value) => {
                    if let (Some(extra), Value::Object(map)) = (&extra, &mut value) {
                        map.insert(EXTRA_KEY.to_string(), extra.clone());
                    }
                    instance.push(value.to_string());
                }
                Reply::Push(value) => instance.push(value.to_string()),
            }
        }
        Ok(())
    }

    fn receive(&self, handle: NativeHandle, timeout: Duration) -> Option<String> {
        let Some(instance) = self.instance(handle) else {
            self.contract_violations.fetch_add(1, Ordering::SeqCst);
            return None;
        };
        if instance.receiving.swap(true, Ordering::SeqCst) {
            self.contract_violations.fetch_add(1, Ordering::SeqCst);
        }

        let deadline = Instant::now() + timeout;
        let mut queue = instance.queue.lock();
        let frame = loop {
            if let Some(frame) = queue.pop_front() {
                break Some(frame);
            }
            if instance.ready.wait_until(&mut queue, deadline).timed_out() {
                break queue.pop_front();
            }
        };
        drop(queue);

        instance.receiving.store(false, Ordering::SeqCst);
        frame
    }

    fn execute_sync(&self, frame: &str) -> Option<String> {
        let (method, _, payload) = match parse_request(frame) {
            Ok(parsed) => parsed,
            Err(e) => return Some(error_object(codes::BAD_REQUEST, &e.to_string()).to_string()),
        };
        if !is_synchronous(&method) {
            return Some(
                error_object(codes::BAD_REQUEST, "The method can't be executed synchronously")
                    .to_string(),
            );
        }
        self.respond(&method, &payload)
            .into_iter()
            .find_map(|reply| match reply {
                Reply::Respond(value) => Some(value.to_string()),
                Reply::Push(_) => None,
            })
    }

    fn destroy_instance(&self, handle: NativeHandle) {
        let removed = self.instances.lock().remove(&handle);
        if removed.is_none() {
            self.contract_violations.fetch_add(1, Ordering::SeqCst);
        }
        *self.destroyed.lock().entry(handle).or_insert(0) += 1;
    }
}

fn error_object(code: i32, message: &str) -> Value {
    json!({"@type": "error", "code": code, "message": message})
}

fn authorization_update(state: &str) -> Value {
    json!({
        "@type": "updateAuthorizationState",
        "authorization_state": {"@type": state}
    })
}

/// Answers for the built-in test methods.
fn default_responder(verbosity: Arc<AtomicI32>) -> Arc<Responder> {
    Arc::new(move |method: &str, payload: &Map<String, Value>| {
        let reply = match method {
            "testCallEmpty" => json!({"@type": "ok"}),
            "testCallString" => json!({"@type": "testString", "value": payload.get("x")}),
            "testSquareInt" => match payload.get("x").and_then(Value::as_i64) {
                Some(x) => json!({"@type": "testInt", "value": x * x}),
                None => error_object(codes::BAD_REQUEST, "x must be an integer"),
            },
            "testCallVectorInt" => json!({"@type": "testVectorInt", "value": payload.get("x")}),
            "getOption" => match payload.get("name").and_then(Value::as_str) {
                Some("version") => json!({"@type": "optionValueString", "value": "1.8.49"}),
                _ => json!({"@type": "optionValueEmpty"}),
            },
            "setLogVerbosityLevel" => match payload.get("new_verbosity_level").and_then(Value::as_i64) {
                Some(level) => {
                    verbosity.store(level as i32, Ordering::SeqCst);
                    json!({"@type": "ok"})
                }
                None => error_object(codes::BAD_REQUEST, "new_verbosity_level is required"),
            },
            "getLogVerbosityLevel" => json!({
                "@type": "logVerbosityLevel",
                "verbosity_level": verbosity.load(Ordering::SeqCst)
            }),
            "getAuthorizationState" => json!({"@type": "authorizationStateWaitTdlibParameters"}),
            "close" => {
                return vec![
                    Reply::Respond(json!({"@type": "ok"})),
                    Reply::Push(authorization_update("authorizationStateClosing")),
                    Reply::Push(authorization_update(AUTHORIZATION_STATE_CLOSED)),
                ];
            }
            _ => error_object(codes::BAD_REQUEST, &format!("Unknown method \"{method}\"")),
        };
        vec![Reply::Respond(reply)]
    })
}
