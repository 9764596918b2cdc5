//! Engine adapter over the native `tdjson` library.
//!
//! Links the library's C JSON client interface. Strings returned by
//! `td_json_client_receive`/`td_json_client_execute` stay valid only until
//! the next call on the same client, so they are copied out immediately.
#![allow(unsafe_code)]

use crate::codec;
use crate::domain::error::EngineError;
use crate::domain::types::NativeHandle;
use crate::ports::outbound::Engine;
use std::ffi::{c_char, c_double, c_void, CStr, CString};
use std::time::Duration;
use tracing::warn;

#[link(name = "tdjson")]
extern "C" {
    fn td_json_client_create() -> *mut c_void;
    fn td_json_client_send(client: *mut c_void, request: *const c_char);
    fn td_json_client_receive(client: *mut c_void, timeout: c_double) -> *const c_char;
    fn td_json_client_execute(client: *mut c_void, request: *const c_char) -> *const c_char;
    fn td_json_client_destroy(client: *mut c_void);
}

/// The native engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct TdJsonEngine;

impl TdJsonEngine {
    pub fn new() -> Self {
        Self
    }
}

fn to_ptr(handle: NativeHandle) -> *mut c_void {
    handle.raw() as *mut c_void
}

/// Copy a borrowed engine string, tolerating null.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of this call.
unsafe fn copy_out(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    match codec::frame_text(CStr::from_ptr(ptr).to_bytes()) {
        Ok(text) => Some(text.to_owned()),
        Err(e) => {
            warn!(error = %e, "Dropping engine output that is not UTF-8");
            None
        }
    }
}

impl Engine for TdJsonEngine {
    fn create_instance(&self) -> Result<NativeHandle, EngineError> {
        // SAFETY: no preconditions; returns null on failure.
        let client = unsafe { td_json_client_create() };
        if client.is_null() {
            return Err(EngineError::CreateRejected(
                "td_json_client_create returned null".into(),
            ));
        }
        Ok(NativeHandle::new(client as usize))
    }

    fn submit(&self, handle: NativeHandle, frame: &str) -> Result<(), EngineError> {
        let request = CString::new(frame)
            .map_err(|_| EngineError::Rejected("frame contains an interior NUL".into()))?;
        // SAFETY: the handle came from td_json_client_create and the binding
        // never submits after destroy; the engine copies the request.
        unsafe { td_json_client_send(to_ptr(handle), request.as_ptr()) };
        Ok(())
    }

    fn receive(&self, handle: NativeHandle, timeout: Duration) -> Option<String> {
        // SAFETY: single receiver per client (enforced by the receive loop),
        // and the result is copied before any further call on this client.
        unsafe { copy_out(td_json_client_receive(to_ptr(handle), timeout.as_secs_f64())) }
    }

    fn execute_sync(&self, frame: &str) -> Option<String> {
        let Ok(request) = CString::new(frame) else {
            warn!("Synchronous request contains an interior NUL");
            return None;
        };
        // SAFETY: a null client is accepted for synchronous execution; the
        // returned string is copied immediately.
        unsafe { copy_out(td_json_client_execute(std::ptr::null_mut(), request.as_ptr())) }
    }

    fn destroy_instance(&self, handle: NativeHandle) {
        // SAFETY: called exactly once per handle, after the receive loop has
        // been joined.
        unsafe { td_json_client_destroy(to_ptr(handle)) };
    }
}
