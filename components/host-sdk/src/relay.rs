// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error relay: the side channel the engine uses to report a fatal error
//! while a synchronous call is still on the stack.
//!
//! Many entry points return `void` or an opaque handle, so there is no value
//! channel to carry a failure. Instead the engine calls the process-wide
//! [`relay_foreign_error`] entry point (installed once per module through
//! `crt_set_error_relay`) before returning. The relay stores the error in a
//! slot owned by the calling thread, and the call binder drains that slot the
//! moment the foreign function returns.
//!
//! The slot is thread-local: relay callbacks from calls made on different
//! threads never observe each other.

use std::cell::RefCell;
use std::ffi::c_char;

use crt_ffi_primitives::{catch_panic_ffi, FfiStr};

use crate::error::CallError;

/// Signature of the relay entry point handed to the engine.
pub type ErrorRelayFn =
    unsafe extern "C" fn(code: i32, name: *const c_char, message: *const c_char);

/// Signature of the engine function that installs the relay.
pub type SetErrorRelayFn = unsafe extern "C" fn(relay: ErrorRelayFn);

thread_local! {
    static PENDING: RefCell<Option<CallError>> = const { RefCell::new(None) };
}

/// Relay entry point the engine invokes as `(code, name, message)`.
///
/// Both strings are borrowed for the duration of the callback only.
pub unsafe extern "C" fn relay_foreign_error(
    code: i32,
    name: *const c_char,
    message: *const c_char,
) {
    let outcome = catch_panic_ffi(|| {
        let error = unsafe {
            CallError::new(
                code,
                FfiStr::from_ptr(name).to_string(),
                FfiStr::from_ptr(message).to_string(),
            )
        };
        record(error);
    });
    if let Err(panic) = outcome {
        log::error!("error relay panicked: {panic}");
    }
}

/// Get the relay entry point function pointer.
pub fn relay_fn() -> ErrorRelayFn {
    relay_foreign_error
}

/// Store `error` in the calling thread's slot.
///
/// A second error raised during the same call replaces the first; the engine
/// aborts the call on the first one, so the last is the one that stuck.
pub fn record(error: CallError) {
    PENDING.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(previous) = slot.as_ref() {
            log::debug!("error relay overwriting unconsumed error {previous}");
        }
        *slot = Some(error);
    });
}

/// Remove and return the calling thread's pending error.
pub fn take() -> Option<CallError> {
    PENDING.with(|slot| slot.borrow_mut().take())
}

/// Whether an error is waiting in the calling thread's slot.
pub fn is_pending() -> bool {
    PENDING.with(|slot| slot.borrow().is_some())
}
