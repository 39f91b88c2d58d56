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

//! FFI-safe text and pointer types.

use std::any::Any;
use std::ffi::{c_char, c_void, CStr, CString, NulError};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Borrowed null-terminated text crossing the boundary.
///
/// The bytes are owned by whichever side produced them and are only valid for
/// the duration of the call or callback that handed the pointer over.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfiStr {
    ptr: *const c_char,
}

impl FfiStr {
    pub const fn null() -> Self {
        Self {
            ptr: std::ptr::null(),
        }
    }

    pub const fn from_ptr(ptr: *const c_char) -> Self {
        Self { ptr }
    }

    pub fn as_ptr(&self) -> *const c_char {
        self.ptr
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Copy the text into an owned `String`, replacing invalid UTF-8.
    ///
    /// A null pointer yields an empty string.
    ///
    /// # Safety
    /// The pointer must be null or point to a NUL-terminated byte sequence
    /// that stays alive for the duration of this call.
    pub unsafe fn to_string(&self) -> String {
        self.to_option().unwrap_or_default()
    }

    /// Like [`FfiStr::to_string`] but distinguishes null from empty.
    ///
    /// # Safety
    /// Same contract as [`FfiStr::to_string`].
    pub unsafe fn to_option(&self) -> Option<String> {
        if self.ptr.is_null() {
            return None;
        }
        Some(CStr::from_ptr(self.ptr).to_string_lossy().into_owned())
    }
}

/// Host-owned null-terminated copy of a Rust string.
///
/// Keep the value alive until the foreign call that borrows it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfiCString {
    inner: CString,
}

impl FfiCString {
    pub fn new(text: &str) -> Result<Self, NulError> {
        Ok(Self {
            inner: CString::new(text)?,
        })
    }

    pub fn as_ffi(&self) -> FfiStr {
        FfiStr::from_ptr(self.inner.as_ptr())
    }

    pub fn as_ptr(&self) -> *const c_char {
        self.inner.as_ptr()
    }
}

/// Pointer to an optional marshaled string, null when absent.
pub fn optional_ptr(text: Option<&FfiCString>) -> *const c_char {
    text.map_or(std::ptr::null(), FfiCString::as_ptr)
}

/// A `*const T` that may be moved across threads.
///
/// Whoever constructs one asserts that the pointee tolerates access from the
/// receiving thread.
#[derive(Debug, Clone, Copy)]
pub struct SendPtr<T = c_void>(pub *const T);

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

impl<T> SendPtr<T> {
    pub fn as_ptr(&self) -> *const T {
        self.0
    }
}

/// A `*mut T` that may be moved across threads.
#[derive(Debug, Clone, Copy)]
pub struct SendMutPtr<T = c_void>(pub *mut T);

unsafe impl<T> Send for SendMutPtr<T> {}
unsafe impl<T> Sync for SendMutPtr<T> {}

impl<T> SendMutPtr<T> {
    pub fn as_ptr(&self) -> *mut T {
        self.0
    }
}

/// Run `f`, converting a panic into `Err(message)`.
///
/// Unwinding out of an `extern "C"` function aborts the process, so every
/// entry point the foreign side can call goes through this.
pub fn catch_panic_ffi<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
