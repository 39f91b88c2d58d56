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

//! `crt-ffi-primitives`: Core FFI-safe types and call adapters.
//!
//! This crate provides the small set of primitives every piece of the CRT
//! bridge needs when it crosses the foreign calling interface.
//!
//! **No dependencies beyond `std`.**
//!
//! # Types
//!
//! - [`FfiStr`] / [`FfiCString`]: Null-terminated text, borrowed and host-owned
//! - [`SendPtr`] / [`SendMutPtr`]: Send-safe raw pointer wrappers
//! - [`ForeignSignature`]: Typed adapter over a raw foreign function pointer
//! - [`catch_panic_ffi`]: Panic containment for `extern "C"` entry points
//!
//! # Macros
//!
//! - [`impl_foreign_signature!`]: Instantiate [`ForeignSignature`] for one arity
//! - [`ffi_callback_table!`]: Generate `#[repr(C)]` host callback tables

pub mod macros;
pub mod signature;
pub mod types;

pub use signature::ForeignSignature;
pub use types::*;
