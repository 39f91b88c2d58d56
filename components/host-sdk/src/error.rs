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

//! Error types for bridge operations.
//!
//! Failures fall into three families:
//! - **Immediate foreign errors**: raised by the engine through the error
//!   relay while a bound call is running ([`BridgeError::Foreign`]).
//! - **Asynchronous completion errors**: a non-zero error code delivered to a
//!   completion entry point ([`BridgeError::Completion`]).
//! - **Protocol misuse**: host-side invariant violations such as completing a
//!   result twice ([`BridgeError::is_protocol_misuse`]).
//!
//! Public API returns [`Result<T>`]. `BridgeError` is `Clone` so a stored
//! failure can be handed to every waiter of the same result.

use std::fmt;

use thiserror::Error;

/// A fatal failure reported by the foreign engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    /// Engine error code (never 0).
    pub code: i32,
    /// Symbolic name, e.g. `CRT_ERROR_UNSUPPORTED_OPERATION`.
    pub name: String,
    /// Human readable description.
    pub message: String,
}

impl CallError {
    pub fn new(code: i32, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{} ({})", self.name, self.code)
        } else {
            write!(f, "{} ({}): {}", self.name, self.code, self.message)
        }
    }
}

impl std::error::Error for CallError {}

/// Which observer slot of an async result was involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failure => f.write_str("failure"),
        }
    }
}

/// Main error type for bridge operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The engine raised an error through the relay during a bound call.
    #[error("foreign call failed: {0}")]
    Foreign(CallError),

    /// An asynchronous operation completed with a non-zero error code.
    #[error("asynchronous operation failed: {0}")]
    Completion(CallError),

    /// An async result was completed or failed a second time.
    #[error("result already completed")]
    AlreadyCompleted,

    /// An observer slot was set a second time.
    #[error("cannot set result {outcome} observer twice")]
    ObserverAlreadySet { outcome: Outcome },

    /// A resource was released while other handles or in-flight operations
    /// still depend on it.
    #[error("cannot release {kind}: {dependents} dependent(s) still alive")]
    ResourceInUse { kind: &'static str, dependents: usize },

    /// A resource was used after release.
    #[error("{kind} has already been released")]
    ResourceReleased { kind: &'static str },

    /// A foreign constructor returned a null handle without raising an error.
    #[error("foreign constructor returned a null {kind}")]
    NullHandle { kind: &'static str },

    /// A required entry point is missing from the engine.
    #[error("unable to resolve function {name}")]
    UnresolvedSymbol { name: String },

    /// The engine library could not be loaded.
    #[error("unable to load {path}: {reason}")]
    LibraryLoad { path: String, reason: String },

    /// A caller-supplied argument was rejected before crossing the boundary.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// An operation that replays the body was given a forward-only stream.
    #[error("request body stream must be seekable")]
    BodyNotSeekable,

    /// Reading the body source failed while the engine was streaming it.
    #[error("body stream failed: {message}")]
    BodyStream { message: String },

    /// An HTTP stream completed successfully without delivering a status.
    #[error("stream completed without response headers")]
    MissingResponse,

    /// Invalid engine configuration.
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl BridgeError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        BridgeError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// True for host-side programming errors that are never retried.
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            BridgeError::AlreadyCompleted
                | BridgeError::ObserverAlreadySet { .. }
                | BridgeError::ResourceInUse { .. }
        )
    }

    /// The engine error carried by this failure, if any.
    pub fn call_error(&self) -> Option<&CallError> {
        match self {
            BridgeError::Foreign(e) | BridgeError::Completion(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::ffi::NulError> for BridgeError {
    fn from(e: std::ffi::NulError) -> Self {
        BridgeError::invalid_argument(format!("text contains an interior NUL: {e}"))
    }
}

/// Result alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
