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

//! Host-side bridge to a foreign engine reached through a C calling interface.
//!
//! This crate provides:
//! - [`ForeignModule`] / [`BoundFunction`]: load the engine and bind typed entry points
//! - [`relay`]: the per-thread side channel for fatal synchronous engine errors
//! - [`StrongReferenceVendor`] / [`WeakReferenceVendor`]: correlation-id tables
//! - [`AsyncResult`] and [`CompletionRouter`]: exactly-once async completion
//! - [`ResourceHandle`]: exactly-once destruction with parent pinning
//! - [`StreamBridge`]: pull-based body streaming for the engine
//! - Resource wrappers for event loops, bootstraps, resolvers, socket options,
//!   TLS contexts, HTTP connections, connection managers and request streams
//! - Request signing, message digests and CRC checksums

pub mod auth;
pub mod binder;
pub mod cal;
pub mod checksums;
pub mod completion;
pub mod config;
pub mod error;
pub mod handle;
pub mod http;
pub mod http_stream;
pub mod io;
pub mod library;
pub mod logging;
pub mod relay;
pub mod result;
pub mod stream;
pub mod tls;
pub mod vendor;

pub use auth::{sign_request, Credentials, SigningConfig};
pub use binder::{BoundFunction, ForeignModule};
pub use cal::{Hash, HashAlgorithm};
pub use checksums::Checksums;
pub use completion::CompletionRouter;
pub use config::EngineConfig;
pub use error::{BridgeError, CallError, Outcome, Result};
pub use handle::{HandlePin, ResourceHandle};
pub use http::{
    HttpClientConnection, HttpClientConnectionManager, HttpClientConnectionOptions, HttpHeader,
    HttpRequest,
};
pub use http_stream::{HttpClientStream, HttpResponse};
pub use io::{ClientBootstrap, DefaultHostResolver, EventLoopGroup, SocketOptions};
pub use library::{NativeLibrary, SymbolSource, SymbolTable};
pub use logging::{ForeignLogLevel, ForeignLogger};
pub use result::AsyncResult;
pub use stream::{ByteSource, SeekableSource, SharedSource, StreamBridge};
pub use tls::{TlsConnectionOptions, TlsContext, TlsContextOptions, TlsMode, TlsVersion};
pub use vendor::{StrongReferenceVendor, WeakReferenceVendor};
