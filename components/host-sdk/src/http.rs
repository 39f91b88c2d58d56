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

//! HTTP requests, client connections and connection managers.
//!
//! Connecting is asynchronous: [`HttpClientConnection::connect`] returns an
//! [`AsyncResult`] completed from the engine's setup callback. Each
//! connection also carries a shutdown result, completed when the engine
//! reports the connection closed. Setup and shutdown are correlated by their
//! own ids, so a late shutdown never collides with a pending setup.

use std::ffi::{c_char, c_void};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crt_ffi_primitives::{catch_panic_ffi, FfiCString, FfiStr};

use crate::binder::ForeignModule;
use crate::completion::CompletionRouter;
use crate::error::{BridgeError, Result};
use crate::handle::{DestroyFn, HandlePin, ResourceHandle};
use crate::io::{bound_destroy, ClientBootstrap, SocketOptions};
use crate::result::AsyncResult;
use crate::stream::{ByteSource, SharedSource};
use crate::tls::TlsConnectionOptions;

pub const SYM_HTTP_CONNECTION_NEW: &str = "crt_http_connection_new";
pub const SYM_HTTP_CONNECTION_DESTROY: &str = "crt_http_connection_destroy";
pub const SYM_HTTP_CONNECTION_MANAGER_NEW: &str = "crt_http_connection_manager_new";
pub const SYM_HTTP_CONNECTION_MANAGER_DESTROY: &str = "crt_http_connection_manager_destroy";
pub const SYM_HTTP_CONNECTION_MANAGER_ACQUIRE: &str = "crt_http_connection_manager_acquire";
pub const SYM_HTTP_CONNECTION_MANAGER_RELEASE: &str =
    "crt_http_connection_manager_release_connection";

/// Completion entry point: `(id, error_code, connection)`.
pub type ConnectionSetupFn =
    unsafe extern "C" fn(id: u64, error_code: i32, connection: *mut c_void);

/// Completion entry point: `(id, error_code)`, fired once the connection closes.
pub type ConnectionShutdownFn = unsafe extern "C" fn(id: u64, error_code: i32);

type ConnectionNewFn = unsafe extern "C" fn(
    bootstrap: *mut c_void,
    host_name: *const c_char,
    port: u16,
    socket_options: *mut c_void,
    tls_options: *mut c_void,
    initial_window_size: u64,
    setup_id: u64,
    on_setup: ConnectionSetupFn,
    shutdown_id: u64,
    on_shutdown: ConnectionShutdownFn,
);

type ManagerNewFn = unsafe extern "C" fn(
    bootstrap: *mut c_void,
    host_name: *const c_char,
    port: u16,
    socket_options: *mut c_void,
    tls_options: *mut c_void,
    max_connections: i32,
    initial_window_size: u64,
) -> *mut c_void;

type ManagerAcquireFn = unsafe extern "C" fn(
    manager: *mut c_void,
    setup_id: u64,
    on_setup: ConnectionSetupFn,
    shutdown_id: u64,
    on_shutdown: ConnectionShutdownFn,
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

impl HttpHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiHttpHeader {
    pub name: *const c_char,
    pub value: *const c_char,
}

#[derive(Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<HttpHeader>,
    pub body: Option<SharedSource>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HttpHeader::new(name, value));
        self
    }

    pub fn with_body(mut self, body: impl ByteSource + 'static) -> Self {
        self.body = Some(SharedSource::new(body));
        self
    }

    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

/// Owned strings behind a slice of [`FfiHttpHeader`].
#[derive(Debug)]
pub(crate) struct MarshaledHeaders {
    _strings: Vec<(FfiCString, FfiCString)>,
    raw: Vec<FfiHttpHeader>,
}

impl MarshaledHeaders {
    pub(crate) fn new(headers: &[HttpHeader]) -> Result<Self> {
        let strings = headers
            .iter()
            .map(|h| -> Result<(FfiCString, FfiCString)> {
                Ok((FfiCString::new(&h.name)?, FfiCString::new(&h.value)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let raw = strings
            .iter()
            .map(|(name, value)| FfiHttpHeader {
                name: name.as_ptr(),
                value: value.as_ptr(),
            })
            .collect();
        Ok(Self {
            _strings: strings,
            raw,
        })
    }

    pub(crate) fn as_ptr(&self) -> *const FfiHttpHeader {
        if self.raw.is_empty() {
            std::ptr::null()
        } else {
            self.raw.as_ptr()
        }
    }

    pub(crate) fn count(&self) -> Result<u32> {
        u32::try_from(self.raw.len())
            .map_err(|_| BridgeError::invalid_argument("too many headers"))
    }
}

/// Copy engine-owned headers into host strings.
///
/// # Safety
/// `headers` must be null or point to `count` valid entries.
pub(crate) unsafe fn copy_headers(headers: *const FfiHttpHeader, count: u32) -> Vec<HttpHeader> {
    if headers.is_null() || count == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(headers, count as usize)
        .iter()
        .map(|h| HttpHeader {
            name: FfiStr::from_ptr(h.name).to_string(),
            value: FfiStr::from_ptr(h.value).to_string(),
        })
        .collect()
}

/// Everything needed to open a connection.
#[derive(Debug)]
pub struct HttpClientConnectionOptions<'a> {
    pub bootstrap: &'a ClientBootstrap,
    pub host_name: String,
    pub port: u16,
    pub socket_options: Option<&'a SocketOptions>,
    pub tls_options: Option<&'a TlsConnectionOptions>,
    pub initial_window_size: u64,
}

impl<'a> HttpClientConnectionOptions<'a> {
    pub fn new(bootstrap: &'a ClientBootstrap, host_name: impl Into<String>, port: u16) -> Self {
        Self {
            bootstrap,
            host_name: host_name.into(),
            port,
            socket_options: None,
            tls_options: None,
            initial_window_size: u64::MAX,
        }
    }

    pub fn with_socket_options(mut self, socket_options: &'a SocketOptions) -> Self {
        self.socket_options = Some(socket_options);
        self
    }

    pub fn with_tls_options(mut self, tls_options: &'a TlsConnectionOptions) -> Self {
        self.tls_options = Some(tls_options);
        self
    }

    pub fn with_initial_window_size(mut self, size: u64) -> Self {
        self.initial_window_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host_name.is_empty() {
            return Err(BridgeError::invalid_argument("host name is required"));
        }
        if self.port == 0 {
            return Err(BridgeError::invalid_argument(
                "port must be between 1 and 65535",
            ));
        }
        Ok(())
    }

    /// Pins on every resource the connection is built from.
    fn pin_parents(&self) -> Result<Vec<HandlePin>> {
        let mut parents = vec![self.bootstrap.handle().pin()?];
        if let Some(socket_options) = self.socket_options {
            parents.push(socket_options.handle().pin()?);
        }
        if let Some(tls_options) = self.tls_options {
            parents.push(tls_options.handle().pin()?);
        }
        Ok(parents)
    }

    /// Run `f` with the raw socket and TLS option pointers (null when unset)
    /// held live.
    fn with_optional_raw<R>(&self, f: impl FnOnce(*mut c_void, *mut c_void) -> R) -> Result<R> {
        let socket_options = self.socket_options.map(SocketOptions::handle);
        let tls_options = self.tls_options.map(TlsConnectionOptions::handle);
        with_raw_or_null(socket_options, |socket| {
            with_raw_or_null(tls_options, |tls| f(socket, tls))
        })?
    }
}

fn with_raw_or_null<R>(
    handle: Option<&ResourceHandle>,
    f: impl FnOnce(*mut c_void) -> R,
) -> Result<R> {
    match handle {
        Some(handle) => handle.with_raw(f),
        None => Ok(f(std::ptr::null_mut())),
    }
}

struct SetupContext {
    module: ForeignModule,
    destroy: DestroyFn,
    parents: Vec<HandlePin>,
    shutdown_id: u64,
    shutdown: AsyncResult<()>,
}

struct ShutdownContext {
    module: ForeignModule,
}

fn setups() -> &'static CompletionRouter<HttpClientConnection, SetupContext> {
    static ROUTER: OnceLock<CompletionRouter<HttpClientConnection, SetupContext>> =
        OnceLock::new();
    ROUTER.get_or_init(|| CompletionRouter::new("http connection setup"))
}

fn shutdowns() -> &'static CompletionRouter<(), ShutdownContext> {
    static ROUTER: OnceLock<CompletionRouter<(), ShutdownContext>> = OnceLock::new();
    ROUTER.get_or_init(|| CompletionRouter::new("http connection shutdown"))
}

/// Register setup and shutdown continuations, then run `issue` with their
/// ids. If `issue` raises, both are abandoned and the returned result
/// carries the error.
fn issue_setup(
    module: &ForeignModule,
    destroy: DestroyFn,
    parents: Vec<HandlePin>,
    issue: impl FnOnce(u64, u64) -> Result<()>,
) -> AsyncResult<HttpClientConnection> {
    let (shutdown_id, shutdown) = shutdowns().issue(
        ShutdownContext {
            module: module.clone(),
        },
        Vec::new(),
    );
    let router = setups();
    let (setup_id, result) = router.issue(
        SetupContext {
            module: module.clone(),
            destroy,
            parents: parents.clone(),
            shutdown_id,
            shutdown,
        },
        parents,
    );

    if let Err(error) = issue(setup_id, shutdown_id) {
        if router.abandon(setup_id, error.clone()).is_none() {
            log::warn!(
                "Connection setup {setup_id} completed before the issuing call raised: {error}"
            );
        }
        shutdowns().abandon(shutdown_id, error);
    }
    result
}

/// An established client connection. Clones share the same connection.
#[derive(Debug, Clone)]
pub struct HttpClientConnection {
    module: ForeignModule,
    handle: Arc<ResourceHandle>,
    shutdown: AsyncResult<()>,
}

impl HttpClientConnection {
    /// Start connecting. The result completes on an engine thread once the
    /// connection is up or has failed.
    ///
    /// The bootstrap, socket options and TLS options stay pinned while setup
    /// is in flight and for as long as the connection lives.
    pub fn connect(
        module: &ForeignModule,
        options: &HttpClientConnectionOptions<'_>,
    ) -> Result<AsyncResult<HttpClientConnection>> {
        options.validate()?;
        let create = unsafe { module.bind::<ConnectionNewFn>(SYM_HTTP_CONNECTION_NEW)? };
        let destroy = bound_destroy(module, SYM_HTTP_CONNECTION_DESTROY)?;
        let host_name = FfiCString::new(&options.host_name)?;
        let parents = options.pin_parents()?;

        Ok(issue_setup(
            module,
            Box::new(destroy),
            parents,
            |setup_id, shutdown_id| {
                options.bootstrap.handle().with_raw(|bootstrap| {
                    options.with_optional_raw(|socket_options, tls_options| {
                        // SAFETY: every resource pointer is held live by `with_raw`
                        // and the host name outlives the call.
                        unsafe {
                            create.call((
                                bootstrap,
                                host_name.as_ptr(),
                                options.port,
                                socket_options,
                                tls_options,
                                options.initial_window_size,
                                setup_id,
                                on_connection_setup as ConnectionSetupFn,
                                shutdown_id,
                                on_connection_shutdown as ConnectionShutdownFn,
                            ))
                        }
                    })
                })???;
                Ok(())
            },
        ))
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    /// Completes when the engine reports the connection closed: success for
    /// an orderly close, failure with the engine's error otherwise.
    pub fn shutdown(&self) -> AsyncResult<()> {
        self.shutdown.clone()
    }

    pub fn is_open(&self) -> bool {
        !self.handle.is_released() && !self.shutdown.is_complete()
    }

    /// Close the connection now rather than when the last clone drops.
    pub fn release(&self) -> Result<()> {
        self.handle.release()
    }

    pub(crate) fn module(&self) -> &ForeignModule {
        &self.module
    }

    pub(crate) fn shared_handle(&self) -> &Arc<ResourceHandle> {
        &self.handle
    }
}

unsafe extern "C" fn on_connection_setup(id: u64, error_code: i32, connection: *mut c_void) {
    let delivered = catch_panic_ffi(|| {
        setups().resolve(id, |ctx| {
            if error_code != 0 {
                let error = BridgeError::Completion(ctx.module.describe_error(error_code));
                // A connection that never came up is never shut down.
                shutdowns().abandon(ctx.shutdown_id, error.clone());
                return Err(error);
            }
            let handle =
                ResourceHandle::from_pins("http connection", connection, ctx.destroy, ctx.parents)?;
            Ok(HttpClientConnection {
                module: ctx.module,
                handle: Arc::new(handle),
                shutdown: ctx.shutdown,
            })
        })
    });
    if let Err(panic) = delivered {
        log::error!("Panic while completing connection setup {id}: {panic}");
    }
}

unsafe extern "C" fn on_connection_shutdown(id: u64, error_code: i32) {
    let delivered = catch_panic_ffi(|| {
        shutdowns().resolve(id, |ctx| {
            if error_code == 0 {
                log::debug!("Connection {id} shut down cleanly");
                Ok(())
            } else {
                Err(BridgeError::Completion(ctx.module.describe_error(error_code)))
            }
        })
    });
    if let Err(panic) = delivered {
        log::error!("Panic while completing connection shutdown {id}: {panic}");
    }
}

/// Pool of connections to one endpoint, owned by the engine.
#[derive(Debug)]
pub struct HttpClientConnectionManager {
    module: ForeignModule,
    host_name: String,
    max_connections: u32,
    handle: ResourceHandle,
}

impl HttpClientConnectionManager {
    /// Create a manager that opens at most `max_connections` connections
    /// described by `options`.
    pub fn new(
        module: &ForeignModule,
        options: &HttpClientConnectionOptions<'_>,
        max_connections: u32,
    ) -> Result<Self> {
        options.validate()?;
        let max = i32::try_from(max_connections)
            .ok()
            .filter(|max| *max > 0)
            .ok_or_else(|| {
                BridgeError::invalid_argument(format!(
                    "max_connections must be between 1 and {}, got {max_connections}",
                    i32::MAX
                ))
            })?;
        let create = unsafe { module.bind::<ManagerNewFn>(SYM_HTTP_CONNECTION_MANAGER_NEW)? };
        let destroy = bound_destroy(module, SYM_HTTP_CONNECTION_MANAGER_DESTROY)?;
        let host_name = FfiCString::new(&options.host_name)?;
        let parents = options.pin_parents()?;

        let bootstrap = options.bootstrap.handle();
        let ptr = bootstrap.with_raw(|bootstrap| {
            options.with_optional_raw(|socket_options, tls_options| {
                // SAFETY: as in `HttpClientConnection::connect`.
                unsafe {
                    create.call((
                        bootstrap,
                        host_name.as_ptr(),
                        options.port,
                        socket_options,
                        tls_options,
                        max,
                        options.initial_window_size,
                    ))
                }
            })
        })???;

        Ok(Self {
            module: module.clone(),
            host_name: options.host_name.clone(),
            max_connections,
            handle: ResourceHandle::from_pins(
                "http connection manager",
                ptr,
                destroy,
                parents,
            )?,
        })
    }

    /// Borrow a connection from the pool. Releasing or dropping the
    /// connection hands it back to the manager.
    pub fn acquire_connection(&self) -> Result<AsyncResult<HttpClientConnection>> {
        let acquire =
            unsafe { self.module.bind::<ManagerAcquireFn>(SYM_HTTP_CONNECTION_MANAGER_ACQUIRE)? };
        let destroy = bound_destroy(&self.module, SYM_HTTP_CONNECTION_MANAGER_RELEASE)?;
        let parents = vec![self.handle.pin()?];

        Ok(issue_setup(
            &self.module,
            Box::new(destroy),
            parents,
            |setup_id, shutdown_id| {
                self.handle.with_raw(|manager| {
                    // SAFETY: `with_raw` keeps the manager live for the call.
                    unsafe {
                        acquire.call((
                            manager,
                            setup_id,
                            on_connection_setup as ConnectionSetupFn,
                            shutdown_id,
                            on_connection_shutdown as ConnectionShutdownFn,
                        ))
                    }
                })?
            },
        ))
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn release(&self) -> Result<()> {
        self.handle.release()
    }
}
