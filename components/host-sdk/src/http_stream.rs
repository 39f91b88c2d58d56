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

//! Request streams on an open [`HttpClientConnection`].
//!
//! A stream sends one request and receives its response. The request body is
//! read by the engine through a [`StreamBridge`]; response headers and body
//! arrive through an [`FfiResponseFunctionTable`] and the stream completes
//! through its own callback, correlated by id.

use std::ffi::{c_char, c_void};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crt_ffi_primitives::{catch_panic_ffi, ffi_callback_table, FfiCString};

use crate::binder::{BoundFunction, ForeignModule};
use crate::completion::CompletionRouter;
use crate::error::{BridgeError, Result};
use crate::handle::{HandlePin, ResourceHandle};
use crate::http::{
    copy_headers, FfiHttpHeader, HttpClientConnection, HttpHeader, HttpRequest, MarshaledHeaders,
};
use crate::io::bound_destroy;
use crate::result::AsyncResult;
use crate::stream::{ByteSource, FfiStreamFunctionTable, StreamBridge};

pub const SYM_HTTP_STREAM_NEW: &str = "crt_http_stream_new";
pub const SYM_HTTP_STREAM_DESTROY: &str = "crt_http_stream_destroy";
pub const SYM_HTTP_STREAM_UPDATE_WINDOW: &str = "crt_http_stream_update_window";

ffi_callback_table! {
    /// Response callbacks handed to the engine with each request.
    pub struct FfiResponseFunctionTable {
        /// One block of response headers. The first block carries the status.
        fn on_headers(ctx, status: i32, headers: *const FfiHttpHeader, count: u32),
        fn on_headers_done(ctx, has_body: bool),
        /// A chunk of response body. `window_size` may be lowered to slow
        /// the sender down.
        fn on_body(ctx, data: *const u8, len: u64, window_size: *mut u64),
    }
}

/// Completion entry point: `(id, error_code)`.
pub type StreamCompleteFn = unsafe extern "C" fn(id: u64, error_code: i32);

type StreamNewFn = unsafe extern "C" fn(
    connection: *mut c_void,
    method: *const c_char,
    uri: *const c_char,
    headers: *const FfiHttpHeader,
    header_count: u32,
    body: *const FfiStreamFunctionTable,
    response: *const FfiResponseFunctionTable,
    id: u64,
    on_complete: StreamCompleteFn,
) -> *mut c_void;

type UpdateWindowFn = unsafe extern "C" fn(stream: *mut c_void, increment: u64);

/// A finished response. `body` stays empty when the body was handed to a
/// streaming callback instead.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status: i32,
    pub headers: Vec<HttpHeader>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

type BodyCallback = Box<dyn FnMut(&[u8]) + Send>;

#[derive(Default)]
struct ResponseState {
    status: Option<i32>,
    headers: Vec<HttpHeader>,
    has_body: bool,
    body: Vec<u8>,
    on_body: Option<BodyCallback>,
}

impl ResponseState {
    fn headers(&mut self, status: i32, headers: Vec<HttpHeader>) {
        self.status.get_or_insert(status);
        self.headers.extend(headers);
    }

    fn body(&mut self, chunk: &[u8]) {
        match &mut self.on_body {
            Some(on_body) => on_body(chunk),
            None => self.body.extend_from_slice(chunk),
        }
    }

    fn finish(&mut self) -> Result<HttpResponse> {
        let status = self.status.ok_or(BridgeError::MissingResponse)?;
        Ok(HttpResponse {
            status,
            headers: std::mem::take(&mut self.headers),
            body: std::mem::take(&mut self.body),
        })
    }
}

/// Receiver of response callbacks. The state is boxed so the table's context
/// pointer stays put when the sink moves.
struct ResponseSink {
    state: Box<Mutex<ResponseState>>,
}

impl ResponseSink {
    fn new(on_body: Option<BodyCallback>) -> Self {
        Self {
            state: Box::new(Mutex::new(ResponseState {
                on_body,
                ..ResponseState::default()
            })),
        }
    }

    fn function_table(&self) -> FfiResponseFunctionTable {
        FfiResponseFunctionTable {
            ctx: &*self.state as *const Mutex<ResponseState> as *mut c_void,
            on_headers: Some(response_headers),
            on_headers_done: Some(response_headers_done),
            on_body: Some(response_body),
        }
    }

    fn finish(&self) -> Result<HttpResponse> {
        lock(&self.state).finish()
    }
}

fn lock(state: &Mutex<ResponseState>) -> MutexGuard<'_, ResponseState> {
    state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// # Safety
/// `ctx` must come from [`ResponseSink::function_table`] of a live sink.
unsafe fn sink_state<'a>(ctx: *mut c_void) -> &'a Mutex<ResponseState> {
    &*(ctx as *const Mutex<ResponseState>)
}

unsafe extern "C" fn response_headers(
    ctx: *mut c_void,
    status: i32,
    headers: *const FfiHttpHeader,
    count: u32,
) {
    let outcome = catch_panic_ffi(|| {
        // SAFETY: the sink lives in the stream's continuation until the
        // stream completes, and the engine keeps the headers alive for this
        // callback.
        let (state, headers) = unsafe { (sink_state(ctx), copy_headers(headers, count)) };
        lock(state).headers(status, headers);
    });
    if let Err(panic) = outcome {
        log::error!("Panic in response headers callback: {panic}");
    }
}

unsafe extern "C" fn response_headers_done(ctx: *mut c_void, has_body: bool) {
    let outcome = catch_panic_ffi(|| {
        // SAFETY: see response_headers.
        let state = unsafe { sink_state(ctx) };
        lock(state).has_body = has_body;
    });
    if let Err(panic) = outcome {
        log::error!("Panic in response headers done callback: {panic}");
    }
}

unsafe extern "C" fn response_body(
    ctx: *mut c_void,
    data: *const u8,
    len: u64,
    _window_size: *mut u64,
) {
    let outcome = catch_panic_ffi(|| {
        if data.is_null() || len == 0 {
            return;
        }
        let Ok(len) = usize::try_from(len) else {
            log::error!("Response body chunk of {len} bytes does not fit in memory");
            return;
        };
        // SAFETY: see response_headers; `data` is valid for `len` bytes.
        let (state, chunk) = unsafe { (sink_state(ctx), std::slice::from_raw_parts(data, len)) };
        lock(state).body(chunk);
    });
    if let Err(panic) = outcome {
        log::error!("Panic in response body callback: {panic}");
    }
}

struct StreamContext {
    module: ForeignModule,
    bridge: StreamBridge,
    sink: ResponseSink,
    /// Holds the stream handle until completion so it is never destroyed
    /// while the engine still calls into it.
    _keep_alive: Arc<OnceLock<HandlePin>>,
}

fn streams() -> &'static CompletionRouter<HttpResponse, StreamContext> {
    static ROUTER: OnceLock<CompletionRouter<HttpResponse, StreamContext>> = OnceLock::new();
    ROUTER.get_or_init(|| CompletionRouter::new("http stream"))
}

impl HttpClientConnection {
    /// Send `request` and buffer the whole response.
    ///
    /// A seekable body is rewound to offset 0 first. A forward-only body is
    /// sent from wherever it currently is.
    pub fn make_request(&self, request: &HttpRequest) -> Result<HttpClientStream> {
        self.start_stream(request, None)
    }

    /// Send `request`, handing each response body chunk to `on_body` on an
    /// engine thread instead of buffering it.
    pub fn make_streaming_request(
        &self,
        request: &HttpRequest,
        on_body: impl FnMut(&[u8]) + Send + 'static,
    ) -> Result<HttpClientStream> {
        self.start_stream(request, Some(Box::new(on_body)))
    }

    fn start_stream(
        &self,
        request: &HttpRequest,
        on_body: Option<BodyCallback>,
    ) -> Result<HttpClientStream> {
        let module = self.module();
        let create = unsafe { module.bind::<StreamNewFn>(SYM_HTTP_STREAM_NEW)? };
        let update_window =
            unsafe { module.bind::<UpdateWindowFn>(SYM_HTTP_STREAM_UPDATE_WINDOW)? };
        let destroy = bound_destroy(module, SYM_HTTP_STREAM_DESTROY)?;

        let bridge = StreamBridge::new(
            request
                .body
                .clone()
                .map(|body| Box::new(body) as Box<dyn ByteSource>),
        );
        if bridge.can_seek() {
            bridge.rewind()?;
        }

        let method = FfiCString::new(&request.method)?;
        let uri = FfiCString::new(&request.uri)?;
        let headers = MarshaledHeaders::new(&request.headers)?;
        let header_count = headers.count()?;

        let sink = ResponseSink::new(on_body);
        let body_table = bridge.function_table();
        let response_table = sink.function_table();
        let keep_alive = Arc::new(OnceLock::new());

        let router = streams();
        let (id, response) = router.issue(
            StreamContext {
                module: module.clone(),
                bridge,
                sink,
                _keep_alive: keep_alive.clone(),
            },
            vec![self.handle().pin()?],
        );

        let connection = self.shared_handle();
        let issued = connection
            .with_raw(|connection| {
                // SAFETY: the connection is held live by `with_raw`, the
                // strings and tables outlive the call, and both table contexts
                // stay valid until the id is resolved.
                unsafe {
                    create.call((
                        connection,
                        method.as_ptr(),
                        uri.as_ptr(),
                        headers.as_ptr(),
                        header_count,
                        &body_table as *const FfiStreamFunctionTable,
                        &response_table as *const FfiResponseFunctionTable,
                        id,
                        on_stream_complete as StreamCompleteFn,
                    ))
                }
            })
            .and_then(|created| created)
            .and_then(|ptr| {
                ResourceHandle::with_parents("http stream", ptr, destroy, &[connection.as_ref()])
            });

        let handle = match issued {
            Ok(handle) => handle,
            Err(error) => {
                if router.abandon(id, error.clone()).is_none() {
                    log::warn!("Stream {id} completed before the issuing call raised: {error}");
                }
                return Err(error);
            }
        };
        let _ = keep_alive.set(handle.pin()?);

        Ok(HttpClientStream {
            handle,
            response,
            update_window,
        })
    }
}

unsafe extern "C" fn on_stream_complete(id: u64, error_code: i32) {
    let delivered = catch_panic_ffi(|| {
        streams().resolve(id, |ctx| {
            if let Some(error) = ctx.bridge.take_error() {
                return Err(error);
            }
            if error_code != 0 {
                return Err(BridgeError::Completion(ctx.module.describe_error(error_code)));
            }
            ctx.sink.finish()
        })
    });
    if let Err(panic) = delivered {
        log::error!("Panic while completing stream {id}: {panic}");
    }
}

/// One in-flight request. The engine side is destroyed when this is
/// released or dropped, but not before the response has completed.
pub struct HttpClientStream {
    handle: ResourceHandle,
    response: AsyncResult<HttpResponse>,
    update_window: BoundFunction<UpdateWindowFn>,
}

impl HttpClientStream {
    /// Completes with the response once the engine finishes the stream.
    pub fn response(&self) -> AsyncResult<HttpResponse> {
        self.response.clone()
    }

    /// Let the engine read `increment` more response bytes.
    pub fn update_window(&self, increment: u64) -> Result<()> {
        self.handle.with_raw(|stream| {
            // SAFETY: `with_raw` keeps the stream live for the call.
            unsafe { self.update_window.call((stream, increment)) }
        })?
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    /// Refused with [`BridgeError::ResourceInUse`] while the response is
    /// still in flight.
    pub fn release(&self) -> Result<()> {
        self.handle.release()
    }
}

impl fmt::Debug for HttpClientStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientStream")
            .field("handle", &self.handle)
            .field("response", &self.response)
            .finish()
    }
}
