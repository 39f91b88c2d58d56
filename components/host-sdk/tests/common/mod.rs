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

//! In-process stub engine for the integration tests.
//!
//! Every entry point is a Rust `extern "C"` function registered in a
//! [`SymbolTable`], so the bridge is exercised exactly as it would be against
//! a loaded library. Asynchronous operations complete on spawned threads to
//! stand in for engine worker threads. Stub state is process-wide; tests that
//! inspect it run `#[serial]`.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crt_host_sdk::auth::{FfiSigningConfig, SigningCompleteFn};
use crt_host_sdk::http::{ConnectionSetupFn, ConnectionShutdownFn, FfiHttpHeader};
use crt_host_sdk::http_stream::{FfiResponseFunctionTable, StreamCompleteFn};
use crt_host_sdk::io::FfiSocketOptions;
use crt_host_sdk::relay::ErrorRelayFn;
use crt_host_sdk::stream::{FfiStreamFunctionTable, StreamState};
use crt_host_sdk::{ForeignModule, SymbolTable};

pub const ERROR_UNSUPPORTED_OPERATION: i32 = 36;
pub const ERROR_SOCKET_TIMEOUT: i32 = 1049;
pub const ERROR_SOCKET_CLOSED: i32 = 1051;
pub const ERROR_SIGNING_MISSING_REGION: i32 = 3606;

/// Host names the connection stub treats specially.
pub const UNREACHABLE_HOST: &str = "unreachable.invalid";
pub const REJECTED_HOST: &str = "rejected.invalid";
pub const DROPPED_HOST: &str = "dropped.invalid";

static RELAY: OnceLock<ErrorRelayFn> = OnceLock::new();
pub static INITS: AtomicUsize = AtomicUsize::new(0);
pub static SHUTDOWNS: AtomicUsize = AtomicUsize::new(0);
pub static LOG_LEVEL: AtomicI32 = AtomicI32::new(-1);

fn log_destination() -> &'static Mutex<Option<String>> {
    static DEST: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    DEST.get_or_init(|| Mutex::new(None))
}

/// Destination last passed to the logger stub; `None` means stderr.
pub fn engine_log_destination() -> Option<String> {
    log_destination().lock().unwrap().clone()
}

fn destroyed_log() -> &'static Mutex<Vec<&'static str>> {
    static LOG: OnceLock<Mutex<Vec<&'static str>>> = OnceLock::new();
    LOG.get_or_init(|| Mutex::new(Vec::new()))
}

fn live_set() -> &'static Mutex<HashSet<usize>> {
    static LIVE: OnceLock<Mutex<HashSet<usize>>> = OnceLock::new();
    LIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

fn body_reads() -> &'static Mutex<Vec<Vec<u8>>> {
    static READS: OnceLock<Mutex<Vec<Vec<u8>>>> = OnceLock::new();
    READS.get_or_init(|| Mutex::new(Vec::new()))
}

/// Initialise test logging and clear recorded stub state.
pub fn reset() {
    let _ = env_logger::builder().is_test(true).try_init();
    destroyed_log().lock().unwrap().clear();
    body_reads().lock().unwrap().clear();
    server_names().lock().unwrap().clear();
    WINDOW_UPDATES.store(0, Ordering::SeqCst);
    release_held_streams();
}

/// Kinds destroyed so far, in order.
pub fn destroyed() -> Vec<&'static str> {
    destroyed_log().lock().unwrap().clone()
}

/// Bodies the signing stub read, one entry per pass.
pub fn signing_body_reads() -> Vec<Vec<u8>> {
    body_reads().lock().unwrap().clone()
}

pub fn live_resources() -> usize {
    live_set().lock().unwrap().len()
}

fn raise(code: i32, name: &str, message: &str) {
    let name = CString::new(name).unwrap();
    let message = CString::new(message).unwrap();
    let relay = RELAY.get().expect("relay installed at attach");
    unsafe { relay(code, name.as_ptr(), message.as_ptr()) };
}

struct StubResource {
    kind: &'static str,
}

fn allocate(kind: &'static str) -> *mut c_void {
    let ptr = Box::into_raw(Box::new(StubResource { kind })) as *mut c_void;
    live_set().lock().unwrap().insert(ptr as usize);
    ptr
}

fn is_live(ptr: *mut c_void) -> bool {
    live_set().lock().unwrap().contains(&(ptr as usize))
}

unsafe fn free(ptr: *mut c_void) {
    if !live_set().lock().unwrap().remove(&(ptr as usize)) {
        raise(ERROR_UNSUPPORTED_OPERATION, "CRT_ERROR_DOUBLE_FREE", "resource destroyed twice");
        return;
    }
    let resource = Box::from_raw(ptr as *mut StubResource);
    destroyed_log().lock().unwrap().push(resource.kind);
}

// ============================================================================
// Module lifecycle and error lookups
// ============================================================================

unsafe extern "C" fn set_error_relay(relay: ErrorRelayFn) {
    let _ = RELAY.set(relay);
}

unsafe extern "C" fn static_init() {
    INITS.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn static_shutdown() {
    SHUTDOWNS.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn error_name(code: i32) -> *const c_char {
    let name: &'static [u8] = match code {
        ERROR_UNSUPPORTED_OPERATION => b"CRT_ERROR_UNSUPPORTED_OPERATION\0",
        ERROR_SOCKET_TIMEOUT => b"CRT_IO_SOCKET_TIMEOUT\0",
        ERROR_SOCKET_CLOSED => b"CRT_IO_SOCKET_CLOSED\0",
        ERROR_SIGNING_MISSING_REGION => b"CRT_AUTH_SIGNING_MISSING_REGION\0",
        _ => return std::ptr::null(),
    };
    name.as_ptr() as *const c_char
}

unsafe extern "C" fn error_string(code: i32) -> *const c_char {
    let text: &'static [u8] = match code {
        ERROR_UNSUPPORTED_OPERATION => b"Unsupported operation\0",
        ERROR_SOCKET_TIMEOUT => b"Socket operation timed out\0",
        ERROR_SOCKET_CLOSED => b"Socket is closed\0",
        ERROR_SIGNING_MISSING_REGION => b"Signing config is missing a region\0",
        _ => return std::ptr::null(),
    };
    text.as_ptr() as *const c_char
}

unsafe extern "C" fn logger_enable(level: i32, path: *const c_char) {
    LOG_LEVEL.store(level, Ordering::SeqCst);
    *log_destination().lock().unwrap() =
        (!path.is_null()).then(|| CStr::from_ptr(path).to_string_lossy().into_owned());
}

// ============================================================================
// Test entry points
// ============================================================================

/// Returns the product, standing in for an engine call that returns a handle.
pub unsafe extern "C" fn test_multiply(a: i32, b: i32) -> i32 {
    a * b
}

/// Raises through the relay, then returns a value the caller must never see.
pub unsafe extern "C" fn test_raise(code: i32) -> i32 {
    raise(code, "CRT_ERROR_UNSUPPORTED_OPERATION", "TEST EXCEPTION");
    -1
}

/// Raises through the relay and returns nothing.
pub unsafe extern "C" fn test_raise_void() {
    raise(ERROR_UNSUPPORTED_OPERATION, "CRT_ERROR_UNSUPPORTED_OPERATION", "TEST EXCEPTION");
}

// ============================================================================
// I/O resources
// ============================================================================

unsafe extern "C" fn event_loop_group_new(_threads: i32) -> *mut c_void {
    allocate("event loop group")
}

unsafe extern "C" fn client_bootstrap_new(elg: *mut c_void) -> *mut c_void {
    if !is_live(elg) {
        raise(ERROR_UNSUPPORTED_OPERATION, "CRT_ERROR_INVALID_ARGUMENT", "dead event loop group");
        return std::ptr::null_mut();
    }
    allocate("client bootstrap")
}

unsafe extern "C" fn host_resolver_new(elg: *mut c_void, _max_hosts: i32) -> *mut c_void {
    if !is_live(elg) {
        raise(ERROR_UNSUPPORTED_OPERATION, "CRT_ERROR_INVALID_ARGUMENT", "dead event loop group");
        return std::ptr::null_mut();
    }
    allocate("host resolver")
}

unsafe extern "C" fn destroy_resource(ptr: *mut c_void) {
    free(ptr);
}

unsafe extern "C" fn socket_options_new() -> *mut c_void {
    let options = FfiSocketOptions {
        socket_type: 0,
        domain: 0,
        connect_timeout_ms: 3000,
        keep_alive_interval_sec: 0,
        keep_alive_timeout_sec: 0,
        keepalive: false,
    };
    let ptr = Box::into_raw(Box::new(options)) as *mut c_void;
    live_set().lock().unwrap().insert(ptr as usize);
    ptr
}

unsafe extern "C" fn socket_options_destroy(ptr: *mut c_void) {
    if live_set().lock().unwrap().remove(&(ptr as usize)) {
        drop(Box::from_raw(ptr as *mut FfiSocketOptions));
        destroyed_log().lock().unwrap().push("socket options");
    }
}

// ============================================================================
// TLS
// ============================================================================

unsafe extern "C" fn tls_ctx_new(
    _min_version: i32,
    _ca_file: *const c_char,
    _ca_path: *const c_char,
    _alpn_list: *const c_char,
    _certificate: *const c_char,
    _private_key: *const c_char,
    _pkcs12: *const c_char,
    _pkcs12_password: *const c_char,
    _max_fragment_size: u32,
    _verify_peer: u8,
) -> *mut c_void {
    allocate("tls context")
}

unsafe extern "C" fn tls_connection_options_new(
    ctx: *mut c_void,
    server_name: *const c_char,
    _alpn: *const c_char,
) -> *mut c_void {
    if !is_live(ctx) {
        raise(ERROR_UNSUPPORTED_OPERATION, "CRT_ERROR_INVALID_ARGUMENT", "dead tls context");
        return std::ptr::null_mut();
    }
    if !server_name.is_null() {
        let name = CStr::from_ptr(server_name).to_string_lossy().into_owned();
        server_names().lock().unwrap().push(name);
    }
    allocate("tls connection options")
}

fn server_names() -> &'static Mutex<Vec<String>> {
    static NAMES: OnceLock<Mutex<Vec<String>>> = OnceLock::new();
    NAMES.get_or_init(|| Mutex::new(Vec::new()))
}

/// Server names passed to the TLS connection options stub.
pub fn tls_server_names() -> Vec<String> {
    server_names().lock().unwrap().clone()
}

// ============================================================================
// HTTP connection
// ============================================================================

/// Shutdown callbacks of open connections, keyed by connection pointer.
fn open_connections() -> &'static Mutex<HashMap<usize, (u64, ConnectionShutdownFn)>> {
    static OPEN: OnceLock<Mutex<HashMap<usize, (u64, ConnectionShutdownFn)>>> = OnceLock::new();
    OPEN.get_or_init(|| Mutex::new(HashMap::new()))
}

fn parents_live(ptrs: &[*mut c_void]) -> bool {
    ptrs.iter().all(|p| p.is_null() || is_live(*p))
}

/// Bring up a connection on a worker thread, as the engine does.
fn spawn_setup(
    host: String,
    port: u16,
    kind: &'static str,
    setup_id: u64,
    on_setup: ConnectionSetupFn,
    shutdown_id: u64,
    on_shutdown: ConnectionShutdownFn,
) {
    std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(10));
        if host == UNREACHABLE_HOST || port == 0 {
            unsafe { on_setup(setup_id, ERROR_SOCKET_TIMEOUT, std::ptr::null_mut()) };
            return;
        }
        let connection = allocate(kind);
        open_connections()
            .lock()
            .unwrap()
            .insert(connection as usize, (shutdown_id, on_shutdown));
        unsafe { on_setup(setup_id, 0, connection) };

        if host == DROPPED_HOST {
            std::thread::sleep(std::time::Duration::from_millis(10));
            let entry = open_connections().lock().unwrap().remove(&(connection as usize));
            if let Some((id, on_shutdown)) = entry {
                unsafe { on_shutdown(id, ERROR_SOCKET_CLOSED) };
            }
        }
    });
}

/// Free a connection, then report its shutdown from a worker thread.
unsafe fn close_connection(ptr: *mut c_void) {
    let entry = open_connections().lock().unwrap().remove(&(ptr as usize));
    free(ptr);
    if let Some((id, on_shutdown)) = entry {
        std::thread::spawn(move || unsafe { on_shutdown(id, 0) });
    }
}

unsafe extern "C" fn http_connection_new(
    bootstrap: *mut c_void,
    host_name: *const c_char,
    port: u16,
    socket_options: *mut c_void,
    tls_options: *mut c_void,
    _initial_window_size: u64,
    setup_id: u64,
    on_setup: ConnectionSetupFn,
    shutdown_id: u64,
    on_shutdown: ConnectionShutdownFn,
) {
    if !is_live(bootstrap) || !parents_live(&[socket_options, tls_options]) {
        raise(ERROR_UNSUPPORTED_OPERATION, "CRT_ERROR_INVALID_ARGUMENT", "dead parent resource");
        return;
    }
    let host = CStr::from_ptr(host_name).to_string_lossy().into_owned();
    if host == REJECTED_HOST {
        raise(ERROR_UNSUPPORTED_OPERATION, "CRT_ERROR_UNSUPPORTED_OPERATION", "host rejected");
        return;
    }
    let kind = if tls_options.is_null() {
        "http connection"
    } else {
        "https connection"
    };
    spawn_setup(host, port, kind, setup_id, on_setup, shutdown_id, on_shutdown);
}

unsafe extern "C" fn http_connection_destroy(ptr: *mut c_void) {
    close_connection(ptr);
}

// ============================================================================
// HTTP connection manager
// ============================================================================

struct StubManager {
    host: String,
    port: u16,
}

fn managers() -> &'static Mutex<HashMap<usize, StubManager>> {
    static MANAGERS: OnceLock<Mutex<HashMap<usize, StubManager>>> = OnceLock::new();
    MANAGERS.get_or_init(|| Mutex::new(HashMap::new()))
}

unsafe extern "C" fn connection_manager_new(
    bootstrap: *mut c_void,
    host_name: *const c_char,
    port: u16,
    socket_options: *mut c_void,
    tls_options: *mut c_void,
    _max_connections: i32,
    _initial_window_size: u64,
) -> *mut c_void {
    if !is_live(bootstrap) || !parents_live(&[socket_options, tls_options]) {
        raise(ERROR_UNSUPPORTED_OPERATION, "CRT_ERROR_INVALID_ARGUMENT", "dead parent resource");
        return std::ptr::null_mut();
    }
    let manager = allocate("http connection manager");
    let host = CStr::from_ptr(host_name).to_string_lossy().into_owned();
    managers()
        .lock()
        .unwrap()
        .insert(manager as usize, StubManager { host, port });
    manager
}

unsafe extern "C" fn connection_manager_destroy(ptr: *mut c_void) {
    managers().lock().unwrap().remove(&(ptr as usize));
    free(ptr);
}

unsafe extern "C" fn connection_manager_acquire(
    manager: *mut c_void,
    setup_id: u64,
    on_setup: ConnectionSetupFn,
    shutdown_id: u64,
    on_shutdown: ConnectionShutdownFn,
) {
    let target = managers()
        .lock()
        .unwrap()
        .get(&(manager as usize))
        .map(|m| (m.host.clone(), m.port));
    let Some((host, port)) = target else {
        raise(ERROR_UNSUPPORTED_OPERATION, "CRT_ERROR_INVALID_ARGUMENT", "dead manager");
        return;
    };
    spawn_setup(host, port, "pooled connection", setup_id, on_setup, shutdown_id, on_shutdown);
}

unsafe extern "C" fn connection_manager_release_connection(ptr: *mut c_void) {
    close_connection(ptr);
}

// ============================================================================
// HTTP streams
// ============================================================================

/// Request paths the stream stub treats specially.
pub const FAILING_PATH: &str = "/fail";
pub const HELD_PATH: &str = "/hold";

static HOLD_STREAMS: AtomicBool = AtomicBool::new(false);
pub static WINDOW_UPDATES: AtomicU64 = AtomicU64::new(0);

/// Keep streams for [`HELD_PATH`] open until [`release_held_streams`].
pub fn hold_streams() {
    HOLD_STREAMS.store(true, Ordering::SeqCst);
}

pub fn release_held_streams() {
    HOLD_STREAMS.store(false, Ordering::SeqCst);
}

struct StreamJob {
    method: String,
    uri: String,
    headers: Vec<(String, String)>,
    body: FfiStreamFunctionTable,
    response: FfiResponseFunctionTable,
    id: u64,
    on_complete: StreamCompleteFn,
}

unsafe fn copy_stub_headers(headers: *const FfiHttpHeader, count: u32) -> Vec<(String, String)> {
    let text = |p: *const c_char| CStr::from_ptr(p).to_string_lossy().into_owned();
    if headers.is_null() {
        return Vec::new();
    }
    std::slice::from_raw_parts(headers, count as usize)
        .iter()
        .map(|h| (text(h.name), text(h.value)))
        .collect()
}

unsafe extern "C" fn http_stream_new(
    connection: *mut c_void,
    method: *const c_char,
    uri: *const c_char,
    headers: *const FfiHttpHeader,
    header_count: u32,
    body: *const FfiStreamFunctionTable,
    response: *const FfiResponseFunctionTable,
    id: u64,
    on_complete: StreamCompleteFn,
) -> *mut c_void {
    if !is_live(connection) {
        raise(ERROR_UNSUPPORTED_OPERATION, "CRT_ERROR_INVALID_ARGUMENT", "dead connection");
        return std::ptr::null_mut();
    }
    let text = |p: *const c_char| CStr::from_ptr(p).to_string_lossy().into_owned();
    let job = StreamJob {
        method: text(method),
        uri: text(uri),
        headers: copy_stub_headers(headers, header_count),
        body: *body,
        response: *response,
        id,
        on_complete,
    };
    let stream = allocate("http stream");
    std::thread::spawn(move || unsafe { run_stream(job) });
    stream
}

/// Echo the request: its headers come back as response headers and its body
/// (or, without one, the method and URI) as the response body.
unsafe fn run_stream(job: StreamJob) {
    if job.uri == FAILING_PATH {
        (job.on_complete)(job.id, ERROR_SOCKET_TIMEOUT);
        return;
    }
    let request_body = if job.body.is_enabled() {
        read_body(&job.body, 7)
    } else {
        Vec::new()
    };
    while job.uri == HELD_PATH && HOLD_STREAMS.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    let mut headers = job.headers.clone();
    headers.push(("X-Request-Method".to_string(), job.method.clone()));
    let owned: Vec<(CString, CString)> = headers
        .iter()
        .map(|(n, v)| (CString::new(n.as_str()).unwrap(), CString::new(v.as_str()).unwrap()))
        .collect();
    let raw: Vec<FfiHttpHeader> = owned
        .iter()
        .map(|(n, v)| FfiHttpHeader {
            name: n.as_ptr(),
            value: v.as_ptr(),
        })
        .collect();
    let table = job.response;
    let on_headers = table.on_headers.expect("response table has on_headers");
    on_headers(table.ctx, 200, raw.as_ptr(), raw.len() as u32);

    let reply = if request_body.is_empty() {
        format!("{} {}", job.method, job.uri).into_bytes()
    } else {
        request_body
    };
    let on_headers_done = table.on_headers_done.expect("response table has on_headers_done");
    on_headers_done(table.ctx, true);
    let on_body = table.on_body.expect("response table has on_body");
    for chunk in reply.chunks(4) {
        let mut window = u64::MAX;
        on_body(table.ctx, chunk.as_ptr(), chunk.len() as u64, &mut window);
    }
    (job.on_complete)(job.id, 0);
}

unsafe extern "C" fn http_stream_update_window(stream: *mut c_void, increment: u64) {
    if !is_live(stream) {
        raise(ERROR_UNSUPPORTED_OPERATION, "CRT_ERROR_INVALID_ARGUMENT", "dead stream");
        return;
    }
    WINDOW_UPDATES.fetch_add(increment, Ordering::SeqCst);
}

// ============================================================================
// Hashing and checksums
// ============================================================================

struct StubHash {
    size: usize,
    data: Vec<u8>,
}

/// The stub's stand-in digest: a byte-wise fold of the input.
pub fn stub_digest(size: usize, data: &[u8]) -> Vec<u8> {
    let mut digest = vec![size as u8; size];
    for (i, b) in data.iter().enumerate() {
        let slot = &mut digest[i % size];
        *slot = slot.wrapping_mul(31).wrapping_add(*b);
    }
    digest
}

fn new_hash(size: usize) -> *mut c_void {
    let ptr = Box::into_raw(Box::new(StubHash {
        size,
        data: Vec::new(),
    })) as *mut c_void;
    live_set().lock().unwrap().insert(ptr as usize);
    ptr
}

unsafe extern "C" fn sha1_new() -> *mut c_void {
    new_hash(20)
}

unsafe extern "C" fn sha256_new() -> *mut c_void {
    new_hash(32)
}

unsafe extern "C" fn md5_new() -> *mut c_void {
    new_hash(16)
}

unsafe extern "C" fn hash_update(hash: *mut c_void, data: *const u8, len: u32) -> i32 {
    if !is_live(hash) {
        return ERROR_UNSUPPORTED_OPERATION;
    }
    let hash = &mut *(hash as *mut StubHash);
    hash.data.extend_from_slice(std::slice::from_raw_parts(data, len as usize));
    0
}

unsafe extern "C" fn hash_digest(hash: *mut c_void, truncate_to: u32, buffer: *mut u8, len: u32) {
    let hash = &*(hash as *const StubHash);
    let digest = stub_digest(hash.size, &hash.data);
    let keep = match truncate_to as usize {
        0 => hash.size,
        n => n.min(hash.size),
    };
    assert!(keep <= len as usize, "digest buffer too small");
    std::ptr::copy_nonoverlapping(digest.as_ptr(), buffer, keep);
}

unsafe extern "C" fn hash_destroy(ptr: *mut c_void) {
    if live_set().lock().unwrap().remove(&(ptr as usize)) {
        drop(Box::from_raw(ptr as *mut StubHash));
        destroyed_log().lock().unwrap().push("hash");
    }
}

fn crc(poly: u32, data: &[u8], previous: u32) -> u32 {
    let mut crc = !previous;
    for b in data {
        crc ^= u32::from(*b);
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
        }
    }
    !crc
}

unsafe extern "C" fn crc32(data: *const u8, len: i32, previous: u32) -> u32 {
    crc(0xEDB8_8320, std::slice::from_raw_parts(data, len as usize), previous)
}

unsafe extern "C" fn crc32c(data: *const u8, len: i32, previous: u32) -> u32 {
    crc(0x82F6_3B78, std::slice::from_raw_parts(data, len as usize), previous)
}

// ============================================================================
// Signing
// ============================================================================

struct SigningJob {
    method: String,
    uri: String,
    headers: Vec<(String, String)>,
    region: Option<String>,
    millis: i64,
    body: FfiStreamFunctionTable,
    id: u64,
    on_complete: SigningCompleteFn,
}

unsafe fn read_body(table: &FfiStreamFunctionTable, capacity: usize) -> Vec<u8> {
    let read = table.read.expect("enabled table has read");
    let mut body = Vec::new();
    loop {
        let mut buf = vec![0u8; capacity];
        let mut written = 0u64;
        let state = read(table.ctx, buf.as_mut_ptr(), capacity as u64, &mut written);
        body.extend_from_slice(&buf[..written as usize]);
        if state == StreamState::Done as i32 {
            return body;
        }
    }
}

unsafe extern "C" fn sign_request(
    method: *const c_char,
    uri: *const c_char,
    headers: *const FfiHttpHeader,
    header_count: u32,
    config: *const FfiSigningConfig,
    body: *const FfiStreamFunctionTable,
    id: u64,
    on_complete: SigningCompleteFn,
) {
    let text = |p: *const c_char| CStr::from_ptr(p).to_string_lossy().into_owned();
    let headers = if headers.is_null() {
        Vec::new()
    } else {
        std::slice::from_raw_parts(headers, header_count as usize)
            .iter()
            .map(|h| (text(h.name), text(h.value)))
            .collect()
    };
    let config = &*config;
    let job = SigningJob {
        method: text(method),
        uri: text(uri),
        headers,
        region: (!config.region.is_null())
            .then(|| text(config.region))
            .filter(|r| !r.is_empty()),
        millis: config.milliseconds_since_epoch,
        body: *body,
        id,
        on_complete,
    };
    std::thread::spawn(move || unsafe { run_signing(job) });
}

unsafe fn run_signing(job: SigningJob) {
    if job.region.is_none() {
        let none = std::ptr::null();
        (job.on_complete)(job.id, ERROR_SIGNING_MISSING_REGION, none, std::ptr::null(), 0);
        return;
    }

    let mut digest_len = 0;
    if job.body.is_enabled() {
        // Once for the payload hash, once more after rewinding, as a sender would.
        let first = read_body(&job.body, 5);
        let seek = job.body.seek.expect("enabled table has seek");
        assert!(seek(job.body.ctx, 0, 0), "signer could not rewind the body");
        let second = read_body(&job.body, 64);
        digest_len = first.len();
        let mut reads = body_reads().lock().unwrap();
        reads.push(first);
        reads.push(second);
    }

    let mut headers = job.headers.clone();
    headers.push(("X-Amz-Date".to_string(), format!("stub-{}", job.millis)));
    headers.push((
        "Authorization".to_string(),
        format!("STUB {} {} body={digest_len}", job.method, job.uri),
    ));
    let owned: Vec<(CString, CString)> = headers
        .iter()
        .map(|(n, v)| (CString::new(n.as_str()).unwrap(), CString::new(v.as_str()).unwrap()))
        .collect();
    let raw: Vec<FfiHttpHeader> = owned
        .iter()
        .map(|(n, v)| FfiHttpHeader {
            name: n.as_ptr(),
            value: v.as_ptr(),
        })
        .collect();
    let uri = CString::new(job.uri.as_str()).unwrap();
    (job.on_complete)(job.id, 0, uri.as_ptr(), raw.as_ptr(), raw.len() as u32);
}

// ============================================================================
// Engine assembly
// ============================================================================

/// Symbol table exporting every stub entry point.
pub fn symbols() -> SymbolTable {
    SymbolTable::new("stub engine")
        .with("crt_set_error_relay", set_error_relay as *const ())
        .with("crt_static_init", static_init as *const ())
        .with("crt_static_shutdown", static_shutdown as *const ())
        .with("crt_error_name", error_name as *const ())
        .with("crt_error_string", error_string as *const ())
        .with("crt_logger_enable", logger_enable as *const ())
        .with("crt_test_multiply", test_multiply as *const ())
        .with("crt_test_raise", test_raise as *const ())
        .with("crt_test_raise_void", test_raise_void as *const ())
        .with("crt_event_loop_group_new", event_loop_group_new as *const ())
        .with("crt_event_loop_group_destroy", destroy_resource as *const ())
        .with("crt_client_bootstrap_new", client_bootstrap_new as *const ())
        .with("crt_client_bootstrap_destroy", destroy_resource as *const ())
        .with("crt_host_resolver_new_default", host_resolver_new as *const ())
        .with("crt_host_resolver_destroy", destroy_resource as *const ())
        .with("crt_socket_options_new", socket_options_new as *const ())
        .with("crt_socket_options_destroy", socket_options_destroy as *const ())
        .with("crt_tls_ctx_new_client", tls_ctx_new as *const ())
        .with("crt_tls_ctx_new_server", tls_ctx_new as *const ())
        .with("crt_tls_ctx_destroy", destroy_resource as *const ())
        .with("crt_tls_connection_options_new", tls_connection_options_new as *const ())
        .with("crt_tls_connection_options_destroy", destroy_resource as *const ())
        .with("crt_http_connection_new", http_connection_new as *const ())
        .with("crt_http_connection_destroy", http_connection_destroy as *const ())
        .with("crt_http_connection_manager_new", connection_manager_new as *const ())
        .with("crt_http_connection_manager_destroy", connection_manager_destroy as *const ())
        .with("crt_http_connection_manager_acquire", connection_manager_acquire as *const ())
        .with(
            "crt_http_connection_manager_release_connection",
            connection_manager_release_connection as *const (),
        )
        .with("crt_http_stream_new", http_stream_new as *const ())
        .with("crt_http_stream_destroy", destroy_resource as *const ())
        .with("crt_http_stream_update_window", http_stream_update_window as *const ())
        .with("crt_sha1_new", sha1_new as *const ())
        .with("crt_sha256_new", sha256_new as *const ())
        .with("crt_md5_new", md5_new as *const ())
        .with("crt_hash_update", hash_update as *const ())
        .with("crt_hash_digest", hash_digest as *const ())
        .with("crt_hash_destroy", hash_destroy as *const ())
        .with("crt_crc32", crc32 as *const ())
        .with("crt_crc32c", crc32c as *const ())
        .with("crt_sign_request", sign_request as *const ())
}

/// Attach a fresh module to the stub engine.
pub fn engine() -> ForeignModule {
    reset();
    ForeignModule::attach(Arc::new(symbols())).expect("stub engine attaches")
}
