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

//! Request signing.
//!
//! [`sign_request`] hands a request to the engine's signer and completes with
//! a signed copy. A request body is streamed through a [`StreamBridge`]; the
//! signer may read it more than once, so the body must be seekable.

use std::ffi::c_char;
use std::fmt;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crt_ffi_primitives::{catch_panic_ffi, optional_ptr, FfiCString, FfiStr};

use crate::binder::ForeignModule;
use crate::completion::CompletionRouter;
use crate::error::{BridgeError, Result};
use crate::http::{copy_headers, FfiHttpHeader, HttpRequest, MarshaledHeaders};
use crate::result::AsyncResult;
use crate::stream::{ByteSource, FfiStreamFunctionTable, SharedSource, StreamBridge};

pub const SYM_SIGN_REQUEST: &str = "crt_sign_request";

/// Well-known values for [`SigningConfig::signed_body_value`].
pub mod signed_body_value {
    pub const EMPTY_SHA256: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
    pub const STREAMING_HMAC_SHA256_PAYLOAD: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";
    pub const STREAMING_HMAC_SHA256_EVENTS: &str = "STREAMING-AWS4-HMAC-SHA256-EVENTS";
}

/// Completion entry point: `(id, error_code, uri, headers, header_count)`.
pub type SigningCompleteFn = unsafe extern "C" fn(
    id: u64,
    error_code: i32,
    uri: *const c_char,
    headers: *const FfiHttpHeader,
    header_count: u32,
);

type SignRequestFn = unsafe extern "C" fn(
    method: *const c_char,
    uri: *const c_char,
    headers: *const FfiHttpHeader,
    header_count: u32,
    config: *const FfiSigningConfig,
    body: *const FfiStreamFunctionTable,
    id: u64,
    on_complete: SigningCompleteFn,
);

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningAlgorithm {
    #[default]
    SigV4 = 0,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureType {
    #[default]
    HttpRequestViaHeaders = 0,
    HttpRequestViaQueryParams = 1,
    HttpRequestChunk = 2,
    HttpRequestEvent = 3,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignedBodyHeader {
    #[default]
    None = 0,
    XAmzContentSha256 = 1,
}

#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub algorithm: SigningAlgorithm,
    pub signature_type: SignatureType,
    pub region: String,
    pub service: String,
    pub timestamp: SystemTime,
    pub credentials: Option<Credentials>,
    pub use_double_uri_encode: bool,
    pub should_normalize_uri_path: bool,
    pub omit_session_token: bool,
    pub signed_body_value: Option<String>,
    pub signed_body_header: SignedBodyHeader,
    pub expiration_in_seconds: u64,
}

impl SigningConfig {
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            algorithm: SigningAlgorithm::SigV4,
            signature_type: SignatureType::HttpRequestViaHeaders,
            region: region.into(),
            service: service.into(),
            timestamp: SystemTime::now(),
            credentials: None,
            use_double_uri_encode: true,
            should_normalize_uri_path: true,
            omit_session_token: false,
            signed_body_value: None,
            signed_body_header: SignedBodyHeader::None,
            expiration_in_seconds: 0,
        }
    }

    fn millis_since_epoch(&self) -> Result<i64> {
        let since = self.timestamp.duration_since(UNIX_EPOCH).map_err(|_| {
            BridgeError::invalid_argument("signing timestamp is before the Unix epoch")
        })?;
        i64::try_from(since.as_millis())
            .map_err(|_| BridgeError::invalid_argument("signing timestamp out of range"))
    }
}

/// Engine-side layout of a signing configuration.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiSigningConfig {
    pub algorithm: i32,
    pub signature_type: i32,
    pub region: *const c_char,
    pub service: *const c_char,
    pub milliseconds_since_epoch: i64,
    pub access_key_id: *const c_char,
    pub secret_access_key: *const c_char,
    pub session_token: *const c_char,
    pub use_double_uri_encode: bool,
    pub should_normalize_uri_path: bool,
    pub omit_session_token: bool,
    pub signed_body_value: *const c_char,
    pub signed_body_header: i32,
    pub expiration_in_seconds: u64,
}

/// Owned strings behind an [`FfiSigningConfig`].
#[derive(Debug)]
struct MarshaledSigningConfig {
    _strings: Vec<FfiCString>,
    raw: FfiSigningConfig,
}

impl MarshaledSigningConfig {
    fn new(config: &SigningConfig) -> Result<Self> {
        let text = |s: &str| FfiCString::new(s).map_err(BridgeError::from);
        let region = text(&config.region)?;
        let service = text(&config.service)?;
        let creds = config.credentials.as_ref();
        let access_key_id = creds.map(|c| text(&c.access_key_id)).transpose()?;
        let secret_access_key = creds.map(|c| text(&c.secret_access_key)).transpose()?;
        let session_token = creds
            .and_then(|c| c.session_token.as_deref())
            .map(text)
            .transpose()?;
        let signed_body_value = config.signed_body_value.as_deref().map(text).transpose()?;

        let raw = FfiSigningConfig {
            algorithm: config.algorithm as i32,
            signature_type: config.signature_type as i32,
            region: region.as_ptr(),
            service: service.as_ptr(),
            milliseconds_since_epoch: config.millis_since_epoch()?,
            access_key_id: optional_ptr(access_key_id.as_ref()),
            secret_access_key: optional_ptr(secret_access_key.as_ref()),
            session_token: optional_ptr(session_token.as_ref()),
            use_double_uri_encode: config.use_double_uri_encode,
            should_normalize_uri_path: config.should_normalize_uri_path,
            omit_session_token: config.omit_session_token,
            signed_body_value: optional_ptr(signed_body_value.as_ref()),
            signed_body_header: config.signed_body_header as i32,
            expiration_in_seconds: config.expiration_in_seconds,
        };

        let strings = [
            Some(region),
            Some(service),
            access_key_id,
            secret_access_key,
            session_token,
            signed_body_value,
        ]
        .into_iter()
        .flatten()
        .collect();
        Ok(Self {
            _strings: strings,
            raw,
        })
    }
}

struct SigningContext {
    module: ForeignModule,
    method: String,
    body: Option<SharedSource>,
    bridge: StreamBridge,
}

fn signings() -> &'static CompletionRouter<HttpRequest, SigningContext> {
    static ROUTER: OnceLock<CompletionRouter<HttpRequest, SigningContext>> = OnceLock::new();
    ROUTER.get_or_init(|| CompletionRouter::new("request signing"))
}

/// Sign `request` with `config`.
///
/// The signed request keeps the original method and body and takes its URI
/// and headers from the signer. A body is rewound to offset 0 first; a body
/// that cannot seek is rejected with [`BridgeError::BodyNotSeekable`].
pub fn sign_request(
    module: &ForeignModule,
    request: &HttpRequest,
    config: &SigningConfig,
) -> Result<AsyncResult<HttpRequest>> {
    let sign = unsafe { module.bind::<SignRequestFn>(SYM_SIGN_REQUEST)? };

    let bridge = StreamBridge::new(
        request
            .body
            .clone()
            .map(|body| Box::new(body) as Box<dyn ByteSource>),
    );
    if bridge.has_body() && !bridge.can_seek() {
        return Err(BridgeError::BodyNotSeekable);
    }
    bridge.rewind()?;

    let method = FfiCString::new(&request.method)?;
    let uri = FfiCString::new(&request.uri)?;
    let headers = MarshaledHeaders::new(&request.headers)?;
    let header_count = headers.count()?;
    let native = MarshaledSigningConfig::new(config)?;
    // The session lives in a box owned by the bridge, so the table stays
    // valid after the bridge moves into the router.
    let table = bridge.function_table();

    let router = signings();
    let (id, result) = router.issue(
        SigningContext {
            module: module.clone(),
            method: request.method.clone(),
            body: request.body.clone(),
            bridge,
        },
        Vec::new(),
    );

    // SAFETY: every pointer refers to marshaled data that outlives the call,
    // and the body table's context stays valid until the id is resolved.
    let issued = unsafe {
        sign.call((
            method.as_ptr(),
            uri.as_ptr(),
            headers.as_ptr(),
            header_count,
            &native.raw as *const FfiSigningConfig,
            &table as *const FfiStreamFunctionTable,
            id,
            on_signing_complete as SigningCompleteFn,
        ))
    };
    if let Err(error) = issued {
        if router.abandon(id, error.clone()).is_none() {
            log::warn!("Signing {id} already completed before the issuing call raised: {error}");
        }
    }
    Ok(result)
}

unsafe extern "C" fn on_signing_complete(
    id: u64,
    error_code: i32,
    uri: *const c_char,
    headers: *const FfiHttpHeader,
    header_count: u32,
) {
    let delivered = catch_panic_ffi(|| {
        signings().resolve(id, |ctx| {
            if let Some(error) = ctx.bridge.take_error() {
                return Err(error);
            }
            if error_code != 0 {
                return Err(BridgeError::Completion(ctx.module.describe_error(error_code)));
            }
            // SAFETY: the engine keeps uri and headers alive for this callback.
            let (uri, headers) = unsafe {
                (
                    FfiStr::from_ptr(uri).to_string(),
                    copy_headers(headers, header_count),
                )
            };
            Ok(HttpRequest {
                method: ctx.method,
                uri,
                headers,
                body: ctx.body,
            })
        })
    });
    if let Err(panic) = delivered {
        log::error!("Panic while completing signing {id}: {panic}");
    }
}
