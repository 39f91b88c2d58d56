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

//! TLS contexts and per-connection TLS options.
//!
//! [`TlsContextOptions`] is plain host data. It is marshaled once into an
//! engine-owned [`TlsContext`]; [`TlsConnectionOptions`] are then derived from
//! a context and keep it pinned for as long as they live.

use std::ffi::{c_char, c_void};
use std::fmt;
use std::path::{Path, PathBuf};

use crt_ffi_primitives::{optional_ptr, FfiCString};

use crate::binder::ForeignModule;
use crate::error::{BridgeError, Result};
use crate::handle::ResourceHandle;
use crate::io::bound_destroy;

pub const SYM_TLS_CTX_NEW_CLIENT: &str = "crt_tls_ctx_new_client";
pub const SYM_TLS_CTX_NEW_SERVER: &str = "crt_tls_ctx_new_server";
pub const SYM_TLS_CTX_DESTROY: &str = "crt_tls_ctx_destroy";
pub const SYM_TLS_CONNECTION_OPTIONS_NEW: &str = "crt_tls_connection_options_new";
pub const SYM_TLS_CONNECTION_OPTIONS_DESTROY: &str = "crt_tls_connection_options_destroy";

pub const DEFAULT_MAX_FRAGMENT_SIZE: u32 = 16 * 1024;

/// `(min_version, ca_file, ca_path, alpn_list, cert_path, key_path,
/// pkcs12_path, pkcs12_password, max_fragment_size, verify_peer)`.
type TlsCtxNewFn = unsafe extern "C" fn(
    i32,
    *const c_char,
    *const c_char,
    *const c_char,
    *const c_char,
    *const c_char,
    *const c_char,
    *const c_char,
    u32,
    u8,
) -> *mut c_void;

type TlsConnectionOptionsNewFn = unsafe extern "C" fn(
    ctx: *mut c_void,
    server_name: *const c_char,
    alpn: *const c_char,
) -> *mut c_void;

/// Minimum protocol version. Values match the engine's numbering.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    SslV3 = 0,
    TlsV1 = 1,
    TlsV1_1 = 2,
    TlsV1_2 = 3,
    TlsV1_3 = 4,
    #[default]
    SystemDefault = 128,
}

/// Host-side description of a TLS context.
#[derive(Clone)]
pub struct TlsContextOptions {
    pub minimum_tls_version: TlsVersion,
    /// Semicolon separated protocol list, e.g. `"h2;http/1.1"`.
    pub alpn_list: Option<String>,
    pub max_fragment_size: u32,
    pub verify_peer: bool,
    ca_file: Option<PathBuf>,
    ca_path: Option<PathBuf>,
    certificate_path: Option<PathBuf>,
    private_key_path: Option<PathBuf>,
    pkcs12_path: Option<PathBuf>,
    pkcs12_password: Option<String>,
}

impl Default for TlsContextOptions {
    fn default() -> Self {
        Self {
            minimum_tls_version: TlsVersion::SystemDefault,
            alpn_list: None,
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            verify_peer: true,
            ca_file: None,
            ca_path: None,
            certificate_path: None,
            private_key_path: None,
            pkcs12_path: None,
            pkcs12_password: None,
        }
    }
}

impl fmt::Debug for TlsContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContextOptions")
            .field("minimum_tls_version", &self.minimum_tls_version)
            .field("alpn_list", &self.alpn_list)
            .field("max_fragment_size", &self.max_fragment_size)
            .field("verify_peer", &self.verify_peer)
            .field("ca_file", &self.ca_file)
            .field("ca_path", &self.ca_path)
            .field("certificate_path", &self.certificate_path)
            .field("private_key_path", &self.private_key_path)
            .field("pkcs12_path", &self.pkcs12_path)
            .field(
                "pkcs12_password",
                &self.pkcs12_password.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl TlsContextOptions {
    pub fn default_client() -> Self {
        Self::default()
    }

    /// Client with a certificate and private key for mutual TLS.
    pub fn client_mtls_from_path(
        certificate_path: impl Into<PathBuf>,
        private_key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            certificate_path: Some(certificate_path.into()),
            private_key_path: Some(private_key_path.into()),
            ..Self::default()
        }
    }

    /// Client authenticating with a PKCS#12 bundle.
    pub fn client_mtls_pkcs12_from_path(
        pkcs12_path: impl Into<PathBuf>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            pkcs12_path: Some(pkcs12_path.into()),
            pkcs12_password: Some(password.into()),
            ..Self::default()
        }
    }

    /// Server with a certificate and key. Peers are not verified.
    pub fn default_server_from_path(
        certificate_path: impl Into<PathBuf>,
        private_key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            verify_peer: false,
            ..Self::client_mtls_from_path(certificate_path, private_key_path)
        }
    }

    /// Server with a PKCS#12 bundle. Peers are not verified.
    pub fn server_pkcs12_from_path(
        pkcs12_path: impl Into<PathBuf>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            verify_peer: false,
            ..Self::client_mtls_pkcs12_from_path(pkcs12_path, password)
        }
    }

    /// Trust the given CA directory and/or file instead of the system store.
    pub fn override_default_trust_store_from_path(
        &mut self,
        ca_path: Option<&Path>,
        ca_file: Option<&Path>,
    ) -> &mut Self {
        self.ca_path = ca_path.map(Path::to_path_buf);
        self.ca_file = ca_file.map(Path::to_path_buf);
        self
    }

    pub fn with_alpn_list(mut self, alpn_list: impl Into<String>) -> Self {
        self.alpn_list = Some(alpn_list.into());
        self
    }

    pub fn with_minimum_tls_version(mut self, version: TlsVersion) -> Self {
        self.minimum_tls_version = version;
        self
    }

    pub fn has_certificate(&self) -> bool {
        self.certificate_path.is_some() || self.pkcs12_path.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.certificate_path.is_some() != self.private_key_path.is_some() {
            return Err(BridgeError::invalid_argument(
                "certificate and private key must be given together",
            ));
        }
        if self.pkcs12_password.is_some() && self.pkcs12_path.is_none() {
            return Err(BridgeError::invalid_argument(
                "a PKCS#12 password requires a PKCS#12 path",
            ));
        }
        if self.certificate_path.is_some() && self.pkcs12_path.is_some() {
            return Err(BridgeError::invalid_argument(
                "use either a certificate/key pair or a PKCS#12 bundle, not both",
            ));
        }
        if self.max_fragment_size == 0 {
            return Err(BridgeError::invalid_argument(
                "max fragment size must be positive",
            ));
        }
        Ok(())
    }
}

fn path_text(path: Option<&Path>) -> Result<Option<FfiCString>> {
    path.map(|p| FfiCString::new(&p.to_string_lossy()).map_err(BridgeError::from))
        .transpose()
}

fn text(value: Option<&str>) -> Result<Option<FfiCString>> {
    value
        .map(|v| FfiCString::new(v).map_err(BridgeError::from))
        .transpose()
}

/// Whether a context originates or accepts connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    Client,
    Server,
}

/// Engine TLS context built from [`TlsContextOptions`].
#[derive(Debug)]
pub struct TlsContext {
    mode: TlsMode,
    handle: ResourceHandle,
}

impl TlsContext {
    pub fn new_client(module: &ForeignModule, options: &TlsContextOptions) -> Result<Self> {
        Self::new(module, TlsMode::Client, options)
    }

    /// A server context needs a certificate or PKCS#12 bundle.
    pub fn new_server(module: &ForeignModule, options: &TlsContextOptions) -> Result<Self> {
        if !options.has_certificate() {
            return Err(BridgeError::invalid_argument(
                "a server TLS context needs a certificate",
            ));
        }
        Self::new(module, TlsMode::Server, options)
    }

    fn new(module: &ForeignModule, mode: TlsMode, options: &TlsContextOptions) -> Result<Self> {
        options.validate()?;
        let symbol = match mode {
            TlsMode::Client => SYM_TLS_CTX_NEW_CLIENT,
            TlsMode::Server => SYM_TLS_CTX_NEW_SERVER,
        };
        let create = unsafe { module.bind::<TlsCtxNewFn>(symbol)? };
        let destroy = bound_destroy(module, SYM_TLS_CTX_DESTROY)?;

        let ca_file = path_text(options.ca_file.as_deref())?;
        let ca_path = path_text(options.ca_path.as_deref())?;
        let alpn_list = text(options.alpn_list.as_deref())?;
        let certificate = path_text(options.certificate_path.as_deref())?;
        let private_key = path_text(options.private_key_path.as_deref())?;
        let pkcs12 = path_text(options.pkcs12_path.as_deref())?;
        let pkcs12_password = text(options.pkcs12_password.as_deref())?;

        // SAFETY: every text argument is null or a C string that outlives the call.
        let ptr = unsafe {
            create.call((
                options.minimum_tls_version as i32,
                optional_ptr(ca_file.as_ref()),
                optional_ptr(ca_path.as_ref()),
                optional_ptr(alpn_list.as_ref()),
                optional_ptr(certificate.as_ref()),
                optional_ptr(private_key.as_ref()),
                optional_ptr(pkcs12.as_ref()),
                optional_ptr(pkcs12_password.as_ref()),
                options.max_fragment_size,
                u8::from(options.verify_peer),
            ))?
        };
        Ok(Self {
            mode,
            handle: ResourceHandle::new("tls context", ptr, destroy)?,
        })
    }

    pub fn mode(&self) -> TlsMode {
        self.mode
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn release(&self) -> Result<()> {
        self.handle.release()
    }
}

/// TLS settings for one connection, derived from a [`TlsContext`].
#[derive(Debug)]
pub struct TlsConnectionOptions {
    server_name: Option<String>,
    handle: ResourceHandle,
}

impl TlsConnectionOptions {
    /// `server_name` is sent as SNI and checked against the peer certificate;
    /// `alpn_list` overrides the context's list.
    pub fn new(
        module: &ForeignModule,
        context: &TlsContext,
        server_name: Option<&str>,
        alpn_list: Option<&str>,
    ) -> Result<Self> {
        let create =
            unsafe { module.bind::<TlsConnectionOptionsNewFn>(SYM_TLS_CONNECTION_OPTIONS_NEW)? };
        let destroy = bound_destroy(module, SYM_TLS_CONNECTION_OPTIONS_DESTROY)?;
        let name = text(server_name)?;
        let alpn = text(alpn_list)?;

        let ctx = context.handle();
        // SAFETY: `with_raw` keeps the context live and the text outlives the call.
        let ptr = ctx.with_raw(|ctx| unsafe {
            create.call((ctx, optional_ptr(name.as_ref()), optional_ptr(alpn.as_ref())))
        })??;
        Ok(Self {
            server_name: server_name.map(str::to_string),
            handle: ResourceHandle::with_parents("tls connection options", ptr, destroy, &[ctx])?,
        })
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn release(&self) -> Result<()> {
        self.handle.release()
    }
}
