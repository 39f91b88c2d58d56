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

//! Call binder: turns named foreign entry points into typed callables that
//! consult the error relay after every call.
//!
//! A [`ForeignModule`] owns the symbol source the engine was loaded from. On
//! attach it runs the engine's static initialiser and installs the error
//! relay; when the last reference to it goes away (bound functions and
//! resource destroy operations hold references too) it runs the static
//! shutdown exactly once.
//!
//! ```ignore
//! type Multiply = unsafe extern "C" fn(i32, i32) -> i32;
//! let multiply = unsafe { module.bind::<Multiply>("crt_test_multiply")? };
//! let product = unsafe { multiply.call((3, 4))? };
//! ```

use std::ffi::{c_char, c_void};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crt_ffi_primitives::{FfiStr, ForeignSignature};

use crate::config::EngineConfig;
use crate::error::{BridgeError, CallError, Result};
use crate::library::{NativeLibrary, SymbolSource};
use crate::logging::{ForeignLogLevel, ForeignLogger};
use crate::relay::{self, SetErrorRelayFn};

pub const SYM_STATIC_INIT: &str = "crt_static_init";
pub const SYM_STATIC_SHUTDOWN: &str = "crt_static_shutdown";
pub const SYM_SET_ERROR_RELAY: &str = "crt_set_error_relay";
pub const SYM_ERROR_NAME: &str = "crt_error_name";
pub const SYM_ERROR_STRING: &str = "crt_error_string";

type StaticInitFn = unsafe extern "C" fn();
type StaticShutdownFn = unsafe extern "C" fn();
type ErrorTextFn = unsafe extern "C" fn(i32) -> *const c_char;

struct ModuleInner {
    source: Arc<dyn SymbolSource>,
    shutdown: Option<StaticShutdownFn>,
    error_name: Option<ErrorTextFn>,
    error_string: Option<ErrorTextFn>,
}

impl Drop for ModuleInner {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown {
            log::debug!("Shutting down foreign engine {}", self.source.describe());
            unsafe { shutdown() };
            if let Some(error) = relay::take() {
                log::error!("Foreign engine shutdown failed: {error}");
            }
        }
    }
}

/// An attached foreign engine.
#[derive(Clone)]
pub struct ForeignModule {
    inner: Arc<ModuleInner>,
}

impl fmt::Debug for ForeignModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignModule")
            .field("source", &self.inner.source.describe())
            .finish()
    }
}

impl ForeignModule {
    /// Load the engine library described by `config` and attach to it.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let library = NativeLibrary::load(
            &config.library_path(),
            config.load_attempts,
            config.load_retry_delay(),
        )?;
        let module = Self::attach(Arc::new(library))?;

        if config.log_level != ForeignLogLevel::None {
            ForeignLogger::enable(&module, config.log_level, config.log_file.as_deref())?;
        }

        log::info!("Attached foreign engine {}", module.describe());
        Ok(module)
    }

    /// Initialise the engine behind `source` and install the error relay.
    pub fn attach(source: Arc<dyn SymbolSource>) -> Result<Self> {
        let set_relay = resolve_raw(source.as_ref(), SYM_SET_ERROR_RELAY).ok_or_else(|| {
            BridgeError::UnresolvedSymbol {
                name: SYM_SET_ERROR_RELAY.to_string(),
            }
        })?;
        let init = resolve_raw(source.as_ref(), SYM_STATIC_INIT);
        let shutdown = resolve_raw(source.as_ref(), SYM_STATIC_SHUTDOWN);
        if init.is_none() {
            log::debug!(
                "{} does not export {}; skipping static init",
                source.describe(),
                SYM_STATIC_INIT
            );
        }

        // The relay must be in place before init so init failures are captured.
        unsafe {
            let set_relay = SetErrorRelayFn::from_raw(set_relay);
            set_relay(relay::relay_fn());
        }

        if let Some(init) = init {
            unsafe { StaticInitFn::from_raw(init)() };
            if let Some(error) = relay::take() {
                return Err(BridgeError::Foreign(error));
            }
        }

        let inner = ModuleInner {
            shutdown: shutdown.map(|ptr| unsafe { StaticShutdownFn::from_raw(ptr) }),
            error_name: resolve_raw(source.as_ref(), SYM_ERROR_NAME)
                .map(|ptr| unsafe { ErrorTextFn::from_raw(ptr) }),
            error_string: resolve_raw(source.as_ref(), SYM_ERROR_STRING)
                .map(|ptr| unsafe { ErrorTextFn::from_raw(ptr) }),
            source,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Bind the entry point `name` as signature `F`.
    ///
    /// # Safety
    /// The exported function must have exactly the signature `F`, including
    /// calling convention and argument order.
    pub unsafe fn bind<F: ForeignSignature>(&self, name: &str) -> Result<BoundFunction<F>> {
        self.bind_optional(name)?
            .ok_or_else(|| BridgeError::UnresolvedSymbol {
                name: name.to_string(),
            })
    }

    /// Like [`ForeignModule::bind`] but returns `None` for a missing export.
    ///
    /// # Safety
    /// Same contract as [`ForeignModule::bind`].
    pub unsafe fn bind_optional<F: ForeignSignature>(
        &self,
        name: &str,
    ) -> Result<Option<BoundFunction<F>>> {
        let Some(ptr) = resolve_raw(self.inner.source.as_ref(), name) else {
            return Ok(None);
        };
        log::trace!(
            "Bound {} ({} argument(s)) from {}",
            name,
            F::arity(),
            self.inner.source.describe()
        );
        Ok(Some(BoundFunction {
            name: name.to_string(),
            function: F::from_raw(ptr),
            _module: self.inner.clone(),
        }))
    }

    /// Symbolic name of an engine error code.
    pub fn error_name(&self, code: i32) -> String {
        self.error_text(self.inner.error_name, code)
            .unwrap_or_else(|| "UNKNOWN_ERROR".to_string())
    }

    /// Description of an engine error code.
    pub fn error_string(&self, code: i32) -> String {
        self.error_text(self.inner.error_string, code)
            .unwrap_or_default()
    }

    /// Build a [`CallError`] for a code delivered through a completion callback.
    pub fn describe_error(&self, code: i32) -> CallError {
        CallError::new(code, self.error_name(code), self.error_string(code))
    }

    pub fn describe(&self) -> String {
        self.inner.source.describe()
    }

    fn error_text(&self, lookup: Option<ErrorTextFn>, code: i32) -> Option<String> {
        let lookup = lookup?;
        let text = unsafe { FfiStr::from_ptr(lookup(code)).to_option() };
        if let Some(error) = relay::take() {
            log::debug!("Ignoring relay error raised while describing code {code}: {error}");
        }
        text
    }
}

fn resolve_raw(source: &dyn SymbolSource, name: &str) -> Option<NonNull<c_void>> {
    source.resolve(name)
}

/// A resolved entry point with a fixed signature.
///
/// Keeps the module (and therefore the library) alive for as long as it
/// exists. Cloning is cheap.
#[derive(Clone)]
pub struct BoundFunction<F: ForeignSignature> {
    name: String,
    function: F,
    _module: Arc<ModuleInner>,
}

impl<F: ForeignSignature> fmt::Debug for BoundFunction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundFunction")
            .field("name", &self.name)
            .field("arity", &F::arity())
            .finish()
    }
}

impl<F: ForeignSignature> BoundFunction<F> {
    /// Invoke the entry point, then drain the calling thread's relay slot.
    ///
    /// Returns the raw result unchanged when the relay stayed silent, and the
    /// relayed error (never the value) when it fired.
    ///
    /// # Safety
    /// `args` must satisfy the foreign function's contract: every pointer is
    /// live and points to what the engine expects, borrowed text stays valid
    /// for the duration of the call, and resource pointers have not been
    /// destroyed.
    pub unsafe fn call(&self, args: F::Args) -> Result<F::Output> {
        if let Some(stale) = relay::take() {
            log::warn!(
                "Discarding relay error left over from an unbound call before {}: {}",
                self.name,
                stale
            );
        }

        let output = self.function.invoke(args);

        match relay::take() {
            Some(error) => {
                log::debug!("{} raised {}", self.name, error);
                Err(BridgeError::Foreign(error))
            }
            None => Ok(output),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
