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

//! Symbol sources: where foreign entry points are resolved from.
//!
//! - [`NativeLibrary`] opens the engine shared library with `libloading`.
//! - [`SymbolTable`] maps names to function pointers registered in-process,
//!   for statically linked engines and test doubles.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::time::Duration;

use libloading::Library;

use crate::error::{BridgeError, Result};

/// Resolves foreign entry points by name.
pub trait SymbolSource: Send + Sync {
    /// Address of the named entry point, or `None` when it is not exported.
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>>;

    /// Short description for diagnostics (usually the library path).
    fn describe(&self) -> String;
}

/// A dynamically loaded engine library.
pub struct NativeLibrary {
    library: Library,
    path: PathBuf,
}

impl NativeLibrary {
    /// Open the library at `path`, retrying up to `attempts` times.
    ///
    /// A freshly written library can be locked for a short while (virus
    /// scanners on some platforms), so failed opens are retried after `delay`.
    pub fn load(path: &Path, attempts: u32, delay: Duration) -> Result<Self> {
        let attempts = attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match unsafe { Library::new(path) } {
                Ok(library) => {
                    log::debug!(
                        "Loaded foreign engine {} (attempt {}/{})",
                        path.display(),
                        attempt,
                        attempts
                    );
                    return Ok(Self {
                        library,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    log::trace!(
                        "Opening {} failed (attempt {}/{}): {}",
                        path.display(),
                        attempt,
                        attempts,
                        last_error
                    );
                    if attempt < attempts {
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        log::error!(
            "Failed to load foreign engine {}: {}",
            path.display(),
            last_error
        );
        Err(BridgeError::LibraryLoad {
            path: path.display().to_string(),
            reason: last_error,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SymbolSource for NativeLibrary {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        let symbol = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) }.ok()?;
        NonNull::new(*symbol)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process symbol registry.
///
/// ```ignore
/// let table = SymbolTable::new("stub engine")
///     .with("crt_set_error_relay", stub_set_error_relay as SetErrorRelayFn as *const ());
/// ```
#[derive(Default)]
pub struct SymbolTable {
    label: String,
    entries: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: HashMap::new(),
        }
    }

    /// Register `address` under `name`, replacing any earlier entry.
    pub fn insert(&mut self, name: impl Into<String>, address: *const ()) {
        self.entries.insert(name.into(), address as usize);
    }

    /// Builder form of [`SymbolTable::insert`].
    pub fn with(mut self, name: impl Into<String>, address: *const ()) -> Self {
        self.insert(name, address);
        self
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SymbolSource for SymbolTable {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        self.entries
            .get(name)
            .and_then(|address| NonNull::new(*address as *mut c_void))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Platform file name for an engine library called `name`.
pub fn library_file_name(name: &str) -> String {
    if cfg!(target_os = "macos") {
        format!("lib{name}.dylib")
    } else if cfg!(target_os = "windows") {
        format!("{name}.dll")
    } else {
        format!("lib{name}.so")
    }
}

/// Full path of the engine library `name` inside `dir`.
pub fn library_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(library_file_name(name))
}
