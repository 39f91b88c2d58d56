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

//! Engine-side logging control.
//!
//! Host logging goes through the `log` facade. The engine keeps its own
//! logger, which this module switches on at a chosen verbosity.

use std::ffi::c_char;
use std::path::Path;
use std::str::FromStr;

use crt_ffi_primitives::{optional_ptr, FfiCString};
use serde::{Deserialize, Serialize};

use crate::binder::ForeignModule;
use crate::error::{BridgeError, Result};

pub const SYM_LOGGER_ENABLE: &str = "crt_logger_enable";

type LoggerEnableFn = unsafe extern "C" fn(level: i32, path: *const c_char);

/// Engine log verbosity, FFI-safe.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForeignLogLevel {
    None = 0,
    Fatal = 1,
    Error = 2,
    Warn = 3,
    Info = 4,
    Debug = 5,
    Trace = 6,
}

impl FromStr for ForeignLogLevel {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(ForeignLogLevel::None),
            "fatal" => Ok(ForeignLogLevel::Fatal),
            "error" => Ok(ForeignLogLevel::Error),
            "warn" | "warning" => Ok(ForeignLogLevel::Warn),
            "info" => Ok(ForeignLogLevel::Info),
            "debug" => Ok(ForeignLogLevel::Debug),
            "trace" => Ok(ForeignLogLevel::Trace),
            other => Err(BridgeError::config(format!("unknown log level '{other}'"))),
        }
    }
}

impl From<log::LevelFilter> for ForeignLogLevel {
    fn from(level: log::LevelFilter) -> Self {
        match level {
            log::LevelFilter::Off => ForeignLogLevel::None,
            log::LevelFilter::Error => ForeignLogLevel::Error,
            log::LevelFilter::Warn => ForeignLogLevel::Warn,
            log::LevelFilter::Info => ForeignLogLevel::Info,
            log::LevelFilter::Debug => ForeignLogLevel::Debug,
            log::LevelFilter::Trace => ForeignLogLevel::Trace,
        }
    }
}

pub struct ForeignLogger;

impl ForeignLogger {
    /// Turn on engine logging at `level`, writing to `destination` or stderr.
    pub fn enable(
        module: &ForeignModule,
        level: ForeignLogLevel,
        destination: Option<&Path>,
    ) -> Result<()> {
        let enable = unsafe { module.bind::<LoggerEnableFn>(SYM_LOGGER_ENABLE)? };
        let path = destination
            .map(|p| FfiCString::new(&p.to_string_lossy()))
            .transpose()?;

        // SAFETY: the path is null or a live C string for the duration of the call.
        unsafe { enable.call((level as i32, optional_ptr(path.as_ref())))? };
        log::debug!(
            "Engine logging enabled at {:?} ({})",
            level,
            destination
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "stderr".to_string())
        );
        Ok(())
    }

    /// Match the engine's verbosity to the host's `log` max level.
    pub fn enable_from_host(module: &ForeignModule) -> Result<()> {
        Self::enable(module, log::max_level().into(), None)
    }
}
