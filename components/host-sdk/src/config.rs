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

//! Engine configuration: where the foreign module lives and how it is
//! initialised.
//!
//! ```json
//! {
//!   "libraryDir": "/opt/crt/lib",
//!   "libraryName": "crt_engine",
//!   "loadAttempts": 100,
//!   "loadRetryDelayMs": 10,
//!   "logLevel": "warn",
//!   "logFile": "/var/log/crt.log"
//! }
//! ```
//!
//! Every field is optional. [`EngineConfig::from_env`] overlays
//! `CRT_LIBRARY_DIR`, `CRT_LIBRARY_NAME`, `CRT_LOG_LEVEL` and `CRT_LOG_FILE`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::library::library_path;
use crate::logging::ForeignLogLevel;

pub const DEFAULT_LIBRARY_NAME: &str = "crt_engine";
pub const DEFAULT_LOAD_ATTEMPTS: u32 = 100;
pub const DEFAULT_LOAD_RETRY_DELAY_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Directory holding the engine library. Relative lookup through the
    /// platform loader search path when absent.
    pub library_dir: Option<PathBuf>,
    /// Library base name without platform prefix/extension.
    pub library_name: String,
    pub load_attempts: u32,
    pub load_retry_delay_ms: u64,
    /// Verbosity passed to the engine's own logger.
    pub log_level: ForeignLogLevel,
    /// Destination for engine logs; stderr when absent.
    pub log_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            library_dir: None,
            library_name: DEFAULT_LIBRARY_NAME.to_string(),
            load_attempts: DEFAULT_LOAD_ATTEMPTS,
            load_retry_delay_ms: DEFAULT_LOAD_RETRY_DELAY_MS,
            log_level: ForeignLogLevel::None,
            log_file: None,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BridgeError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `CRT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Overlay `CRT_*` environment variables onto this configuration.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("CRT_LIBRARY_DIR") {
            self.library_dir = Some(PathBuf::from(dir));
        }
        if let Ok(name) = std::env::var("CRT_LIBRARY_NAME") {
            self.library_name = name;
        }
        if let Ok(level) = std::env::var("CRT_LOG_LEVEL") {
            self.log_level = level.parse()?;
        }
        if let Ok(file) = std::env::var("CRT_LOG_FILE") {
            self.log_file = Some(PathBuf::from(file));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.library_name.trim().is_empty() {
            return Err(BridgeError::config("libraryName must not be empty"));
        }
        if self.load_attempts == 0 {
            return Err(BridgeError::config("loadAttempts must be at least 1"));
        }
        Ok(())
    }

    /// Platform-specific path of the engine library.
    pub fn library_path(&self) -> PathBuf {
        match &self.library_dir {
            Some(dir) => library_path(dir, &self.library_name),
            None => PathBuf::from(crate::library::library_file_name(&self.library_name)),
        }
    }

    pub fn load_retry_delay(&self) -> Duration {
        Duration::from_millis(self.load_retry_delay_ms)
    }
}
