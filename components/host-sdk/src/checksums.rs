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

//! CRC-32 and CRC-32C checksums computed by the engine.

use crate::binder::{BoundFunction, ForeignModule};
use crate::error::Result;

pub const SYM_CRC32: &str = "crt_crc32";
pub const SYM_CRC32C: &str = "crt_crc32c";

type CrcFn = unsafe extern "C" fn(data: *const u8, len: i32, previous: u32) -> u32;

/// Bound checksum entry points. Pass the previous result back in as
/// `previous` to checksum data that arrives in pieces; start from 0.
#[derive(Debug, Clone)]
pub struct Checksums {
    crc32: BoundFunction<CrcFn>,
    crc32c: BoundFunction<CrcFn>,
}

impl Checksums {
    pub fn new(module: &ForeignModule) -> Result<Self> {
        Ok(Self {
            crc32: unsafe { module.bind::<CrcFn>(SYM_CRC32)? },
            crc32c: unsafe { module.bind::<CrcFn>(SYM_CRC32C)? },
        })
    }

    /// CRC-32 (IEEE 802.3) of `data`, continuing from `previous`.
    pub fn crc32(&self, data: &[u8], previous: u32) -> Result<u32> {
        run(&self.crc32, data, previous)
    }

    /// CRC-32C (Castagnoli) of `data`, continuing from `previous`.
    pub fn crc32c(&self, data: &[u8], previous: u32) -> Result<u32> {
        run(&self.crc32c, data, previous)
    }
}

fn run(crc: &BoundFunction<CrcFn>, data: &[u8], previous: u32) -> Result<u32> {
    let mut checksum = previous;
    for chunk in data.chunks(i32::MAX as usize) {
        // SAFETY: `chunk` is valid for its length, which fits in an i32.
        checksum = unsafe { crc.call((chunk.as_ptr(), chunk.len() as i32, checksum))? };
    }
    Ok(checksum)
}
