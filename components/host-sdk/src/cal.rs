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

//! Message digests computed by the engine.

use std::ffi::c_void;

use crate::binder::{BoundFunction, ForeignModule};
use crate::error::{BridgeError, CallError, Result};
use crate::handle::ResourceHandle;
use crate::io::bound_destroy;

pub const SYM_SHA1_NEW: &str = "crt_sha1_new";
pub const SYM_SHA256_NEW: &str = "crt_sha256_new";
pub const SYM_MD5_NEW: &str = "crt_md5_new";
pub const SYM_HASH_UPDATE: &str = "crt_hash_update";
pub const SYM_HASH_DIGEST: &str = "crt_hash_digest";
pub const SYM_HASH_DESTROY: &str = "crt_hash_destroy";

type HashNewFn = unsafe extern "C" fn() -> *mut c_void;
type HashUpdateFn = unsafe extern "C" fn(hash: *mut c_void, data: *const u8, len: u32) -> i32;
type HashDigestFn =
    unsafe extern "C" fn(hash: *mut c_void, truncate_to: u32, buffer: *mut u8, len: u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Md5,
}

impl HashAlgorithm {
    /// Digest length in bytes.
    pub fn digest_size(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Md5 => 16,
        }
    }

    fn constructor(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => SYM_SHA1_NEW,
            HashAlgorithm::Sha256 => SYM_SHA256_NEW,
            HashAlgorithm::Md5 => SYM_MD5_NEW,
        }
    }
}

/// A running digest. Feed it with [`Hash::update`], then finish it once with
/// [`Hash::digest`].
#[derive(Debug)]
pub struct Hash {
    module: ForeignModule,
    algorithm: HashAlgorithm,
    finalized: bool,
    update: BoundFunction<HashUpdateFn>,
    digest: BoundFunction<HashDigestFn>,
    handle: ResourceHandle,
}

impl Hash {
    pub fn new(module: &ForeignModule, algorithm: HashAlgorithm) -> Result<Self> {
        let create = unsafe { module.bind::<HashNewFn>(algorithm.constructor())? };
        let update = unsafe { module.bind::<HashUpdateFn>(SYM_HASH_UPDATE)? };
        let digest = unsafe { module.bind::<HashDigestFn>(SYM_HASH_DIGEST)? };
        let destroy = bound_destroy(module, SYM_HASH_DESTROY)?;
        // SAFETY: the constructors take no arguments.
        let ptr = unsafe { create.call(())? };
        Ok(Self {
            module: module.clone(),
            algorithm,
            finalized: false,
            update,
            digest,
            handle: ResourceHandle::new("hash", ptr, destroy)?,
        })
    }

    pub fn sha1(module: &ForeignModule) -> Result<Self> {
        Self::new(module, HashAlgorithm::Sha1)
    }

    pub fn sha256(module: &ForeignModule) -> Result<Self> {
        Self::new(module, HashAlgorithm::Sha256)
    }

    pub fn md5(module: &ForeignModule) -> Result<Self> {
        Self::new(module, HashAlgorithm::Md5)
    }

    /// Digest `data` in one go.
    pub fn compute(
        module: &ForeignModule,
        algorithm: HashAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let mut hash = Self::new(module, algorithm)?;
        hash.update(data)?;
        hash.digest(0)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        if self.finalized {
            return Err(BridgeError::invalid_argument(
                "hash cannot be updated after its digest was taken",
            ));
        }
        for chunk in data.chunks(u32::MAX as usize) {
            let code = self.handle.with_raw(|hash| {
                // SAFETY: `with_raw` keeps the hash live and `chunk` is valid
                // for its length.
                unsafe { self.update.call((hash, chunk.as_ptr(), chunk.len() as u32)) }
            })??;
            if code != 0 {
                return Err(BridgeError::Foreign(self.describe(code)));
            }
        }
        Ok(())
    }

    /// Finish the digest. `truncate_to` keeps only the leading bytes; 0 keeps
    /// the whole digest.
    pub fn digest(&mut self, truncate_to: usize) -> Result<Vec<u8>> {
        let size = self.algorithm.digest_size();
        if truncate_to > size {
            return Err(BridgeError::invalid_argument(format!(
                "cannot truncate a {size}-byte digest to {truncate_to} bytes"
            )));
        }
        if self.finalized {
            return Err(BridgeError::invalid_argument(
                "digest has already been taken",
            ));
        }

        let mut buffer = vec![0u8; size];
        self.handle.with_raw(|hash| {
            // SAFETY: `buffer` holds a full digest, which is the most the
            // engine writes.
            unsafe {
                self.digest
                    .call((hash, truncate_to as u32, buffer.as_mut_ptr(), size as u32))
            }
        })??;
        self.finalized = true;

        if truncate_to > 0 {
            buffer.truncate(truncate_to);
        }
        Ok(buffer)
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn release(&self) -> Result<()> {
        self.handle.release()
    }

    fn describe(&self, code: i32) -> CallError {
        self.module.describe_error(code)
    }
}
