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

//! Exactly-once ownership of a foreign resource.
//!
//! A [`ResourceHandle`] owns one foreign pointer and the operation that
//! destroys it. Composite resources are built with
//! [`ResourceHandle::with_parents`], which pins every parent for the
//! composite's lifetime: a pinned handle refuses explicit release, and its
//! drop-time destroy is deferred until the last pin goes away. In-flight
//! asynchronous operations pin the handles they depend on the same way.

use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crt_ffi_primitives::SendMutPtr;

use crate::error::{BridgeError, Result};

/// Destroy operation for a foreign pointer. Failures are logged, never raised.
pub type DestroyFn = Box<dyn FnOnce(*mut c_void) -> Result<()> + Send + Sync>;

struct Live {
    ptr: SendMutPtr,
    destroy: DestroyFn,
    parents: Vec<HandlePin>,
}

struct HandleInner {
    kind: &'static str,
    live: RwLock<Option<Live>>,
    dependents: AtomicUsize,
}

impl HandleInner {
    fn read(&self) -> RwLockReadGuard<'_, Option<Live>> {
        self.live.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Live>> {
        self.live.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let live = self
            .live
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(live) = live {
            log::trace!("Destroying unreleased {} at drop", self.kind);
            run_destroy(self.kind, live);
        }
    }
}

fn run_destroy(kind: &'static str, live: Live) {
    let Live {
        ptr,
        destroy,
        parents,
    } = live;
    if let Err(e) = destroy(ptr.as_ptr()) {
        log::error!("Destroying {kind} failed: {e}");
    }
    // Parents outlive the child's destroy.
    drop(parents);
}

/// Owner of one foreign resource.
pub struct ResourceHandle {
    inner: Arc<HandleInner>,
}

impl ResourceHandle {
    /// Wrap `ptr`, which `destroy` frees exactly once.
    pub fn new(
        kind: &'static str,
        ptr: *mut c_void,
        destroy: impl FnOnce(*mut c_void) -> Result<()> + Send + Sync + 'static,
    ) -> Result<Self> {
        Self::build(kind, ptr, Box::new(destroy), Vec::new())
    }

    /// Wrap a composite resource built from `parents`. Each parent is pinned
    /// until this handle has been destroyed.
    pub fn with_parents(
        kind: &'static str,
        ptr: *mut c_void,
        destroy: impl FnOnce(*mut c_void) -> Result<()> + Send + Sync + 'static,
        parents: &[&ResourceHandle],
    ) -> Result<Self> {
        let pins = parents
            .iter()
            .map(|p| p.pin())
            .collect::<Result<Vec<_>>>()?;
        Self::build(kind, ptr, Box::new(destroy), pins)
    }

    /// Like [`ResourceHandle::with_parents`] for parents that were pinned
    /// ahead of time, e.g. while the engine was still building the resource.
    pub fn from_pins(
        kind: &'static str,
        ptr: *mut c_void,
        destroy: impl FnOnce(*mut c_void) -> Result<()> + Send + Sync + 'static,
        parents: Vec<HandlePin>,
    ) -> Result<Self> {
        Self::build(kind, ptr, Box::new(destroy), parents)
    }

    fn build(
        kind: &'static str,
        ptr: *mut c_void,
        destroy: DestroyFn,
        parents: Vec<HandlePin>,
    ) -> Result<Self> {
        if ptr.is_null() {
            return Err(BridgeError::NullHandle { kind });
        }
        Ok(Self {
            inner: Arc::new(HandleInner {
                kind,
                live: RwLock::new(Some(Live {
                    ptr: SendMutPtr(ptr),
                    destroy,
                    parents,
                })),
                dependents: AtomicUsize::new(0),
            }),
        })
    }

    pub fn kind(&self) -> &'static str {
        self.inner.kind
    }

    pub fn is_released(&self) -> bool {
        self.inner.read().is_none()
    }

    /// Number of live pins: child handles plus in-flight operations.
    pub fn dependents(&self) -> usize {
        self.inner.dependents.load(Ordering::SeqCst)
    }

    /// Run `f` with the live pointer. Release waits for running scopes.
    pub fn with_raw<R>(&self, f: impl FnOnce(*mut c_void) -> R) -> Result<R> {
        let live = self.inner.read();
        match live.as_ref() {
            Some(live) => Ok(f(live.ptr.as_ptr())),
            None => Err(BridgeError::ResourceReleased {
                kind: self.inner.kind,
            }),
        }
    }

    /// Keep this resource alive and unreleasable until the pin is dropped.
    pub fn pin(&self) -> Result<HandlePin> {
        let live = self.inner.read();
        if live.is_none() {
            return Err(BridgeError::ResourceReleased {
                kind: self.inner.kind,
            });
        }
        // Counted under the read lock so release cannot slip in between.
        self.inner.dependents.fetch_add(1, Ordering::SeqCst);
        drop(live);
        Ok(HandlePin {
            inner: self.inner.clone(),
        })
    }

    /// Destroy the resource now.
    ///
    /// Idempotent. Refused with [`BridgeError::ResourceInUse`] while any pin
    /// is outstanding.
    pub fn release(&self) -> Result<()> {
        let live = {
            let mut guard = self.inner.write();
            if guard.is_none() {
                return Ok(());
            }
            let dependents = self.inner.dependents.load(Ordering::SeqCst);
            if dependents > 0 {
                return Err(BridgeError::ResourceInUse {
                    kind: self.inner.kind,
                    dependents,
                });
            }
            guard.take()
        };

        if let Some(live) = live {
            log::trace!("Releasing {}", self.inner.kind);
            run_destroy(self.inner.kind, live);
        }
        Ok(())
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("kind", &self.inner.kind)
            .field("released", &self.is_released())
            .field("dependents", &self.dependents())
            .finish()
    }
}

/// A counted dependency on a [`ResourceHandle`].
pub struct HandlePin {
    inner: Arc<HandleInner>,
}

impl HandlePin {
    pub fn kind(&self) -> &'static str {
        self.inner.kind
    }
}

impl Clone for HandlePin {
    fn clone(&self) -> Self {
        self.inner.dependents.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for HandlePin {
    fn drop(&mut self) {
        self.inner.dependents.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for HandlePin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlePin").field(&self.inner.kind).finish()
    }
}
