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

//! Routing of foreign completion callbacks back to their [`AsyncResult`].
//!
//! Issuing an asynchronous foreign call registers a continuation and passes
//! its id to the engine. The completion entry point later resolves that id
//! exactly once. Continuations carry [`HandlePin`]s on the resources the
//! operation uses, so those resources cannot be released until the engine
//! has called back.

use crate::error::{BridgeError, Result};
use crate::handle::HandlePin;
use crate::result::AsyncResult;
use crate::vendor::StrongReferenceVendor;

struct Continuation<T, C> {
    result: AsyncResult<T>,
    context: C,
    pins: Vec<HandlePin>,
}

pub struct CompletionRouter<T, C> {
    label: &'static str,
    pending: StrongReferenceVendor<Continuation<T, C>>,
}

impl<T: Clone + Send + 'static, C> CompletionRouter<T, C> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            pending: StrongReferenceVendor::new(label),
        }
    }

    /// Register a continuation and return the id to hand to the engine.
    pub fn issue(&self, context: C, pins: Vec<HandlePin>) -> (u64, AsyncResult<T>) {
        let result = AsyncResult::new();
        let id = self.pending.acquire(Continuation {
            result: result.clone(),
            context,
            pins,
        });
        log::trace!("{}: issued id {id}", self.label);
        (id, result)
    }

    /// Deliver the outcome for `id`, built from the continuation's context.
    ///
    /// Returns false when `id` is not pending, which happens for duplicate
    /// or late callbacks; those are logged and dropped.
    pub fn resolve(&self, id: u64, outcome: impl FnOnce(C) -> Result<T>) -> bool {
        let Some(Continuation {
            result,
            context,
            pins,
        }) = self.pending.release(id)
        else {
            log::warn!("{}: dropping completion for unknown id {id}", self.label);
            return false;
        };

        let outcome = outcome(context);
        drop(pins);
        let delivered = match outcome {
            Ok(value) => result.complete(value),
            Err(error) => result.fail(error),
        };
        if let Err(e) = delivered {
            log::warn!("{}: id {id} completed twice: {e}", self.label);
        }
        true
    }

    /// Fail `id` without waiting for the engine, e.g. when the issuing call
    /// itself raised.
    pub fn abandon(&self, id: u64, error: BridgeError) -> Option<C> {
        let Continuation {
            result,
            context,
            pins,
        } = self.pending.release(id)?;
        log::debug!("{}: abandoning id {id}: {error}", self.label);
        drop(pins);
        if let Err(e) = result.fail(error) {
            log::warn!("{}: abandoned id {id} was already complete: {e}", self.label);
        }
        Some(context)
    }

    pub fn pending(&self) -> usize {
        self.pending.pending()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.is_pending(id)
    }
}
