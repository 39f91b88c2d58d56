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

//! Reference vendors: id-keyed tables that stand in for passing host objects
//! across the boundary.
//!
//! The engine only ever sees a `u64` correlation id. The table is the single
//! source of truth for whether the object behind an id is still pending:
//! retrieving an id removes it, so each id resolves at most once, and a
//! second release of the same id quietly yields `None`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

struct Table<T> {
    next_id: u64,
    entries: HashMap<u64, T>,
}

impl<T> Table<T> {
    fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, value: T) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, value);
        id
    }
}

fn lock<T>(table: &Mutex<Table<T>>) -> MutexGuard<'_, Table<T>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Vendor that keeps its payloads alive until released.
pub struct StrongReferenceVendor<T> {
    label: &'static str,
    table: Mutex<Table<T>>,
}

impl<T> StrongReferenceVendor<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            table: Mutex::new(Table::new()),
        }
    }

    /// Store `payload` and return its id. Ids are never reused.
    pub fn acquire(&self, payload: T) -> u64 {
        lock(&self.table).insert(payload)
    }

    /// Remove and return the payload for `id`.
    ///
    /// Returns `None` if the id was already released or never issued.
    pub fn release(&self, id: u64) -> Option<T> {
        lock(&self.table).entries.remove(&id)
    }

    /// Number of ids still waiting to be released.
    pub fn pending(&self) -> usize {
        lock(&self.table).entries.len()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        lock(&self.table).entries.contains_key(&id)
    }
}

impl<T> Drop for StrongReferenceVendor<T> {
    fn drop(&mut self) {
        let table = self
            .table
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !table.entries.is_empty() {
            log::warn!(
                "{} dropped with {} orphaned id(s); the engine never called back for them",
                self.label,
                table.entries.len()
            );
        }
    }
}

/// Vendor that does not keep its payloads alive.
///
/// Only for objects some other owner already keeps alive for the duration of
/// the foreign operation.
pub struct WeakReferenceVendor<T> {
    table: Mutex<Table<Weak<T>>>,
}

impl<T> Default for WeakReferenceVendor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WeakReferenceVendor<T> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::new()),
        }
    }

    pub fn acquire(&self, payload: &Arc<T>) -> u64 {
        lock(&self.table).insert(Arc::downgrade(payload))
    }

    /// Remove the entry for `id` and upgrade it.
    ///
    /// `None` if already released or if the payload has since been dropped.
    pub fn release(&self, id: u64) -> Option<Arc<T>> {
        lock(&self.table).entries.remove(&id)?.upgrade()
    }

    pub fn pending(&self) -> usize {
        lock(&self.table).entries.len()
    }
}

impl<T> Default for StrongReferenceVendor<T> {
    fn default() -> Self {
        Self::new("reference vendor")
    }
}
