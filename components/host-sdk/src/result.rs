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

//! Single-assignment completion cell for asynchronous foreign operations.
//!
//! An [`AsyncResult`] starts incomplete and moves to exactly one terminal
//! outcome. Consumers can block ([`AsyncResult::get`]), await
//! ([`AsyncResult::wait`]), or register one observer per outcome. Completing
//! twice is a protocol error rather than a silent overwrite: it means either
//! the engine delivered a completion twice or the host misused the result.
//!
//! Observers run on whichever thread completes the result, typically an
//! engine worker thread, so they must stay short. Async hosts should prefer
//! `wait().await`.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::{BridgeError, Outcome, Result};

type SuccessObserver<T> = Box<dyn FnOnce(T) + Send>;
type FailureObserver = Box<dyn FnOnce(BridgeError) + Send>;

enum Slot<F> {
    Empty,
    Waiting(F),
    Fired,
}

impl<F> Slot<F> {
    fn is_set(&self) -> bool {
        !matches!(self, Slot::Empty)
    }
}

struct State<T> {
    outcome: Option<Result<T>>,
    on_success: Slot<SuccessObserver<T>>,
    on_failure: Slot<FailureObserver>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    completed: Condvar,
    notify: Notify,
}

/// Completion cell shared between the issuing host code and the completion
/// entry point. Cloning shares the same cell.
pub struct AsyncResult<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.lock().outcome {
            None => "incomplete",
            Some(Ok(_)) => "success",
            Some(Err(_)) => "failure",
        };
        f.debug_struct("AsyncResult").field("state", &state).finish()
    }
}

impl<T: Clone + Send + 'static> Default for AsyncResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> AsyncResult<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome: None,
                    on_success: Slot::Empty,
                    on_failure: Slot::Empty,
                }),
                completed: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Transition to success with `value`.
    ///
    /// Fails with [`BridgeError::AlreadyCompleted`] if an outcome is already
    /// stored; the stored outcome is left untouched.
    pub fn complete(&self, value: T) -> Result<()> {
        let observer = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return Err(BridgeError::AlreadyCompleted);
            }
            state.outcome = Some(Ok(value.clone()));
            take_waiting(&mut state.on_success)
        };

        self.wake_waiters();
        if let Some(observer) = observer {
            observer(value);
        }
        Ok(())
    }

    /// Transition to failure with `error`.
    pub fn fail(&self, error: BridgeError) -> Result<()> {
        let observer = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return Err(BridgeError::AlreadyCompleted);
            }
            state.outcome = Some(Err(error.clone()));
            take_waiting(&mut state.on_failure)
        };

        self.wake_waiters();
        if let Some(observer) = observer {
            observer(error);
        }
        Ok(())
    }

    /// Block the calling thread until complete, then return the outcome.
    ///
    /// Every caller sees the same outcome.
    pub fn get(&self) -> Result<T> {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            state = self
                .shared
                .completed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Like [`AsyncResult::get`] but gives up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.clone());
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            state = self
                .shared
                .completed
                .wait_timeout(state, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// The outcome if already complete.
    pub fn try_get(&self) -> Option<Result<T>> {
        self.lock().outcome.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.lock().outcome.is_some()
    }

    /// Wait for completion without blocking the executor thread.
    pub async fn wait(&self) -> Result<T> {
        loop {
            let notified = self.shared.notify.notified();
            let mut notified = std::pin::pin!(notified);
            // Register before checking so a completion in between is not missed.
            notified.as_mut().enable();
            if let Some(outcome) = self.try_get() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Register the success observer.
    ///
    /// Fires immediately on the calling thread if the result already
    /// succeeded. Setting it twice is a protocol error.
    pub fn on_success(&self, observer: impl FnOnce(T) + Send + 'static) -> Result<()> {
        let ready = {
            let mut state = self.lock();
            if state.on_success.is_set() {
                return Err(BridgeError::ObserverAlreadySet {
                    outcome: Outcome::Success,
                });
            }
            let value = match &state.outcome {
                Some(Ok(value)) => value.clone(),
                _ => {
                    state.on_success = Slot::Waiting(Box::new(observer));
                    return Ok(());
                }
            };
            state.on_success = Slot::Fired;
            Some(value)
        };

        if let Some(value) = ready {
            observer(value);
        }
        Ok(())
    }

    /// Register the failure observer. Mirrors [`AsyncResult::on_success`].
    pub fn on_failure(&self, observer: impl FnOnce(BridgeError) + Send + 'static) -> Result<()> {
        let ready = {
            let mut state = self.lock();
            if state.on_failure.is_set() {
                return Err(BridgeError::ObserverAlreadySet {
                    outcome: Outcome::Failure,
                });
            }
            let error = match &state.outcome {
                Some(Err(error)) => error.clone(),
                _ => {
                    state.on_failure = Slot::Waiting(Box::new(observer));
                    return Ok(());
                }
            };
            state.on_failure = Slot::Fired;
            Some(error)
        };

        if let Some(error) = ready {
            observer(error);
        }
        Ok(())
    }

    fn wake_waiters(&self) {
        self.shared.completed.notify_all();
        self.shared.notify.notify_waiters();
    }
}

impl<T> AsyncResult<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn take_waiting<F>(slot: &mut Slot<F>) -> Option<F> {
    match std::mem::replace(slot, Slot::Empty) {
        Slot::Waiting(observer) => {
            *slot = Slot::Fired;
            Some(observer)
        }
        other => {
            *slot = other;
            None
        }
    }
}
