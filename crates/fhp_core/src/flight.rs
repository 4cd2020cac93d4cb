//! Single-flight slot shared by concurrent requesters of one fetch.
//!
//! # Invariants
//! - The fetch runs at most once per slot; every caller that joined the slot
//!   gets a clone of that one outcome, failures included.
//! - The slot lock is never held while the fetch runs.
//! - A fetch that unwinds still lands the slot, so waiters never hang.
//!
//! Owners drop a failed slot from their map once it landed; callers arriving
//! after that open a fresh slot and retry.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::fmt::{Debug, Formatter};

enum Stage<T> {
    Idle,
    Running,
    Landed(CoreResult<T>),
}

pub(crate) struct Flight<T> {
    stage: Mutex<Stage<T>>,
    landed: Condvar,
}

impl<T> Default for Flight<T> {
    fn default() -> Self {
        Self {
            stage: Mutex::new(Stage::Idle),
            landed: Condvar::new(),
        }
    }
}

impl<T: Clone> Flight<T> {
    /// Slot that already holds a successful outcome.
    pub(crate) fn landed(value: T) -> Self {
        Self {
            stage: Mutex::new(Stage::Landed(Ok(value))),
            landed: Condvar::new(),
        }
    }

    /// Successful outcome, if the slot landed with one.
    pub(crate) fn value(&self) -> Option<T> {
        match &*self.stage.lock() {
            Stage::Landed(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub(crate) fn has_failed(&self) -> bool {
        matches!(&*self.stage.lock(), Stage::Landed(Err(_)))
    }

    /// Runs `fetch` unless another caller already did or is doing so, and
    /// returns the shared outcome.
    pub(crate) fn run(&self, fetch: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        {
            let mut stage = self.stage.lock();
            loop {
                if let Stage::Landed(outcome) = &*stage {
                    return outcome.clone();
                }
                if matches!(*stage, Stage::Idle) {
                    break;
                }
                self.landed.wait(&mut stage);
            }
            *stage = Stage::Running;
        }

        let mut landing = Landing {
            flight: self,
            outcome: None,
        };
        let outcome = fetch();
        landing.outcome = Some(outcome.clone());
        outcome
    }
}

impl<T> Debug for Flight<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let stage = match &*self.stage.lock() {
            Stage::Idle => "idle",
            Stage::Running => "running",
            Stage::Landed(Ok(_)) => "ok",
            Stage::Landed(Err(_)) => "failed",
        };
        f.debug_tuple("Flight").field(&stage).finish()
    }
}

/// Publishes the leader's outcome on drop, unwinding included.
struct Landing<'a, T> {
    flight: &'a Flight<T>,
    outcome: Option<CoreResult<T>>,
}

impl<T> Drop for Landing<'_, T> {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or_else(|| {
            Err(CoreError::TransportFailure(
                "fetch aborted before completing".to_string(),
            ))
        });
        *self.flight.stage.lock() = Stage::Landed(outcome);
        self.flight.landed.notify_all();
    }
}
