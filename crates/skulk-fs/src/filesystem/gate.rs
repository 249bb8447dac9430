//! Single-permit gate serializing edit transactions.

use std::sync::{Condvar, Mutex};

/// Binary semaphore guarding the editing state.
///
/// Lookups never touch the gate; only `begin_edit` acquires it. The permit is
/// returned when its [`GatePermit`] is dropped, which covers commit, abort,
/// a failed begin and unwinding out of staging alike.
#[derive(Debug, Default)]
pub(crate) struct EditGate {
    held: Mutex<bool>,
    released: Condvar,
}

/// Proof of holding the edit gate. Dropping it releases the gate.
#[must_use]
#[derive(Debug)]
pub(crate) struct GatePermit<'a> {
    gate: &'a EditGate,
}

impl EditGate {
    /// Blocks until the permit is available and takes it.
    pub(crate) fn acquire(&self) -> GatePermit<'_> {
        let mut held = self.held.lock().unwrap_or_else(|err| err.into_inner());
        while *held {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|err| err.into_inner());
        }
        *held = true;
        GatePermit { gate: self }
    }

    /// Takes the permit if it is free.
    pub(crate) fn try_acquire(&self) -> Option<GatePermit<'_>> {
        let mut held = self.held.lock().unwrap_or_else(|err| err.into_inner());
        if *held {
            None
        } else {
            *held = true;
            Some(GatePermit { gate: self })
        }
    }

    pub(crate) fn is_held(&self) -> bool {
        *self.held.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn release(&self) {
        let mut held = self.held.lock().unwrap_or_else(|err| err.into_inner());
        debug_assert!(*held, "edit gate released while not held");
        *held = false;
        self.released.notify_one();
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
