//! Single-slot pass gate
//!
//! At most one reconciliation pass runs at a time. The gate is a
//! non-blocking busy flag: a trigger that finds it held is a no-op rather
//! than a queued run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Non-blocking mutual exclusion for sync passes.
#[derive(Debug, Default)]
pub struct SyncGate {
    busy: AtomicBool,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim the single slot. Returns `None` when a pass is already
    /// running. The returned permit releases the slot on drop, including
    /// when the pass panics.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SyncPermit> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(SyncPermit {
                gate: Arc::clone(self),
            })
        } else {
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held while a pass runs; dropping it frees the slot.
#[derive(Debug)]
pub struct SyncPermit {
    gate: Arc<SyncGate>,
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let gate = Arc::new(SyncGate::new());

        let permit = gate.try_acquire().expect("gate starts free");
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());

        drop(permit);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn permit_releases_even_on_panic() {
        let gate = Arc::new(SyncGate::new());

        let inner = Arc::clone(&gate);
        let result = std::panic::catch_unwind(move || {
            let _permit = inner.try_acquire().expect("gate starts free");
            panic!("pass blew up");
        });
        assert!(result.is_err());
        assert!(!gate.is_busy());
    }
}
