//! Admission gate. Bounded capacity for concurrent builds with typed
//! rejection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    SemaphoreFull,
    CircuitOpen,
}

impl RejectReason {
    pub fn label(self) -> &'static str {
        match self {
            RejectReason::SemaphoreFull => "semaphore_full",
            RejectReason::CircuitOpen => "circuit_open",
        }
    }
}

/// An outstanding unit of concurrent-build capacity. Releases on drop.
pub struct AdmissionTicket {
    _permit: OwnedSemaphorePermit,
}

pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    rejected_semaphore_full: AtomicU64,
    rejected_circuit_open: AtomicU64,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            rejected_semaphore_full: AtomicU64::new(0),
            rejected_circuit_open: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Non-blocking acquire.
    pub fn try_acquire(&self) -> Result<AdmissionTicket, RejectReason> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                info!(in_use = self.in_use(), capacity = self.capacity, "admission granted");
                Ok(AdmissionTicket { _permit: permit })
            }
            Err(_) => {
                self.rejected_semaphore_full.fetch_add(1, Ordering::Relaxed);
                info!(capacity = self.capacity, "admission rejected: semaphore full");
                Err(RejectReason::SemaphoreFull)
            }
        }
    }

    pub fn record_rejection(&self, reason: RejectReason) {
        match reason {
            RejectReason::SemaphoreFull => self.rejected_semaphore_full.fetch_add(1, Ordering::Relaxed),
            RejectReason::CircuitOpen => self.rejected_circuit_open.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn rejected_count(&self, reason: RejectReason) -> u64 {
        match reason {
            RejectReason::SemaphoreFull => self.rejected_semaphore_full.load(Ordering::Relaxed),
            RejectReason::CircuitOpen => self.rejected_circuit_open.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_up_to_capacity_then_rejects() {
        let gate = AdmissionGate::new(1);
        let first = gate.try_acquire().expect("first should succeed");
        assert_eq!(gate.in_use(), 1);
        let second = gate.try_acquire();
        assert_eq!(second.err(), Some(RejectReason::SemaphoreFull));
        drop(first);
        assert_eq!(gate.in_use(), 0);
        assert!(gate.try_acquire().is_ok());
    }

    #[test]
    fn tracks_rejection_counts() {
        let gate = AdmissionGate::new(0);
        assert!(gate.try_acquire().is_err());
        assert_eq!(gate.rejected_count(RejectReason::SemaphoreFull), 1);
    }
}
