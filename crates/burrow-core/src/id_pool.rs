//! Connection-id allocation
//!
//! Small integer ids in `[1, capacity]` are handed out to external
//! connections and recycled on teardown. Allocation is lock-free: a
//! rotating cursor picks candidate slots and an atomic
//! free -> allocated compare-exchange claims one. After roughly three
//! full sweeps without a free slot the pool reports exhaustion rather
//! than spinning forever.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use burrow_proto::ConnId;

/// Lock-free allocator for connection identifiers.
///
/// Slot index equals the identifier; index 0 exists but is never
/// allocated, so id 0 stays the "invalid" sentinel.
pub struct ConnIdPool {
    slots: Box<[AtomicBool]>,
    cursor: AtomicUsize,
    capacity: usize,
    step: usize,
}

impl ConnIdPool {
    pub fn new(capacity: usize) -> Self {
        Self::with_step(capacity, 1)
    }

    pub fn with_step(capacity: usize, step: usize) -> Self {
        assert!(capacity >= 1 && capacity <= ConnId::MAX as usize);
        assert!(step >= 1);
        let slots = (0..=capacity).map(|_| AtomicBool::new(false)).collect();
        Self {
            slots,
            cursor: AtomicUsize::new(0),
            capacity,
            step,
        }
    }

    /// Claim a free identifier, or `None` when the pool is exhausted.
    ///
    /// `None` means every id is currently held, not a transient race;
    /// callers retry with their own backoff.
    pub fn allocate(&self) -> Option<ConnId> {
        let max_attempts = self.capacity.saturating_mul(3);
        for _ in 0..max_attempts {
            let raw = self.cursor.fetch_add(self.step, Ordering::Relaxed);
            let id = raw % self.capacity + 1;
            if self.slots[id]
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(id as ConnId);
            }
        }
        None
    }

    /// Return an identifier to the pool.
    ///
    /// Releasing a free or out-of-range id is a no-op; a double
    /// release must never disturb another slot.
    pub fn release(&self, id: ConnId) {
        let id = id as usize;
        if id == 0 || id > self.capacity {
            return;
        }
        let _ = self.slots[id].compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed);
    }

    /// Whether the identifier is currently owned by a connection.
    pub fn is_allocated(&self, id: ConnId) -> bool {
        let id = id as usize;
        id >= 1 && id <= self.capacity && self.slots[id].load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_allocate_and_release() {
        let pool = ConnIdPool::new(8);
        let id = pool.allocate().unwrap();
        assert!(pool.is_allocated(id));

        pool.release(id);
        assert!(!pool.is_allocated(id));
    }

    #[test]
    fn test_all_ids_unique_until_exhaustion() {
        let pool = ConnIdPool::new(16);
        let mut held = HashSet::new();
        for _ in 0..16 {
            let id = pool.allocate().unwrap();
            assert!(held.insert(id), "id {id} handed out twice");
            assert!((1..=16).contains(&id));
        }
        assert_eq!(pool.allocate(), None);
    }

    #[test]
    fn test_released_id_is_reusable() {
        let pool = ConnIdPool::new(4);
        let ids: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.allocate(), None);

        pool.release(ids[2]);
        assert_eq!(pool.allocate(), Some(ids[2]));
    }

    #[test]
    fn test_double_release_is_noop() {
        let pool = ConnIdPool::new(4);
        let id = pool.allocate().unwrap();
        pool.release(id);
        pool.release(id);

        // The slot is free exactly once: the id can be claimed again,
        // and no other slot was disturbed.
        assert_eq!(pool.allocate(), Some(id));
        for other in 1..=4 {
            assert_eq!(pool.is_allocated(other), other == id);
        }
    }

    #[test]
    fn test_release_out_of_range_is_noop() {
        let pool = ConnIdPool::new(4);
        pool.release(0);
        pool.release(5);
        pool.release(ConnId::MAX);
        for id in 1..=4 {
            assert!(!pool.is_allocated(id));
        }
    }

    #[test]
    fn test_concurrent_allocation_no_duplicates() {
        let pool = Arc::new(ConnIdPool::new(128));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                (0..16).map(|_| pool.allocate().unwrap()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {id} allocated concurrently twice");
            }
        }
        assert_eq!(seen.len(), 128);
        assert_eq!(pool.allocate(), None);
    }

    #[test]
    fn test_exhaustion_returns_within_bounded_attempts() {
        let pool = ConnIdPool::new(2);
        pool.allocate().unwrap();
        pool.allocate().unwrap();
        // Must return rather than spin.
        assert_eq!(pool.allocate(), None);
    }
}
