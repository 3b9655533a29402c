//! Per-unit counter slots used while a reference is in percpu mode.
//!
//! Slots are assigned per thread:
//!
//! 1. A global atomic counter (`NEXT_SLOT_ID`) assigns sequential IDs to threads
//! 2. Each thread stores its assigned ID in thread-local storage
//! 3. The ID modulo the number of shards selects the slot a thread writes to
//! 4. Each slot is cache-line padded to prevent false sharing
//!
//! ```text
//!                          ┌─────────────────────────────────────┐
//!                          │           Shards (percpu)           │
//!                          ├─────────────────────────────────────┤
//!   Thread 0 ──get/put──►  │ [Slot 0] ████████ (CachePadded)     │
//!   Thread 1 ──get/put──►  │ [Slot 1] ████████ (CachePadded)     │
//!        ...               │    ...                              │
//!   Thread N ──get/put──►  │ [Slot N] ████████ (CachePadded)     │
//!                          └─────────────────────────────────────┘
//!                                          │
//!                                          ▼
//!                            drained into the atomic count
//!                            after a grace period
//! ```
//!
//! Individual slots hold deltas, not counts: a thread that drops a reference
//! taken on another thread drives its own slot negative. Only the wrapping
//! sum over all slots is meaningful.
//!
//! Threads are not bound to CPUs and several threads may share a slot, so
//! slot updates are relaxed atomic read-modify-writes.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use atomic_traits::Atomic;
use crossbeam_utils::CachePadded;

use crate::error::{RefError, Result};

/// Number of shards used when the number of execution units is unknown.
pub(crate) const NUM_COMPONENTS: usize = 64;

/// Global counter for assigning slot IDs to threads.
static NEXT_SLOT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Slot ID of the current thread, stable for the thread's lifetime.
    static THREAD_SLOT_ID: usize = next_slot_id();
}

/// Assigns the next slot ID to a thread.
///
/// `Relaxed` is enough: two threads occasionally sharing a slot only adds
/// contention, not incorrectness.
fn next_slot_id() -> usize {
    NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Default number of shards: one per execution unit.
pub(crate) fn default_shards() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(NUM_COMPONENTS)
}

/// Access to the slot owned by the calling thread.
pub(crate) trait LocalShard {
    /// The atomic type used for individual slots.
    type CounterType: Atomic;

    /// Returns the calling thread's slot.
    fn local_shard(&self) -> &Self::CounterType;
}

/// Cache-padded per-unit counter slots.
pub(crate) struct Shards {
    components: Box<[CachePadded<AtomicI64>]>,
}

impl LocalShard for Shards {
    type CounterType = AtomicI64;

    #[inline]
    fn local_shard(&self) -> &AtomicI64 {
        THREAD_SLOT_ID.with(|id| &self.components[*id % self.components.len()])
    }
}

impl Shards {
    /// Allocates `len` zeroed slots, reporting allocation failure.
    pub(crate) fn try_new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(RefError::InvalidShards);
        }
        let mut components = Vec::new();
        components
            .try_reserve_exact(len)
            .map_err(|source| RefError::OutOfMemory {
                shards: len,
                source,
            })?;
        components.extend((0..len).map(|_| CachePadded::new(AtomicI64::new(0))));
        Ok(Self {
            components: components.into_boxed_slice(),
        })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.components.len()
    }

    /// Adds a (possibly negative) delta to the calling thread's slot.
    #[inline]
    pub(crate) fn add(&self, delta: i64) {
        // AtomicI64 arithmetic wraps, which keeps the sum exact
        self.local_shard().fetch_add(delta, Ordering::Relaxed);
    }

    /// Wrapping sum of every slot. Racy unless the slots are quiescent.
    pub(crate) fn sum(&self) -> i64 {
        self.components
            .iter()
            .fold(0i64, |acc, c| acc.wrapping_add(c.load(Ordering::Relaxed)))
    }

    /// Sums every slot and zeroes it.
    pub(crate) fn drain(&self) -> i64 {
        self.components
            .iter()
            .fold(0i64, |acc, c| acc.wrapping_add(c.swap(0, Ordering::Relaxed)))
    }

    /// Zeroes every slot.
    pub(crate) fn reset(&self) {
        for c in self.components.iter() {
            c.store(0, Ordering::Relaxed);
        }
    }
}

impl Debug for Shards {
    /// Formats the non-zero slots as ` [i]:v`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.components.iter().enumerate() {
            let val = c.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_shards_rejected() {
        assert!(matches!(Shards::try_new(0), Err(RefError::InvalidShards)));
    }

    #[test]
    fn test_oversized_allocation_fails() {
        let err = Shards::try_new(usize::MAX).err().unwrap();
        assert!(matches!(err, RefError::OutOfMemory { shards: usize::MAX, .. }));
    }

    #[test]
    fn test_default_shards_nonzero() {
        assert!(default_shards() > 0);
    }

    #[test]
    fn test_local_shard_is_stable() {
        let shards = Shards::try_new(8).unwrap();
        let a = shards.local_shard() as *const AtomicI64;
        let b = shards.local_shard() as *const AtomicI64;
        assert_eq!(a, b);
    }

    #[test]
    fn test_add_and_sum() {
        let shards = Shards::try_new(4).unwrap();
        shards.add(5);
        shards.add(-2);
        assert_eq!(shards.sum(), 3);
    }

    #[test]
    fn test_drain_zeroes() {
        let shards = Shards::try_new(4).unwrap();
        shards.add(7);
        assert_eq!(shards.drain(), 7);
        assert_eq!(shards.sum(), 0);
    }

    #[test]
    fn test_reset() {
        let shards = Shards::try_new(2).unwrap();
        shards.add(-9);
        shards.reset();
        assert_eq!(shards.sum(), 0);
    }

    #[test]
    fn test_cross_thread_deltas_cancel() {
        let shards = Arc::new(Shards::try_new(4).unwrap());

        // take on one thread, drop on another
        let taker = Arc::clone(&shards);
        thread::spawn(move || {
            for _ in 0..1000 {
                taker.add(1);
            }
        })
        .join()
        .unwrap();

        let dropper = Arc::clone(&shards);
        thread::spawn(move || {
            for _ in 0..1000 {
                dropper.add(-1);
            }
        })
        .join()
        .unwrap();

        assert_eq!(shards.sum(), 0);
    }

    #[test]
    fn test_wrapping_sum_is_exact() {
        let shards = Shards::try_new(1).unwrap();
        shards.add(i64::MAX);
        shards.add(2);
        shards.add(-2);
        assert_eq!(shards.sum(), i64::MAX);
    }

    #[test]
    fn test_debug_lists_nonzero() {
        let shards = Shards::try_new(3).unwrap();
        shards.add(4);
        let s = format!("{:?}", shards);
        assert!(s.contains(":4"));
        assert_eq!(s.matches('[').count(), 1);
    }
}
