//! Host-driven grace periods.

use std::fmt::{self, Debug};
use std::sync::Arc;

use spin::Mutex;

use super::{Deferred, DeferredReclamation};

/// Grace-period service where the host declares quiescence explicitly.
///
/// Suitable when the set of execution units is small and enumerable, e.g. a
/// pool of workers that meet at a barrier between batches. Callbacks queue up
/// until [`quiesce`](Manual::quiesce) is called; the caller of `quiesce`
/// asserts that no `get`/`put` that started before the queued callbacks were
/// scheduled is still running.
///
/// `pin` is free and `flush` does nothing, so a thread waiting synchronously
/// for a switch only makes progress once another thread calls `quiesce`.
///
/// Cloning yields a handle to the same queue.
///
/// # Examples
///
/// ```rust
/// use riferimenti::reclaim::{DeferredReclamation, Manual};
///
/// let manual = Manual::new();
/// manual.after_quiescence(Box::new(|| println!("grace period over")));
/// assert_eq!(manual.pending(), 1);
/// assert_eq!(manual.quiesce(), 1);
/// assert_eq!(manual.pending(), 0);
/// ```
#[derive(Clone, Default)]
pub struct Manual {
    queue: Arc<Mutex<Vec<Deferred>>>,
}

impl Manual {
    /// Creates a service with an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callbacks waiting for the next grace period.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Ends the current grace period, running every queued callback.
    ///
    /// Callbacks scheduled by the callbacks themselves wait for the next
    /// call. Returns the number of callbacks run.
    pub fn quiesce(&self) -> usize {
        let batch = std::mem::take(&mut *self.queue.lock());
        let n = batch.len();
        for callback in batch {
            callback();
        }
        n
    }
}

impl DeferredReclamation for Manual {
    type Guard = ();

    #[inline]
    fn pin(&self) {}

    fn after_quiescence(&self, callback: Deferred) {
        self.queue.lock().push(callback);
    }
}

impl Debug for Manual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manual")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_quiesce_runs_in_order() {
        let manual = Manual::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            manual.after_quiescence(Box::new(move || order.lock().push(i)));
        }
        assert_eq!(manual.quiesce(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_nested_schedule_waits_next_period() {
        let manual = Manual::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let inner = manual.clone();
        let r = Arc::clone(&runs);
        manual.after_quiescence(Box::new(move || {
            r.fetch_add(1, Ordering::Relaxed);
            let r = Arc::clone(&r);
            inner.after_quiescence(Box::new(move || {
                r.fetch_add(10, Ordering::Relaxed);
            }));
        }));

        assert_eq!(manual.quiesce(), 1);
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert_eq!(manual.pending(), 1);
        assert_eq!(manual.quiesce(), 1);
        assert_eq!(runs.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn test_debug() {
        let manual = Manual::new();
        manual.after_quiescence(Box::new(|| {}));
        assert_eq!(format!("{:?}", manual), "Manual { pending: 1 }");
    }
}
