//! Epoch-based grace periods on top of `crossbeam-epoch`.

use crossbeam_epoch::{self as epoch, Guard};

use super::{Deferred, DeferredReclamation};

/// Grace-period service backed by the global `crossbeam-epoch` collector.
///
/// Read-side sections are epoch pins. Deferred callbacks are pushed to the
/// collector and executed by whichever thread next collects garbage after the
/// global epoch has advanced past every pin active at scheduling time. This
/// means callbacks may run on any thread that pins the collector.
///
/// # Examples
///
/// ```rust
/// use riferimenti::reclaim::{DeferredReclamation, Epoch};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let done = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&done);
/// Epoch.after_quiescence(Box::new(move || flag.store(true, Ordering::Release)));
///
/// while !done.load(Ordering::Acquire) {
///     Epoch.flush();
/// }
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct Epoch;

impl DeferredReclamation for Epoch {
    type Guard = Guard;

    #[inline]
    fn pin(&self) -> Guard {
        epoch::pin()
    }

    fn after_quiescence(&self, callback: Deferred) {
        let guard = epoch::pin();
        guard.defer(callback);
        // hand the local bag to the global queue so other threads can run it
        guard.flush();
    }

    fn flush(&self) {
        epoch::pin().flush();
    }
}
