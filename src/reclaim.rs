//! Grace-period services used to gate representation switches.
//!
//! A [`PercpuRef`](crate::percpu::PercpuRef) never trusts its sharded slots
//! right after flipping to atomic mode: a `get` or `put` that loaded the old
//! mode may still be about to write to a slot. The reference therefore asks a
//! [`DeferredReclamation`] service to run the reconciliation only after every
//! execution context that could have observed the old mode has passed a
//! quiescent point.
//!
//! Every fast-path operation runs inside a read-side section obtained with
//! [`DeferredReclamation::pin`]. The service guarantees that a callback
//! handed to [`after_quiescence`](DeferredReclamation::after_quiescence)
//! runs only after all sections active at the time of the call have ended.
//!
//! # Available Services
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Epoch`] | Epoch-based reclamation on the global `crossbeam-epoch` collector (default) |
//! | [`Manual`] | Explicit barrier: callbacks run when the host calls [`Manual::quiesce`] |

mod epoch;
mod manual;

pub use epoch::Epoch;
pub use manual::Manual;

/// Callback scheduled to run after a grace period.
pub type Deferred = Box<dyn FnOnce() + Send + 'static>;

/// A deferred-reclamation (grace period) service.
///
/// Implementations must make sure that a callback passed to
/// `after_quiescence` runs exactly once, and never while a guard returned by
/// `pin` before the call is still alive.
pub trait DeferredReclamation: Send + Sync + 'static {
    /// Guard marking a read-side section. Dropping it leaves the section.
    type Guard;

    /// Enters a read-side section.
    fn pin(&self) -> Self::Guard;

    /// Schedules `callback` to run once a full grace period has elapsed.
    fn after_quiescence(&self, callback: Deferred);

    /// Tries to make progress on pending callbacks.
    ///
    /// Called in a loop by synchronous waiters. Services that cannot advance
    /// on their own may leave this empty.
    fn flush(&self) {}
}
