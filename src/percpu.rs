//! Hybrid per-CPU reference counts.
//!
//! A [`PercpuRef`] counts references in one of two representations:
//!
//! - **percpu mode**: every thread adds to and subtracts from its own
//!   cache-padded slot. Gets and puts never touch a shared cache line, but
//!   the true count is only known as the sum of all slots.
//! - **atomic mode**: a single atomic integer holds the exact count, and the
//!   `put` that brings it to zero runs the release callback.
//!
//! A reference normally lives in percpu mode and is switched to atomic mode
//! only when it is about to be torn down ([`kill`](PercpuRef::kill)) or when
//! its owner asks for exact counting
//! ([`switch_to_atomic`](PercpuRef::switch_to_atomic)).
//!
//! # Architecture
//!
//! ```text
//!                 get / put / tryget
//!                         │
//!                         ▼
//!          pin grace-period domain, load mode word
//!                         │
//!            ┌────────────┴────────────┐
//!            ▼                         ▼
//!      Mode::Sharded              Mode::Global
//!   add to own slot (relaxed)   fetch_add / fetch_sub on count
//!                                      │
//!                                      ▼
//!                              hit zero → release()
//! ```
//!
//! Switching from percpu to atomic mode is a two step affair:
//!
//! 1. The `ATOMIC` flag is set. Operations that load the mode word after
//!    this point use the atomic count.
//! 2. After a grace period (see [`reclaim`](crate::reclaim)) no operation can
//!    still be writing a slot, so the slots are drained into the atomic
//!    count and the confirm callback runs.
//!
//! While in percpu mode, the atomic count carries a large bias
//! (`PERCPU_COUNT_BIAS`). Puts that land on the atomic count between step 1
//! and step 2 therefore can never bring it to zero; the bias is removed
//! when the slots are folded in.
//!
//! # Count Range
//!
//! Counts are `i64`. The bias is `2^62`, and the number of live references
//! must stay below [`MAX_COUNT`] (`2^61 - 1`) so that biased and unbiased
//! values never overlap.
//!
//! # Examples
//!
//! ```rust
//! use riferimenti::percpu::{InitFlags, PercpuRef};
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! let released = Arc::new(AtomicBool::new(false));
//! let flag = Arc::clone(&released);
//!
//! let r = PercpuRef::init(move || flag.store(true, Ordering::Release), InitFlags::START_ATOMIC)?;
//!
//! r.get();
//! r.kill(); // drops the initial reference
//! assert!(!released.load(Ordering::Acquire));
//!
//! r.put(); // last holder
//! assert!(released.load(Ordering::Acquire));
//! assert!(r.is_zero());
//! r.exit();
//! # Ok::<(), riferimenti::RefError>(())
//! ```

mod lifecycle;
mod mode;
mod shards;
mod switch;

#[cfg(test)]
mod scenarios;

pub use lifecycle::{Builder, InitFlags};

use std::fmt::{self, Debug, Display};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::reclaim::{DeferredReclamation, Epoch};
use mode::{Mode, ModeFlags, ModeState};
use shards::Shards;

/// Bias added to the atomic count while percpu mode is active.
pub(crate) const PERCPU_COUNT_BIAS: i64 = 1 << 62;

/// Largest number of live references a [`PercpuRef`] can track.
pub const MAX_COUNT: i64 = (1 << 61) - 1;

/// Callback run when the last reference is dropped.
pub(crate) type ReleaseFn = Box<dyn Fn() + Send + Sync + 'static>;

/// Callback run once a mode switch has been confirmed.
pub(crate) type ConfirmFn = Box<dyn FnOnce() + Send + 'static>;

/// Externally visible state of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RefMode {
    /// Per-unit slots are live.
    Percpu,
    /// The atomic count is live.
    Atomic,
    /// The reference has been killed.
    Dead,
}

impl Display for RefMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefMode::Percpu => "percpu",
            RefMode::Atomic => "atomic",
            RefMode::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// State shared between the handle and pending deferred callbacks.
pub(crate) struct RefData<R> {
    name: &'static str,
    count: CachePadded<AtomicI64>,
    state: ModeState,
    shards: Shards,
    release: ReleaseFn,
    force_atomic: AtomicBool,
    allow_reinit: bool,
    /// Set while a switch to atomic mode awaits its grace period.
    switching: AtomicBool,
    admin: spin::Mutex<()>,
    reclaim: R,
}

/// A hybrid per-CPU reference count.
///
/// `PercpuRef` is the owner handle returned by [`PercpuRef::init`] or
/// [`Builder::build`]. It is `Send + Sync` and is shared by reference (or
/// inside an `Arc`) with every holder; [`exit`](PercpuRef::exit) consumes it.
///
/// The reference starts with one holder: the creator. That reference is
/// dropped by [`kill`](PercpuRef::kill).
///
/// # Fast Paths
///
/// [`get`](PercpuRef::get), [`put`](PercpuRef::put),
/// [`tryget`](PercpuRef::tryget) and [`tryget_live`](PercpuRef::tryget_live)
/// are lock-free in both modes: a grace-period pin, one acquire load of the
/// mode word and one atomic RMW.
///
/// # Callbacks
///
/// The release and confirm callbacks may run on any thread driving the
/// grace-period service, possibly inside its read-side section. They must
/// not block waiting for a grace period and must not issue administrative
/// calls on the same reference.
pub struct PercpuRef<R: DeferredReclamation = Epoch> {
    data: Arc<RefData<R>>,
}

#[inline]
fn delta(nr: usize) -> i64 {
    debug_assert!(nr as u64 <= MAX_COUNT as u64, "reference delta {nr} out of range");
    nr as i64
}

impl<R: DeferredReclamation> RefData<R> {
    #[inline]
    fn get_many(&self, nr: i64) {
        let _guard = self.reclaim.pin();
        match self.state.classify(&self.shards) {
            Mode::Sharded(shards) => shards.add(nr),
            Mode::Global => {
                self.count.fetch_add(nr, Ordering::Relaxed);
            }
        }
    }

    #[inline]
    fn put_many(&self, nr: i64) {
        let released = {
            let _guard = self.reclaim.pin();
            match self.state.classify(&self.shards) {
                Mode::Sharded(shards) => {
                    shards.add(nr.wrapping_neg());
                    false
                }
                Mode::Global => {
                    let prev = self.count.fetch_sub(nr, Ordering::AcqRel);
                    debug_assert!(prev >= nr, "{}: put without matching get", self.name);
                    nr != 0 && prev == nr
                }
            }
        };
        if released {
            log::trace!("{}: released", self.name);
            (self.release)();
        }
    }

    #[inline]
    fn tryget_many(&self, nr: i64) -> bool {
        let _guard = self.reclaim.pin();
        match self.state.classify(&self.shards) {
            Mode::Sharded(shards) => {
                shards.add(nr);
                true
            }
            Mode::Global => self.add_not_zero(nr),
        }
    }

    #[inline]
    fn tryget_live_many(&self, nr: i64) -> bool {
        let _guard = self.reclaim.pin();
        let flags = self.state.load();
        if flags.is_empty() {
            self.shards.add(nr);
            true
        } else if flags.contains(ModeFlags::DEAD) {
            false
        } else {
            self.add_not_zero(nr)
        }
    }

    /// Adds `nr` to the atomic count unless it is zero.
    #[inline]
    fn add_not_zero(&self, nr: i64) -> bool {
        self.count
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |c| {
                (c != 0).then(|| c + nr)
            })
            .is_ok()
    }

    /// Live count estimate. Exact only when no operation is in flight.
    fn materialize(&self) -> i64 {
        let _guard = self.reclaim.pin();
        let count = self.count.load(Ordering::Acquire);
        if count > PERCPU_COUNT_BIAS / 2 {
            count
                .wrapping_sub(PERCPU_COUNT_BIAS)
                .wrapping_add(self.shards.sum())
        } else {
            count
        }
    }

    fn mode(&self) -> RefMode {
        let flags = self.state.load();
        if flags.contains(ModeFlags::DEAD) {
            RefMode::Dead
        } else if flags.contains(ModeFlags::ATOMIC) {
            RefMode::Atomic
        } else {
            RefMode::Percpu
        }
    }
}

impl<R: DeferredReclamation> PercpuRef<R> {
    /// Takes a reference.
    ///
    /// The caller must already hold a reference.
    #[inline]
    pub fn get(&self) {
        self.data.get_many(1);
    }

    /// Takes `nr` references.
    #[inline]
    pub fn get_many(&self, nr: usize) {
        self.data.get_many(delta(nr));
    }

    /// Drops a reference, running the release callback if it was the last one.
    #[inline]
    pub fn put(&self) {
        self.data.put_many(1);
    }

    /// Drops `nr` references.
    #[inline]
    pub fn put_many(&self, nr: usize) {
        self.data.put_many(delta(nr));
    }

    /// Tries to take a reference.
    ///
    /// Fails only once the count has reached zero. In percpu mode this always
    /// succeeds: a reference cannot reach zero before it has been killed, and
    /// killing switches it to atomic mode first.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use riferimenti::percpu::{InitFlags, PercpuRef};
    ///
    /// let r = PercpuRef::init(|| {}, InitFlags::START_ATOMIC)?;
    /// assert!(r.tryget());
    /// r.kill();
    /// assert!(r.tryget()); // one holder left, so not zero yet
    /// r.put();
    /// r.put();
    /// assert!(!r.tryget());
    /// # Ok::<(), riferimenti::RefError>(())
    /// ```
    #[inline]
    pub fn tryget(&self) -> bool {
        self.data.tryget_many(1)
    }

    /// Tries to take `nr` references.
    #[inline]
    pub fn tryget_many(&self, nr: usize) -> bool {
        self.data.tryget_many(delta(nr))
    }

    /// Tries to take a reference, failing as soon as the reference is dying.
    ///
    /// A kill that has not been confirmed yet may still let this succeed;
    /// callers needing a hard cutover should wait for the confirm callback
    /// of [`kill_and_confirm`](PercpuRef::kill_and_confirm).
    #[inline]
    pub fn tryget_live(&self) -> bool {
        self.data.tryget_live_many(1)
    }

    /// Tries to take `nr` references, failing once the reference is dying.
    #[inline]
    pub fn tryget_live_many(&self, nr: usize) -> bool {
        self.data.tryget_live_many(delta(nr))
    }

    /// Returns `true` if no references are held.
    ///
    /// This is a point-in-time probe. In percpu mode it sums every slot, so
    /// it is not meant for hot paths. In atomic mode a pending switch keeps
    /// the count biased, so the result is `false` until it is confirmed.
    pub fn is_zero(&self) -> bool {
        let _guard = self.data.reclaim.pin();
        match self.data.state.classify(&self.data.shards) {
            Mode::Sharded(shards) => self
                .data
                .count
                .load(Ordering::Acquire)
                .wrapping_sub(PERCPU_COUNT_BIAS)
                .wrapping_add(shards.sum())
                == 0,
            Mode::Global => self.data.count.load(Ordering::Acquire) == 0,
        }
    }

    /// Returns `true` once the reference has been killed.
    #[inline]
    pub fn is_dying(&self) -> bool {
        self.data.state.load().contains(ModeFlags::DEAD)
    }

    /// Returns `true` while percpu mode is active.
    #[inline]
    pub fn is_percpu(&self) -> bool {
        self.data.state.load().is_empty()
    }

    /// Returns the current mode.
    pub fn mode(&self) -> RefMode {
        self.data.mode()
    }

    /// Returns an estimate of the number of live references.
    ///
    /// Exact when no get, put or switch is in flight.
    pub fn count(&self) -> i64 {
        self.data.materialize()
    }

    /// Returns the name used in diagnostics, or `""`.
    pub fn name(&self) -> &'static str {
        self.data.name
    }

    /// Returns the number of per-unit slots.
    pub fn shards(&self) -> usize {
        self.data.shards.len()
    }
}

impl<R: DeferredReclamation> Debug for PercpuRef<R> {
    /// Formats the reference showing its mode, count and non-zero slots.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{{ {} count={}{:?} }}",
            self.data.name,
            self.data.mode(),
            self.data.materialize(),
            self.data.shards
        )
    }
}

impl<R: DeferredReclamation> Display for PercpuRef<R> {
    /// Formats the reference as `name:count` if named, or just `count`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.data.name.is_empty() {
            write!(f, "{}:{}", self.data.name, self.count())
        } else {
            write!(f, "{}", self.count())
        }
    }
}
