//! Transitions between percpu and atomic mode.
//!
//! ```text
//!   percpu ──switch_to_atomic──► switching ──grace period──► atomic
//!     ▲                                                        │
//!     └────────────────────switch_to_percpu────────────────────┘
//!
//!   any ──kill──► dead (atomic) ──reinit / resurrect──► percpu or atomic
//! ```
//!
//! Administrative calls are serialized by a per-reference spin lock. A call
//! made while a previous switch still awaits its grace period first waits
//! for that switch, driving the grace-period service while it spins.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_utils::Backoff;

use super::mode::ModeFlags;
use super::{ConfirmFn, PercpuRef, RefData, PERCPU_COUNT_BIAS};
use crate::reclaim::DeferredReclamation;

impl<R: DeferredReclamation> RefData<R> {
    /// Spins until no switch is waiting for its grace period.
    pub(super) fn wait_switch_done(&self) {
        let backoff = Backoff::new();
        while self.switching.load(Ordering::Acquire) {
            self.reclaim.flush();
            backoff.snooze();
        }
    }

    /// Applies the mode policy. Caller holds the admin lock.
    pub(super) fn switch_mode_locked(this: &Arc<Self>, confirm: Option<ConfirmFn>) {
        this.wait_switch_done();

        let dying = this.state.load().contains(ModeFlags::DEAD);
        if this.force_atomic.load(Ordering::Relaxed) || dying {
            Self::switch_to_atomic_locked(this, confirm);
        } else {
            debug_assert!(confirm.is_none());
            this.switch_to_percpu_locked();
        }
    }

    fn switch_to_atomic_locked(this: &Arc<Self>, confirm: Option<ConfirmFn>) {
        if this.state.load().contains(ModeFlags::ATOMIC) {
            if let Some(confirm) = confirm {
                confirm();
            }
            return;
        }

        this.state.insert(ModeFlags::ATOMIC);
        this.switching.store(true, Ordering::Release);
        log::trace!("{}: switching to atomic", this.name);

        // dropped once the switch is confirmed
        this.get_many(1);

        let data = Arc::clone(this);
        this.reclaim
            .after_quiescence(Box::new(move || data.confirm_switch_to_atomic(confirm)));
    }

    /// Runs after the grace period: no operation can still target the slots.
    fn confirm_switch_to_atomic(&self, confirm: Option<ConfirmFn>) {
        let percpu = self.shards.drain();
        log::debug!(
            "{}: global {} percpu {}",
            self.name,
            self.count.load(Ordering::Relaxed),
            percpu
        );

        let adjust = percpu.wrapping_sub(PERCPU_COUNT_BIAS);
        let count = self
            .count
            .fetch_add(adjust, Ordering::AcqRel)
            .wrapping_add(adjust);
        if count <= 0 {
            log::warn!(
                "{}: percpu ref <= 0 ({}) after switching to atomic",
                self.name,
                count
            );
        }

        if let Some(confirm) = confirm {
            confirm();
        }

        // drop the reference taken by the switch; this may release
        self.put_many(1);
        self.switching.store(false, Ordering::Release);
    }

    fn switch_to_percpu_locked(&self) {
        if !self.state.load().contains(ModeFlags::ATOMIC) {
            return;
        }
        if !self.allow_reinit {
            log::warn!(
                "{}: cannot switch to percpu mode without ALLOW_REINIT",
                self.name
            );
            return;
        }

        let count = self.count.fetch_add(PERCPU_COUNT_BIAS, Ordering::AcqRel);
        if count < 0 {
            log::warn!("{}: negative count ({}) switching to percpu", self.name, count);
        }

        // zeroed slots are published by the release in `remove`
        self.shards.reset();
        self.state.remove(ModeFlags::ATOMIC);
        log::trace!("{}: switched to percpu", self.name);
    }
}

impl<R: DeferredReclamation> PercpuRef<R> {
    /// Switches to atomic mode and keeps the reference there.
    ///
    /// Returns without waiting: operations issued after the call use the
    /// atomic count, but the count only becomes exact once the grace period
    /// has elapsed. The reference stays atomic until
    /// [`switch_to_percpu`](PercpuRef::switch_to_percpu) is called.
    pub fn switch_to_atomic(&self) {
        self.switch_to_atomic_inner(None);
    }

    /// Like [`switch_to_atomic`](PercpuRef::switch_to_atomic), and runs
    /// `confirm` once the count is exact.
    ///
    /// If the reference is already in atomic mode, `confirm` runs right away.
    pub fn switch_to_atomic_and_confirm<F>(&self, confirm: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.switch_to_atomic_inner(Some(Box::new(confirm)));
    }

    /// Switches to atomic mode and waits until the switch is confirmed.
    ///
    /// Must not be called from a release or confirm callback.
    pub fn switch_to_atomic_sync(&self) {
        self.switch_to_atomic_inner(None);
        self.data.wait_switch_done();
    }

    fn switch_to_atomic_inner(&self, confirm: Option<ConfirmFn>) {
        let _lock = self.data.admin.lock();
        self.data.force_atomic.store(true, Ordering::Relaxed);
        RefData::switch_mode_locked(&self.data, confirm);
    }

    /// Switches back to percpu mode.
    ///
    /// Has no effect on a dying reference, which stays atomic until revived,
    /// and on references created without `ALLOW_REINIT` (or `START_ATOMIC`).
    pub fn switch_to_percpu(&self) {
        let _lock = self.data.admin.lock();
        self.data.force_atomic.store(false, Ordering::Relaxed);
        RefData::switch_mode_locked(&self.data, None);
    }
}
