//! Construction, shutdown and revival of a [`PercpuRef`].

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use crossbeam_utils::CachePadded;

use super::mode::{ModeFlags, ModeState};
use super::shards::{default_shards, Shards};
use super::{ConfirmFn, PercpuRef, RefData, PERCPU_COUNT_BIAS};
use crate::error::Result;
use crate::reclaim::{DeferredReclamation, Epoch};

bitflags! {
    /// Flags accepted at construction time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InitFlags: u8 {
        /// Start with one holder in atomic mode. The reference stays atomic
        /// until [`PercpuRef::switch_to_percpu`] is called. Implies
        /// `ALLOW_REINIT`.
        const START_ATOMIC = 1 << 0;
        /// Start dead with zero holders. The reference must be revived with
        /// [`PercpuRef::reinit`] before use. Implies `START_ATOMIC` and
        /// `ALLOW_REINIT`.
        const START_DEAD = 1 << 1;
        /// Allow switching back to percpu mode after a switch to atomic
        /// mode, and reviving the reference after it is killed.
        const ALLOW_REINIT = 1 << 2;
    }
}

/// Builder for a [`PercpuRef`].
///
/// # Examples
///
/// ```rust
/// use riferimenti::percpu::{InitFlags, PercpuRef};
/// use riferimenti::reclaim::Manual;
///
/// let manual = Manual::new();
/// let r = PercpuRef::builder()
///     .with_name("device")
///     .with_flags(InitFlags::ALLOW_REINIT)
///     .with_shards(8)
///     .with_reclaimer(manual.clone())
///     .build(|| println!("device released"))?;
///
/// assert_eq!(r.name(), "device");
/// assert_eq!(r.shards(), 8);
/// assert!(r.is_percpu());
/// # Ok::<(), riferimenti::RefError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Builder<R = Epoch> {
    name: &'static str,
    flags: InitFlags,
    shards: Option<usize>,
    reclaim: R,
}

impl Builder<Epoch> {
    /// Creates a builder with no flags, one shard per execution unit, and
    /// epoch-based grace periods.
    pub const fn new() -> Self {
        Builder {
            name: "",
            flags: InitFlags::empty(),
            shards: None,
            reclaim: Epoch,
        }
    }
}

impl Default for Builder<Epoch> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: DeferredReclamation> Builder<R> {
    /// Sets the name used in diagnostics.
    pub fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Sets the construction flags.
    pub fn with_flags(self, flags: InitFlags) -> Self {
        Self { flags, ..self }
    }

    /// Sets the number of per-unit slots.
    pub fn with_shards(self, shards: usize) -> Self {
        Self {
            shards: Some(shards),
            ..self
        }
    }

    /// Uses `reclaim` as the grace-period service.
    pub fn with_reclaimer<S: DeferredReclamation>(self, reclaim: S) -> Builder<S> {
        Builder {
            name: self.name,
            flags: self.flags,
            shards: self.shards,
            reclaim,
        }
    }

    /// Allocates the reference. `release` runs each time the count drops to
    /// zero after a kill.
    ///
    /// # Errors
    ///
    /// [`RefError::InvalidShards`](crate::RefError::InvalidShards) if zero
    /// shards were requested, and
    /// [`RefError::OutOfMemory`](crate::RefError::OutOfMemory) if the slots
    /// cannot be allocated.
    pub fn build<F>(self, release: F) -> Result<PercpuRef<R>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shards = Shards::try_new(self.shards.unwrap_or_else(default_shards))?;

        let flags = self.flags;
        let force_atomic = flags.contains(InitFlags::START_ATOMIC);
        let mut allow_reinit = flags.contains(InitFlags::ALLOW_REINIT);

        let mut mode = ModeFlags::empty();
        let mut start_count = 0;

        if flags.intersects(InitFlags::START_ATOMIC | InitFlags::START_DEAD) {
            mode |= ModeFlags::ATOMIC;
            allow_reinit = true;
        } else {
            start_count += PERCPU_COUNT_BIAS;
        }

        if flags.contains(InitFlags::START_DEAD) {
            mode |= ModeFlags::DEAD;
        } else {
            start_count += 1;
        }

        log::trace!(
            "{}: init {:?} with {} shards",
            self.name,
            flags,
            shards.len()
        );

        Ok(PercpuRef {
            data: Arc::new(RefData {
                name: self.name,
                count: CachePadded::new(AtomicI64::new(start_count)),
                state: ModeState::new(mode),
                shards,
                release: Box::new(release),
                force_atomic: AtomicBool::new(force_atomic),
                allow_reinit,
                switching: AtomicBool::new(false),
                admin: spin::Mutex::new(()),
                reclaim: self.reclaim,
            }),
        })
    }
}

impl PercpuRef<Epoch> {
    /// Creates a reference using epoch-based grace periods and one shard
    /// per execution unit.
    ///
    /// # Errors
    ///
    /// Fails if the per-unit slots cannot be allocated.
    pub fn init<F>(release: F, flags: InitFlags) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Builder::new().with_flags(flags).build(release)
    }

    /// Returns a [`Builder`] with default settings.
    pub const fn builder() -> Builder<Epoch> {
        Builder::new()
    }
}

impl<R: DeferredReclamation> PercpuRef<R> {
    /// Kills the reference: marks it dead, switches it to atomic mode and
    /// drops the initial reference.
    ///
    /// Once every other holder has called `put`, the release callback runs.
    /// In percpu mode that happens no earlier than the end of the switch's
    /// grace period.
    ///
    /// Must be called exactly once per lifetime (until a later
    /// [`reinit`](PercpuRef::reinit) or [`resurrect`](PercpuRef::resurrect)).
    pub fn kill(&self) {
        self.kill_inner(None);
    }

    /// Like [`kill`](PercpuRef::kill), and runs `confirm_kill` once every
    /// thread is guaranteed to see the reference as dead.
    ///
    /// After `confirm_kill` runs, [`tryget_live`](PercpuRef::tryget_live)
    /// fails everywhere. Release cannot run before `confirm_kill` has
    /// returned.
    pub fn kill_and_confirm<F>(&self, confirm_kill: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.kill_inner(Some(Box::new(confirm_kill)));
    }

    fn kill_inner(&self, confirm: Option<ConfirmFn>) {
        {
            let _lock = self.data.admin.lock();
            let prev = self.data.state.insert(ModeFlags::DEAD);
            if prev.contains(ModeFlags::DEAD) {
                log::warn!("{}: kill called more than once", self.data.name);
            }
            debug_assert!(
                !prev.contains(ModeFlags::DEAD),
                "kill called more than once"
            );
            RefData::switch_mode_locked(&self.data, confirm);
        }
        self.data.put_many(1);
    }

    /// Revives a dead reference whose count has dropped to zero.
    ///
    /// The caller must guarantee that no holder is left; the reference comes
    /// back with the caller as its single holder, in percpu mode unless it
    /// is forced atomic.
    pub fn reinit(&self) {
        let zero = self.is_zero();
        if !zero {
            log::warn!("{}: reinit with live references", self.data.name);
        }
        debug_assert!(zero, "reinit with live references");
        self.resurrect();
    }

    /// Revives a dead reference that may still have holders.
    ///
    /// Takes one reference for the caller with an atomic add, which is exact
    /// in atomic mode even if stray puts are still landing, then re-applies
    /// the mode policy.
    pub fn resurrect(&self) {
        let _lock = self.data.admin.lock();
        let flags = self.data.state.load();
        if !flags.contains(ModeFlags::DEAD) {
            log::warn!("{}: resurrect on a live reference", self.data.name);
        }
        debug_assert!(
            flags.contains(ModeFlags::DEAD),
            "resurrect on a live reference"
        );

        self.data.state.remove(ModeFlags::DEAD);
        self.data.get_many(1);
        RefData::switch_mode_locked(&self.data, None);
    }

    /// Tears the reference down and frees its slots.
    ///
    /// Called by the last owner once the reference has been released, or was
    /// never used. A switch still waiting for its grace period keeps the
    /// shared state alive until it completes.
    pub fn exit(self) {
        log::trace!("{}: exit", self.data.name);
        drop(self);
    }
}
