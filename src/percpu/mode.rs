//! The mode word shared by the fast paths and the administrative calls.
//!
//! A single byte holds two flags:
//!
//! - `ATOMIC`: the global count is the active representation
//! - `DEAD`: the reference has been killed
//!
//! Readers load the word once with `Acquire` and classify it into a
//! [`Mode`]. Any set flag routes the caller to the global count, so setting
//! `DEAD` alone already diverts new operations away from the shards. Writers
//! update the word with release RMWs.

use std::sync::atomic::{AtomicU8, Ordering};

use bitflags::bitflags;

use super::shards::Shards;

bitflags! {
    /// Flags stored in the mode word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct ModeFlags: u8 {
        const ATOMIC = 1 << 0;
        const DEAD = 1 << 1;
    }
}

/// The representation an operation must target, as observed by one load.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Mode<'a> {
    /// Per-unit slots are live.
    Sharded(&'a Shards),
    /// The global count is live.
    Global,
}

/// Atomic mode word.
#[derive(Debug)]
pub(crate) struct ModeState(AtomicU8);

impl ModeState {
    pub(crate) const fn new(flags: ModeFlags) -> Self {
        Self(AtomicU8::new(flags.bits()))
    }

    /// Acquire load of the flags.
    #[inline]
    pub(crate) fn load(&self) -> ModeFlags {
        ModeFlags::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    /// Loads the word and classifies it.
    #[inline]
    pub(crate) fn classify<'a>(&self, shards: &'a Shards) -> Mode<'a> {
        if self.load().is_empty() {
            Mode::Sharded(shards)
        } else {
            Mode::Global
        }
    }

    /// Sets `flags`, returning the previous value.
    #[inline]
    pub(crate) fn insert(&self, flags: ModeFlags) -> ModeFlags {
        ModeFlags::from_bits_truncate(self.0.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    /// Clears `flags`, returning the previous value.
    ///
    /// Everything written before this call (e.g. zeroed slots) is visible to
    /// any reader that observes the cleared flag.
    #[inline]
    pub(crate) fn remove(&self, flags: ModeFlags) -> ModeFlags {
        ModeFlags::from_bits_truncate(self.0.fetch_and(!flags.bits(), Ordering::AcqRel))
    }
}
