//! # Riferimenti - Hybrid Per-CPU Reference Counters
//!
//! A Rust library providing reference counts that are as cheap as a sharded
//! counter while an object is live, and as exact as a single atomic when the
//! object is torn down. It implements the **percpu reference** pattern: a
//! reference lives in per-thread slots and is switched to a single atomic
//! count only when someone needs to know when it reaches zero.
//!
//! ## The Problem
//!
//! An object shared by many threads (a device, a queue, a mount) is usually
//! kept alive with an atomic reference count. Every `get` and `put` then
//! writes the same cache line, which bounces between cores exactly like a
//! naive shared counter. A sharded counter removes the contention but has no
//! exact value: nobody can tell the moment the count reaches zero.
//!
//! ## The Solution: Switch Representation at Shutdown
//!
//! A [`PercpuRef`](percpu::PercpuRef) keeps both representations:
//!
//! 1. **Percpu mode**: each thread updates its own cache-padded slot, like a
//!    sharded statistics counter. No zero detection is possible, and none
//!    is needed while the owner still holds its initial reference.
//!
//! 2. **Atomic mode**: one atomic integer holds the exact count, and the put
//!    that brings it to zero runs the release callback.
//!
//! 3. **Kill**: the owner marks the reference dead, flips it to atomic mode
//!    and drops the initial reference. Once a grace period has elapsed (see
//!    [`reclaim`]), no thread can still be writing a slot, and the slots are
//!    folded into the atomic count. From then on the last `put` releases the
//!    object, exactly once.
//!
//! ```text
//!   init ──► percpu ──kill──► dead/switching ──grace period──► dead/atomic
//!               ▲                                                  │
//!               └──────────────── reinit / resurrect ──────────────┘
//! ```
//!
//! ## Available Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `get`, `get_many` | Take references (caller already holds one) |
//! | `put`, `put_many` | Drop references, releasing on the last one after a kill |
//! | `tryget`, `tryget_many` | Take a reference unless the count is zero |
//! | `tryget_live`, `tryget_live_many` | Take a reference unless the object is dying |
//! | `kill`, `kill_and_confirm` | Drop the initial reference and arm zero detection |
//! | `switch_to_atomic`, `switch_to_atomic_sync`, `switch_to_percpu` | Change representation |
//! | `reinit`, `resurrect` | Bring a dead reference back to life |
//! | `is_zero`, `count`, `mode` | Introspection, not for hot paths |
//!
//! ## Quick Start
//!
//! ```rust
//! use riferimenti::percpu::{InitFlags, PercpuRef};
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! let released = Arc::new(AtomicBool::new(false));
//! let flag = Arc::clone(&released);
//!
//! let device = Arc::new(PercpuRef::init(
//!     move || flag.store(true, Ordering::Release),
//!     InitFlags::empty(),
//! )?);
//!
//! // Hot path: lock-free, contention-free
//! device.get();
//! device.put();
//!
//! // Shutdown: waits for a grace period before trusting the count
//! device.switch_to_atomic_sync();
//! device.kill();
//! assert!(released.load(Ordering::Acquire));
//! # Ok::<(), riferimenti::RefError>(())
//! ```
//!
//! ## Grace Periods
//!
//! The switch to atomic mode is gated by a [`DeferredReclamation`]
//! service. The default, [`reclaim::Epoch`], runs on the global
//! `crossbeam-epoch` collector. [`reclaim::Manual`] lets a host with a small
//! set of workers declare quiescence itself.
//!
//! ## Thread Safety
//!
//! `PercpuRef` is `Send + Sync` and can be shared across threads by
//! reference or through an `Arc`. The fast paths never block; administrative
//! calls are serialized per reference.
//!
//! ## Memory Usage
//!
//! Each reference uses one cache line per execution unit for its slots
//! (64 bytes × `available_parallelism()` by default, configurable with
//! [`Builder::with_shards`](percpu::Builder::with_shards)).
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | Enables [`snapshot`] with serializable reference snapshots |
//! | `json` | JSON rendering of snapshots via `serde_json` |
//! | `demo` | Builds the demo binary |

pub mod error;
pub mod percpu;
pub mod reclaim;

#[cfg(feature = "serde")]
pub mod snapshot;

pub use error::{RefError, Result};
pub use reclaim::DeferredReclamation;
