//! Serializable snapshots of reference state.
//!
//! # Feature Flag
//!
//! This module requires the `serde` feature; JSON rendering additionally
//! requires `json`:
//!
//! ```toml
//! [dependencies]
//! riferimenti = { version = "0.1", features = ["json"] }
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use riferimenti::percpu::{InitFlags, PercpuRef};
//!
//! let r = PercpuRef::builder().with_name("device").build(|| {})?;
//! r.get();
//!
//! let snapshot = r.snapshot();
//! println!("{}", snapshot.to_json()?);
//! // {"name":"device","mode":"percpu","count":2,"shards":8}
//! ```

use serde::{Deserialize, Serialize};

use crate::percpu::{PercpuRef, RefMode};
use crate::reclaim::DeferredReclamation;

/// A point-in-time view of a [`PercpuRef`].
///
/// `count` is materialized the same way as [`PercpuRef::count`]: exact when
/// nothing is in flight, an estimate otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefSnapshot {
    /// The diagnostic name of the reference.
    pub name: String,
    /// The mode at the time of the snapshot.
    pub mode: RefMode,
    /// The live reference count.
    pub count: i64,
    /// Number of per-unit slots.
    pub shards: usize,
}

impl RefSnapshot {
    /// Captures the state of `r`.
    pub fn from_ref<R: DeferredReclamation>(r: &PercpuRef<R>) -> Self {
        Self {
            name: if r.name().is_empty() {
                "(unnamed)".to_string()
            } else {
                r.name().to_string()
            },
            mode: r.mode(),
            count: r.count(),
            shards: r.shards(),
        }
    }

    /// Serializes the snapshot as compact JSON.
    #[cfg(feature = "json")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Serializes the snapshot as pretty-printed JSON.
    #[cfg(feature = "json")]
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl<R: DeferredReclamation> PercpuRef<R> {
    /// Captures a serializable snapshot of this reference.
    pub fn snapshot(&self) -> RefSnapshot {
        RefSnapshot::from_ref(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::percpu::InitFlags;
    use crate::reclaim::Manual;

    #[test]
    fn test_snapshot_percpu() {
        let r = PercpuRef::builder()
            .with_name("dev")
            .with_shards(2)
            .build(|| {})
            .unwrap();
        r.get();
        let snapshot = r.snapshot();
        assert_eq!(
            snapshot,
            RefSnapshot {
                name: "dev".to_string(),
                mode: RefMode::Percpu,
                count: 2,
                shards: 2,
            }
        );
    }

    #[test]
    fn test_snapshot_unnamed_dead() {
        let manual = Manual::new();
        let r = PercpuRef::builder()
            .with_flags(InitFlags::START_DEAD)
            .with_shards(1)
            .with_reclaimer(manual)
            .build(|| {})
            .unwrap();
        let snapshot = r.snapshot();
        assert_eq!(snapshot.name, "(unnamed)");
        assert_eq!(snapshot.mode, RefMode::Dead);
        assert_eq!(snapshot.count, 0);
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_to_json() {
        let r = PercpuRef::builder()
            .with_name("dev")
            .with_flags(InitFlags::START_ATOMIC)
            .with_shards(4)
            .build(|| {})
            .unwrap();
        assert_eq!(
            r.snapshot().to_json().unwrap(),
            r#"{"name":"dev","mode":"atomic","count":1,"shards":4}"#
        );
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_round_trip_mode() {
        let json = r#"{"name":"x","mode":"dead","count":0,"shards":1}"#;
        let snapshot: RefSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.mode, RefMode::Dead);
        assert!(snapshot.to_json_pretty().unwrap().contains("\"dead\""));
    }
}
