//! Error type for reference construction.
//!
//! Only [`init`](crate::percpu::PercpuRef::init) and
//! [`Builder::build`](crate::percpu::Builder::build) can fail. Every other
//! operation either succeeds or reports an expected condition through its
//! return value (e.g. `tryget` returning `false` on an object going away).
//!
//! # Example
//!
//! ```rust
//! use riferimenti::percpu::PercpuRef;
//! use riferimenti::{RefError, Result};
//!
//! fn make() -> Result<PercpuRef> {
//!     PercpuRef::builder().with_shards(0).build(|| {})
//! }
//!
//! assert!(matches!(make(), Err(RefError::InvalidShards)));
//! ```

use std::collections::TryReserveError;

use thiserror::Error;

/// Error returned when a reference cannot be constructed.
///
/// An owning subsystem treats this as an ordinary construction failure and
/// abandons the object it was building.
#[derive(Debug, Error)]
pub enum RefError {
    /// The per-unit counter array could not be allocated.
    #[error("out of memory allocating {shards} counter shards")]
    OutOfMemory {
        /// Number of shards requested.
        shards: usize,
        /// Underlying allocation failure.
        #[source]
        source: TryReserveError,
    },

    /// A reference needs at least one shard.
    #[error("shard count must be greater than zero")]
    InvalidShards,
}

/// Result type for reference construction.
pub type Result<T> = std::result::Result<T, RefError>;
