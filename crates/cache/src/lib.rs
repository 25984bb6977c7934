#![warn(clippy::unwrap_used)]

//! Materialization cache for segment builds: the last build's match count and
//! timestamp per segment, plus the per-segment build lease table.

pub mod client;
pub mod lease;
pub mod local;
pub mod materialization;

pub use client::RedisMaterializationStore;
pub use lease::{BuildLease, LeaseTable};
pub use local::LocalMaterializationStore;
pub use materialization::{Materialization, MaterializationStore};
