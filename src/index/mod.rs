//! Similarity index snapshots.
//!
//! A build produces an immutable [`IndexSnapshot`] which the [`SnapshotRegistry`]
//! swaps in atomically; [`SnapshotStore`] persists it for restarts.

pub mod error;
mod persist;
mod registry;
pub mod similarity;
mod snapshot;

#[cfg(test)]
mod tests;

pub use error::{IndexError, IndexResult};
pub use persist::{SnapshotStore, StagedSnapshot};
pub use registry::SnapshotRegistry;
pub use snapshot::{IndexSnapshot, IndexedEntry, ScoredMatch, SnapshotBuilder};
