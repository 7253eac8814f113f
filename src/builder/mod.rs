//! Index builds: lock, read, embed in batches, install, mark ready.

pub mod error;
mod index_builder;


pub use error::{BuildError, BuildResult};
pub use index_builder::{BuildMode, BuildOutcome, BuildStats, IndexBuilder};
