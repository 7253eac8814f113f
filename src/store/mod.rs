//! Durable entry store (SQLite via r2d2).
//!
//! Holds translation memories, their entries and the build-lock table. Every
//! committed mutation bumps the TM `revision`; a build records the revision it
//! covered, which is the durable dirty signal the reconciliation sweep reads.

pub mod database;
mod entry_store;
pub mod error;
pub mod model;
pub mod notify;
mod schema;


pub use database::{DbPool, open_file_pool, open_memory_pool};
pub use entry_store::EntryStore;
pub use error::{StoreError, StoreResult};
pub use model::{
    ChangeEvent, ChangeOp, EntryId, EntrySnapshot, EntryUpdate, NewEntry, NewTm, TmEntry, TmId,
    TmStatus, TranslationMemory,
};
pub use notify::ChangeNotifier;
#[cfg(any(test, feature = "mock"))]
pub use notify::RecordingNotifier;
