//! Engine assembly: storage, locks, builder, auto-sync and suggestions wired
//! together, with startup recovery and shutdown.

pub mod error;
mod hydrate;
mod runtime;


pub use error::{EngineError, EngineResult};
pub use hydrate::HydrationReport;
pub use runtime::{Engine, EngineBuilder};
