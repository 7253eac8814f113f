//! Suggestion queries: validation, policy for non-`ready` TMs, ranking.

pub mod error;
mod policy;
mod service;


pub use error::{SuggestError, SuggestResult};
pub use policy::StalePolicy;
pub use service::{
    NotReady, NotReadyReason, SuggestOutcome, SuggestionService, SuggestionSet, validate_query,
};
