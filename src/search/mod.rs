//! Search orchestration: parallel provider fan-out with timeout and partial
//! fallback, batch windows, advisory cancellation and result combination.

pub(crate) mod combine;
pub(crate) mod operation;
pub(crate) mod orchestrator;
mod registry;

pub use combine::CombinedResult;
pub use orchestrator::{BatchOptions, BatchResult, SearchError, SearchOptions, SearchOrchestrator};
