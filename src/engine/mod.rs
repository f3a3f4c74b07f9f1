//! Core engine: price → resolve → aggregate → rank, driven by the
//! orchestrator.

pub mod aggregator;
pub mod orchestrator;
pub mod prices;
pub mod ranking;
pub mod resolver;

pub use orchestrator::Orchestrator;
