//! Retrieval-augmented generation pipeline.
//!
//! extractor -> planner -> executor -> ranker -> assembler -> generator,
//! sequenced per request by [`coordinator::PipelineCoordinator`].

pub mod assembler;
pub mod coordinator;
pub mod executor;
pub mod extractor;
pub mod generator;
pub mod planner;
pub mod ranker;

pub use coordinator::{Adapters, PipelineCoordinator, PipelineResponse};
