//! Knowledge-graph retrieval-augmented answering for the Scottish
//! Medication Assisted Treatment (MAT) standards.
//!
//! The [`pipeline`] turns an utterance into graph queries, ranks and budgets
//! the retrieved facts, and coordinates answer generation under a per-request
//! deadline. External services sit behind the [`embedding`], [`graph`] and
//! [`llm`] adapters.

pub mod bounded;
pub mod config;
pub mod console;
pub mod embedding;
pub mod error;
pub mod eval;
pub mod graph;
pub mod llm;
pub mod logger;
pub mod model;
pub mod pipeline;
pub mod session;
