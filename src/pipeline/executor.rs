//! Graph traversal execution.
//!
//! Each query runs as its own task with its own timeout, clipped to the
//! request deadline. A timed-out or failed query yields no facts and one
//! [`Degradation`]; it never aborts its siblings.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, warn};

use crate::bounded::{CallFailure, CallPolicy, bounded_call};
use crate::graph::GraphStore;
use crate::model::{DegradeReason, Degradation, FactCandidate, GraphQuery, PipelineState};

/// Result of one query. `degradation` is set when `candidates` is empty
/// because of a timeout or transport error.
#[derive(Debug, Clone)]
pub struct TraversalOutcome {
    pub query_id: String,
    pub candidates: Vec<FactCandidate>,
    pub degradation: Option<Degradation>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct TraversalExecutor {
    store: GraphStore,
    policy: CallPolicy,
}

impl TraversalExecutor {
    /// Traversals are not retried: the per-query timeout is the whole budget.
    pub fn new(store: GraphStore, query_timeout: Duration) -> Self {
        Self { store, policy: CallPolicy::new(query_timeout, 0) }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub async fn execute(&self, query: &GraphQuery, deadline: Option<Instant>) -> TraversalOutcome {
        let started = Instant::now();
        let result = bounded_call("graph", self.policy, deadline, |_| self.store.traverse(query)).await;
        let elapsed = started.elapsed();

        match result {
            Ok(mut candidates) => {
                candidates.truncate(query.result_cap);
                debug!(query = %query.id, facts = candidates.len(), elapsed_ms = elapsed.as_millis() as u64, "traversal complete");
                TraversalOutcome { query_id: query.id.clone(), candidates, degradation: None, elapsed }
            }
            Err(failure) => {
                let reason = match failure {
                    CallFailure::Failed { .. } => DegradeReason::TraversalFailed,
                    CallFailure::TimedOut { .. } | CallFailure::DeadlineExceeded { .. } => {
                        DegradeReason::TraversalTimeout
                    }
                };
                warn!(query = %query.id, reason = reason.code(), error = %failure, "traversal degraded");
                TraversalOutcome {
                    query_id: query.id.clone(),
                    candidates: Vec::new(),
                    degradation: Some(Degradation::new(
                        PipelineState::Traversing,
                        reason,
                        format!("{}: {failure}", query.id),
                    )),
                    elapsed,
                }
            }
        }
    }

    /// Run every query concurrently and return outcomes in plan order,
    /// whatever order the tasks finish in.
    pub async fn execute_all(
        &self,
        queries: &[GraphQuery],
        deadline: Option<Instant>,
    ) -> Vec<TraversalOutcome> {
        // Spawned tasks do not inherit the caller's span.
        let span = Span::current();
        let mut set = JoinSet::new();
        for (index, query) in queries.iter().cloned().enumerate() {
            let executor = self.clone();
            set.spawn(
                async move { (index, executor.execute(&query, deadline).await) }.instrument(span.clone()),
            );
        }

        let mut slots: Vec<Option<TraversalOutcome>> = vec![None; queries.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!(error = %e, "traversal task aborted"),
            }
        }

        slots
            .into_iter()
            .zip(queries)
            .map(|(slot, query)| {
                slot.unwrap_or_else(|| TraversalOutcome {
                    query_id: query.id.clone(),
                    candidates: Vec::new(),
                    degradation: Some(Degradation::new(
                        PipelineState::Traversing,
                        DegradeReason::TraversalFailed,
                        format!("{}: task aborted", query.id),
                    )),
                    elapsed: Duration::ZERO,
                })
            })
            .collect()
    }
}
