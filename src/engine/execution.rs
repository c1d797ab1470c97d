use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::matching::is_benign_conflict;
use super::MatchingEngine;
use crate::domain::{Order, QueueState};
use crate::error::Result;
use crate::services::EngineMetrics;

/// Execution phase summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Adapter calls made this tick
    pub attempted: u64,
    pub executed: u64,
    pub retried: u64,
    pub failed: u64,
    /// Results discarded because the order moved concurrently
    pub stale: u64,
    /// Phase stopped early on the tick budget
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Executed,
    Retried,
    Failed,
    Stale,
    Skipped,
}

impl ExecutionReport {
    fn record(mut self, outcome: Outcome) -> Self {
        match outcome {
            Outcome::Skipped => {
                self.interrupted = true;
                return self;
            }
            Outcome::Executed => self.executed += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Stale => self.stale += 1,
        }
        self.attempted += 1;
        self
    }
}

impl MatchingEngine {
    /// Execute a bounded batch of due matched orders, oldest match first.
    ///
    /// Per-order failures are recorded on the order and never abort the batch;
    /// a store failure does.
    pub async fn execute_matched(&self, deadline: Instant) -> Result<ExecutionReport> {
        let batch = self
            .repo
            .fetch_executable(self.settings.execution_batch_size, Utc::now())
            .await?;

        if batch.is_empty() {
            return Ok(ExecutionReport::default());
        }

        debug!("Executing {} matched orders", batch.len());

        stream::iter(batch)
            .map(|order| self.execute_one(order, deadline))
            .buffer_unordered(self.settings.execution_concurrency)
            .try_fold(ExecutionReport::default(), |report, outcome| async move {
                Ok(report.record(outcome))
            })
            .await
    }

    async fn execute_one(&self, order: Order, deadline: Instant) -> Result<Outcome> {
        if Instant::now() >= deadline {
            return Ok(Outcome::Skipped);
        }

        let result = self.executor.execute(&order).await;
        let decision = self.settings.retry.decide(&order, &result, Utc::now());
        let to = decision.target_state();

        match self
            .repo
            .transition(order.id, QueueState::Matched, to, decision.into_patch())
            .await
        {
            Ok(updated) => Ok(match to {
                QueueState::Executed => {
                    EngineMetrics::inc(&self.metrics.orders_executed);
                    info!(
                        order_id = %order.id,
                        exchange_ref = updated.exchange_ref.as_deref().unwrap_or("-"),
                        "Order executed"
                    );
                    Outcome::Executed
                }
                QueueState::Matched => {
                    EngineMetrics::inc(&self.metrics.orders_retried);
                    warn!(
                        order_id = %order.id,
                        attempt = updated.attempts,
                        max_attempts = self.settings.retry.max_attempts,
                        next_attempt_at = ?updated.next_attempt_at,
                        "Execution failed, will retry: {}",
                        updated.last_error.as_deref().unwrap_or_default()
                    );
                    Outcome::Retried
                }
                _ => {
                    EngineMetrics::inc(&self.metrics.orders_failed);
                    warn!(
                        order_id = %order.id,
                        attempts = updated.attempts,
                        "Order failed: {}",
                        updated.last_error.as_deref().unwrap_or_default()
                    );
                    Outcome::Failed
                }
            }),
            Err(e) if is_benign_conflict(&e) => {
                EngineMetrics::inc(&self.metrics.stale_transitions);
                if result.success {
                    // Filled on the exchange but the order was cancelled or
                    // settled by another engine in the meantime
                    warn!(
                        order_id = %order.id,
                        exchange_ref = result.exchange_ref.as_deref().unwrap_or("-"),
                        "Execution result discarded, order moved concurrently: {}",
                        e
                    );
                } else {
                    debug!(order_id = %order.id, "Execution result discarded: {}", e);
                }
                Ok(Outcome::Stale)
            }
            Err(e) => Err(e),
        }
    }
}
