use chrono::Utc;
use futures::TryStreamExt;
use tokio::time::Instant;
use tracing::{debug, info};

use super::MatchingEngine;
use crate::domain::{OrderPatch, QueueState, Signal};
use crate::error::{OrderError, Result, SigmatchError};
use crate::services::EngineMetrics;

/// Matching phase summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchReport {
    pub signals_processed: u64,
    pub matched: u64,
    /// Candidate orders another writer moved first
    pub stale: u64,
    /// Phase stopped early on the tick budget
    pub interrupted: bool,
}

/// Lost race or vanished order: someone else decided this order's fate
pub(super) fn is_benign_conflict(e: &SigmatchError) -> bool {
    e.is_stale() || matches!(e, SigmatchError::Order(OrderError::NotFound { .. }))
}

impl MatchingEngine {
    /// Match new signals against pending orders.
    ///
    /// Signals are taken in sequence order from the persisted cursor. The cursor
    /// moves past a signal only once every candidate order for it has been
    /// evaluated, so a crash or budget stop replays at most that one signal;
    /// replays are harmless because every match is conditioned on `pending`.
    pub async fn match_pending(&self, deadline: Instant) -> Result<MatchReport> {
        let consumer = self.settings.consumer.as_str();
        let mut report = MatchReport::default();

        let mut cursor = self.intake.load_cursor(consumer).await?;
        let signals = self
            .intake
            .recent_since(cursor, self.settings.signal_batch_size)
            .await?;

        for signal in &signals {
            if Instant::now() >= deadline {
                report.interrupted = true;
                break;
            }

            let finished = self.match_signal(signal, deadline, &mut report).await?;
            if !finished {
                report.interrupted = true;
                break;
            }

            cursor.advance_to(signal.seq);
            self.intake.save_cursor(consumer, cursor).await?;
            report.signals_processed += 1;
            EngineMetrics::inc(&self.metrics.signals_processed);
        }

        Ok(report)
    }

    /// Evaluate one signal against its bucket, oldest order first.
    ///
    /// Returns `false` if the budget ran out before the bucket was exhausted.
    async fn match_signal(
        &self,
        signal: &Signal,
        deadline: Instant,
        report: &mut MatchReport,
    ) -> Result<bool> {
        let mut candidates = Box::pin(self.repo.list_eligible(&signal.symbol, &signal.strategy));

        while let Some(order) = candidates.try_next().await? {
            if Instant::now() >= deadline {
                return Ok(false);
            }

            // Orders only react to signals that arrived after they were placed
            if signal.received_at < order.created_at {
                continue;
            }

            if !order.conditions.evaluate(signal) {
                if let Some(failed) = order.conditions.first_failure(signal) {
                    debug!(order_id = %order.id, seq = signal.seq, "Condition not met: {}", failed);
                }
                continue;
            }

            let patch = OrderPatch::matched(signal.seq, Utc::now());
            match self
                .repo
                .transition(order.id, QueueState::Pending, QueueState::Matched, patch)
                .await
            {
                Ok(_) => {
                    report.matched += 1;
                    EngineMetrics::inc(&self.metrics.orders_matched);
                    info!(
                        order_id = %order.id,
                        seq = signal.seq,
                        symbol = %signal.symbol,
                        strategy = %signal.strategy,
                        "Order matched"
                    );
                }
                Err(e) if is_benign_conflict(&e) => {
                    report.stale += 1;
                    EngineMetrics::inc(&self.metrics.stale_transitions);
                    debug!(order_id = %order.id, "Match lost to concurrent writer: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(true)
    }
}
