use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{ExecutionAdapter, ExecutionResult};
use crate::domain::{ExecutionAttempt, ExecutionErrorKind, Order, OrderPatch, QueueState};

/// Attempts cap and backoff for execution retries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first (default: 3)
    pub max_attempts: u32,
    /// Delay before the second attempt (default: 1s)
    pub base_backoff: Duration,
    /// Upper bound on any single delay (default: 60s)
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Next move for an order after one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionDecision {
    Executed(OrderPatch),
    /// In-place `matched -> matched` with the backoff recorded
    Retry(OrderPatch),
    Failed(OrderPatch),
}

impl ExecutionDecision {
    pub fn target_state(&self) -> QueueState {
        match self {
            ExecutionDecision::Executed(_) => QueueState::Executed,
            ExecutionDecision::Retry(_) => QueueState::Matched,
            ExecutionDecision::Failed(_) => QueueState::Failed,
        }
    }

    pub fn into_patch(self) -> OrderPatch {
        match self {
            ExecutionDecision::Executed(p)
            | ExecutionDecision::Retry(p)
            | ExecutionDecision::Failed(p) => p,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Classify an attempt's result into the order's next state
    pub fn decide(&self, order: &Order, result: &ExecutionResult, now: DateTime<Utc>) -> ExecutionDecision {
        let number = order.attempts + 1;
        let mut attempt = ExecutionAttempt {
            number,
            at: now,
            success: result.success,
            error_kind: result.error_kind(),
            message: result.error_message().map(str::to_string),
            exchange_ref: result.exchange_ref.clone(),
        };

        if result.success {
            return ExecutionDecision::Executed(OrderPatch::executed(attempt).observed(order));
        }

        let kind = *attempt
            .error_kind
            .get_or_insert(ExecutionErrorKind::Retryable);
        if attempt.message.is_none() {
            attempt.message = Some("adapter reported failure without detail".to_string());
        }

        match kind {
            ExecutionErrorKind::NonRetryable => {
                ExecutionDecision::Failed(OrderPatch::failed(attempt).observed(order))
            }
            ExecutionErrorKind::Retryable if number >= self.max_attempts => {
                let message = format!(
                    "gave up after {} attempts: {}",
                    number,
                    attempt.message.as_deref().unwrap_or_default()
                );
                attempt.message = Some(message);
                ExecutionDecision::Failed(OrderPatch::failed(attempt).observed(order))
            }
            ExecutionErrorKind::Retryable => {
                let delay = self.backoff_duration(number);
                let next = now + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64);
                ExecutionDecision::Retry(OrderPatch::retry(attempt, next).observed(order))
            }
        }
    }
}

/// Adapter wrapper that bounds every call with a timeout
///
/// A timed-out call is reported as a retryable failure; the adapter's
/// idempotency makes a later retry safe even if the first call went through.
pub struct GuardedExecutor {
    adapter: Arc<dyn ExecutionAdapter>,
    timeout: Duration,
}

impl GuardedExecutor {
    pub fn new(adapter: Arc<dyn ExecutionAdapter>, timeout: Duration) -> Self {
        Self { adapter, timeout }
    }

    pub fn adapter_name(&self) -> &'static str {
        self.adapter.name()
    }

    pub async fn execute(&self, order: &Order) -> ExecutionResult {
        debug!(order_id = %order.id, adapter = self.adapter.name(), "Executing order");

        let result = match tokio::time::timeout(self.timeout, self.adapter.execute(order)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(order_id = %order.id, "Execution timed out after {:?}", self.timeout);
                return ExecutionResult::retryable(
                    order.id,
                    format!("execution timed out after {}ms", self.timeout.as_millis()),
                );
            }
        };

        if result.order_id != order.id {
            warn!(
                order_id = %order.id,
                reported = %result.order_id,
                "Adapter returned a result for a different order"
            );
            return ExecutionResult::rejected(
                order.id,
                format!("adapter reported result for order {}", result.order_id),
            );
        }

        result
    }
}
