use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ExecutionErrorKind, Order};

/// Why an execution attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

/// Outcome of one execution attempt, as reported by the adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub order_id: Uuid,
    pub success: bool,
    pub error: Option<ExecutionError>,
    pub exchange_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn filled(order_id: Uuid, exchange_ref: impl Into<String>) -> Self {
        Self {
            order_id,
            success: true,
            error: None,
            exchange_ref: Some(exchange_ref.into()),
            timestamp: Utc::now(),
        }
    }

    /// Transient failure; the order stays matched and is retried
    pub fn retryable(order_id: Uuid, message: impl Into<String>) -> Self {
        Self::failure(order_id, ExecutionErrorKind::Retryable, message)
    }

    /// Permanent failure; the order fails immediately
    pub fn rejected(order_id: Uuid, message: impl Into<String>) -> Self {
        Self::failure(order_id, ExecutionErrorKind::NonRetryable, message)
    }

    fn failure(order_id: Uuid, kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            order_id,
            success: false,
            error: Some(ExecutionError {
                kind,
                message: message.into(),
            }),
            exchange_ref: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error_kind(&self) -> Option<ExecutionErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

/// Places orders on an exchange
///
/// Implementations must be idempotent per order id: executing the same order
/// twice yields the same fill and the same `exchange_ref`. Failures are reported
/// inside [`ExecutionResult`], never as a panic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, order: &Order) -> ExecutionResult;
}
