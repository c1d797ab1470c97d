use thiserror::Error;
use uuid::Uuid;

use crate::domain::QueueState;

/// Main error type for the matching engine
#[derive(Error, Debug)]
pub enum SigmatchError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Order lifecycle errors (caller errors and stale-state signals)
    #[error(transparent)]
    Order(#[from] OrderError),

    // Signal boundary errors
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    // Queue store errors
    #[error("Queue store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Queue store operation '{operation}' timed out after {timeout_ms}ms")]
    StoreTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: QueueState, to: QueueState },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SigmatchError {
    /// True for failures of the store itself (unreachable, timed out, driver error).
    ///
    /// These abort the current tick; nothing order-specific is recorded.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            SigmatchError::Database(_)
                | SigmatchError::StoreUnavailable(_)
                | SigmatchError::StoreTimeout { .. }
        )
    }

    /// True when a conditional transition lost to a concurrent writer.
    pub fn is_stale(&self) -> bool {
        matches!(self, SigmatchError::Order(OrderError::StaleState { .. }))
    }
}

/// Result type alias for SigmatchError
pub type Result<T> = std::result::Result<T, SigmatchError>;

/// Order errors surfaced to the submission boundary or to the engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Order already exists: {order_id}")]
    DuplicateOrder { order_id: Uuid },

    #[error("Order not found: {order_id}")]
    NotFound { order_id: Uuid },

    #[error("Order {order_id} is not owned by {owner_id}")]
    NotOwner { order_id: Uuid, owner_id: String },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Stale state for order {order_id}: expected {expected}, found {actual}")]
    StaleState {
        order_id: Uuid,
        expected: QueueState,
        actual: QueueState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_failure_classification() {
        assert!(SigmatchError::StoreUnavailable("down".into()).is_store_failure());
        assert!(SigmatchError::StoreTimeout {
            operation: "transition",
            timeout_ms: 50
        }
        .is_store_failure());
        assert!(!SigmatchError::Validation("bad".into()).is_store_failure());
    }

    #[test]
    fn test_stale_classification() {
        let err: SigmatchError = OrderError::StaleState {
            order_id: Uuid::nil(),
            expected: QueueState::Pending,
            actual: QueueState::Matched,
        }
        .into();
        assert!(err.is_stale());
        assert!(!err.is_store_failure());
        assert_eq!(
            err.to_string(),
            format!(
                "Stale state for order {}: expected pending, found matched",
                Uuid::nil()
            )
        );
    }
}
