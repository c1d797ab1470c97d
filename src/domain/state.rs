use serde::{Deserialize, Serialize};
use std::fmt;

/// Order queue states
///
/// Each order lives in exactly one of these queues at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    /// Waiting for a signal that satisfies the condition set
    Pending,
    /// Condition set satisfied, waiting for execution
    Matched,
    /// Execution succeeded
    Executed,
    /// Execution failed permanently
    Failed,
    /// Cancelled by the owner
    Cancelled,
}

impl QueueState {
    pub const ALL: [QueueState; 5] = [
        QueueState::Pending,
        QueueState::Matched,
        QueueState::Executed,
        QueueState::Failed,
        QueueState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Pending => "pending",
            QueueState::Matched => "matched",
            QueueState::Executed => "executed",
            QueueState::Failed => "failed",
            QueueState::Cancelled => "cancelled",
        }
    }

    /// Check if this state can transition to another state
    ///
    /// `Matched -> Matched` is the in-place update used for retry bookkeeping.
    pub fn can_transition_to(&self, target: QueueState) -> bool {
        use QueueState::*;

        match (self, target) {
            // From Pending
            (Pending, Matched) => true,
            (Pending, Cancelled) => true,

            // From Matched
            (Matched, Matched) => true,
            (Matched, Executed) => true,
            (Matched, Failed) => true,
            (Matched, Cancelled) => true,

            // Terminal states never move
            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<QueueState> {
        use QueueState::*;

        match self {
            Pending => vec![Matched, Cancelled],
            Matched => vec![Matched, Executed, Failed, Cancelled],
            Executed | Failed | Cancelled => vec![],
        }
    }

    /// Can the owner still cancel an order in this state?
    pub fn is_cancellable(&self) -> bool {
        matches!(self, QueueState::Pending | QueueState::Matched)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueState::Executed | QueueState::Failed | QueueState::Cancelled
        )
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for QueueState {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(QueueState::Pending),
            "matched" => Ok(QueueState::Matched),
            "executed" => Ok(QueueState::Executed),
            "failed" => Ok(QueueState::Failed),
            "cancelled" => Ok(QueueState::Cancelled),
            _ => Err(format!("Unknown state: {}", s)),
        }
    }
}

/// State transition event (for notifications and audit)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// `None` when the order was just created
    pub from: Option<QueueState>,
    pub to: QueueState,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
