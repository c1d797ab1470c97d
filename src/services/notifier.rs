//! State-change notifications
//!
//! Every successful enqueue or transition produces a [`StateChangeEvent`].
//! Delivery is at-least-once, so implementations must tolerate duplicates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Order, QueueState, StateTransition};
use crate::error::Result;

/// Order state change, as delivered to users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub order_id: Uuid,
    pub owner_id: String,
    pub symbol: String,
    pub transition: StateTransition,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl StateChangeEvent {
    pub fn new(order: &Order, from: Option<QueueState>, reason: impl Into<String>) -> Self {
        Self {
            order_id: order.id,
            owner_id: order.owner_id.clone(),
            symbol: order.symbol.clone(),
            transition: StateTransition {
                from,
                to: order.state,
                reason: reason.into(),
                timestamp: order.updated_at,
            },
            attempts: order.attempts,
            exchange_ref: order.exchange_ref.clone(),
            last_error: order.last_error.clone(),
        }
    }

    pub fn to(&self) -> QueueState {
        self.transition.to
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.transition.timestamp
    }

    /// One-line text for chat-style delivery
    pub fn summary(&self) -> String {
        let from = self
            .transition
            .from
            .map(|s| s.to_string())
            .unwrap_or_else(|| "new".to_string());
        let mut text = format!(
            "Order {} ({}) {} -> {}: {}",
            self.order_id, self.symbol, from, self.transition.to, self.transition.reason
        );
        if let Some(r) = &self.exchange_ref {
            text.push_str(&format!(" [ref {}]", r));
        }
        text
    }
}

/// Receiver of state-change events
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &StateChangeEvent) -> Result<()>;
}

/// Default notifier that just logs
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, event: &StateChangeEvent) -> Result<()> {
        info!(
            order_id = %event.order_id,
            owner = %event.owner_id,
            to = %event.transition.to,
            "{}",
            event.summary()
        );
        Ok(())
    }
}

/// Publishes events on a tokio broadcast channel
///
/// Having no subscribers is not an error.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: broadcast::Sender<StateChangeEvent>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, event: &StateChangeEvent) -> Result<()> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Delivers to several notifiers; one failing does not stop the others
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(targets: Vec<Arc<dyn Notifier>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, event: &StateChangeEvent) -> Result<()> {
        for target in &self.targets {
            if let Err(e) = target.notify(event).await {
                warn!(order_id = %event.order_id, "Notifier delivery failed: {}", e);
            }
        }
        Ok(())
    }
}
