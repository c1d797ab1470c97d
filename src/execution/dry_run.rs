use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::traits::{ExecutionAdapter, ExecutionResult};
use crate::domain::Order;

/// Fills remembered before the oldest is forgotten
pub const DEFAULT_FILL_CAPACITY: usize = 10_000;

/// Simulated fills, one per order id
///
/// Repeated executions of the same order return the first fill's reference,
/// as long as that fill is among the most recent `capacity` ones.
pub struct DryRunAdapter {
    fills: Mutex<Fills>,
    capacity: usize,
}

#[derive(Default)]
struct Fills {
    by_order: HashMap<Uuid, String>,
    oldest_first: VecDeque<Uuid>,
}

impl Default for DryRunAdapter {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_FILL_CAPACITY)
    }
}

impl DryRunAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fills: Mutex::new(Fills::default()),
            capacity: capacity.max(1),
        }
    }

    /// Number of distinct orders currently remembered
    pub async fn fill_count(&self) -> usize {
        self.fills.lock().await.by_order.len()
    }
}

#[async_trait]
impl ExecutionAdapter for DryRunAdapter {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn execute(&self, order: &Order) -> ExecutionResult {
        let mut fills = self.fills.lock().await;
        if let Some(existing) = fills.by_order.get(&order.id) {
            return ExecutionResult::filled(order.id, existing.clone());
        }

        let exchange_ref = format!("dry-{}", Uuid::new_v4().simple());
        info!(
            "[DRY RUN] Would place {} {} {} x {}",
            order.kind.as_str(),
            order.side,
            order.symbol,
            order.quantity
        );

        while fills.oldest_first.len() >= self.capacity {
            if let Some(evicted) = fills.oldest_first.pop_front() {
                fills.by_order.remove(&evicted);
            }
        }
        fills.oldest_first.push_back(order.id);
        fills.by_order.insert(order.id, exchange_ref.clone());

        ExecutionResult::filled(order.id, exchange_ref)
    }
}
