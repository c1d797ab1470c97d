use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::{NewSignal, Order, OrderPatch, QueueState, Signal, SignalCursor};
use crate::error::Result;

/// Keyset position inside a creation-ordered listing
pub type PageKey = (DateTime<Utc>, Uuid);

/// Result of writing a signal to the history
#[derive(Debug, Clone, PartialEq)]
pub enum SignalInsert {
    Inserted(Signal),
    /// An unexpired signal with the same fingerprint already exists
    Duplicate { seq: i64 },
}

/// Queue depth and latency figures read from the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub depths: BTreeMap<QueueState, u64>,
    /// Average seconds spent so far in the current state, non-terminal states only
    pub avg_time_in_state_secs: BTreeMap<QueueState, f64>,
    pub signals_stored: u64,
}

impl QueueStats {
    pub fn depth(&self, state: QueueState) -> u64 {
        self.depths.get(&state).copied().unwrap_or(0)
    }
}

/// Durable order and signal storage
///
/// Implementations own no matching logic. The one hard requirement is that
/// [`QueueStore::compare_and_move`] is a single atomic operation conditioned on
/// the stored state: the whole engine's concurrency safety rests on it.
#[async_trait]
pub trait QueueStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Cheap liveness probe
    async fn ping(&self) -> Result<()>;

    // ==================== Orders ====================

    /// Insert a new order; `OrderError::DuplicateOrder` if the id exists
    async fn insert_order(&self, order: &Order) -> Result<()>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>>;

    /// Pending orders in a symbol/strategy bucket, ordered by `(created_at, id)`,
    /// strictly after `after`
    async fn pending_page(
        &self,
        symbol: &str,
        strategy: &str,
        after: Option<PageKey>,
        limit: usize,
    ) -> Result<Vec<Order>>;

    /// Atomically move `order_id` from `from` to `to` and apply `patch`.
    ///
    /// Fails with `OrderError::NotFound` if the order does not exist and
    /// `OrderError::StaleState` if it is not currently in `from`.
    async fn compare_and_move(
        &self,
        order_id: Uuid,
        from: QueueState,
        to: QueueState,
        patch: &OrderPatch,
        now: DateTime<Utc>,
    ) -> Result<Order>;

    /// Matched orders whose backoff is over, oldest match first
    async fn executable(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>>;

    /// Every order of one owner, oldest first
    async fn orders_by_owner(&self, owner_id: &str) -> Result<Vec<Order>>;

    async fn queue_stats(&self, now: DateTime<Utc>) -> Result<QueueStats>;

    /// Delete terminal orders last updated before `before`
    async fn purge_terminal_orders(&self, before: DateTime<Utc>) -> Result<u64>;

    // ==================== Signals ====================

    /// Store a signal unless an unexpired one with the same fingerprint exists
    async fn insert_signal(&self, signal: NewSignal, now: DateTime<Utc>) -> Result<SignalInsert>;

    /// Unexpired signals with `seq > cursor`, ascending
    async fn signals_since(
        &self,
        cursor: SignalCursor,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Signal>>;

    async fn purge_expired_signals(&self, now: DateTime<Utc>) -> Result<u64>;

    // ==================== Consumer cursors ====================

    async fn load_cursor(&self, consumer: &str) -> Result<SignalCursor>;

    async fn save_cursor(&self, consumer: &str, cursor: SignalCursor) -> Result<()>;
}
