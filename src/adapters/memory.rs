//! In-process queue store
//!
//! All state sits behind one async mutex, so every trait method (including
//! `compare_and_move`) observes and mutates the store in a single critical
//! section. Used by tests and dry runs; contents die with the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{NewSignal, Order, OrderPatch, QueueState, Signal, SignalCursor};
use crate::error::{OrderError, Result, SigmatchError};
use crate::queue::{PageKey, QueueStats, QueueStore, SignalInsert};

#[derive(Default)]
struct Inner {
    orders: HashMap<Uuid, Order>,
    signals: BTreeMap<i64, Signal>,
    fingerprints: HashMap<String, i64>,
    next_seq: i64,
    cursors: HashMap<String, SignalCursor>,
}

pub struct MemoryQueueStore {
    inner: Mutex<Inner>,
    available: AtomicBool,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (`false`) or coming back (`true`).
    ///
    /// While unavailable every operation fails with `StoreUnavailable` and
    /// nothing is read or written.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SigmatchError::StoreUnavailable(
                "memory store is offline".to_string(),
            ))
        }
    }

    fn sorted_by_creation(mut orders: Vec<Order>) -> Vec<Order> {
        orders.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        orders
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        if inner.orders.contains_key(&order.id) {
            return Err(OrderError::DuplicateOrder { order_id: order.id }.into());
        }
        inner.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        self.check()?;
        Ok(self.inner.lock().await.orders.get(&order_id).cloned())
    }

    async fn pending_page(
        &self,
        symbol: &str,
        strategy: &str,
        after: Option<PageKey>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        self.check()?;
        let inner = self.inner.lock().await;
        let candidates = inner
            .orders
            .values()
            .filter(|o| o.state == QueueState::Pending && o.in_bucket(symbol, strategy))
            .filter(|o| after.map_or(true, |key| (o.created_at, o.id) > key))
            .cloned()
            .collect();

        Ok(Self::sorted_by_creation(candidates)
            .into_iter()
            .take(limit)
            .collect())
    }

    async fn compare_and_move(
        &self,
        order_id: Uuid,
        from: QueueState,
        to: QueueState,
        patch: &OrderPatch,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or(OrderError::NotFound { order_id })?;

        if order.state != from || !patch.attempts_match(order) {
            return Err(OrderError::StaleState {
                order_id,
                expected: from,
                actual: order.state,
            }
            .into());
        }

        patch.apply(order, to, now);
        Ok(order.clone())
    }

    async fn executable(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>> {
        self.check()?;
        let inner = self.inner.lock().await;
        let mut due: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.state == QueueState::Matched && o.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            (a.matched_at.unwrap_or(a.updated_at), a.id)
                .cmp(&(b.matched_at.unwrap_or(b.updated_at), b.id))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn orders_by_owner(&self, owner_id: &str) -> Result<Vec<Order>> {
        self.check()?;
        let inner = self.inner.lock().await;
        let owned = inner
            .orders
            .values()
            .filter(|o| o.owner_id == owner_id)
            .cloned()
            .collect();
        Ok(Self::sorted_by_creation(owned))
    }

    async fn queue_stats(&self, now: DateTime<Utc>) -> Result<QueueStats> {
        self.check()?;
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();
        let mut time_in_state: BTreeMap<QueueState, (f64, u64)> = BTreeMap::new();

        for state in QueueState::ALL {
            stats.depths.insert(state, 0);
        }

        for order in inner.orders.values() {
            *stats.depths.entry(order.state).or_insert(0) += 1;
            if !order.state.is_terminal() {
                let secs = (now - order.state_entered_at).num_milliseconds().max(0) as f64 / 1000.0;
                let entry = time_in_state.entry(order.state).or_insert((0.0, 0));
                entry.0 += secs;
                entry.1 += 1;
            }
        }

        for (state, (total, count)) in time_in_state {
            stats
                .avg_time_in_state_secs
                .insert(state, total / count as f64);
        }

        stats.signals_stored = inner.signals.len() as u64;
        Ok(stats)
    }

    async fn purge_terminal_orders(&self, before: DateTime<Utc>) -> Result<u64> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let count = inner.orders.len();
        inner
            .orders
            .retain(|_, o| !(o.state.is_terminal() && o.updated_at < before));
        Ok((count - inner.orders.len()) as u64)
    }

    async fn insert_signal(&self, signal: NewSignal, now: DateTime<Utc>) -> Result<SignalInsert> {
        self.check()?;
        let mut inner = self.inner.lock().await;

        if let Some(&seq) = inner.fingerprints.get(&signal.fingerprint) {
            let live = inner
                .signals
                .get(&seq)
                .map_or(false, |existing| !existing.is_expired(now));
            if live {
                return Ok(SignalInsert::Duplicate { seq });
            }
            inner.signals.remove(&seq);
        }

        inner.next_seq += 1;
        let seq = inner.next_seq;
        let stored = signal.into_signal(seq);
        inner.fingerprints.insert(stored.fingerprint.clone(), seq);
        inner.signals.insert(seq, stored.clone());
        Ok(SignalInsert::Inserted(stored))
    }

    async fn signals_since(
        &self,
        cursor: SignalCursor,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Signal>> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .signals
            .range(cursor.seq() + 1..)
            .map(|(_, s)| s)
            .filter(|s| !s.is_expired(now))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_expired_signals(&self, now: DateTime<Utc>) -> Result<u64> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let expired: Vec<(i64, String)> = inner
            .signals
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| (s.seq, s.fingerprint.clone()))
            .collect();

        for (seq, fingerprint) in &expired {
            inner.signals.remove(seq);
            if inner.fingerprints.get(fingerprint) == Some(seq) {
                inner.fingerprints.remove(fingerprint);
            }
        }
        Ok(expired.len() as u64)
    }

    async fn load_cursor(&self, consumer: &str) -> Result<SignalCursor> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .await
            .cursors
            .get(consumer)
            .copied()
            .unwrap_or_default())
    }

    async fn save_cursor(&self, consumer: &str, cursor: SignalCursor) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let stored = inner.cursors.entry(consumer.to_string()).or_default();
        stored.advance_to(cursor.seq());
        Ok(())
    }
}
