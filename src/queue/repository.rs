//! Order repository
//!
//! Thin data-access layer over a [`QueueStore`]. It adds three things on top of
//! the raw store: lattice checks on every transition, a timeout on every store
//! call, and state-change notifications after every successful write.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{PageKey, QueueStats, QueueStore};
use crate::domain::{NewOrder, Order, OrderPatch, QueueState};
use crate::error::{OrderError, Result, SigmatchError};
use crate::services::notifier::{Notifier, StateChangeEvent};
use crate::validation;

/// Default keyset page size for eligible-order listing
pub const DEFAULT_PAGE_SIZE: usize = 100;

pub struct OrderRepository {
    store: Arc<dyn QueueStore>,
    notifier: Arc<dyn Notifier>,
    op_timeout: Duration,
    page_size: usize,
}

impl OrderRepository {
    pub fn new(store: Arc<dyn QueueStore>, notifier: Arc<dyn Notifier>, op_timeout: Duration) -> Self {
        Self {
            store,
            notifier,
            op_timeout,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Run a store call under the configured timeout
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        super::bounded(operation, self.op_timeout, fut).await
    }

    async fn emit(&self, order: &Order, from: Option<QueueState>, reason: &str) {
        let event = StateChangeEvent::new(order, from, reason);
        match tokio::time::timeout(self.op_timeout, self.notifier.notify(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(order_id = %order.id, "State change notification failed: {}", e),
            Err(_) => warn!(order_id = %order.id, "State change notification timed out"),
        }
    }

    /// Validate a submission and enqueue it as a new pending order
    pub async fn submit(&self, request: NewOrder) -> Result<Order> {
        validation::validate_new_order(&request)?;
        self.enqueue(Order::from_request(request)).await
    }

    /// Insert a new order into `pending`
    pub async fn enqueue(&self, order: Order) -> Result<Order> {
        if order.state != QueueState::Pending {
            return Err(SigmatchError::InvalidState(format!(
                "new order {} must start in pending, got {}",
                order.id, order.state
            )));
        }

        self.bounded("insert_order", self.store.insert_order(&order))
            .await?;

        info!(
            order_id = %order.id,
            owner = %order.owner_id,
            symbol = %order.symbol,
            "Order enqueued"
        );
        self.emit(&order, None, "submitted").await;
        Ok(order)
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Order> {
        self.bounded("get_order", self.store.get_order(order_id))
            .await?
            .ok_or_else(|| OrderError::NotFound { order_id }.into())
    }

    /// Pending orders in the symbol/strategy bucket, oldest first.
    ///
    /// The stream is lazy and pages through the store with a keyset cursor, so
    /// orders moved out of `pending` mid-iteration never cause skips. Calling
    /// this again starts over from the oldest order.
    pub fn list_eligible<'a>(
        &'a self,
        symbol: &'a str,
        strategy: &'a str,
    ) -> impl Stream<Item = Result<Order>> + Send + 'a {
        let page_size = self.page_size;

        stream::try_unfold(
            (None::<PageKey>, false),
            move |(after, exhausted)| async move {
                if exhausted {
                    return Ok::<_, SigmatchError>(None);
                }

                let page = self
                    .bounded(
                        "pending_page",
                        self.store.pending_page(symbol, strategy, after, page_size),
                    )
                    .await?;

                if page.is_empty() {
                    return Ok(None);
                }

                let exhausted = page.len() < page_size;
                let next = page.last().map(|o| (o.created_at, o.id));
                Ok(Some((page, (next, exhausted))))
            },
        )
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Order, SigmatchError>)))
        .try_flatten()
    }

    /// Collect the eligible stream (convenience for callers that want a Vec)
    pub async fn collect_eligible(&self, symbol: &str, strategy: &str) -> Result<Vec<Order>> {
        self.list_eligible(symbol, strategy).try_collect().await
    }

    /// Atomically move an order from `from` to `to`, applying `patch`.
    ///
    /// The move is conditioned on the order currently being in `from`; a lost
    /// race yields `OrderError::StaleState` and leaves the order untouched.
    pub async fn transition(
        &self,
        order_id: Uuid,
        from: QueueState,
        to: QueueState,
        patch: OrderPatch,
    ) -> Result<Order> {
        if !from.can_transition_to(to) {
            return Err(SigmatchError::InvalidStateTransition { from, to });
        }

        let now = Utc::now();
        let order = self
            .bounded(
                "transition",
                self.store.compare_and_move(order_id, from, to, &patch, now),
            )
            .await?;

        debug!(order_id = %order_id, "Order transition {} -> {}", from, to);

        let reason = patch
            .reason
            .clone()
            .unwrap_or_else(|| format!("{} -> {}", from, to));
        self.emit(&order, Some(from), &reason).await;
        Ok(order)
    }

    /// Cancel a pending or matched order on behalf of its owner
    pub async fn cancel(&self, order_id: Uuid, owner_id: &str) -> Result<Order> {
        let order = self.get(order_id).await?;

        if order.owner_id != owner_id {
            return Err(OrderError::NotOwner {
                order_id,
                owner_id: owner_id.to_string(),
            }
            .into());
        }

        if !order.state.is_cancellable() {
            return Err(OrderError::StaleState {
                order_id,
                expected: QueueState::Pending,
                actual: order.state,
            }
            .into());
        }

        let cancelled = self
            .transition(
                order_id,
                order.state,
                QueueState::Cancelled,
                OrderPatch::cancelled(owner_id),
            )
            .await?;

        info!(order_id = %order_id, owner = %owner_id, "Order cancelled");
        Ok(cancelled)
    }

    /// Every order of one owner across all states, oldest first
    pub async fn get_by_user(&self, owner_id: &str) -> Result<Vec<Order>> {
        self.bounded("orders_by_owner", self.store.orders_by_owner(owner_id))
            .await
    }

    /// Bounded batch of matched orders due for execution, oldest match first
    pub async fn fetch_executable(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<Order>> {
        self.bounded("executable", self.store.executable(now, limit))
            .await
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats> {
        self.bounded("queue_stats", self.store.queue_stats(now)).await
    }

    /// Retention sweep for terminal orders
    pub async fn purge_terminal_orders(&self, before: DateTime<Utc>) -> Result<u64> {
        let purged = self
            .bounded(
                "purge_terminal_orders",
                self.store.purge_terminal_orders(before),
            )
            .await?;
        if purged > 0 {
            info!("Purged {} terminal orders older than {}", purged, before);
        }
        Ok(purged)
    }
}
