use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    ConditionSet, Direction, ExecutionAttempt, NewSignal, Order, OrderKind, OrderPatch, OrderSide,
    QueueState, Signal, SignalCursor,
};
use crate::error::{OrderError, Result, SigmatchError};
use crate::queue::{PageKey, QueueStats, QueueStore, SignalInsert};

const ORDER_COLUMNS: &str = r#"
    id, owner_id, symbol, side, kind, quantity, limit_price, strategy, conditions,
    state, attempts, matched_signal_seq, matched_at, next_attempt_at, exchange_ref,
    last_error, attempt_history, created_at, updated_at, state_entered_at
"#;

/// Serializes signal inserts so `seq` values become visible in commit order.
/// Without it a later `seq` can commit first and a reader's cursor skips the
/// earlier one for good.
const SIGNAL_INSERT_LOCK: i64 = 0x5349_474d_4154_4348;

const SIGNAL_COLUMNS: &str = r#"
    seq, fingerprint, source, symbol, strategy, direction, strength, price, timeframe,
    extra, received_at, expires_at
"#;

/// PostgreSQL queue store
#[derive(Clone)]
pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn current_state(&self, order_id: Uuid) -> Result<Option<QueueState>> {
        let row = sqlx::query("SELECT state FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| parse_state(&r.try_get::<String, _>("state")?))
            .transpose()
    }
}

fn parse_state(s: &str) -> Result<QueueState> {
    QueueState::try_from(s).map_err(SigmatchError::InvalidState)
}

fn order_from_row(r: &PgRow) -> Result<Order> {
    let side: String = r.try_get("side")?;
    let kind: String = r.try_get("kind")?;
    let state: String = r.try_get("state")?;
    let attempts: i32 = r.try_get("attempts")?;
    let conditions: Json<ConditionSet> = r.try_get("conditions")?;
    let history: Json<Vec<ExecutionAttempt>> = r.try_get("attempt_history")?;

    Ok(Order {
        id: r.try_get("id")?,
        owner_id: r.try_get("owner_id")?,
        symbol: r.try_get("symbol")?,
        side: OrderSide::try_from(side.as_str()).map_err(SigmatchError::InvalidState)?,
        kind: OrderKind::try_from(kind.as_str()).map_err(SigmatchError::InvalidState)?,
        quantity: r.try_get("quantity")?,
        limit_price: r.try_get("limit_price")?,
        strategy: r.try_get("strategy")?,
        conditions: conditions.0,
        state: parse_state(&state)?,
        attempts: attempts.max(0) as u32,
        matched_signal_seq: r.try_get("matched_signal_seq")?,
        matched_at: r.try_get("matched_at")?,
        next_attempt_at: r.try_get("next_attempt_at")?,
        exchange_ref: r.try_get("exchange_ref")?,
        last_error: r.try_get("last_error")?,
        attempt_history: history.0,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
        state_entered_at: r.try_get("state_entered_at")?,
    })
}

fn signal_from_row(r: &PgRow) -> Result<Signal> {
    let direction: String = r.try_get("direction")?;

    Ok(Signal {
        seq: r.try_get("seq")?,
        fingerprint: r.try_get("fingerprint")?,
        source: r.try_get("source")?,
        symbol: r.try_get("symbol")?,
        strategy: r.try_get("strategy")?,
        direction: Direction::try_from(direction.as_str()).map_err(SigmatchError::InvalidSignal)?,
        strength: r.try_get("strength")?,
        price: r.try_get("price")?,
        timeframe: r.try_get("timeframe")?,
        extra: r.try_get("extra")?,
        received_at: r.try_get("received_at")?,
        expires_at: r.try_get("expires_at")?,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ==================== Orders ====================

    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                id, owner_id, symbol, side, kind, quantity, limit_price, strategy, conditions,
                state, attempts, attempt_history, created_at, updated_at, state_entered_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(order.id)
        .bind(&order.owner_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.kind.as_str())
        .bind(order.quantity)
        .bind(order.limit_price)
        .bind(&order.strategy)
        .bind(Json(&order.conditions))
        .bind(order.state.as_str())
        .bind(order.attempts as i32)
        .bind(Json(&order.attempt_history))
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.state_entered_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(OrderError::DuplicateOrder { order_id: order.id }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn pending_page(
        &self,
        symbol: &str,
        strategy: &str,
        after: Option<PageKey>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE state = 'pending'
              AND symbol = upper($1)
              AND (strategy IS NULL OR strategy = $2)
              AND ($3::timestamptz IS NULL OR (created_at, id) > ($3::timestamptz, $4::uuid))
            ORDER BY created_at ASC, id ASC
            LIMIT $5
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(symbol)
            .bind(strategy)
            .bind(after.map(|(t, _)| t))
            .bind(after.map(|(_, id)| id))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(order_from_row).collect()
    }

    /// Single conditional UPDATE. SET expressions read the pre-update row, so
    /// `state_entered_at` only moves when the state actually changes.
    #[instrument(skip(self, patch))]
    async fn compare_and_move(
        &self,
        order_id: Uuid,
        from: QueueState,
        to: QueueState,
        patch: &OrderPatch,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let appended: Vec<&ExecutionAttempt> = patch.attempt.iter().collect();
        let sql = format!(
            r#"
            UPDATE orders SET
                state = $3,
                state_entered_at = CASE WHEN state = $3 THEN state_entered_at ELSE $4 END,
                updated_at = $4,
                matched_signal_seq = COALESCE($5, matched_signal_seq),
                matched_at = COALESCE($6, matched_at),
                exchange_ref = COALESCE($7, exchange_ref),
                last_error = COALESCE($8, last_error),
                attempts = attempts + $9,
                attempt_history = attempt_history || $10::jsonb,
                next_attempt_at = $11
            WHERE id = $1 AND state = $2
              AND ($12::int IS NULL OR attempts = $12)
            RETURNING {ORDER_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(order_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(now)
            .bind(patch.matched_signal_seq)
            .bind(patch.matched_at)
            .bind(&patch.exchange_ref)
            .bind(&patch.last_error)
            .bind(i32::from(patch.increment_attempts))
            .bind(Json(appended))
            .bind(patch.next_attempt_at)
            .bind(patch.expected_attempts.map(|n| n as i32))
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return order_from_row(&row);
        }

        // Lost the race (state or attempt counter moved) or the order is gone
        match self.current_state(order_id).await? {
            Some(actual) => Err(OrderError::StaleState {
                order_id,
                expected: from,
                actual,
            }
            .into()),
            None => Err(OrderError::NotFound { order_id }.into()),
        }
    }

    async fn executable(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE state = 'matched'
              AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
            ORDER BY COALESCE(matched_at, updated_at) ASC, id ASC
            LIMIT $2
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn orders_by_owner(&self, owner_id: &str) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE owner_id = $1 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn queue_stats(&self, now: DateTime<Utc>) -> Result<QueueStats> {
        let rows = sqlx::query(
            r#"
            SELECT state,
                   COUNT(*) AS depth,
                   AVG(EXTRACT(EPOCH FROM ($1 - state_entered_at)))::float8 AS avg_secs
            FROM orders
            GROUP BY state
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for state in QueueState::ALL {
            stats.depths.insert(state, 0);
        }

        for row in &rows {
            let state = parse_state(&row.try_get::<String, _>("state")?)?;
            let depth: i64 = row.try_get("depth")?;
            stats.depths.insert(state, depth.max(0) as u64);
            if !state.is_terminal() {
                let avg: Option<f64> = row.try_get("avg_secs")?;
                stats
                    .avg_time_in_state_secs
                    .insert(state, avg.unwrap_or(0.0).max(0.0));
            }
        }

        let signals: i64 = sqlx::query("SELECT COUNT(*) AS n FROM signals")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        stats.signals_stored = signals.max(0) as u64;

        Ok(stats)
    }

    async fn purge_terminal_orders(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM orders
            WHERE state IN ('executed', 'failed', 'cancelled')
              AND updated_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ==================== Signals ====================

    /// Expired rows holding the fingerprint are removed in the same transaction,
    /// so the unique index only ever guards live signals.
    #[instrument(skip(self, signal), fields(fingerprint = %signal.fingerprint))]
    async fn insert_signal(&self, signal: NewSignal, now: DateTime<Utc>) -> Result<SignalInsert> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SIGNAL_INSERT_LOCK)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM signals WHERE fingerprint = $1 AND expires_at <= $2")
            .bind(&signal.fingerprint)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            r#"
            INSERT INTO signals (
                fingerprint, source, symbol, strategy, direction, strength, price, timeframe,
                extra, received_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (fingerprint) DO NOTHING
            RETURNING {SIGNAL_COLUMNS}
            "#
        );

        let inserted = sqlx::query(&sql)
            .bind(&signal.fingerprint)
            .bind(&signal.source)
            .bind(&signal.symbol)
            .bind(&signal.strategy)
            .bind(signal.direction.as_str())
            .bind(signal.strength)
            .bind(signal.price)
            .bind(&signal.timeframe)
            .bind(&signal.extra)
            .bind(signal.received_at)
            .bind(signal.expires_at)
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match inserted {
            Some(row) => SignalInsert::Inserted(signal_from_row(&row)?),
            None => {
                let seq: i64 = sqlx::query("SELECT seq FROM signals WHERE fingerprint = $1")
                    .bind(&signal.fingerprint)
                    .fetch_one(&mut *tx)
                    .await?
                    .try_get("seq")?;
                SignalInsert::Duplicate { seq }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn signals_since(
        &self,
        cursor: SignalCursor,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Signal>> {
        let sql = format!(
            r#"
            SELECT {SIGNAL_COLUMNS}
            FROM signals
            WHERE seq > $1 AND expires_at > $2
            ORDER BY seq ASC
            LIMIT $3
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(cursor.seq())
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(signal_from_row).collect()
    }

    async fn purge_expired_signals(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM signals WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        debug!("Purged {} expired signals", result.rows_affected());
        Ok(result.rows_affected())
    }

    // ==================== Consumer cursors ====================

    async fn load_cursor(&self, consumer: &str) -> Result<SignalCursor> {
        let row = sqlx::query("SELECT last_seq FROM consumer_cursors WHERE consumer = $1")
            .bind(consumer)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(SignalCursor(r.try_get("last_seq")?)),
            None => Ok(SignalCursor::START),
        }
    }

    /// Upsert that never moves a cursor backwards
    async fn save_cursor(&self, consumer: &str, cursor: SignalCursor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO consumer_cursors (consumer, last_seq, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (consumer) DO UPDATE SET
                last_seq = GREATEST(consumer_cursors.last_seq, EXCLUDED.last_seq),
                updated_at = NOW()
            "#,
        )
        .bind(consumer)
        .bind(cursor.seq())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
