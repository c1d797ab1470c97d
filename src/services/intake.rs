//! Signal intake
//!
//! Validates and fingerprints incoming signals, then appends them to the
//! store's signal history with a TTL. Re-deliveries inside the dedup window are
//! reported as duplicates and never stored twice.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::{NewSignal, Signal, SignalCursor, SignalInput};
use crate::error::{Result, SigmatchError};
use crate::queue::{self, QueueStore, SignalInsert};
use crate::validation;

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_SIGNAL_TTL: Duration = Duration::from_secs(900);

/// Outcome of recording one signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Accepted { seq: i64, fingerprint: String },
    /// Already seen inside the window; nothing was written
    Duplicate { seq: i64, fingerprint: String },
}

impl RecordOutcome {
    pub fn seq(&self) -> i64 {
        match self {
            RecordOutcome::Accepted { seq, .. } | RecordOutcome::Duplicate { seq, .. } => *seq,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, RecordOutcome::Duplicate { .. })
    }
}

pub struct SignalIntake {
    store: Arc<dyn QueueStore>,
    dedup_window: Duration,
    ttl: Duration,
    op_timeout: Duration,
}

impl SignalIntake {
    pub fn new(store: Arc<dyn QueueStore>, op_timeout: Duration) -> Self {
        Self {
            store,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            ttl: DEFAULT_SIGNAL_TTL,
            op_timeout,
        }
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn record(&self, input: SignalInput) -> Result<RecordOutcome> {
        self.record_at(input, Utc::now()).await
    }

    /// Record a signal as if it arrived at `received_at`
    pub async fn record_at(
        &self,
        input: SignalInput,
        received_at: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        validation::validate_signal(&input)?;

        let window = to_chrono(self.dedup_window)?;
        let ttl = to_chrono(self.ttl)?;
        let fingerprint = input.compute_fingerprint(received_at, window);

        let signal = NewSignal {
            fingerprint: fingerprint.clone(),
            source: input.source.trim().to_string(),
            symbol: input.symbol.trim().to_uppercase(),
            strategy: input.strategy.trim().to_string(),
            direction: input.direction,
            strength: input.strength,
            price: input.price,
            timeframe: input.timeframe.map(|tf| tf.trim().to_string()),
            extra: serde_json::Value::Object(input.extra),
            received_at,
            expires_at: received_at + ttl,
        };

        let inserted = queue::bounded(
            "insert_signal",
            self.op_timeout,
            self.store.insert_signal(signal, received_at),
        )
        .await?;

        match inserted {
            SignalInsert::Inserted(stored) => {
                info!(
                    seq = stored.seq,
                    symbol = %stored.symbol,
                    strategy = %stored.strategy,
                    direction = %stored.direction,
                    "Signal accepted"
                );
                Ok(RecordOutcome::Accepted {
                    seq: stored.seq,
                    fingerprint,
                })
            }
            SignalInsert::Duplicate { seq } => {
                debug!(seq, fingerprint = %fingerprint, "Duplicate signal ignored");
                Ok(RecordOutcome::Duplicate { seq, fingerprint })
            }
        }
    }

    /// Unexpired signals after `cursor`, oldest first
    pub async fn recent_since(&self, cursor: SignalCursor, limit: usize) -> Result<Vec<Signal>> {
        self.recent_since_at(cursor, Utc::now(), limit).await
    }

    pub async fn recent_since_at(
        &self,
        cursor: SignalCursor,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Signal>> {
        queue::bounded(
            "signals_since",
            self.op_timeout,
            self.store.signals_since(cursor, now, limit),
        )
        .await
    }

    /// Retention sweep for expired signals
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let purged = queue::bounded(
            "purge_expired_signals",
            self.op_timeout,
            self.store.purge_expired_signals(now),
        )
        .await?;
        if purged > 0 {
            info!("Purged {} expired signals", purged);
        }
        Ok(purged)
    }

    pub async fn load_cursor(&self, consumer: &str) -> Result<SignalCursor> {
        queue::bounded("load_cursor", self.op_timeout, self.store.load_cursor(consumer)).await
    }

    pub async fn save_cursor(&self, consumer: &str, cursor: SignalCursor) -> Result<()> {
        queue::bounded(
            "save_cursor",
            self.op_timeout,
            self.store.save_cursor(consumer, cursor),
        )
        .await
    }
}

fn to_chrono(d: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(d)
        .map_err(|e| SigmatchError::Validation(format!("duration out of range: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryQueueStore;
    use crate::domain::Direction;

    fn intake() -> SignalIntake {
        SignalIntake::new(Arc::new(MemoryQueueStore::new()), Duration::from_secs(1))
            .with_dedup_window(Duration::from_secs(60))
            .with_ttl(Duration::from_secs(300))
    }

    fn input() -> SignalInput {
        SignalInput::new("btcusdt", "MACD_RSI", Direction::Long).with_timeframe("1h")
    }

    #[tokio::test]
    async fn test_same_payload_inside_window_is_duplicate() {
        let intake = intake();
        let now = Utc::now();

        let first = intake.record_at(input(), now).await.unwrap();
        let second = intake.record_at(input(), now).await.unwrap();

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.seq(), second.seq());

        let stored = intake.recent_since_at(SignalCursor::START, now, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].symbol, "BTCUSDT");
    }

    #[tokio::test]
    async fn test_source_fingerprint_used_verbatim() {
        let intake = intake();
        let mut delivery = input();
        delivery.fingerprint = Some("tv-alert-991".to_string());

        let outcome = intake.record(delivery).await.unwrap();
        assert_eq!(
            outcome,
            RecordOutcome::Accepted {
                seq: 1,
                fingerprint: "tv-alert-991".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_signal_rejected_before_storage() {
        let intake = intake();
        let bad = SignalInput::new("BTCUSDT", "  ", Direction::Long);

        assert!(matches!(
            intake.record(bad).await,
            Err(SigmatchError::InvalidSignal(_))
        ));
        let stored = intake.recent_since(SignalCursor::START, 10).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_recent_since_respects_cursor_and_ttl() {
        let intake = intake();
        let now = Utc::now();
        let a = intake.record_at(input(), now).await.unwrap();
        let b = intake
            .record_at(input().with_strength(0.4), now)
            .await
            .unwrap();

        let after_a = intake
            .recent_since_at(SignalCursor(a.seq()), now, 10)
            .await
            .unwrap();
        assert_eq!(after_a.len(), 1);
        assert_eq!(after_a[0].seq, b.seq());

        let later = now + chrono::Duration::seconds(301);
        assert!(intake
            .recent_since_at(SignalCursor::START, later, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(intake.purge_expired(later).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cursor_round_trip() {
        let intake = intake();
        assert_eq!(intake.load_cursor("engine").await.unwrap(), SignalCursor::START);
        intake.save_cursor("engine", SignalCursor(5)).await.unwrap();
        intake.save_cursor("engine", SignalCursor(3)).await.unwrap();
        assert_eq!(intake.load_cursor("engine").await.unwrap(), SignalCursor(5));
    }
}
