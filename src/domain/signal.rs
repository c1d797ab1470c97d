use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Signal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "buy", alias = "bullish")]
    Long,
    #[serde(alias = "sell", alias = "bearish")]
    Short,
    #[serde(alias = "flat")]
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Direction {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_lowercase().as_str() {
            "long" | "buy" | "bullish" => Ok(Direction::Long),
            "short" | "sell" | "bearish" => Ok(Direction::Short),
            "neutral" | "flat" => Ok(Direction::Neutral),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

fn default_source() -> String {
    "webhook".to_string()
}

fn default_strength() -> f64 {
    1.0
}

/// Signal payload as delivered by the ingestion boundary
///
/// Unknown fields are kept in `extra` and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalInput {
    #[serde(default = "default_source")]
    pub source: String,
    pub symbol: String,
    pub strategy: String,
    pub direction: Direction,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub timeframe: Option<String>,
    /// Source-assigned fingerprint; computed from the payload when absent
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SignalInput {
    pub fn new(
        symbol: impl Into<String>,
        strategy: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            source: default_source(),
            symbol: symbol.into(),
            strategy: strategy.into(),
            direction,
            strength: default_strength(),
            price: None,
            timeframe: None,
            fingerprint: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = Some(timeframe.into());
        self
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    /// Deduplication fingerprint
    ///
    /// SHA-256 over the source, the contract fields, the opaque extras and the
    /// coarse time bucket `received_at / window`. Two deliveries of the same
    /// payload inside one bucket collide; the same payload in a later bucket is a
    /// new signal.
    pub fn compute_fingerprint(&self, received_at: DateTime<Utc>, window: Duration) -> String {
        if let Some(fp) = self.fingerprint.as_deref().map(str::trim) {
            if !fp.is_empty() {
                return fp.to_string();
            }
        }

        let window_secs = window.num_seconds().max(1);
        let bucket = received_at.timestamp().div_euclid(window_secs);

        let mut hasher = Sha256::new();
        hasher.update(self.source.as_bytes());
        hasher.update(b"|");
        hasher.update(self.symbol.trim().to_uppercase().as_bytes());
        hasher.update(b"|");
        hasher.update(self.strategy.trim().as_bytes());
        hasher.update(b"|");
        hasher.update(self.direction.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.strength.to_bits().to_le_bytes());
        hasher.update(b"|");
        if let Some(price) = self.price {
            hasher.update(price.normalize().to_string().as_bytes());
        }
        hasher.update(b"|");
        if let Some(tf) = &self.timeframe {
            hasher.update(tf.trim().as_bytes());
        }
        hasher.update(b"|");
        // serde_json maps are ordered by key, so this is canonical
        hasher.update(serde_json::Value::Object(self.extra.clone()).to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(bucket.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A normalized, stored market signal (never mutated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Store-assigned, strictly increasing sequence id
    pub seq: i64,
    pub fingerprint: String,
    pub source: String,
    pub symbol: String,
    pub strategy: String,
    pub direction: Direction,
    pub strength: f64,
    pub price: Option<Decimal>,
    pub timeframe: Option<String>,
    pub extra: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Signal {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A signal ready to be written, before the store assigns `seq`
#[derive(Debug, Clone, PartialEq)]
pub struct NewSignal {
    pub fingerprint: String,
    pub source: String,
    pub symbol: String,
    pub strategy: String,
    pub direction: Direction,
    pub strength: f64,
    pub price: Option<Decimal>,
    pub timeframe: Option<String>,
    pub extra: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewSignal {
    pub fn into_signal(self, seq: i64) -> Signal {
        Signal {
            seq,
            fingerprint: self.fingerprint,
            source: self.source,
            symbol: self.symbol,
            strategy: self.strategy,
            direction: self.direction,
            strength: self.strength,
            price: self.price,
            timeframe: self.timeframe,
            extra: self.extra,
            received_at: self.received_at,
            expires_at: self.expires_at,
        }
    }
}

/// Position in the signal history up to which a consumer has processed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalCursor(pub i64);

impl SignalCursor {
    pub const START: SignalCursor = SignalCursor(0);

    pub fn seq(&self) -> i64 {
        self.0
    }

    /// Cursors only move forward
    pub fn advance_to(&mut self, seq: i64) {
        if seq > self.0 {
            self.0 = seq;
        }
    }
}

impl fmt::Display for SignalCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_fingerprint_stable_within_bucket() {
        let input = SignalInput::new("BTCUSDT", "MACD_RSI", Direction::Long);
        let window = Duration::seconds(60);

        let a = input.compute_fingerprint(at(1_200), window);
        let b = input.compute_fingerprint(at(1_259), window);
        let c = input.compute_fingerprint(at(1_260), window);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_covers_payload() {
        let window = Duration::seconds(60);
        let base = SignalInput::new("BTCUSDT", "MACD_RSI", Direction::Long);
        let short = SignalInput::new("BTCUSDT", "MACD_RSI", Direction::Short);
        let mut extra = base.clone();
        extra
            .extra
            .insert("note".to_string(), serde_json::json!("second alert"));

        let fp = base.compute_fingerprint(at(0), window);
        assert_ne!(fp, short.compute_fingerprint(at(0), window));
        assert_ne!(fp, extra.compute_fingerprint(at(0), window));
        assert_ne!(
            fp,
            base.clone()
                .with_source("tradingview")
                .compute_fingerprint(at(0), window)
        );
    }

    #[test]
    fn test_source_fingerprint_is_used_verbatim() {
        let mut input = SignalInput::new("ETHUSDT", "BREAKOUT", Direction::Short);
        input.fingerprint = Some("alert-42".to_string());
        assert_eq!(
            input.compute_fingerprint(at(99), Duration::seconds(60)),
            "alert-42"
        );
    }

    #[test]
    fn test_input_deserializes_with_passthrough_fields() {
        let raw = r#"{
            "symbol": "BTCUSDT",
            "strategy": "MACD_RSI",
            "direction": "buy",
            "timeframe": "15m",
            "exchange": "binance",
            "rsi": 28.5
        }"#;
        let input: SignalInput = serde_json::from_str(raw).unwrap();
        assert_eq!(input.direction, Direction::Long);
        assert_eq!(input.source, "webhook");
        assert_eq!(input.strength, 1.0);
        assert_eq!(input.timeframe.as_deref(), Some("15m"));
        assert_eq!(input.extra["exchange"], "binance");
        assert_eq!(input.extra.len(), 2);
    }

    #[test]
    fn test_cursor_only_moves_forward() {
        let mut cursor = SignalCursor::START;
        cursor.advance_to(5);
        cursor.advance_to(3);
        assert_eq!(cursor.seq(), 5);
    }
}
