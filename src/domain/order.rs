use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::condition::ConditionSet;
use super::state::QueueState;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderSide {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(format!("Unknown side: {}", s)),
        }
    }
}

/// Order kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
    Stop,
    Conditional,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "market",
            OrderKind::Limit => "limit",
            OrderKind::Stop => "stop",
            OrderKind::Conditional => "conditional",
        }
    }

    /// Kinds that cannot be placed without a price
    pub fn requires_price(&self) -> bool {
        matches!(self, OrderKind::Limit | OrderKind::Stop)
    }
}

impl TryFrom<&str> for OrderKind {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "market" => Ok(OrderKind::Market),
            "limit" => Ok(OrderKind::Limit),
            "stop" => Ok(OrderKind::Stop),
            "conditional" => Ok(OrderKind::Conditional),
            _ => Err(format!("Unknown order kind: {}", s)),
        }
    }
}

/// Classification of a failed execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// Transient: network, rate limit, timeout. Retried on a later tick.
    Retryable,
    /// Permanent: validation rejection from the exchange, unknown symbol.
    NonRetryable,
}

/// One execution attempt, kept on the order for user visibility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    /// 1-based attempt number
    pub number: u32,
    pub at: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ExecutionErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_ref: Option<String>,
}

/// Order submission request (what the user wants)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub owner_id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(default = "default_kind")]
    pub kind: OrderKind,
    pub quantity: Decimal,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Strategy bucket; `None` makes the order a candidate for every strategy
    /// on its symbol, leaving the decision to the condition set
    #[serde(default)]
    pub strategy: Option<String>,
    pub conditions: ConditionSet,
}

fn default_kind() -> OrderKind {
    OrderKind::Market
}

impl NewOrder {
    pub fn market(
        owner_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        conditions: ConditionSet,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            quantity,
            limit_price: None,
            strategy: None,
            conditions,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn with_limit_price(mut self, price: Decimal) -> Self {
        self.kind = OrderKind::Limit;
        self.limit_price = Some(price);
        self
    }
}

/// Order (tracked in the queue store)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub owner_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub strategy: Option<String>,
    pub conditions: ConditionSet,
    pub state: QueueState,
    pub attempts: u32,
    pub matched_signal_seq: Option<i64>,
    pub matched_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub exchange_ref: Option<String>,
    pub last_error: Option<String>,
    pub attempt_history: Vec<ExecutionAttempt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state_entered_at: DateTime<Utc>,
}

impl Order {
    pub fn from_request(request: NewOrder) -> Self {
        Self::from_request_at(request, Utc::now())
    }

    pub fn from_request_at(request: NewOrder, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: request.owner_id.trim().to_string(),
            symbol: request.symbol.trim().to_uppercase(),
            side: request.side,
            kind: request.kind,
            quantity: request.quantity,
            limit_price: request.limit_price,
            strategy: request
                .strategy
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            conditions: request.conditions,
            state: QueueState::Pending,
            attempts: 0,
            matched_signal_seq: None,
            matched_at: None,
            next_attempt_at: None,
            exchange_ref: None,
            last_error: None,
            attempt_history: Vec::new(),
            created_at: now,
            updated_at: now,
            state_entered_at: now,
        }
    }

    /// Calculate the notional value of the order, when priced
    pub fn notional(&self) -> Option<Decimal> {
        self.limit_price.map(|p| p * self.quantity)
    }

    /// Is the order's retry backoff over?
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |t| t <= now)
    }

    /// Strategy bucket check used by eligible-order listing
    pub fn in_bucket(&self, symbol: &str, strategy: &str) -> bool {
        self.symbol.eq_ignore_ascii_case(symbol)
            && self.strategy.as_deref().map_or(true, |s| s == strategy)
    }
}

/// Field mutation applied atomically together with a state transition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderPatch {
    pub matched_signal_seq: Option<i64>,
    pub matched_at: Option<DateTime<Utc>>,
    pub exchange_ref: Option<String>,
    pub last_error: Option<String>,
    pub increment_attempts: bool,
    pub attempt: Option<ExecutionAttempt>,
    /// Replaces the stored value; `None` clears any pending backoff
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Human-readable reason carried to the notifier
    pub reason: Option<String>,
    /// Extra precondition next to the state: the stored attempt counter must
    /// still equal the one the decision was made from
    pub expected_attempts: Option<u32>,
}

impl OrderPatch {
    pub fn matched(signal_seq: i64, at: DateTime<Utc>) -> Self {
        Self {
            matched_signal_seq: Some(signal_seq),
            matched_at: Some(at),
            reason: Some(format!("matched signal #{}", signal_seq)),
            ..Default::default()
        }
    }

    pub fn executed(attempt: ExecutionAttempt) -> Self {
        Self {
            exchange_ref: attempt.exchange_ref.clone(),
            increment_attempts: true,
            reason: Some("executed".to_string()),
            attempt: Some(attempt),
            ..Default::default()
        }
    }

    pub fn retry(attempt: ExecutionAttempt, next_attempt_at: DateTime<Utc>) -> Self {
        Self {
            last_error: attempt.message.clone(),
            increment_attempts: true,
            next_attempt_at: Some(next_attempt_at),
            reason: Some(format!("attempt {} failed, will retry", attempt.number)),
            attempt: Some(attempt),
            ..Default::default()
        }
    }

    pub fn failed(attempt: ExecutionAttempt) -> Self {
        let message = attempt
            .message
            .clone()
            .unwrap_or_else(|| "execution failed".to_string());
        Self {
            last_error: Some(message.clone()),
            increment_attempts: true,
            reason: Some(message),
            attempt: Some(attempt),
            ..Default::default()
        }
    }

    pub fn cancelled(owner_id: &str) -> Self {
        Self {
            reason: Some(format!("cancelled by {}", owner_id)),
            ..Default::default()
        }
    }

    /// Pin the move to the attempt counter observed in `order`
    pub fn observed(mut self, order: &Order) -> Self {
        self.expected_attempts = Some(order.attempts);
        self
    }

    /// Does `order` still satisfy this patch's attempt precondition?
    pub fn attempts_match(&self, order: &Order) -> bool {
        self.expected_attempts.map_or(true, |n| n == order.attempts)
    }

    /// Apply the patch and the move to `to` on an in-memory copy.
    ///
    /// Storage backends must produce exactly this result in one atomic step.
    pub fn apply(&self, order: &mut Order, to: QueueState, now: DateTime<Utc>) {
        if order.state != to {
            order.state_entered_at = now;
        }
        order.state = to;
        order.updated_at = now;
        if let Some(seq) = self.matched_signal_seq {
            order.matched_signal_seq = Some(seq);
        }
        if let Some(at) = self.matched_at {
            order.matched_at = Some(at);
        }
        if let Some(r) = &self.exchange_ref {
            order.exchange_ref = Some(r.clone());
        }
        if let Some(e) = &self.last_error {
            order.last_error = Some(e.clone());
        }
        if self.increment_attempts {
            order.attempts += 1;
        }
        if let Some(a) = &self.attempt {
            order.attempt_history.push(a.clone());
        }
        order.next_attempt_at = self.next_attempt_at;
    }
}
