//! Order condition predicates
//!
//! Conditions are explicit tagged predicates over a [`Signal`]. A
//! [`ConditionSet`] is satisfied only when it is non-empty and every predicate
//! holds; there is no implicit or fuzzy matching. New predicate kinds are added
//! here and nowhere else.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::signal::{Direction, Signal};

/// A single boolean predicate over a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Signal symbol equals (ASCII case-insensitive)
    SymbolEquals { symbol: String },
    /// Signal strategy tag equals (exact)
    StrategyEquals { strategy: String },
    /// Signal points in `direction` with at least `min_strength`
    DirectionAtLeast {
        direction: Direction,
        #[serde(default)]
        min_strength: f64,
    },
    /// Signal strength regardless of direction
    StrengthAtLeast { min_strength: f64 },
    /// Signal timeframe is one of the listed values; a signal without a
    /// timeframe never satisfies this
    TimeframeIn { timeframes: Vec<String> },
    /// Signal came from a specific source
    SourceEquals { source: String },
}

impl Condition {
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Condition::SymbolEquals {
            symbol: symbol.into(),
        }
    }

    pub fn strategy(strategy: impl Into<String>) -> Self {
        Condition::StrategyEquals {
            strategy: strategy.into(),
        }
    }

    pub fn direction(direction: Direction, min_strength: f64) -> Self {
        Condition::DirectionAtLeast {
            direction,
            min_strength,
        }
    }

    pub fn timeframes<I, S>(timeframes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Condition::TimeframeIn {
            timeframes: timeframes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn evaluate(&self, signal: &Signal) -> bool {
        match self {
            Condition::SymbolEquals { symbol } => symbol.eq_ignore_ascii_case(&signal.symbol),
            Condition::StrategyEquals { strategy } => *strategy == signal.strategy,
            Condition::DirectionAtLeast {
                direction,
                min_strength,
            } => signal.direction == *direction && signal.strength >= *min_strength,
            Condition::StrengthAtLeast { min_strength } => signal.strength >= *min_strength,
            Condition::TimeframeIn { timeframes } => match &signal.timeframe {
                Some(tf) => timeframes.iter().any(|t| t.eq_ignore_ascii_case(tf)),
                None => false,
            },
            Condition::SourceEquals { source } => *source == signal.source,
        }
    }

    /// Strength threshold carried by this predicate, if any
    pub fn min_strength(&self) -> Option<f64> {
        match self {
            Condition::DirectionAtLeast { min_strength, .. }
            | Condition::StrengthAtLeast { min_strength } => Some(*min_strength),
            _ => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::SymbolEquals { symbol } => write!(f, "symbol == {}", symbol),
            Condition::StrategyEquals { strategy } => write!(f, "strategy == {}", strategy),
            Condition::DirectionAtLeast {
                direction,
                min_strength,
            } => write!(f, "direction == {} && strength >= {}", direction, min_strength),
            Condition::StrengthAtLeast { min_strength } => {
                write!(f, "strength >= {}", min_strength)
            }
            Condition::TimeframeIn { timeframes } => {
                write!(f, "timeframe in [{}]", timeframes.join(", "))
            }
            Condition::SourceEquals { source } => write!(f, "source == {}", source),
        }
    }
}

/// Conjunction of predicates attached to an order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet(Vec<Condition>);

impl ConditionSet {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self(conditions)
    }

    pub fn with(mut self, condition: Condition) -> Self {
        self.0.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    /// An empty set is permanently ineligible: it never matches anything.
    pub fn evaluate(&self, signal: &Signal) -> bool {
        !self.0.is_empty() && self.0.iter().all(|c| c.evaluate(signal))
    }

    /// First predicate that rejects the signal (for diagnostics)
    pub fn first_failure(&self, signal: &Signal) -> Option<&Condition> {
        self.0.iter().find(|c| !c.evaluate(signal))
    }
}

impl From<Vec<Condition>> for ConditionSet {
    fn from(conditions: Vec<Condition>) -> Self {
        Self(conditions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn signal(symbol: &str, strategy: &str, direction: Direction, strength: f64) -> Signal {
        let now = Utc::now();
        Signal {
            seq: 1,
            fingerprint: "fp".to_string(),
            source: "webhook".to_string(),
            symbol: symbol.to_string(),
            strategy: strategy.to_string(),
            direction,
            strength,
            price: None,
            timeframe: Some("15m".to_string()),
            extra: serde_json::Value::Null,
            received_at: now,
            expires_at: now + Duration::hours(1),
        }
    }

    #[test]
    fn test_empty_set_never_matches() {
        let s = signal("BTCUSDT", "MACD_RSI", Direction::Long, 1.0);
        assert!(!ConditionSet::default().evaluate(&s));
    }

    #[test]
    fn test_all_predicates_must_hold() {
        let s = signal("BTCUSDT", "MACD_RSI", Direction::Long, 0.7);
        let set = ConditionSet::default()
            .with(Condition::symbol("btcusdt"))
            .with(Condition::strategy("MACD_RSI"))
            .with(Condition::direction(Direction::Long, 0.6))
            .with(Condition::timeframes(["5m", "15m"]));
        assert!(set.evaluate(&s));

        let stricter = set.clone().with(Condition::StrengthAtLeast { min_strength: 0.8 });
        assert!(!stricter.evaluate(&s));
        assert_eq!(
            stricter.first_failure(&s),
            Some(&Condition::StrengthAtLeast { min_strength: 0.8 })
        );
    }

    #[test]
    fn test_strategy_match_is_exact() {
        let s = signal("BTCUSDT", "macd_rsi", Direction::Long, 1.0);
        assert!(!Condition::strategy("MACD_RSI").evaluate(&s));
    }

    #[test]
    fn test_direction_threshold() {
        let s = signal("BTCUSDT", "X", Direction::Short, 0.5);
        assert!(Condition::direction(Direction::Short, 0.5).evaluate(&s));
        assert!(!Condition::direction(Direction::Short, 0.51).evaluate(&s));
        assert!(!Condition::direction(Direction::Long, 0.0).evaluate(&s));
    }

    #[test]
    fn test_timeframe_requires_signal_timeframe() {
        let mut s = signal("BTCUSDT", "X", Direction::Long, 1.0);
        s.timeframe = None;
        assert!(!Condition::timeframes(["15m"]).evaluate(&s));
    }

    #[test]
    fn test_condition_json_shape() {
        let set: ConditionSet = serde_json::from_str(
            r#"[{"type":"strategy_equals","strategy":"MACD_RSI"},
                {"type":"direction_at_least","direction":"long"}]"#,
        )
        .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.iter().nth(1),
            Some(&Condition::direction(Direction::Long, 0.0))
        );
    }
}
