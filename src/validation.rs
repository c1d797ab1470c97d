/// Input validation for the submission and ingestion boundaries
///
/// Orders and signals arrive from outside the core (chat commands, webhooks).
/// Nothing reaches the queue store without passing through here.
use crate::domain::{NewOrder, SignalInput};
use crate::error::{OrderError, Result, SigmatchError};
use rust_decimal::Decimal;

const MAX_FIELD_LEN: usize = 64;

/// Validate an order submission
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(OrderError::InvalidOrder)` describing the first problem found
pub fn validate_new_order(order: &NewOrder) -> Result<()> {
    let invalid = |msg: String| -> SigmatchError { OrderError::InvalidOrder(msg).into() };

    if order.owner_id.trim().is_empty() {
        return Err(invalid("owner id cannot be empty".to_string()));
    }

    if let Some(problem) = symbol_problem(&order.symbol) {
        return Err(invalid(problem));
    }

    if order.quantity <= Decimal::ZERO {
        return Err(invalid(format!(
            "quantity must be positive: {}",
            order.quantity
        )));
    }

    if let Some(price) = order.limit_price {
        if price <= Decimal::ZERO {
            return Err(invalid(format!("limit price must be positive: {}", price)));
        }
    } else if order.kind.requires_price() {
        return Err(invalid(format!(
            "{} order requires a limit price",
            order.kind.as_str()
        )));
    }

    if order.conditions.is_empty() {
        return Err(invalid(
            "condition set must contain at least one predicate".to_string(),
        ));
    }

    for condition in order.conditions.iter() {
        if let Some(min) = condition.min_strength() {
            if !min.is_finite() || !(0.0..=1.0).contains(&min) {
                return Err(invalid(format!(
                    "strength threshold must be within 0..=1: {}",
                    condition
                )));
            }
        }
    }

    Ok(())
}

/// Validate a signal payload before it is fingerprinted and stored
pub fn validate_signal(input: &SignalInput) -> Result<()> {
    validate_symbol(&input.symbol)?;

    if input.strategy.trim().is_empty() {
        return Err(SigmatchError::InvalidSignal(
            "strategy cannot be empty".to_string(),
        ));
    }

    if input.source.trim().is_empty() {
        return Err(SigmatchError::InvalidSignal(
            "source cannot be empty".to_string(),
        ));
    }

    if !input.strength.is_finite() {
        return Err(SigmatchError::InvalidSignal(format!(
            "strength must be finite: {}",
            input.strength
        )));
    }

    if let Some(tf) = &input.timeframe {
        if tf.trim().is_empty() {
            return Err(SigmatchError::InvalidSignal(
                "timeframe cannot be blank".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validate a trading symbol (e.g. `BTCUSDT`)
pub fn validate_symbol(symbol: &str) -> Result<()> {
    symbol_problem(symbol).map_or(Ok(()), |msg| Err(SigmatchError::InvalidSignal(msg)))
}

/// First thing wrong with `symbol`, unwrapped so each boundary picks its error
fn symbol_problem(symbol: &str) -> Option<String> {
    let symbol = symbol.trim();

    if symbol.is_empty() {
        return Some("symbol cannot be empty".to_string());
    }

    if symbol.len() > MAX_FIELD_LEN {
        return Some(format!(
            "symbol too long: {} characters (max {})",
            symbol.len(),
            MAX_FIELD_LEN
        ));
    }

    if !symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
    {
        return Some(format!("symbol contains invalid characters: {}", symbol));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Condition, ConditionSet, Direction, OrderKind, OrderSide};
    use rust_decimal_macros::dec;

    fn order() -> NewOrder {
        NewOrder::market(
            "alice",
            "BTCUSDT",
            OrderSide::Buy,
            dec!(1),
            ConditionSet::default().with(Condition::strategy("MACD_RSI")),
        )
    }

    fn is_invalid_order(result: Result<()>) -> bool {
        matches!(result, Err(SigmatchError::Order(OrderError::InvalidOrder(_))))
    }

    #[test]
    fn test_valid_order() {
        assert!(validate_new_order(&order()).is_ok());
        assert!(validate_new_order(&order().with_limit_price(dec!(65000))).is_ok());
    }

    #[test]
    fn test_empty_conditions_rejected() {
        let mut o = order();
        o.conditions = ConditionSet::default();
        assert!(is_invalid_order(validate_new_order(&o)));
    }

    #[test]
    fn test_non_positive_quantity_rejected() {
        let mut o = order();
        o.quantity = dec!(0);
        assert!(is_invalid_order(validate_new_order(&o)));
        o.quantity = dec!(-1);
        assert!(is_invalid_order(validate_new_order(&o)));
    }

    #[test]
    fn test_limit_without_price_rejected() {
        let mut o = order();
        o.kind = OrderKind::Limit;
        assert!(is_invalid_order(validate_new_order(&o)));
    }

    #[test]
    fn test_strength_threshold_range() {
        let o = NewOrder::market(
            "alice",
            "BTCUSDT",
            OrderSide::Buy,
            dec!(1),
            ConditionSet::default().with(Condition::direction(Direction::Long, 1.5)),
        );
        assert!(is_invalid_order(validate_new_order(&o)));
    }

    #[test]
    fn test_bad_symbol_order_error_reads_once() {
        let mut o = order();
        o.symbol = "BTC USDT".to_string();
        let err = validate_new_order(&o).unwrap_err();
        assert!(matches!(err, SigmatchError::Order(OrderError::InvalidOrder(_))));
        assert_eq!(
            err.to_string(),
            "Invalid order: symbol contains invalid characters: BTC USDT"
        );
    }

    #[test]
    fn test_signal_validation() {
        let good = SignalInput::new("BTCUSDT", "MACD_RSI", Direction::Long);
        assert!(validate_signal(&good).is_ok());

        let no_symbol = SignalInput::new("  ", "MACD_RSI", Direction::Long);
        assert!(matches!(
            validate_signal(&no_symbol),
            Err(SigmatchError::InvalidSignal(_))
        ));

        let no_strategy = SignalInput::new("BTCUSDT", "", Direction::Long);
        assert!(validate_signal(&no_strategy).is_err());

        let nan = good.clone().with_strength(f64::NAN);
        assert!(validate_signal(&nan).is_err());
    }

    #[test]
    fn test_symbol_characters() {
        assert!(validate_symbol("BTC-PERP").is_ok());
        assert!(validate_symbol("ETH/USDT").is_ok());
        assert!(validate_symbol("BTC USDT").is_err());
    }
}
