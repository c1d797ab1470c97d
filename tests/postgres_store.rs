//! PostgresQueueStore against a live database
//!
//! Set `SIGMATCH_TEST_DATABASE_URL` to run these; without it every test
//! returns early. Each test works in its own symbol and fingerprint space so
//! they can share one database.

use chrono::{DateTime, Duration, Utc};
use rust_decimal_macros::dec;
use sigmatch::domain::{Condition, ConditionSet, NewOrder, NewSignal, OrderSide};
use sigmatch::queue::SignalInsert;
use sigmatch::{
    Direction, Order, OrderError, OrderPatch, PostgresQueueStore, QueueState, QueueStore,
    SigmatchError, SignalCursor,
};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

async fn store() -> Option<PostgresQueueStore> {
    let Ok(url) = std::env::var("SIGMATCH_TEST_DATABASE_URL") else {
        eprintln!("SIGMATCH_TEST_DATABASE_URL not set, skipping");
        return None;
    };
    let store = PostgresQueueStore::new(&url, 8).await.unwrap();
    store.migrate().await.unwrap();
    Some(store)
}

fn unique(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4().simple()).to_uppercase()
}

fn order_at(symbol: &str, created_at: DateTime<Utc>) -> Order {
    Order::from_request_at(
        NewOrder::market(
            "alice",
            symbol,
            OrderSide::Buy,
            dec!(1),
            ConditionSet::default().with(Condition::strategy("MACD_RSI")),
        ),
        created_at,
    )
}

fn new_signal(fingerprint: &str, received_at: DateTime<Utc>, ttl: Duration) -> NewSignal {
    NewSignal {
        fingerprint: fingerprint.to_string(),
        source: "webhook".to_string(),
        symbol: "BTCUSDT".to_string(),
        strategy: "MACD_RSI".to_string(),
        direction: Direction::Long,
        strength: 1.0,
        price: None,
        timeframe: None,
        extra: serde_json::json!({}),
        received_at,
        expires_at: received_at + ttl,
    }
}

async fn insert(store: &PostgresQueueStore, signal: NewSignal) -> i64 {
    let now = signal.received_at;
    match store.insert_signal(signal, now).await.unwrap() {
        SignalInsert::Inserted(s) => s.seq,
        SignalInsert::Duplicate { seq } => panic!("unexpected duplicate of #{}", seq),
    }
}

#[tokio::test]
async fn test_compare_and_move_conflicts() {
    let Some(store) = store().await else { return };
    let order = order_at(&unique("CAS"), Utc::now());
    store.insert_order(&order).await.unwrap();

    let now = Utc::now();
    let moved = store
        .compare_and_move(
            order.id,
            QueueState::Pending,
            QueueState::Matched,
            &OrderPatch::matched(7, now),
            now,
        )
        .await
        .unwrap();
    assert_eq!(moved.state, QueueState::Matched);
    assert_eq!(moved.matched_signal_seq, Some(7));

    let err = store
        .compare_and_move(
            order.id,
            QueueState::Pending,
            QueueState::Cancelled,
            &OrderPatch::cancelled("alice"),
            now,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SigmatchError::Order(OrderError::StaleState {
            expected: QueueState::Pending,
            actual: QueueState::Matched,
            ..
        })
    ));

    let err = store
        .compare_and_move(
            Uuid::new_v4(),
            QueueState::Pending,
            QueueState::Matched,
            &OrderPatch::matched(7, now),
            now,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SigmatchError::Order(OrderError::NotFound { .. })));

    let stored = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.state, QueueState::Matched);
}

#[tokio::test]
async fn test_retry_move_checks_attempt_counter() {
    let Some(store) = store().await else { return };
    let mut order = order_at(&unique("ATT"), Utc::now());
    order.state = QueueState::Matched;
    store.insert_order(&order).await.unwrap();

    let now = Utc::now();
    let retry = OrderPatch {
        increment_attempts: true,
        ..Default::default()
    }
    .observed(&order);

    let first = store
        .compare_and_move(order.id, QueueState::Matched, QueueState::Matched, &retry, now)
        .await
        .unwrap();
    assert_eq!(first.attempts, 1);

    let err = store
        .compare_and_move(order.id, QueueState::Matched, QueueState::Matched, &retry, now)
        .await
        .unwrap_err();
    assert!(err.is_stale());
    assert_eq!(store.get_order(order.id).await.unwrap().unwrap().attempts, 1);
}

#[tokio::test]
async fn test_pending_page_keyset_across_pages() {
    let Some(store) = store().await else { return };
    let symbol = unique("PG");
    let t0 = Utc::now();

    let orders: Vec<Order> = (0..5)
        .map(|i| order_at(&symbol, t0 + Duration::seconds(i)))
        .collect();
    for o in orders.iter().rev() {
        store.insert_order(o).await.unwrap();
    }

    let mut seen = Vec::new();
    let mut after = None;
    loop {
        let page = store
            .pending_page(&symbol, "MACD_RSI", after, 2)
            .await
            .unwrap();
        let Some(last) = page.last() else { break };
        after = Some((last.created_at, last.id));
        seen.extend(page.iter().map(|o| o.id));
    }

    let expected: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    assert_eq!(seen, expected);

    // Other buckets stay out of the listing
    let other = store
        .pending_page(&symbol, "BREAKOUT", None, 10)
        .await
        .unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn test_signal_dedup_and_expiry_replacement() {
    let Some(store) = store().await else { return };
    let fingerprint = unique("fp-");
    let t0 = Utc::now();
    let ttl = Duration::seconds(10);

    let first = insert(&store, new_signal(&fingerprint, t0, ttl)).await;

    let dup = store
        .insert_signal(new_signal(&fingerprint, t0, ttl), t0)
        .await
        .unwrap();
    assert_eq!(dup, SignalInsert::Duplicate { seq: first });

    let later = t0 + Duration::seconds(11);
    let replacement = insert(&store, new_signal(&fingerprint, later, ttl)).await;
    assert!(replacement > first);

    let visible = store
        .signals_since(SignalCursor(first - 1), later, 1000)
        .await
        .unwrap();
    assert!(visible.iter().all(|s| s.seq != first));
    assert!(visible.iter().any(|s| s.seq == replacement));
}

#[tokio::test]
async fn test_cursor_never_moves_backwards() {
    let Some(store) = store().await else { return };
    let consumer = unique("consumer-");

    assert_eq!(store.load_cursor(&consumer).await.unwrap(), SignalCursor::START);

    store.save_cursor(&consumer, SignalCursor(10)).await.unwrap();
    store.save_cursor(&consumer, SignalCursor(4)).await.unwrap();
    assert_eq!(store.load_cursor(&consumer).await.unwrap(), SignalCursor(10));

    store.save_cursor(&consumer, SignalCursor(12)).await.unwrap();
    assert_eq!(store.load_cursor(&consumer).await.unwrap(), SignalCursor(12));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reader_sees_every_concurrent_insert() {
    let Some(store) = store().await else { return };
    let store = Arc::new(store);
    let prefix = unique("burst-");
    let ttl = Duration::minutes(5);

    let start = insert(&store, new_signal(&format!("{}-start", prefix), Utc::now(), ttl)).await;

    let mut writers = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        let fingerprint = format!("{}-{}", prefix, i);
        writers.push(tokio::spawn(async move {
            insert(&store, new_signal(&fingerprint, Utc::now(), ttl)).await
        }));
    }

    // Poll while the writers race, advancing the cursor like an engine does
    let reader = {
        let store = store.clone();
        let prefix = prefix.clone();
        tokio::spawn(async move {
            let mut cursor = SignalCursor(start);
            let mut seen = HashSet::new();
            for _ in 0..200 {
                let batch = store.signals_since(cursor, Utc::now(), 1000).await.unwrap();
                for s in &batch {
                    assert!(s.seq > cursor.seq());
                    if s.fingerprint.starts_with(&prefix) {
                        seen.insert(s.seq);
                    }
                }
                if let Some(last) = batch.last() {
                    cursor.advance_to(last.seq);
                }
                if seen.len() == 32 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            seen
        })
    };

    let mut written = HashSet::new();
    for writer in writers {
        written.insert(writer.await.unwrap());
    }
    let seen = reader.await.unwrap();

    assert_eq!(written.len(), 32);
    assert_eq!(seen, written);
}
