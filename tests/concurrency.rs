//! Races between engines, transitions and owner cancellations

mod common;

use async_trait::async_trait;
use common::{deadline, drain, macd_order, macd_signal, settings, Harness};
use sigmatch::domain::{Order, OrderPatch, QueueState};
use sigmatch::execution::{DryRunAdapter, ExecutionAdapter, ExecutionResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Always fails transiently, slowly enough for two engines to overlap
#[derive(Default)]
struct FlakyExchange {
    calls: AtomicU32,
}

#[async_trait]
impl ExecutionAdapter for FlakyExchange {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn execute(&self, order: &Order) -> ExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        ExecutionResult::retryable(order.id, "502 bad gateway")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transitions_have_one_winner() {
    let h = Harness::new();
    let order = h.repo.submit(macd_order("alice")).await.unwrap();
    h.repo
        .transition(
            order.id,
            QueueState::Pending,
            QueueState::Matched,
            OrderPatch::matched(1, chrono::Utc::now()),
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let repo = h.repo.clone();
        let id = order.id;
        handles.push(tokio::spawn(async move {
            let to = if i % 2 == 0 {
                QueueState::Executed
            } else {
                QueueState::Cancelled
            };
            let patch = OrderPatch {
                reason: Some(format!("writer {}", i)),
                ..Default::default()
            };
            repo.transition(id, QueueState::Matched, to, patch).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(e.is_stale(), "unexpected error: {}", e),
        }
    }
    assert_eq!(winners, 1);
    assert!(h.repo.get(order.id).await.unwrap().state.is_terminal());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pending_race_between_match_and_cancel() {
    let h = Harness::new();

    for _ in 0..25 {
        let order = h.repo.submit(macd_order("alice")).await.unwrap();
        let (matcher, canceller) = (h.repo.clone(), h.repo.clone());
        let id = order.id;

        let matched = tokio::spawn(async move {
            matcher
                .transition(
                    id,
                    QueueState::Pending,
                    QueueState::Matched,
                    OrderPatch::matched(1, chrono::Utc::now()),
                )
                .await
        });
        let cancelled = tokio::spawn(async move {
            canceller
                .transition(
                    id,
                    QueueState::Pending,
                    QueueState::Cancelled,
                    OrderPatch::cancelled("alice"),
                )
                .await
        });

        let (matched, cancelled) = (matched.await.unwrap(), cancelled.await.unwrap());
        assert!(matched.is_ok() ^ cancelled.is_ok());

        let final_state = h.repo.get(id).await.unwrap().state;
        if matched.is_ok() {
            assert_eq!(final_state, QueueState::Matched);
        } else {
            assert_eq!(final_state, QueueState::Cancelled);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_owner_cancel_during_engine_tick_stays_consistent() {
    let h = Harness::new();
    let engine = Arc::new(h.engine(Arc::new(DryRunAdapter::new()), settings()));

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(h.repo.submit(macd_order("alice")).await.unwrap().id);
    }
    h.intake.record(macd_signal()).await.unwrap();

    let ticker = engine.clone();
    let tick = tokio::spawn(async move { ticker.tick().await });

    let mut cancel_results = HashMap::new();
    for id in &ids {
        cancel_results.insert(*id, h.repo.cancel(*id, "alice").await);
    }
    tick.await.unwrap().unwrap();

    for id in &ids {
        let order = h.repo.get(*id).await.unwrap();
        match &cancel_results[id] {
            Ok(_) => assert_eq!(order.state, QueueState::Cancelled),
            // Cancel only loses once execution has already settled the order
            Err(e) => {
                assert!(e.is_stale(), "unexpected error: {}", e);
                assert_eq!(order.state, QueueState::Executed);
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_engines_execute_each_order_once() {
    let h = Harness::new();
    let adapter = Arc::new(DryRunAdapter::new());

    let mut first = settings();
    first.consumer = "engine-a".to_string();
    first.execution_concurrency = 4;
    let mut second = settings();
    second.consumer = "engine-b".to_string();
    second.execution_concurrency = 4;

    let a = Arc::new(h.engine(adapter.clone(), first));
    let b = Arc::new(h.engine(adapter.clone(), second));

    for i in 0..20 {
        h.repo.submit(macd_order(&format!("user-{}", i))).await.unwrap();
    }
    let mut events = h.events();
    h.intake.record(macd_signal()).await.unwrap();

    for _ in 0..3 {
        let (ra, rb) = (a.clone(), b.clone());
        let (left, right) = tokio::join!(
            tokio::spawn(async move { ra.tick().await }),
            tokio::spawn(async move { rb.tick().await })
        );
        left.unwrap().unwrap();
        right.unwrap().unwrap();
    }

    let stats = h.repo.stats(chrono::Utc::now()).await.unwrap();
    assert_eq!(stats.depth(QueueState::Executed), 20);
    assert_eq!(stats.depth(QueueState::Matched), 0);
    assert_eq!(adapter.fill_count().await, 20);

    let executed: u64 = [&a, &b]
        .iter()
        .map(|e| e.metrics().orders_executed.load(Ordering::Relaxed))
        .sum();
    assert_eq!(executed, 20);

    let matched: u64 = [&a, &b]
        .iter()
        .map(|e| e.metrics().orders_matched.load(Ordering::Relaxed))
        .sum();
    assert_eq!(matched, 20);

    // One executed event per order, never two
    let mut per_order: HashMap<_, u32> = HashMap::new();
    for event in drain(&mut events) {
        if event.to() == QueueState::Executed {
            *per_order.entry(event.order_id).or_default() += 1;
        }
    }
    assert_eq!(per_order.len(), 20);
    assert!(per_order.values().all(|&n| n == 1));

    // The engines keep independent cursors over the same history
    assert_eq!(a.cursor().await.unwrap(), b.cursor().await.unwrap());
}

#[tokio::test]
async fn test_replayed_signal_is_harmless() {
    let h = Harness::new();
    let engine = h.engine(Arc::new(DryRunAdapter::new()), settings());

    let order = h.repo.submit(macd_order("alice")).await.unwrap();
    h.intake.record(macd_signal()).await.unwrap();
    engine.match_pending(deadline()).await.unwrap();

    // Simulate a crash before the cursor was saved
    h.intake
        .save_cursor("replayer", sigmatch::SignalCursor::START)
        .await
        .unwrap();
    let mut replay = settings();
    replay.consumer = "replayer".to_string();
    let replayer = h.engine(Arc::new(DryRunAdapter::new()), replay);

    let report = replayer.match_pending(deadline()).await.unwrap();
    assert_eq!(report.signals_processed, 1);
    assert_eq!(report.matched, 0);

    let current = h.repo.get(order.id).await.unwrap();
    assert_eq!(current.state, QueueState::Matched);
    assert_eq!(current.matched_signal_seq, Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_engines_never_exceed_max_attempts() {
    let h = Harness::new();
    let exchange = Arc::new(FlakyExchange::default());

    let mut first = settings();
    first.consumer = "engine-a".to_string();
    let mut second = settings();
    second.consumer = "engine-b".to_string();
    let a = Arc::new(h.engine(exchange.clone(), first));
    let b = Arc::new(h.engine(exchange.clone(), second));

    let order = h.repo.submit(macd_order("alice")).await.unwrap();
    h.intake.record(macd_signal()).await.unwrap();

    // Put the engines out of step: A matches and makes attempt 1 alone
    a.tick().await.unwrap();
    assert_eq!(h.repo.get(order.id).await.unwrap().attempts, 1);

    b.match_pending(deadline()).await.unwrap();
    for _ in 0..10 {
        if h.repo.get(order.id).await.unwrap().state == QueueState::Failed {
            break;
        }
        let (ra, rb) = (a.clone(), b.clone());
        let (left, right) = tokio::join!(
            tokio::spawn(async move { ra.tick().await }),
            tokio::spawn(async move { rb.tick().await })
        );
        left.unwrap().unwrap();
        right.unwrap().unwrap();
    }

    let failed = h.repo.get(order.id).await.unwrap();
    assert_eq!(failed.state, QueueState::Failed);
    assert_eq!(failed.attempts, 3);
    let numbers: Vec<u32> = failed.attempt_history.iter().map(|a| a.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    // Overlapping calls are allowed, only one result per attempt is recorded
    assert!(exchange.calls.load(Ordering::SeqCst) >= 3);
}
