#![allow(dead_code)]

use rust_decimal_macros::dec;
use sigmatch::adapters::MemoryQueueStore;
use sigmatch::domain::{Condition, ConditionSet, Direction, NewOrder, OrderSide, SignalInput};
use sigmatch::engine::{EngineSettings, MatchingEngine};
use sigmatch::execution::ExecutionAdapter;
use sigmatch::queue::OrderRepository;
use sigmatch::services::{ChannelNotifier, SignalIntake, StateChangeEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub struct Harness {
    pub store: Arc<MemoryQueueStore>,
    pub notifier: ChannelNotifier,
    pub repo: Arc<OrderRepository>,
    pub intake: Arc<SignalIntake>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryQueueStore::new()))
    }

    pub fn with_store(store: Arc<MemoryQueueStore>) -> Self {
        let notifier = ChannelNotifier::new(1024);
        let repo = Arc::new(
            OrderRepository::new(store.clone(), Arc::new(notifier.clone()), Duration::from_secs(1))
                .with_page_size(4),
        );
        let intake = Arc::new(
            SignalIntake::new(store.clone(), Duration::from_secs(1))
                .with_dedup_window(Duration::from_secs(60))
                .with_ttl(Duration::from_secs(300)),
        );
        Self {
            store,
            notifier,
            repo,
            intake,
        }
    }

    pub fn engine(&self, adapter: Arc<dyn ExecutionAdapter>, settings: EngineSettings) -> MatchingEngine {
        MatchingEngine::new(self.repo.clone(), self.intake.clone(), adapter, settings)
    }

    pub fn events(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.notifier.subscribe()
    }
}

/// Fast retries, no background sweeps or status lines
pub fn settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.retry.base_backoff = Duration::ZERO;
    settings.retry.max_backoff = Duration::ZERO;
    settings.execution_timeout = Duration::from_secs(1);
    settings.sweep_every_ticks = 0;
    settings.status_every_ticks = 0;
    settings
}

pub fn deadline() -> tokio::time::Instant {
    tokio::time::Instant::now() + Duration::from_secs(30)
}

/// BTCUSDT buy order waiting for a long MACD_RSI signal
pub fn macd_order(owner: &str) -> NewOrder {
    NewOrder::market(
        owner,
        "BTCUSDT",
        OrderSide::Buy,
        dec!(0.1),
        ConditionSet::default()
            .with(Condition::symbol("BTCUSDT"))
            .with(Condition::strategy("MACD_RSI"))
            .with(Condition::direction(Direction::Long, 0.5)),
    )
    .with_strategy("MACD_RSI")
}

pub fn macd_signal() -> SignalInput {
    SignalInput::new("BTCUSDT", "MACD_RSI", Direction::Long)
        .with_strength(0.8)
        .with_timeframe("1h")
}

pub fn drain(rx: &mut broadcast::Receiver<StateChangeEvent>) -> Vec<StateChangeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
