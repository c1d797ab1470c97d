//! Matching engine
//!
//! One tick = matching phase (new signals against pending orders) followed by
//! an execution phase (due matched orders through the execution adapter). All
//! state lives in the queue store; the engine keeps only counters.

mod execution;
mod matching;

pub use execution::ExecutionReport;
pub use matching::MatchReport;

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::domain::SignalCursor;
use crate::error::Result;
use crate::execution::{ExecutionAdapter, GuardedExecutor, RetryPolicy};
use crate::queue::OrderRepository;
use crate::services::{EngineMetrics, MetricsSnapshot, SignalIntake};

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    pub tick_budget: Duration,
    pub signal_batch_size: usize,
    pub execution_batch_size: usize,
    pub execution_concurrency: usize,
    pub consumer: String,
    pub execution_timeout: Duration,
    pub retry: RetryPolicy,
    /// Run the retention sweep every N ticks (0 = never)
    pub sweep_every_ticks: u64,
    /// Age after which terminal orders are purged; `None` keeps them
    pub terminal_order_retention: Option<chrono::Duration>,
    /// Log a status line every N ticks (0 = never)
    pub status_every_ticks: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            tick_budget: config.tick_budget(),
            signal_batch_size: config.engine.signal_batch_size.max(1),
            execution_batch_size: config.engine.execution_batch_size.max(1),
            execution_concurrency: config.engine.execution_concurrency.max(1),
            consumer: config.engine.consumer.clone(),
            execution_timeout: config.execution_timeout(),
            retry: config.retry_policy(),
            sweep_every_ticks: config.retention.sweep_every_ticks,
            terminal_order_retention: config
                .retention
                .terminal_order_days
                .map(|days| chrono::Duration::days(i64::from(days))),
            status_every_ticks: config.engine.status_every_ticks,
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub matching: MatchReport,
    pub execution: ExecutionReport,
    pub signals_purged: u64,
    pub orders_purged: u64,
    pub budget_exceeded: bool,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.matching.signals_processed == 0 && self.execution.attempted == 0
    }
}

pub struct MatchingEngine {
    repo: Arc<OrderRepository>,
    intake: Arc<SignalIntake>,
    executor: GuardedExecutor,
    settings: EngineSettings,
    metrics: Arc<EngineMetrics>,
    ticks: AtomicU64,
}

impl MatchingEngine {
    pub fn new(
        repo: Arc<OrderRepository>,
        intake: Arc<SignalIntake>,
        adapter: Arc<dyn ExecutionAdapter>,
        settings: EngineSettings,
    ) -> Self {
        let executor = GuardedExecutor::new(adapter, settings.execution_timeout);
        Self {
            repo,
            intake,
            executor,
            settings,
            metrics: Arc::new(EngineMetrics::new()),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn repository(&self) -> &Arc<OrderRepository> {
        &self.repo
    }

    /// Persisted position of this engine's consumer in the signal history
    pub async fn cursor(&self) -> Result<SignalCursor> {
        self.intake.load_cursor(&self.settings.consumer).await
    }

    /// Run ticks at the configured interval until `shutdown` flips to true.
    ///
    /// A tick in progress always completes before the loop exits. Store
    /// failures abort only the tick they happen in.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            consumer = %self.settings.consumer,
            interval_ms = self.settings.tick_interval.as_millis() as u64,
            adapter = self.executor.adapter_name(),
            "Matching engine started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report.is_idle() => {}
                        Ok(report) => debug!(
                            tick = report.tick,
                            signals = report.matching.signals_processed,
                            matched = report.matching.matched,
                            executed = report.execution.executed,
                            retried = report.execution.retried,
                            failed = report.execution.failed,
                            "Tick complete"
                        ),
                        Err(e) => error!("Tick aborted: {}", e),
                    }
                    self.maybe_log_status().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Matching engine stopped");
    }

    /// One full tick: matching, execution, then retention when due
    pub async fn tick(&self) -> Result<TickReport> {
        let started = Instant::now();
        let deadline = started + self.settings.tick_budget;
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        let result = self.run_phases(tick, deadline).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_tick(elapsed_ms, result.is_ok()).await;

        if let Ok(report) = &result {
            if report.budget_exceeded {
                EngineMetrics::inc(&self.metrics.budget_overruns);
                warn!(
                    tick,
                    elapsed_ms,
                    budget_ms = self.settings.tick_budget.as_millis() as u64,
                    "Tick budget exceeded, yielding until next tick"
                );
            }
        }

        result
    }

    async fn run_phases(&self, tick: u64, deadline: Instant) -> Result<TickReport> {
        let matching = self.match_pending(deadline).await?;
        let execution = self.execute_matched(deadline).await?;

        let mut report = TickReport {
            tick,
            budget_exceeded: matching.interrupted || execution.interrupted,
            matching,
            execution,
            ..Default::default()
        };

        let sweep = self.settings.sweep_every_ticks;
        if sweep > 0 && tick % sweep == 0 {
            let now = Utc::now();
            report.signals_purged = self.intake.purge_expired(now).await?;
            if let Some(age) = self.settings.terminal_order_retention {
                report.orders_purged = self.repo.purge_terminal_orders(now - age).await?;
            }
        }

        Ok(report)
    }

    /// Counters plus the store's current queue figures
    pub async fn snapshot(&self) -> Result<MetricsSnapshot> {
        let stats = self.repo.stats(Utc::now()).await?;
        Ok(self.metrics.snapshot(&stats).await)
    }

    pub async fn prometheus(&self) -> Result<String> {
        let stats = self.repo.stats(Utc::now()).await?;
        Ok(self.metrics.prometheus(&stats))
    }

    async fn maybe_log_status(&self) {
        let every = self.settings.status_every_ticks;
        if every == 0 || self.ticks.load(Ordering::Relaxed) % every != 0 {
            return;
        }
        match self.repo.stats(Utc::now()).await {
            Ok(stats) => self.metrics.log_status(&stats),
            Err(e) => warn!("Could not read queue stats: {}", e),
        }
    }
}
