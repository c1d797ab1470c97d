use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::QueueState;
use crate::queue::QueueStats;

/// Process-local engine counters
///
/// Queue depths and time-in-state come from the store ([`QueueStats`]) and are
/// combined with these counters at snapshot time.
pub struct EngineMetrics {
    /// Ticks completed (including aborted ones)
    pub ticks: AtomicU64,
    /// Ticks aborted by a store failure
    pub tick_errors: AtomicU64,
    /// Ticks that hit the time budget
    pub budget_overruns: AtomicU64,
    pub signals_processed: AtomicU64,
    pub orders_matched: AtomicU64,
    pub orders_executed: AtomicU64,
    pub orders_failed: AtomicU64,
    pub orders_retried: AtomicU64,
    /// Conditional transitions lost to a concurrent writer
    pub stale_transitions: AtomicU64,
    last_tick_duration_ms: AtomicU64,
    last_tick_at: RwLock<Option<DateTime<Utc>>>,
}

/// Serializable point-in-time view of the engine and its queues
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub ticks: u64,
    pub tick_errors: u64,
    pub budget_overruns: u64,
    pub signals_processed: u64,
    pub orders_matched: u64,
    pub orders_executed: u64,
    pub orders_failed: u64,
    pub orders_retried: u64,
    pub stale_transitions: u64,
    pub last_tick_duration_ms: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub queue_depths: BTreeMap<QueueState, u64>,
    pub avg_time_in_state_secs: BTreeMap<QueueState, f64>,
    pub signals_stored: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            tick_errors: AtomicU64::new(0),
            budget_overruns: AtomicU64::new(0),
            signals_processed: AtomicU64::new(0),
            orders_matched: AtomicU64::new(0),
            orders_executed: AtomicU64::new(0),
            orders_failed: AtomicU64::new(0),
            orders_retried: AtomicU64::new(0),
            stale_transitions: AtomicU64::new(0),
            last_tick_duration_ms: AtomicU64::new(0),
            last_tick_at: RwLock::new(None),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a tick
    pub async fn record_tick(&self, duration_ms: u64, ok: bool) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.tick_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.last_tick_duration_ms
            .store(duration_ms, Ordering::Relaxed);
        *self.last_tick_at.write().await = Some(Utc::now());
    }

    pub fn last_tick_duration_ms(&self) -> u64 {
        self.last_tick_duration_ms.load(Ordering::Relaxed)
    }

    pub async fn snapshot(&self, stats: &QueueStats) -> MetricsSnapshot {
        MetricsSnapshot {
            taken_at: Utc::now(),
            ticks: self.ticks.load(Ordering::Relaxed),
            tick_errors: self.tick_errors.load(Ordering::Relaxed),
            budget_overruns: self.budget_overruns.load(Ordering::Relaxed),
            signals_processed: self.signals_processed.load(Ordering::Relaxed),
            orders_matched: self.orders_matched.load(Ordering::Relaxed),
            orders_executed: self.orders_executed.load(Ordering::Relaxed),
            orders_failed: self.orders_failed.load(Ordering::Relaxed),
            orders_retried: self.orders_retried.load(Ordering::Relaxed),
            stale_transitions: self.stale_transitions.load(Ordering::Relaxed),
            last_tick_duration_ms: self.last_tick_duration_ms(),
            last_tick_at: *self.last_tick_at.read().await,
            queue_depths: stats.depths.clone(),
            avg_time_in_state_secs: stats.avg_time_in_state_secs.clone(),
            signals_stored: stats.signals_stored,
        }
    }

    /// Export metrics in Prometheus format
    pub fn prometheus(&self, stats: &QueueStats) -> String {
        let mut out = String::new();

        let counters = [
            ("sigmatch_ticks_total", "Engine ticks run", &self.ticks),
            ("sigmatch_tick_errors_total", "Ticks aborted by store failures", &self.tick_errors),
            ("sigmatch_budget_overruns_total", "Ticks that exceeded the time budget", &self.budget_overruns),
            ("sigmatch_signals_processed_total", "Signals fully processed", &self.signals_processed),
            ("sigmatch_orders_matched_total", "Orders moved to matched", &self.orders_matched),
            ("sigmatch_orders_executed_total", "Orders executed", &self.orders_executed),
            ("sigmatch_orders_failed_total", "Orders failed permanently", &self.orders_failed),
            ("sigmatch_orders_retried_total", "Execution attempts scheduled for retry", &self.orders_retried),
            ("sigmatch_stale_transitions_total", "Transitions lost to a concurrent writer", &self.stale_transitions),
        ];

        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}\n", name, counter.load(Ordering::Relaxed));
        }

        let _ = writeln!(out, "# HELP sigmatch_last_tick_duration_ms Duration of the last tick");
        let _ = writeln!(out, "# TYPE sigmatch_last_tick_duration_ms gauge");
        let _ = writeln!(out, "sigmatch_last_tick_duration_ms {}\n", self.last_tick_duration_ms());

        let _ = writeln!(out, "# HELP sigmatch_queue_depth Orders per queue state");
        let _ = writeln!(out, "# TYPE sigmatch_queue_depth gauge");
        for state in QueueState::ALL {
            let _ = writeln!(
                out,
                "sigmatch_queue_depth{{state=\"{}\"}} {}",
                state,
                stats.depth(state)
            );
        }
        out.push('\n');

        let _ = writeln!(out, "# HELP sigmatch_time_in_state_seconds Average time spent in the current state");
        let _ = writeln!(out, "# TYPE sigmatch_time_in_state_seconds gauge");
        for (state, secs) in &stats.avg_time_in_state_secs {
            let _ = writeln!(
                out,
                "sigmatch_time_in_state_seconds{{state=\"{}\"}} {:.3}",
                state, secs
            );
        }
        out.push('\n');

        let _ = writeln!(out, "# HELP sigmatch_signals_stored Signals currently held in the history");
        let _ = writeln!(out, "# TYPE sigmatch_signals_stored gauge");
        let _ = writeln!(out, "sigmatch_signals_stored {}", stats.signals_stored);

        out
    }

    /// Log periodic status
    pub fn log_status(&self, stats: &QueueStats) {
        info!(
            pending = stats.depth(QueueState::Pending),
            matched = stats.depth(QueueState::Matched),
            executed = self.orders_executed.load(Ordering::Relaxed),
            failed = self.orders_failed.load(Ordering::Relaxed),
            retried = self.orders_retried.load(Ordering::Relaxed),
            last_tick_ms = self.last_tick_duration_ms(),
            "Engine status"
        );
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
