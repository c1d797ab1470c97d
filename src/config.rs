use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::execution::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed tick interval in milliseconds
    pub tick_interval_ms: u64,
    /// Soft wall-clock budget for one tick
    pub tick_budget_ms: u64,
    /// Signals read per tick
    pub signal_batch_size: usize,
    /// Matched orders executed per tick
    pub execution_batch_size: usize,
    /// Concurrent execution calls within a tick
    pub execution_concurrency: usize,
    /// Name under which the signal cursor is persisted
    pub consumer: String,
    /// Keyset page size for eligible-order listing
    pub page_size: usize,
    /// Log a status line every N ticks (0 = never)
    pub status_every_ticks: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            tick_budget_ms: 30_000,
            signal_batch_size: 100,
            execution_batch_size: 50,
            execution_concurrency: 1,
            consumer: "engine".to_string(),
            page_size: 100,
            status_every_ticks: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Attempts allowed per order, including the first
    pub max_attempts: u32,
    /// Adapter call timeout in milliseconds
    pub timeout_ms: u64,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Use the simulated adapter (no real orders)
    pub dry_run: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_ms: 10_000,
            base_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            dry_run: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Width of the fingerprint time bucket
    pub dedup_window_secs: u64,
    /// How long a stored signal stays visible to the engine
    pub signal_ttl_secs: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 60,
            signal_ttl_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// PostgreSQL connection URL
    pub url: Option<String>,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Timeout applied to every store call
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: None,
            max_connections: 5,
            operation_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Run the retention sweep every N ticks (0 = never)
    pub sweep_every_ticks: u64,
    /// Delete terminal orders older than this many days; unset keeps them forever
    pub terminal_order_days: Option<u32>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_every_ticks: 60,
            terminal_order_days: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Feishu bot webhook; falls back to `FEISHU_WEBHOOK_URL`
    pub feishu_webhook_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("store.backend", "memory")?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SIGMATCH_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SIGMATCH_ENGINE__TICK_INTERVAL_MS, etc.)
            .add_source(
                Environment::with_prefix("SIGMATCH")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.engine.tick_interval_ms)
    }

    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.engine.tick_budget_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.operation_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution.timeout_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.intake.dedup_window_secs)
    }

    pub fn signal_ttl(&self) -> Duration {
        Duration::from_secs(self.intake.signal_ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.execution.max_attempts,
            base_backoff: Duration::from_millis(self.execution.base_backoff_ms),
            max_backoff: Duration::from_millis(self.execution.max_backoff_ms),
        }
    }

    /// Validate configuration values, reporting every problem at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.engine.tick_interval_ms == 0 {
            errors.push("engine.tick_interval_ms must be positive".to_string());
        }
        if self.engine.tick_budget_ms == 0 {
            errors.push("engine.tick_budget_ms must be positive".to_string());
        }
        if self.engine.signal_batch_size == 0 {
            errors.push("engine.signal_batch_size must be positive".to_string());
        }
        if self.engine.execution_batch_size == 0 {
            errors.push("engine.execution_batch_size must be positive".to_string());
        }
        if self.engine.execution_concurrency == 0 {
            errors.push("engine.execution_concurrency must be positive".to_string());
        }
        if self.engine.page_size == 0 {
            errors.push("engine.page_size must be positive".to_string());
        }
        if self.engine.consumer.trim().is_empty() {
            errors.push("engine.consumer cannot be empty".to_string());
        }

        if self.execution.max_attempts == 0 {
            errors.push("execution.max_attempts must be at least 1".to_string());
        }
        if self.execution.timeout_ms == 0 {
            errors.push("execution.timeout_ms must be positive".to_string());
        }
        if self.execution.base_backoff_ms > self.execution.max_backoff_ms {
            errors.push("execution.base_backoff_ms cannot exceed max_backoff_ms".to_string());
        }

        if self.intake.dedup_window_secs == 0 {
            errors.push("intake.dedup_window_secs must be positive".to_string());
        }
        if self.intake.signal_ttl_secs == 0 {
            errors.push("intake.signal_ttl_secs must be positive".to_string());
        }

        if self.store.operation_timeout_ms == 0 {
            errors.push("store.operation_timeout_ms must be positive".to_string());
        }
        if self.store.backend == StoreBackend::Postgres
            && self.store.url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            errors.push("store.url is required for the postgres backend".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
