use sigmatch::adapters::{FeishuNotifier, MemoryQueueStore, PostgresQueueStore};
use sigmatch::config::{AppConfig, LoggingConfig, StoreBackend};
use sigmatch::engine::{EngineSettings, MatchingEngine};
use sigmatch::error::{Result, SigmatchError};
use sigmatch::execution::{DryRunAdapter, ExecutionAdapter};
use sigmatch::queue::{OrderRepository, QueueStore};
use sigmatch::services::{FanoutNotifier, LoggingNotifier, Notifier, SignalIntake};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Store-backed services shared by every command
pub struct Runtime {
    pub config: AppConfig,
    pub store: Arc<dyn QueueStore>,
    pub repo: Arc<OrderRepository>,
    pub intake: Arc<SignalIntake>,
}

impl Runtime {
    pub async fn build(config: AppConfig) -> Result<Self> {
        let store = connect_store(&config).await?;
        let notifier = build_notifier(&config);

        let repo = Arc::new(
            OrderRepository::new(store.clone(), notifier, config.store_timeout())
                .with_page_size(config.engine.page_size),
        );
        let intake = Arc::new(
            SignalIntake::new(store.clone(), config.store_timeout())
                .with_dedup_window(config.dedup_window())
                .with_ttl(config.signal_ttl()),
        );

        Ok(Self {
            config,
            store,
            repo,
            intake,
        })
    }

    pub fn engine(&self) -> Result<MatchingEngine> {
        if !self.config.execution.dry_run {
            return Err(SigmatchError::Validation(
                "execution.dry_run = false requires a live execution adapter, none is built in"
                    .to_string(),
            ));
        }
        let adapter: Arc<dyn ExecutionAdapter> = Arc::new(DryRunAdapter::new());

        Ok(MatchingEngine::new(
            self.repo.clone(),
            self.intake.clone(),
            adapter,
            EngineSettings::from_config(&self.config),
        ))
    }
}

pub async fn connect_store(config: &AppConfig) -> Result<Arc<dyn QueueStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory queue store; orders and signals are lost on exit");
            Ok(Arc::new(MemoryQueueStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config.store.url.as_deref().ok_or_else(|| {
                SigmatchError::Validation("store.url is required for postgres".to_string())
            })?;
            let store = PostgresQueueStore::new(url, config.store.max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}

fn build_notifier(config: &AppConfig) -> Arc<dyn Notifier> {
    let feishu = config
        .notifier
        .feishu_webhook_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .map(FeishuNotifier::new)
        .or_else(FeishuNotifier::from_env);

    match feishu {
        Some(feishu) => {
            let targets: Vec<Arc<dyn Notifier>> = vec![Arc::new(LoggingNotifier), feishu];
            Arc::new(FanoutNotifier::new(targets))
        }
        None => Arc::new(LoggingNotifier),
    }
}

pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let default_directives = if config.level.eq_ignore_ascii_case("info") {
        "info,sigmatch=debug,sqlx=warn".to_string()
    } else {
        format!("{},sqlx=warn", config.level)
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    // File logging only when SIGMATCH_LOG_DIR is set and writable.
    // `tracing_appender::rolling::daily` panics if it cannot create the file.
    let log_dir = std::env::var("SIGMATCH_LOG_DIR").ok();
    let file_layer = log_dir.as_deref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Warning: Could not create log directory {} ({}), file logging disabled", dir, e);
            return None;
        }
        let probe = std::path::Path::new(dir).join(".sigmatch_write_test");
        match std::fs::OpenOptions::new().create(true).append(true).open(&probe) {
            Ok(_) => {
                let _ = std::fs::remove_file(&probe);
                let file_appender = tracing_appender::rolling::daily(dir, "sigmatch.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Long-running process: the guard lives until exit
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("Warning: Could not write to log directory {} ({}), file logging disabled", dir, e);
                None
            }
        }
    });

    let (console_plain, console_json) = if config.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_plain)
        .with(console_json)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        info!("Logging to: {}/sigmatch.log", dir);
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
