mod main_runtime;

use anyhow::Context;
use clap::Parser;
use sigmatch::adapters::PostgresQueueStore;
use sigmatch::cli::{self, Cli, Commands};
use sigmatch::config::{AppConfig, StoreBackend};
use sigmatch::services::RecordOutcome;
use tokio::sync::watch;
use tracing::{info, warn};

use main_runtime::Runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir.display()))?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("config: {}", e);
        }
        anyhow::bail!("invalid configuration ({} problems)", errors.len());
    }

    main_runtime::init_logging(&config.logging);

    if config.store.backend == StoreBackend::Memory && !matches!(cli.command, Commands::Run) {
        warn!("One-shot command against the in-memory store; nothing outlives this process");
    }

    match cli.command {
        Commands::Run => run_engine(config).await?,
        Commands::Migrate => {
            let url = config
                .store
                .url
                .as_deref()
                .context("store.url is required to run migrations")?;
            let store = PostgresQueueStore::new(url, config.store.max_connections).await?;
            store.migrate().await?;
        }
        Commands::Submit { file } => {
            let rt = Runtime::build(config).await?;
            let order = cli::submit_from_file(&rt.repo, &file).await?;
            cli::print_json(&order)?;
        }
        Commands::Ingest { file } => {
            let rt = Runtime::build(config).await?;
            for outcome in cli::ingest_from_file(&rt.intake, &file).await? {
                match outcome {
                    RecordOutcome::Accepted { seq, .. } => println!("accepted  #{}", seq),
                    RecordOutcome::Duplicate { seq, .. } => println!("duplicate #{}", seq),
                }
            }
        }
        Commands::Cancel { order, owner } => {
            let rt = Runtime::build(config).await?;
            let cancelled = rt.repo.cancel(order, &owner).await?;
            println!("{}", cli::format_order_line(&cancelled));
        }
        Commands::Orders { owner } => {
            let rt = Runtime::build(config).await?;
            let orders = rt.repo.get_by_user(&owner).await?;
            if orders.is_empty() {
                println!("No orders for {}", owner);
            }
            for order in &orders {
                println!("{}", cli::format_order_line(order));
            }
        }
        Commands::Stats { prometheus } => {
            let rt = Runtime::build(config).await?;
            let engine = rt.engine()?;
            if prometheus {
                print!("{}", engine.prometheus().await?);
            } else {
                cli::print_json(&engine.snapshot().await?)?;
            }
        }
    }

    Ok(())
}

async fn run_engine(config: AppConfig) -> anyhow::Result<()> {
    let rt = Runtime::build(config).await?;
    rt.store
        .ping()
        .await
        .with_context(|| format!("queue store '{}' is not reachable", rt.store.backend()))?;

    let engine = rt.engine()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine_task = tokio::spawn(async move { engine.run(shutdown_rx).await });

    main_runtime::shutdown_signal().await;
    info!("Shutdown requested, finishing current tick");
    let _ = shutdown_tx.send(true);

    engine_task.await.context("engine task panicked")?;
    Ok(())
}
