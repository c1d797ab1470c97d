use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::domain::{NewOrder, Order, QueueState, SignalInput};
use crate::error::{Result, SigmatchError};
use crate::queue::OrderRepository;
use crate::services::{RecordOutcome, SignalIntake};

#[derive(Parser)]
#[command(name = "sigmatch")]
#[command(version)]
#[command(about = "Signal-to-order matching and queueing engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, default_value = "config", env = "SIGMATCH_CONFIG_DIR")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the matching engine until Ctrl-C
    Run,
    /// Apply database migrations (postgres backend)
    Migrate,
    /// Submit an order from a JSON file
    Submit {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Ingest one signal or an array of signals from a JSON file
    Ingest {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Cancel a pending or matched order
    Cancel {
        #[arg(long)]
        order: Uuid,
        #[arg(long)]
        owner: String,
    },
    /// List every order of one owner
    Orders {
        #[arg(long)]
        owner: String,
    },
    /// Show queue depths and time-in-state
    Stats {
        /// Print Prometheus text instead of JSON
        #[arg(long)]
        prometheus: bool,
    },
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn submit_from_file(repo: &OrderRepository, path: &Path) -> Result<Order> {
    let request: NewOrder = serde_json::from_value(read_json(path)?)?;
    repo.submit(request).await
}

/// Accepts either a single signal object or an array of them
pub async fn ingest_from_file(intake: &SignalIntake, path: &Path) -> Result<Vec<RecordOutcome>> {
    let inputs: Vec<SignalInput> = match read_json(path)? {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()?,
        single @ serde_json::Value::Object(_) => vec![serde_json::from_value(single)?],
        other => {
            return Err(SigmatchError::InvalidSignal(format!(
                "expected a JSON object or array, got {}",
                other
            )))
        }
    };

    let mut outcomes = Vec::with_capacity(inputs.len());
    for input in inputs {
        outcomes.push(intake.record(input).await?);
    }
    Ok(outcomes)
}

/// One line per order for terminal output
pub fn format_order_line(order: &Order) -> String {
    let mut line = format!(
        "{}  {:<9}  {} {} {} x {}",
        order.id,
        order.state.as_str(),
        order.kind.as_str(),
        order.side,
        order.symbol,
        order.quantity
    );
    if let Some(strategy) = &order.strategy {
        line.push_str(&format!("  [{}]", strategy));
    }
    if order.attempts > 0 {
        line.push_str(&format!("  attempts={}", order.attempts));
    }
    if let Some(r) = &order.exchange_ref {
        line.push_str(&format!("  ref={}", r));
    }
    if order.state == QueueState::Failed {
        if let Some(e) = &order.last_error {
            line.push_str(&format!("  error={}", e));
        }
    }
    line
}
