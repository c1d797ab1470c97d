//! Order queues
//!
//! - `store`: the storage contract every backend implements
//! - `repository`: atomic order operations used by the engine and the boundaries

pub mod repository;
pub mod store;

pub use repository::{OrderRepository, DEFAULT_PAGE_SIZE};
pub use store::{PageKey, QueueStats, QueueStore, SignalInsert};

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, SigmatchError};

/// Run a store call under `timeout`, mapping expiry to `StoreTimeout`
pub(crate) async fn bounded<T, F>(operation: &'static str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SigmatchError::StoreTimeout {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
