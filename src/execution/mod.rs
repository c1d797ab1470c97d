//! Order execution
//!
//! The adapter trait is the boundary to the exchange. `GuardedExecutor` adds the
//! timeout and `RetryPolicy` turns each result into the order's next state.

pub mod dry_run;
pub mod retry;
pub mod traits;

pub use dry_run::DryRunAdapter;
pub use retry::{ExecutionDecision, GuardedExecutor, RetryPolicy};
pub use traits::{ExecutionAdapter, ExecutionError, ExecutionResult};
