pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod execution;
pub mod queue;
pub mod services;
pub mod validation;

pub use adapters::{FeishuNotifier, MemoryQueueStore, PostgresQueueStore};
pub use config::AppConfig;
pub use domain::{
    Condition, ConditionSet, Direction, NewOrder, Order, OrderPatch, QueueState, Signal,
    SignalCursor, SignalInput,
};
pub use engine::{EngineSettings, MatchingEngine, TickReport};
pub use error::{OrderError, Result, SigmatchError};
pub use execution::{
    DryRunAdapter, ExecutionAdapter, ExecutionResult, GuardedExecutor, RetryPolicy,
};
pub use queue::{OrderRepository, QueueStats, QueueStore};
pub use services::{
    ChannelNotifier, EngineMetrics, FanoutNotifier, LoggingNotifier, MetricsSnapshot, Notifier,
    RecordOutcome, SignalIntake, StateChangeEvent,
};
