pub mod intake;
pub mod metrics;
pub mod notifier;

pub use intake::{RecordOutcome, SignalIntake, DEFAULT_DEDUP_WINDOW, DEFAULT_SIGNAL_TTL};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use notifier::{ChannelNotifier, FanoutNotifier, LoggingNotifier, Notifier, StateChangeEvent};
