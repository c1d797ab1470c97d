pub mod condition;
pub mod order;
pub mod signal;
pub mod state;

pub use condition::{Condition, ConditionSet};
pub use order::{
    ExecutionAttempt, ExecutionErrorKind, NewOrder, Order, OrderKind, OrderPatch, OrderSide,
};
pub use signal::{Direction, NewSignal, Signal, SignalCursor, SignalInput};
pub use state::{QueueState, StateTransition};
