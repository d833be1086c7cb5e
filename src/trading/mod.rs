//! Trading module - order execution, user actions and the monitor loop

pub mod actions;
pub mod monitor;
pub mod orchestrator;

pub use actions::TradeActions;
pub use monitor::{spawn_execution_consumer, Monitor};
pub use orchestrator::{ExecutionOutcome, Orchestrator};
