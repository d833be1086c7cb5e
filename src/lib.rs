//! FuturesHedger Library
//!
//! Position lifecycle engine for leveraged futures: opens a primary
//! position per symbol and hedges, averages and trailing-stops it from live
//! PnL, reconciling fills that arrive over REST and the execution stream.

pub mod common;
pub mod config;
pub mod exchange;
pub mod plan;
pub mod session;
pub mod store;
pub mod strategy;
pub mod trading;

// Re-export commonly used types
pub use common::errors::{ErrorKind, Result, TradeError};
pub use common::locks::KeyedLocks;
pub use common::traits::{ExchangeClient, PlanCatalog, PriceFeed, SessionCatalog};
pub use common::types::{Direction, OrderPurpose, OrderStatus, SessionMode, SessionStatus, Side};
pub use config::types::AppConfig;
pub use exchange::{OrderRecord, OrderReconciler, OrderRequest, OrderUpdate, PaperExchange};
pub use plan::{Plan, PlanService};
pub use session::{Session, SessionService, TradeOrder};

// Engine and execution
pub use strategy::{Action, DecisionEngine, FeeSchedule};
pub use trading::{ExecutionOutcome, Monitor, Orchestrator, TradeActions};
