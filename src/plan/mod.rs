//! Plan module - per-symbol configuration, busy flag and profit ledger

pub mod model;
pub mod service;

pub use model::{Plan, PlanMetrics, SymbolSizes};
pub use service::{DriftReport, PlanAdjustment, PlanService};
