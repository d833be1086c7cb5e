//! Exchange module - order messages, reconciliation and the paper exchange

pub mod messages;
pub mod paper;
pub mod reconciler;

pub use messages::{OrderRecord, OrderRequest, OrderUpdate, UpdateSource};
pub use paper::PaperExchange;
pub use reconciler::OrderReconciler;
