//! Trait definitions for external collaborators
//!
//! Exchange connectivity, price data and persistence live outside the
//! engine. Everything the engine needs from them goes through these traits.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::errors::Result;
use crate::exchange::messages::{OrderRecord, OrderRequest};
use crate::plan::model::Plan;
use crate::session::model::Session;

/// Exchange wire client (REST side)
///
/// Errors returned here are connectivity problems and are always treated
/// as retryable by the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Submit a market order and return the exchange acknowledgement
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderRecord>;

    /// Query the current state of an order
    async fn fetch_order(&self, symbol: &str, order_id: &str) -> Result<OrderRecord>;
}

/// Source of the latest traded price per symbol
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Result<Decimal>;
}

/// Plan persistence
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    async fn get_plan(&self, symbol: &str) -> Result<Option<Plan>>;

    async fn save_plan(&self, plan: &Plan) -> Result<()>;

    /// All known plans, sorted by symbol
    async fn list_plans(&self) -> Result<Vec<Plan>>;
}

/// Session persistence
#[async_trait]
pub trait SessionCatalog: Send + Sync {
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>>;

    async fn save(&self, session: &Session) -> Result<()>;
}
