//! In-memory catalogs and price feed
//!
//! Used by paper mode and tests. A real deployment plugs its own
//! persistence and market data behind the same traits.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::common::errors::{Result, TradeError};
use crate::common::traits::{PlanCatalog, PriceFeed, SessionCatalog};
use crate::plan::model::Plan;
use crate::session::model::Session;

/// Plans keyed by symbol
#[derive(Debug, Default)]
pub struct InMemoryPlanCatalog {
    plans: RwLock<BTreeMap<String, Plan>>,
}

impl InMemoryPlanCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanCatalog for InMemoryPlanCatalog {
    async fn get_plan(&self, symbol: &str) -> Result<Option<Plan>> {
        Ok(self.plans.read().await.get(symbol).cloned())
    }

    async fn save_plan(&self, plan: &Plan) -> Result<()> {
        self.plans
            .write()
            .await
            .insert(plan.symbol.clone(), plan.clone());
        Ok(())
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        Ok(self.plans.read().await.values().cloned().collect())
    }
}

/// Sessions keyed by id
#[derive(Debug, Default)]
pub struct InMemorySessionCatalog {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, active or not
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionCatalog for InMemorySessionCatalog {
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }
}

/// Latest price per symbol, set by whoever owns market data
#[derive(Debug, Default)]
pub struct InMemoryPriceFeed {
    prices: RwLock<HashMap<String, Decimal>>,
}

impl InMemoryPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }
}

#[async_trait]
impl PriceFeed for InMemoryPriceFeed {
    async fn current_price(&self, symbol: &str) -> Result<Decimal> {
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| TradeError::Exchange(format!("no price for {}", symbol)))
    }
}
