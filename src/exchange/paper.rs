//! In-process paper exchange
//!
//! Fills market orders at the price feed's current price and publishes
//! execution reports on an mpsc channel, the same way a live user-data
//! stream would. The REST acknowledgement is always the NEW snapshot, so
//! callers have to learn about the fill from a query or from the stream.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::{OrderRecord, OrderRequest, OrderUpdate, UpdateSource};
use crate::common::errors::{Result, TradeError};
use crate::common::traits::{ExchangeClient, PriceFeed};
use crate::common::types::OrderStatus;

pub struct PaperExchange {
    prices: Arc<dyn PriceFeed>,
    taker_rate: Decimal,
    orders: DashMap<String, OrderRecord>,
    next_id: AtomicU64,
    reports: Option<mpsc::Sender<OrderUpdate>>,
    /// Leave new orders unfilled until [`PaperExchange::release_fills`]
    withhold_fills: AtomicBool,
    reject_orders: AtomicBool,
}

impl PaperExchange {
    pub fn new(prices: Arc<dyn PriceFeed>, taker_rate: Decimal) -> Self {
        Self {
            prices,
            taker_rate,
            orders: DashMap::new(),
            next_id: AtomicU64::new(1),
            reports: None,
            withhold_fills: AtomicBool::new(false),
            reject_orders: AtomicBool::new(false),
        }
    }

    /// Publish execution reports on `sender`
    pub fn with_execution_reports(mut self, sender: mpsc::Sender<OrderUpdate>) -> Self {
        self.reports = Some(sender);
        self
    }

    pub fn set_withhold_fills(&self, withhold: bool) {
        self.withhold_fills.store(withhold, Ordering::SeqCst);
    }

    pub fn set_reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }

    /// Fill every order still waiting, returns how many were filled
    pub async fn release_fills(&self) -> Result<usize> {
        let waiting: Vec<(String, String)> = self
            .orders
            .iter()
            .filter(|r| r.status == OrderStatus::New)
            .map(|r| (r.order_id.clone(), r.symbol.clone()))
            .collect();

        for (order_id, symbol) in &waiting {
            let price = self.prices.current_price(symbol).await?;
            if let Some(filled) = self.fill(order_id, price) {
                self.report(&filled).await;
            }
        }
        Ok(waiting.len())
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    fn fill(&self, order_id: &str, price: Decimal) -> Option<OrderRecord> {
        let mut record = self.orders.get_mut(order_id)?;
        let quantity = record.orig_qty;
        record.status = OrderStatus::Filled;
        record.avg_price = price;
        record.executed_qty = quantity;
        record.commission = (price * quantity * self.taker_rate).round_dp(8);
        record.updated_at = Utc::now();
        debug!(order_id, %price, %quantity, "Paper fill");
        Some(record.clone())
    }

    async fn report(&self, record: &OrderRecord) {
        let Some(sender) = &self.reports else {
            return;
        };
        let update = OrderUpdate::from_record(record, UpdateSource::Stream);
        if let Err(e) = sender.send(update).await {
            warn!(order_id = %record.order_id, error = %e, "Execution report receiver dropped");
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderRecord> {
        let price = self.prices.current_price(&request.symbol).await?;
        let order_id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let mut record = OrderRecord::new(order_id.clone(), request, Utc::now());

        if self.reject_orders.load(Ordering::SeqCst) {
            record.status = OrderStatus::Rejected;
            self.orders.insert(order_id, record.clone());
            info!(order_id = %record.order_id, symbol = %request.symbol, "Paper order rejected");
            return Ok(record);
        }

        let ack = record.clone();
        self.orders.insert(order_id.clone(), record);

        if !self.withhold_fills.load(Ordering::SeqCst) {
            if let Some(filled) = self.fill(&order_id, price) {
                self.report(&filled).await;
            }
        }
        Ok(ack)
    }

    async fn fetch_order(&self, _symbol: &str, order_id: &str) -> Result<OrderRecord> {
        self.orders
            .get(order_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| TradeError::Exchange(format!("unknown order {}", order_id)))
    }
}
