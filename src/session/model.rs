//! Session aggregate and the trade orders it owns

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ancestry::OrderGraph;
use crate::common::types::{Direction, OrderPurpose, OrderStatus, SessionMode, SessionStatus};

/// Economic snapshot of one confirmed fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOrder {
    /// Exchange-assigned order id
    pub order_id: String,
    pub symbol: String,
    pub purpose: OrderPurpose,
    pub direction: Direction,
    pub status: OrderStatus,
    /// Fill price
    pub price: Decimal,
    /// Filled quantity
    pub count: Decimal,
    /// Realized PnL (closing orders only)
    pub pnl: Decimal,
    pub commission: Decimal,
    pub leverage: u32,
    /// Order this one closes or averages
    pub parent_order_id: Option<String>,
    /// Main order a hedge offsets
    pub related_hedge_id: Option<String>,
    /// Highest PnL% seen while trailing
    #[serde(default)]
    pub pnl_high: Decimal,
    #[serde(default)]
    pub trailing_active: bool,
    pub order_time: DateTime<Utc>,
}

impl TradeOrder {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Quote value at the fill price
    pub fn notional(&self) -> Decimal {
        self.price * self.count
    }
}

/// One full trade cycle for a symbol, from primary entry to flat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub symbol: String,
    pub status: SessionStatus,
    /// Direction of the primary position
    pub direction: Direction,
    pub mode: SessionMode,
    /// Append-only order history
    pub orders: Vec<TradeOrder>,
    pub active_long: bool,
    pub active_short: bool,
    pub active_average_long: bool,
    pub active_average_short: bool,
    pub hedge_count: u32,
    pub averaging_count: u32,
    pub pnl: Decimal,
    pub commission: Decimal,
    /// Net result has been posted to the plan
    #[serde(default)]
    pub settled: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// New active session holding its primary fill
    pub fn new(symbol: impl Into<String>, direction: Direction, mode: SessionMode, main: TradeOrder) -> Self {
        let now = Utc::now();
        let mut session = Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            status: SessionStatus::Active,
            direction,
            mode,
            orders: vec![main],
            active_long: false,
            active_short: false,
            active_average_long: false,
            active_average_short: false,
            hedge_count: 0,
            averaging_count: 0,
            pnl: Decimal::ZERO,
            commission: Decimal::ZERO,
            settled: false,
            started_at: now,
            ended_at: None,
            updated_at: now,
        };
        session.recompute();
        session
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    pub fn contains_order(&self, order_id: &str) -> bool {
        self.orders.iter().any(|o| o.order_id == order_id)
    }

    pub fn find_order(&self, order_id: &str) -> Option<&TradeOrder> {
        self.orders.iter().find(|o| o.order_id == order_id)
    }

    pub fn find_order_mut(&mut self, order_id: &str) -> Option<&mut TradeOrder> {
        self.orders.iter_mut().find(|o| o.order_id == order_id)
    }

    /// Ancestry view over the current order history
    pub fn graph(&self) -> OrderGraph<'_> {
        OrderGraph::new(&self.orders)
    }

    /// Any direction still carries exposure
    pub fn has_exposure(&self) -> bool {
        self.active_long || self.active_short || self.active_average_long || self.active_average_short
    }

    pub fn is_direction_active(&self, direction: Direction) -> bool {
        match direction {
            Direction::Long => self.active_long || self.active_average_long,
            Direction::Short => self.active_short || self.active_average_short,
        }
    }

    /// Realized PnL minus commission, sign preserved
    pub fn net_profit(&self) -> Decimal {
        self.pnl - self.commission
    }

    /// Rebuild rollups, counters and activity flags from the order history
    pub fn recompute(&mut self) {
        self.pnl = self.orders.iter().map(|o| o.pnl).sum();
        self.commission = self.orders.iter().map(|o| o.commission).sum();
        self.hedge_count = self
            .orders
            .iter()
            .filter(|o| o.purpose == OrderPurpose::HedgeOpen)
            .count() as u32;
        self.averaging_count = self
            .orders
            .iter()
            .filter(|o| o.purpose == OrderPurpose::AveragingOpen)
            .count() as u32;

        let graph = OrderGraph::new(&self.orders);
        let (mut long, mut short, mut avg_long, mut avg_short) = (false, false, false, false);
        for order in self.orders.iter().filter(|o| o.purpose.is_open()) {
            if graph.is_open_order_closed(&order.order_id) {
                continue;
            }
            match (order.purpose, order.direction) {
                (OrderPurpose::AveragingOpen, Direction::Long) => avg_long = true,
                (OrderPurpose::AveragingOpen, Direction::Short) => avg_short = true,
                (_, Direction::Long) => long = true,
                (_, Direction::Short) => short = true,
            }
        }
        self.active_long = long;
        self.active_short = short;
        self.active_average_long = avg_long;
        self.active_average_short = avg_short;
        self.updated_at = Utc::now();
    }

    /// One-way transition to Completed
    pub fn complete(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_completed() {
            return false;
        }
        self.status = SessionStatus::Completed;
        self.ended_at = Some(now);
        self.updated_at = now;
        true
    }
}
