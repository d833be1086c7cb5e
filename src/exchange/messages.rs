//! Order records exchanged with the exchange collaborator

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::types::{Direction, OrderStatus, Side};

/// Which producer delivered an order update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSource {
    /// Synchronous REST acknowledgement or query
    Rest,
    /// Asynchronous execution-report stream
    Stream,
}

/// Market order submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    /// Position side in hedge mode; `None` in one-way mode
    pub position_direction: Option<Direction>,
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Request that adds exposure in `direction`
    pub fn open(symbol: &str, direction: Direction, quantity: Decimal, hedge_mode: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: direction.open_side(),
            quantity,
            position_direction: hedge_mode.then_some(direction),
            // Hedge mode expresses reduction through the position side
            reduce_only: false,
        }
    }

    /// Request that removes exposure in `direction`
    pub fn close(symbol: &str, direction: Direction, quantity: Decimal, hedge_mode: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: direction.close_side(),
            quantity,
            position_direction: hedge_mode.then_some(direction),
            reduce_only: !hedge_mode,
        }
    }
}

/// Canonical local mirror of one exchange order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Exchange-assigned order id
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    #[serde(default)]
    pub position_direction: Option<Direction>,
    pub status: OrderStatus,
    /// Limit price, zero for market orders
    #[serde(default)]
    pub price: Decimal,
    /// Average fill price
    #[serde(default)]
    pub avg_price: Decimal,
    pub orig_qty: Decimal,
    #[serde(default)]
    pub executed_qty: Decimal,
    #[serde(default)]
    pub commission: Decimal,
    #[serde(default)]
    pub realized_pnl: Decimal,
    #[serde(default)]
    pub reduce_only: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    /// Build a fresh NEW record for a submitted request
    pub fn new(order_id: impl Into<String>, request: &OrderRequest, now: DateTime<Utc>) -> Self {
        Self {
            order_id: order_id.into(),
            symbol: request.symbol.clone(),
            side: request.side,
            position_direction: request.position_direction,
            status: OrderStatus::New,
            price: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            orig_qty: request.quantity,
            executed_qty: Decimal::ZERO,
            commission: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            reduce_only: request.reduce_only,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Quantity not yet executed
    pub fn remaining_qty(&self) -> Decimal {
        self.orig_qty - self.executed_qty
    }

    /// Best known execution price
    pub fn fill_price(&self) -> Decimal {
        if self.avg_price > Decimal::ZERO {
            self.avg_price
        } else {
            self.price
        }
    }

    /// Merge a partial update field by field.
    ///
    /// Returns `true` only when at least one field actually changed. Updates
    /// older than the record are ignored.
    pub fn merge(&mut self, update: &OrderUpdate) -> bool {
        if let Some(at) = update.update_time {
            if at < self.updated_at {
                return false;
            }
        }

        let mut changed = false;
        changed |= merge_field(&mut self.symbol, &update.symbol);
        changed |= merge_field(&mut self.side, &update.side);
        changed |= merge_field(&mut self.status, &update.status);
        changed |= merge_decimal(&mut self.price, update.price);
        changed |= merge_decimal(&mut self.avg_price, update.avg_price);
        changed |= merge_decimal(&mut self.orig_qty, update.orig_qty);
        changed |= merge_decimal(&mut self.executed_qty, update.executed_qty);
        changed |= merge_decimal(&mut self.commission, update.commission);
        changed |= merge_decimal(&mut self.realized_pnl, update.realized_pnl);
        if update.position_direction.is_some() && self.position_direction != update.position_direction {
            self.position_direction = update.position_direction;
            changed = true;
        }

        // Only exchange time moves the clock; a local stamp would make later
        // exchange-timed updates look stale
        if let (true, Some(at)) = (changed, update.update_time) {
            self.updated_at = at;
        }
        changed
    }
}

fn merge_field<T: PartialEq + Clone>(current: &mut T, incoming: &Option<T>) -> bool {
    match incoming {
        Some(value) if value != current => {
            *current = value.clone();
            true
        }
        _ => false,
    }
}

fn merge_decimal(current: &mut Decimal, incoming: Option<Decimal>) -> bool {
    match incoming {
        Some(value) if value.normalize() != current.normalize() => {
            *current = value;
            true
        }
        _ => false,
    }
}

/// Partial order state from either producer; `None` means "not reported"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub side: Option<Side>,
    #[serde(default)]
    pub position_direction: Option<Direction>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub avg_price: Option<Decimal>,
    #[serde(default)]
    pub orig_qty: Option<Decimal>,
    #[serde(default)]
    pub executed_qty: Option<Decimal>,
    #[serde(default)]
    pub commission: Option<Decimal>,
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub source: Option<UpdateSource>,
}

impl OrderUpdate {
    /// Full snapshot of a record as an update
    pub fn from_record(record: &OrderRecord, source: UpdateSource) -> Self {
        Self {
            order_id: record.order_id.clone(),
            symbol: Some(record.symbol.clone()),
            side: Some(record.side),
            position_direction: record.position_direction,
            status: Some(record.status),
            price: Some(record.price),
            avg_price: Some(record.avg_price),
            orig_qty: Some(record.orig_qty),
            executed_qty: Some(record.executed_qty),
            commission: Some(record.commission),
            realized_pnl: Some(record.realized_pnl),
            update_time: Some(record.updated_at),
            source: Some(source),
        }
    }
}
