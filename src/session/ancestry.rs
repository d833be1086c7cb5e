//! Order ancestry closure
//!
//! Orders form a DAG through `parent_order_id`: closes point at the open they
//! close, averaging opens point at the order they average. Whether an open
//! order still carries exposure is derived from this graph on every call;
//! nothing is cached between calls. All walks are iterative and bounded by
//! the number of orders, so long averaging chains cannot blow the stack and
//! a malformed cycle cannot loop forever.

use rust_decimal::Decimal;
use std::collections::HashMap;

use super::model::TradeOrder;
use crate::common::errors::{Result, TradeError};
use crate::common::types::{Direction, OrderFamily, OrderPurpose};

/// Read-only index over a session's orders
pub struct OrderGraph<'a> {
    orders: &'a [TradeOrder],
    by_id: HashMap<&'a str, &'a TradeOrder>,
    /// Averaging opens keyed by the order they average
    averaging_children: HashMap<&'a str, Vec<&'a TradeOrder>>,
    /// Closing orders keyed by the order they close
    closers: HashMap<&'a str, Vec<&'a TradeOrder>>,
}

impl<'a> OrderGraph<'a> {
    pub fn new(orders: &'a [TradeOrder]) -> Self {
        let mut by_id = HashMap::with_capacity(orders.len());
        let mut averaging_children: HashMap<&str, Vec<&TradeOrder>> = HashMap::new();
        let mut closers: HashMap<&str, Vec<&TradeOrder>> = HashMap::new();

        for order in orders {
            by_id.insert(order.order_id.as_str(), order);
            let Some(parent) = order.parent_order_id.as_deref() else {
                continue;
            };
            if order.purpose == OrderPurpose::AveragingOpen {
                averaging_children.entry(parent).or_default().push(order);
            } else if order.purpose.is_close() {
                closers.entry(parent).or_default().push(order);
            }
        }

        Self {
            orders,
            by_id,
            averaging_children,
            closers,
        }
    }

    pub fn get(&self, order_id: &str) -> Option<&'a TradeOrder> {
        self.by_id.get(order_id).copied()
    }

    /// A filled close of the matching family references the order
    pub fn is_directly_closed(&self, order_id: &str) -> bool {
        let Some(open) = self.get(order_id) else {
            return false;
        };
        self.closers
            .get(order_id)
            .map(|closers| {
                closers
                    .iter()
                    .any(|c| c.is_filled() && closes_family(c.purpose, open.purpose.family()))
            })
            .unwrap_or(false)
    }

    /// Newest averaging order stacked on `order_id`, following the chain forward
    pub fn latest_averaging(&self, order_id: &str) -> Option<&'a TradeOrder> {
        let root = self.get(order_id)?;
        let mut current = root;
        let mut tip = None;

        for _ in 0..self.orders.len() {
            let next = self
                .averaging_children
                .get(current.order_id.as_str())
                .and_then(|children| {
                    children
                        .iter()
                        .filter(|c| c.direction == root.direction)
                        .max_by_key(|c| c.order_time)
                });
            match next {
                Some(child) => {
                    tip = Some(*child);
                    current = *child;
                }
                None => break,
            }
        }
        tip
    }

    /// Whether the exposure of an open order has been fully offset.
    ///
    /// True when a filled close references it directly, or when the newest
    /// averaging order stacked on it has itself been closed. Close orders and
    /// unknown ids are never "closed opens".
    pub fn is_open_order_closed(&self, order_id: &str) -> bool {
        match self.get(order_id) {
            Some(order) if order.purpose.is_open() => {}
            _ => return false,
        }
        if self.is_directly_closed(order_id) {
            return true;
        }
        self.latest_averaging(order_id)
            .map(|tip| self.is_directly_closed(&tip.order_id))
            .unwrap_or(false)
    }

    /// Orders from the chain root up to `tip_id`, root first
    pub fn chain(&self, tip_id: &str) -> Vec<&'a TradeOrder> {
        let mut chain = Vec::new();
        let Some(mut current) = self.get(tip_id) else {
            return chain;
        };
        chain.push(current);

        for _ in 0..self.orders.len() {
            if current.purpose != OrderPurpose::AveragingOpen {
                break;
            }
            let Some(parent) = current
                .parent_order_id
                .as_deref()
                .and_then(|id| self.get(id))
            else {
                break;
            };
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// The open an averaging chain starts from.
    ///
    /// A chain must end at a non-averaging open; a dangling parent pointer
    /// or a cycle means the stored history is corrupt.
    pub fn root_of(&self, order_id: &str) -> Result<&'a TradeOrder> {
        let mut current = self
            .get(order_id)
            .ok_or_else(|| TradeError::OrderNotFound(order_id.to_string()))?;

        for _ in 0..self.orders.len() {
            if current.purpose != OrderPurpose::AveragingOpen {
                return Ok(current);
            }
            let parent_id = current.parent_order_id.as_deref().unwrap_or_default();
            current = self.get(parent_id).ok_or_else(|| {
                TradeError::Unrecoverable(format!(
                    "averaging order {} points at missing order {:?}",
                    current.order_id, parent_id
                ))
            })?;
        }
        Err(TradeError::Unrecoverable(format!(
            "averaging chain of {} does not reach an open",
            order_id
        )))
    }

    /// Open positions, one per un-closed chain, represented by the chain tip
    pub fn open_positions(&self) -> Vec<OpenPosition<'a>> {
        self.orders
            .iter()
            .filter(|o| o.purpose.is_open())
            .filter(|o| !self.is_open_order_closed(&o.order_id))
            .filter(|o| self.latest_averaging(&o.order_id).is_none())
            .map(|tip| OpenPosition {
                tip,
                chain: self.chain(&tip.order_id),
            })
            .collect()
    }

    /// Most recent un-closed open of `purpose` in `direction`
    pub fn latest_unclosed(&self, purpose: OrderPurpose, direction: Direction) -> Option<&'a TradeOrder> {
        self.orders
            .iter()
            .filter(|o| o.purpose == purpose && o.direction == direction)
            .filter(|o| !self.is_open_order_closed(&o.order_id))
            .max_by_key(|o| o.order_time)
    }

    /// An un-closed averaging order exists for `direction`
    pub fn has_open_averaging(&self, direction: Direction) -> bool {
        self.latest_unclosed(OrderPurpose::AveragingOpen, direction)
            .is_some()
    }
}

fn closes_family(close: OrderPurpose, family: OrderFamily) -> bool {
    matches!(
        (family, close),
        (OrderFamily::Main, OrderPurpose::MainClose)
            | (OrderFamily::Main, OrderPurpose::MainPartialClose)
            | (OrderFamily::Hedge, OrderPurpose::HedgeClose)
            | (OrderFamily::Hedge, OrderPurpose::HedgePartialClose)
            | (OrderFamily::Averaging, OrderPurpose::AveragingClose)
    )
}

/// A live position: a root open plus any averaging stacked on it
#[derive(Debug, Clone)]
pub struct OpenPosition<'a> {
    /// Newest order of the chain; closes target this order
    pub tip: &'a TradeOrder,
    /// Root first, tip last
    pub chain: Vec<&'a TradeOrder>,
}

impl<'a> OpenPosition<'a> {
    pub fn root(&self) -> &'a TradeOrder {
        self.chain.first().copied().unwrap_or(self.tip)
    }

    pub fn direction(&self) -> Direction {
        self.tip.direction
    }

    /// Total quantity held across the chain
    pub fn quantity(&self) -> Decimal {
        self.chain.iter().map(|o| o.count).sum()
    }

    /// Quantity-weighted entry price across the chain
    pub fn entry_price(&self) -> Decimal {
        let quantity = self.quantity();
        if quantity.is_zero() {
            return self.tip.price;
        }
        let notional: Decimal = self.chain.iter().map(|o| o.notional()).sum();
        notional / quantity
    }
}
