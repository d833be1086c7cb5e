//! Averaging gate
//!
//! Adds to a losing position at most once per direction at a time.

use rust_decimal::Decimal;

use crate::common::types::{Direction, OrderPurpose};
use crate::session::ancestry::OrderGraph;
use crate::session::model::TradeOrder;

/// Order an averaging entry for `direction` would stack on: the newest
/// un-closed MAIN_OPEN, else the newest un-closed HEDGE_OPEN
pub fn candidate<'a>(graph: &OrderGraph<'a>, direction: Direction) -> Option<&'a TradeOrder> {
    graph
        .latest_unclosed(OrderPurpose::MainOpen, direction)
        .or_else(|| graph.latest_unclosed(OrderPurpose::HedgeOpen, direction))
}

/// Whether an AVERAGING_OPEN may be placed on `trigger` at `pnl_pct`
pub fn check_open(graph: &OrderGraph<'_>, trigger: &TradeOrder, pnl_pct: Decimal, threshold_pct: Decimal) -> bool {
    trigger.is_filled()
        && !trigger.purpose.is_averaging()
        && !graph.has_open_averaging(trigger.direction)
        && pnl_pct <= threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::OrderStatus;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn order(id: &str, purpose: OrderPurpose, direction: Direction, parent: Option<&str>, age: i64) -> TradeOrder {
        TradeOrder {
            order_id: id.into(),
            symbol: "ETHUSDT".into(),
            purpose,
            direction,
            status: OrderStatus::Filled,
            price: dec!(2500),
            count: dec!(0.04),
            pnl: Decimal::ZERO,
            commission: Decimal::ZERO,
            leverage: 10,
            parent_order_id: parent.map(str::to_string),
            related_hedge_id: None,
            pnl_high: Decimal::ZERO,
            trailing_active: false,
            order_time: Utc::now() - Duration::minutes(age),
        }
    }

    #[test]
    fn test_one_average_per_direction() {
        let orders = vec![
            order("M", OrderPurpose::MainOpen, Direction::Long, None, 10),
            order("H", OrderPurpose::HedgeOpen, Direction::Short, None, 8),
            order("A", OrderPurpose::AveragingOpen, Direction::Long, Some("M"), 5),
        ];
        let graph = OrderGraph::new(&orders);
        let main = graph.get("M").unwrap();
        let hedge = graph.get("H").unwrap();

        assert!(!check_open(&graph, main, dec!(-5), dec!(-3)));
        assert!(check_open(&graph, hedge, dec!(-5), dec!(-3)));
    }

    #[test]
    fn test_gate_requires_loss_beyond_threshold() {
        let orders = vec![order("M", OrderPurpose::MainOpen, Direction::Long, None, 1)];
        let graph = OrderGraph::new(&orders);
        let main = graph.get("M").unwrap();
        assert!(!check_open(&graph, main, dec!(-2.99), dec!(-3)));
        assert!(check_open(&graph, main, dec!(-3), dec!(-3)));
    }

    #[test]
    fn test_averaging_order_never_triggers_itself() {
        let orders = vec![
            order("M", OrderPurpose::MainOpen, Direction::Long, None, 2),
            order("A", OrderPurpose::AveragingOpen, Direction::Long, Some("M"), 1),
        ];
        let graph = OrderGraph::new(&orders);
        assert!(!check_open(&graph, graph.get("A").unwrap(), dec!(-10), dec!(-3)));
    }

    #[test]
    fn test_candidate_prefers_main_then_newest_hedge() {
        let orders = vec![
            order("H1", OrderPurpose::HedgeOpen, Direction::Short, None, 9),
            order("H2", OrderPurpose::HedgeOpen, Direction::Short, None, 3),
            order("M", OrderPurpose::MainOpen, Direction::Long, None, 10),
        ];
        let graph = OrderGraph::new(&orders);
        assert_eq!(candidate(&graph, Direction::Long).map(|o| o.order_id.as_str()), Some("M"));
        assert_eq!(candidate(&graph, Direction::Short).map(|o| o.order_id.as_str()), Some("H2"));
    }
}
