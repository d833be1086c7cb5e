//! Decision engine
//!
//! Evaluates one session against the current price and returns at most one
//! action. Rules are checked in priority order: protective exit, trailing
//! stop, hedge, averaging. Open positions are re-derived from the order
//! history on every call.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::averaging;
use super::pnl::pnl_percent;
use super::protective::{Leg, ProtectiveExit, ProtectiveSignal};
use super::trailing::{TrailingSignal, TrailingStop};
use super::types::{Action, ActionReason};
use crate::common::types::{Direction, OrderPurpose, SessionMode};
use crate::config::types::EngineConfig;
use crate::plan::model::Plan;
use crate::session::model::Session;

/// Snapshot of one open position at the evaluated price
#[derive(Debug, Clone)]
struct PositionView {
    tip_id: String,
    tip_purpose: OrderPurpose,
    root_id: String,
    root_purpose: OrderPurpose,
    related_hedge_id: Option<String>,
    direction: Direction,
    pnl_pct: Decimal,
    /// Main position with an open hedge referencing it
    hedged: bool,
}

pub struct DecisionEngine {
    config: EngineConfig,
    trailing: TrailingStop,
    protective: ProtectiveExit,
}

impl DecisionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            trailing: TrailingStop::from_config(&config),
            protective: ProtectiveExit::from_config(&config),
            config,
        }
    }

    pub fn protective(&self) -> &ProtectiveExit {
        &self.protective
    }

    /// Drop per-session engine state once a session is done
    pub fn forget(&self, session_id: &str) {
        self.protective.disarm(session_id);
    }

    /// Evaluate `session` at `price`.
    ///
    /// Trailing marks on the session's tip orders are updated in place; the
    /// caller persists the session.
    pub fn evaluate(&self, session: &mut Session, plan: &Plan, price: Decimal, now: DateTime<Utc>) -> Option<Action> {
        if session.is_completed() {
            self.forget(&session.id);
            return None;
        }
        if price <= Decimal::ZERO {
            warn!(session_id = %session.id, %price, "Ignoring non-positive price");
            return None;
        }

        let positions = positions(session, price);
        if positions.is_empty() {
            return None;
        }

        if let Some(action) = self.check_protective(session, &positions, now) {
            return Some(action);
        }
        if let Some(action) = self.check_trailing(session, &positions) {
            return Some(action);
        }
        if session.mode == SessionMode::Hedging {
            if let Some(action) = self.check_hedge(session, plan, &positions) {
                return Some(action);
            }
        }
        self.check_averaging(session, plan, price)
    }

    fn check_protective(&self, session: &Session, positions: &[PositionView], now: DateTime<Utc>) -> Option<Action> {
        let both_sides = positions.iter().any(|p| p.direction == Direction::Long)
            && positions.iter().any(|p| p.direction == Direction::Short);
        let legs: Vec<Leg> = if both_sides {
            positions
                .iter()
                .map(|p| Leg {
                    order_id: p.tip_id.clone(),
                    pnl_pct: p.pnl_pct,
                })
                .collect()
        } else {
            Vec::new()
        };

        match self.protective.check(&session.id, &legs, now) {
            ProtectiveSignal::Trigger(order_id) => {
                let position = positions.iter().find(|p| p.tip_id == order_id)?;
                Some(close(position, ActionReason::ProtectiveExit))
            }
            _ => None,
        }
    }

    fn check_trailing(&self, session: &mut Session, positions: &[PositionView]) -> Option<Action> {
        for position in positions {
            let Some(tip) = session.find_order_mut(&position.tip_id) else {
                continue;
            };
            match self.trailing.update(tip, position.pnl_pct) {
                TrailingSignal::Triggered => {
                    return Some(close(position, ActionReason::TrailingStop));
                }
                TrailingSignal::Activated | TrailingSignal::Raised => {
                    debug!(
                        order_id = %position.tip_id,
                        high = %tip.pnl_high,
                        "Trailing mark updated"
                    );
                }
                TrailingSignal::Idle | TrailingSignal::Holding => {}
            }
        }
        None
    }

    fn check_hedge(&self, session: &Session, plan: &Plan, positions: &[PositionView]) -> Option<Action> {
        if session.hedge_count >= self.config.max_hedges {
            return None;
        }
        positions
            .iter()
            .filter(|p| p.root_purpose == OrderPurpose::MainOpen && !p.hedged)
            .find(|p| p.pnl_pct <= plan.metrics.hedge_trigger_pct)
            .map(|p| Action::Open {
                direction: p.direction.opposite(),
                purpose: OrderPurpose::HedgeOpen,
                parent_order_id: None,
                related_hedge_id: Some(p.root_id.clone()),
                reason: ActionReason::Hedge,
                pnl_pct: p.pnl_pct,
            })
    }

    fn check_averaging(&self, session: &Session, plan: &Plan, price: Decimal) -> Option<Action> {
        let graph = session.graph();
        for direction in [session.direction, session.direction.opposite()] {
            let Some(candidate) = averaging::candidate(&graph, direction) else {
                continue;
            };
            let pnl_pct = pnl_percent(direction, candidate.price, price);
            if averaging::check_open(&graph, candidate, pnl_pct, plan.metrics.averaging_trigger_pct) {
                return Some(Action::Open {
                    direction,
                    purpose: OrderPurpose::AveragingOpen,
                    parent_order_id: Some(candidate.order_id.clone()),
                    related_hedge_id: candidate.related_hedge_id.clone(),
                    reason: ActionReason::Averaging,
                    pnl_pct,
                });
            }
        }
        None
    }
}

fn close(position: &PositionView, reason: ActionReason) -> Action {
    Action::Close {
        order_id: position.tip_id.clone(),
        direction: position.direction,
        purpose: position.tip_purpose.close_purpose(),
        related_hedge_id: position.related_hedge_id.clone(),
        reason,
        pnl_pct: position.pnl_pct,
    }
}

fn positions(session: &Session, price: Decimal) -> Vec<PositionView> {
    let graph = session.graph();
    let mut views: Vec<(DateTime<Utc>, PositionView)> = graph
        .open_positions()
        .into_iter()
        .map(|p| {
            let root = p.root();
            let hedged = root.purpose == OrderPurpose::MainOpen
                && session.orders.iter().any(|o| {
                    o.purpose == OrderPurpose::HedgeOpen
                        && o.related_hedge_id.as_deref() == Some(root.order_id.as_str())
                        && !graph.is_open_order_closed(&o.order_id)
                });
            let view = PositionView {
                tip_id: p.tip.order_id.clone(),
                tip_purpose: p.tip.purpose,
                root_id: root.order_id.clone(),
                root_purpose: root.purpose,
                related_hedge_id: root.related_hedge_id.clone(),
                direction: p.direction(),
                pnl_pct: pnl_percent(p.direction(), p.entry_price(), price),
                hedged,
            };
            (root.order_time, view)
        })
        .collect();
    views.sort_by_key(|(at, _)| *at);
    views.into_iter().map(|(_, v)| v).collect()
}
