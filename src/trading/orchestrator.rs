//! Orchestrator: turns engine decisions into confirmed fills
//!
//! Every order goes through the same path: size, submit, wait for FILLED
//! from either producer, snapshot the fill as a [`TradeOrder`] and commit it
//! to the session. Nothing is recorded before a fill is confirmed. A fill
//! that misses its deadline is remembered and committed when its execution
//! report arrives later.
//!
//! A MAIN_OPEN per symbol and a close per position are claimed before they
//! are submitted. The claim lives until the fill is committed or the order
//! dies, so a second caller never sends a duplicate order in the meantime.

use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::common::errors::{Result, TradeError};
use crate::common::types::{Direction, OrderPurpose, OrderStatus, SessionMode};
use crate::config::types::ExecutionConfig;
use crate::exchange::messages::{OrderRecord, OrderUpdate};
use crate::exchange::reconciler::OrderReconciler;
use crate::plan::model::Plan;
use crate::session::ancestry::OpenPosition;
use crate::session::model::{Session, TradeOrder};
use crate::session::service::SessionService;
use crate::strategy::pnl::realized_pnl;
use crate::strategy::{order_quantity, quantize_price, FeeSchedule};

/// What an execution attempt did to the session
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Fill confirmed and committed
    Filled(Session),
    /// Nothing committed; re-evaluated on the next tick
    Unchanged(Session),
}

impl ExecutionOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, ExecutionOutcome::Filled(_))
    }

    pub fn session(&self) -> &Session {
        match self {
            ExecutionOutcome::Filled(s) | ExecutionOutcome::Unchanged(s) => s,
        }
    }

    pub fn into_session(self) -> Session {
        match self {
            ExecutionOutcome::Filled(s) | ExecutionOutcome::Unchanged(s) => s,
        }
    }
}

/// Everything needed to record a fill that has not been confirmed yet
#[derive(Debug, Clone)]
struct OrderIntent {
    /// `None` for the MAIN_OPEN that starts a new session
    session_id: Option<String>,
    symbol: String,
    mode: SessionMode,
    purpose: OrderPurpose,
    direction: Direction,
    leverage: u32,
    parent_order_id: Option<String>,
    related_hedge_id: Option<String>,
    /// Weighted entry of the position being closed
    entry_price: Option<Decimal>,
    /// Used when the exchange reports no execution price
    reference_price: Decimal,
    /// In-flight key held until the intent is committed or dropped
    claim: Option<String>,
}

pub struct Orchestrator {
    reconciler: Arc<OrderReconciler>,
    sessions: Arc<SessionService>,
    fees: FeeSchedule,
    execution: ExecutionConfig,
    pending: DashMap<String, OrderIntent>,
    in_flight: DashSet<String>,
}

impl Orchestrator {
    pub fn new(
        reconciler: Arc<OrderReconciler>,
        sessions: Arc<SessionService>,
        fees: FeeSchedule,
        execution: ExecutionConfig,
    ) -> Self {
        Self {
            reconciler,
            sessions,
            fees,
            execution,
            pending: DashMap::new(),
            in_flight: DashSet::new(),
        }
    }

    pub fn reconciler(&self) -> &Arc<OrderReconciler> {
        &self.reconciler
    }

    /// Orders submitted but not yet committed
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Place the MAIN_OPEN for `plan` and start a session on fill.
    ///
    /// Returns `None` when the fill was not confirmed in time; the session
    /// is then created when the execution report arrives. Until then the
    /// symbol refuses another MAIN_OPEN.
    #[instrument(skip(self, plan), fields(symbol = %plan.symbol))]
    pub async fn open_session(
        &self,
        plan: &Plan,
        direction: Direction,
        mode: SessionMode,
        price: Decimal,
    ) -> Result<Option<Session>> {
        if !plan.can_open() {
            return Err(TradeError::StateConflict(format!(
                "plan {} cannot open a session (active: {}, closed: {})",
                plan.symbol, plan.active, plan.closed
            )));
        }

        let quantity = order_quantity(&plan.symbol, plan.amount_per_trade, price, &plan.sizes)?;
        let claim = format!("open:{}", plan.symbol);
        if !self.in_flight.insert(claim.clone()) {
            return Err(TradeError::StateConflict(format!(
                "a MAIN_OPEN for {} is still in flight",
                plan.symbol
            )));
        }
        let record = match self.submit_open(&plan.symbol, direction, quantity).await {
            Ok(record) => record,
            Err(e) => {
                self.in_flight.remove(&claim);
                return Err(e);
            }
        };
        let intent = OrderIntent {
            session_id: None,
            symbol: plan.symbol.clone(),
            mode,
            purpose: OrderPurpose::MainOpen,
            direction,
            leverage: plan.leverage,
            parent_order_id: None,
            related_hedge_id: None,
            entry_price: None,
            reference_price: quantize_price(price, &plan.sizes),
            claim: Some(claim),
        };

        self.execute(record, intent, self.execution.open_fill_timeout())
            .await
    }

    /// Check the stored plan is still free, then send the MAIN_OPEN
    async fn submit_open(&self, symbol: &str, direction: Direction, quantity: Decimal) -> Result<OrderRecord> {
        let plan = self.sessions.plans().get_plan(symbol).await?;
        if !plan.can_open() {
            return Err(TradeError::StateConflict(format!(
                "plan {} cannot open a session (active: {}, closed: {})",
                plan.symbol, plan.active, plan.closed
            )));
        }
        self.reconciler.create(symbol, direction, quantity).await
    }

    /// Add exposure to an existing session
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, session, plan), fields(session_id = %session.id, symbol = %session.symbol))]
    pub async fn open_position(
        &self,
        session: &Session,
        direction: Direction,
        purpose: OrderPurpose,
        price: Decimal,
        plan: &Plan,
        parent_order_id: Option<String>,
        related_hedge_id: Option<String>,
    ) -> Result<ExecutionOutcome> {
        if session.is_completed() {
            return Err(TradeError::StateConflict(format!(
                "session {} is completed",
                session.id
            )));
        }
        if !purpose.is_open() || purpose == OrderPurpose::MainOpen {
            return Err(TradeError::Validation(format!(
                "{} cannot be placed on a running session",
                purpose
            )));
        }
        if purpose == OrderPurpose::AveragingOpen && parent_order_id.is_none() {
            return Err(TradeError::Validation(
                "averaging order needs the order it averages".to_string(),
            ));
        }

        let quantity = order_quantity(&session.symbol, plan.amount_per_trade, price, &plan.sizes)?;
        let record = self.reconciler.create(&session.symbol, direction, quantity).await?;
        let intent = OrderIntent {
            session_id: Some(session.id.clone()),
            symbol: session.symbol.clone(),
            mode: session.mode,
            purpose,
            direction,
            leverage: plan.leverage,
            parent_order_id,
            related_hedge_id,
            entry_price: None,
            reference_price: quantize_price(price, &plan.sizes),
            claim: None,
        };

        let committed = self
            .execute(record, intent, self.execution.open_fill_timeout())
            .await?;
        Ok(outcome(committed, session))
    }

    /// Close the position `order_id` belongs to.
    ///
    /// `order_id` may be the root open or any averaging order stacked on it;
    /// the whole chain is closed at its weighted entry. The close purpose
    /// defaults to the counterpart of the chain tip. The decision is taken
    /// on the stored session, not on the caller's snapshot; a close already
    /// in flight for the same position leaves this call `Unchanged`.
    #[instrument(skip(self, session), fields(session_id = %session.id, symbol = %session.symbol))]
    pub async fn close_position(
        &self,
        session: &Session,
        order_id: &str,
        related_hedge_id: Option<String>,
        purpose: Option<OrderPurpose>,
    ) -> Result<ExecutionOutcome> {
        let target = session
            .find_order(order_id)
            .ok_or_else(|| TradeError::OrderNotFound(order_id.to_string()))?;
        if !target.purpose.is_open() {
            return Err(TradeError::Validation(format!(
                "order {} is a {} and cannot be closed",
                order_id, target.purpose
            )));
        }

        let root_id = session.graph().root_of(order_id)?.order_id.clone();
        let claim = format!("close:{}:{}", session.id, root_id);
        if !self.in_flight.insert(claim.clone()) {
            debug!(order_id, "Close already in flight");
            return Ok(ExecutionOutcome::Unchanged(session.clone()));
        }

        let result = self
            .submit_close(&session.id, order_id, related_hedge_id, purpose, &claim)
            .await;
        match result {
            Ok(Submitted::Sent(record, intent, current)) => {
                let committed = self
                    .execute(record, intent, self.execution.close_fill_timeout())
                    .await?;
                Ok(outcome(committed, &current))
            }
            Ok(Submitted::Skipped(current)) => {
                self.in_flight.remove(&claim);
                Ok(ExecutionOutcome::Unchanged(current))
            }
            Err(e) => {
                self.in_flight.remove(&claim);
                Err(e)
            }
        }
    }

    /// Re-read the session and send the close order if there is still
    /// something to close
    async fn submit_close(
        &self,
        session_id: &str,
        order_id: &str,
        related_hedge_id: Option<String>,
        purpose: Option<OrderPurpose>,
        claim: &str,
    ) -> Result<Submitted> {
        let current = self.sessions.get(session_id).await?;

        let (intent, quantity) = {
            let graph = current.graph();
            let target = graph
                .get(order_id)
                .ok_or_else(|| TradeError::OrderNotFound(order_id.to_string()))?;
            if graph.is_open_order_closed(order_id) {
                debug!(order_id, "Position already closed");
                return Ok(Submitted::Skipped(current.clone()));
            }
            if current.is_completed() {
                return Err(TradeError::StateConflict(format!(
                    "session {} is completed",
                    session_id
                )));
            }
            let tip = graph.latest_averaging(order_id).unwrap_or(target);
            let position = OpenPosition {
                tip,
                chain: graph.chain(&tip.order_id),
            };
            let close_purpose = purpose.unwrap_or_else(|| tip.purpose.close_purpose());
            if !close_purpose.is_close() {
                return Err(TradeError::Validation(format!(
                    "{} is not a closing purpose",
                    close_purpose
                )));
            }

            let intent = OrderIntent {
                session_id: Some(current.id.clone()),
                symbol: current.symbol.clone(),
                mode: current.mode,
                purpose: close_purpose,
                direction: tip.direction,
                leverage: tip.leverage,
                parent_order_id: Some(tip.order_id.clone()),
                related_hedge_id: related_hedge_id.or_else(|| tip.related_hedge_id.clone()),
                entry_price: Some(position.entry_price()),
                reference_price: position.entry_price(),
                claim: Some(claim.to_string()),
            };
            (intent, position.quantity())
        };

        match self
            .reconciler
            .close(&current.symbol, intent.direction, quantity)
            .await?
        {
            Some(record) => Ok(Submitted::Sent(record, intent, current)),
            None => Ok(Submitted::Skipped(current)),
        }
    }

    /// Wait for the fill and commit it; on deadline the intent moves to the
    /// pending map together with its claim
    async fn execute(
        &self,
        record: OrderRecord,
        intent: OrderIntent,
        timeout: Duration,
    ) -> Result<Option<Session>> {
        let filled = match self.await_fill(&record, timeout).await {
            Ok(Some(filled)) => filled,
            Ok(None) => return self.defer(&record, intent).await,
            Err(e) => {
                self.release(&intent);
                return Err(e);
            }
        };
        let committed = self.commit(&filled, &intent).await;
        self.release(&intent);
        committed.map(Some)
    }

    /// Feed one execution report from the stream.
    ///
    /// Commits the fill of an order whose wait timed out earlier. Returns the
    /// updated session when that happened.
    pub async fn on_execution_report(&self, update: OrderUpdate) -> Result<Option<Session>> {
        let order_id = update.order_id.clone();
        self.reconciler.apply_update(update).await;
        self.settle_pending(&order_id).await
    }

    /// Query the exchange for every pending order and settle the ones that
    /// ended. Covers fills whose execution report never arrived.
    pub async fn resolve_pending(&self) -> usize {
        let waiting: Vec<(String, String)> = self
            .pending
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().symbol.clone()))
            .collect();

        let mut committed = 0;
        for (order_id, symbol) in waiting {
            if let Err(e) = self.reconciler.refresh(&symbol, &order_id).await {
                debug!(%order_id, error = %e, "Pending order query failed");
                continue;
            }
            match self.settle_pending(&order_id).await {
                Ok(Some(_)) => committed += 1,
                Ok(None) => {}
                Err(e) => warn!(%order_id, error = %e, "Failed to commit pending fill"),
            }
        }
        committed
    }

    async fn settle_pending(&self, order_id: &str) -> Result<Option<Session>> {
        if !self.pending.contains_key(order_id) {
            return Ok(None);
        }
        let Ok(record) = self.reconciler.get(order_id) else {
            return Ok(None);
        };

        if record.status.is_dead() {
            if let Some((_, intent)) = self.pending.remove(order_id) {
                self.release(&intent);
                warn!(%order_id, status = %record.status, "Pending order ended without fill");
            }
            return Ok(None);
        }
        if !record.is_filled() {
            return Ok(None);
        }
        let Some((_, intent)) = self.pending.remove(order_id) else {
            return Ok(None);
        };

        info!(%order_id, purpose = %intent.purpose, "Committing late fill");
        let committed = self.commit(&record, &intent).await;
        self.release(&intent);
        committed.map(Some)
    }

    /// Wait for the order to fill, `None` on deadline
    async fn await_fill(&self, record: &OrderRecord, timeout: Duration) -> Result<Option<OrderRecord>> {
        match tokio::time::timeout(timeout, self.poll_fill(record)).await {
            Ok(result) => result.map(Some),
            Err(_) => {
                warn!(order_id = %record.order_id, ?timeout, "Fill not confirmed before deadline");
                Ok(None)
            }
        }
    }

    async fn poll_fill(&self, record: &OrderRecord) -> Result<OrderRecord> {
        let mut ticker = tokio::time::interval(self.execution.fill_poll_interval());
        loop {
            ticker.tick().await;

            let current = match self.reconciler.get(&record.order_id) {
                Ok(local) if local.status.is_terminal() => local,
                _ => match self.reconciler.refresh(&record.symbol, &record.order_id).await {
                    Ok(fetched) => fetched,
                    Err(e) => {
                        debug!(order_id = %record.order_id, error = %e, "Order query failed, retrying");
                        continue;
                    }
                },
            };

            match current.status {
                OrderStatus::Filled => return Ok(current),
                status if status.is_dead() => {
                    return Err(TradeError::OrderRejected(format!(
                        "order {} ended {}",
                        record.order_id, status
                    )))
                }
                _ => {}
            }
        }
    }

    /// Remember an unconfirmed order; commits at once if the fill slipped in
    async fn defer(&self, record: &OrderRecord, intent: OrderIntent) -> Result<Option<Session>> {
        self.pending.insert(record.order_id.clone(), intent);

        // The report may have been consumed between the deadline and the insert
        self.settle_pending(&record.order_id).await
    }

    fn release(&self, intent: &OrderIntent) {
        if let Some(claim) = &intent.claim {
            self.in_flight.remove(claim);
        }
    }

    async fn commit(&self, record: &OrderRecord, intent: &OrderIntent) -> Result<Session> {
        let order = self.trade_order(record, intent);
        info!(
            order_id = %order.order_id,
            purpose = %order.purpose,
            direction = %order.direction,
            price = %order.price,
            count = %order.count,
            pnl = %order.pnl,
            "Fill confirmed"
        );
        match &intent.session_id {
            Some(session_id) => self.sessions.add_order(session_id, order).await,
            None => {
                self.sessions
                    .create(&intent.symbol, intent.direction, intent.mode, order)
                    .await
            }
        }
    }

    fn trade_order(&self, record: &OrderRecord, intent: &OrderIntent) -> TradeOrder {
        let price = match record.fill_price() {
            p if p > Decimal::ZERO => p,
            _ => intent.reference_price,
        };
        let count = if record.executed_qty > Decimal::ZERO {
            record.executed_qty
        } else {
            record.orig_qty
        };
        let pnl = match intent.entry_price {
            Some(entry) if intent.purpose.is_close() => realized_pnl(intent.direction, entry, price, count),
            _ => Decimal::ZERO,
        };

        TradeOrder {
            order_id: record.order_id.clone(),
            symbol: intent.symbol.clone(),
            purpose: intent.purpose,
            direction: intent.direction,
            status: OrderStatus::Filled,
            price,
            count,
            pnl,
            commission: self.fees.commission(record.commission, price, count),
            leverage: intent.leverage,
            parent_order_id: intent.parent_order_id.clone(),
            related_hedge_id: intent.related_hedge_id.clone(),
            pnl_high: Decimal::ZERO,
            trailing_active: false,
            order_time: record.updated_at,
        }
    }
}

/// Result of preparing a close against the stored session
enum Submitted {
    Sent(OrderRecord, OrderIntent, Session),
    /// Nothing to close any more
    Skipped(Session),
}

fn outcome(committed: Option<Session>, fallback: &Session) -> ExecutionOutcome {
    match committed {
        Some(updated) => ExecutionOutcome::Filled(updated),
        None => ExecutionOutcome::Unchanged(fallback.clone()),
    }
}
