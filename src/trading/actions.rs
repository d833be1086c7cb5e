//! User-triggered trading actions
//!
//! Thin façade over the orchestrator for the API layer. Every failure is
//! returned as [`TradeError::Action`] carrying the session, symbol and
//! direction it happened in.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::orchestrator::Orchestrator;
use crate::common::errors::{Result, TradeError};
use crate::common::traits::PriceFeed;
use crate::common::types::{Direction, SessionMode};
use crate::plan::service::PlanService;
use crate::session::model::Session;
use crate::session::service::SessionService;

pub struct TradeActions {
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<SessionService>,
    plans: Arc<PlanService>,
    prices: Arc<dyn PriceFeed>,
}

impl TradeActions {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        sessions: Arc<SessionService>,
        plans: Arc<PlanService>,
        prices: Arc<dyn PriceFeed>,
    ) -> Self {
        Self {
            orchestrator,
            sessions,
            plans,
            prices,
        }
    }

    /// Start a session on `symbol` at the current price
    #[instrument(skip(self))]
    pub async fn open_session(
        &self,
        symbol: &str,
        direction: Direction,
        mode: SessionMode,
    ) -> Result<Option<Session>> {
        let attempt = async {
            let plan = self.plans.get_plan(symbol).await?;
            let price = self.prices.current_price(symbol).await?;
            self.orchestrator.open_session(&plan, direction, mode, price).await
        };
        attempt
            .await
            .map_err(|e| e.in_action("-", symbol, Some(direction)))
    }

    /// Close every open position of the session
    #[instrument(skip(self))]
    pub async fn close_all_active_orders(&self, session_id: &str) -> Result<Session> {
        self.close_where(session_id, None).await
    }

    /// Close the open positions of one direction
    #[instrument(skip(self))]
    pub async fn close_order_by_direction(&self, session_id: &str, direction: Direction) -> Result<Session> {
        self.close_where(session_id, Some(direction)).await
    }

    /// Close every leg, then force the session to Completed
    #[instrument(skip(self))]
    pub async fn close_session(&self, session_id: &str) -> Result<Session> {
        let session = self.close_where(session_id, None).await?;
        if session.is_completed() {
            return Ok(session);
        }
        if session.has_exposure() {
            warn!(session_id, "Legs still open after close attempts, forcing completion");
        }
        self.sessions
            .close_session(session_id)
            .await
            .map_err(|e| e.in_action(session_id, &session.symbol, None))
    }

    async fn close_where(&self, session_id: &str, direction: Option<Direction>) -> Result<Session> {
        let mut session = self
            .sessions
            .get(session_id)
            .await
            .map_err(|e| e.in_action(session_id, "-", direction))?;
        if session.is_completed() {
            debug!(session_id, "Session already completed");
            return Ok(session);
        }

        let targets: Vec<(String, Direction)> = session
            .graph()
            .open_positions()
            .iter()
            .filter(|p| direction.map_or(true, |d| p.direction() == d))
            .map(|p| (p.tip.order_id.clone(), p.direction()))
            .collect();

        if targets.is_empty() {
            info!(session_id, ?direction, "No open positions to close");
            return Ok(session);
        }

        for (order_id, leg_direction) in targets {
            let outcome = self
                .orchestrator
                .close_position(&session, &order_id, None, None)
                .await
                .map_err(|e| context(e, &session, leg_direction))?;
            if !outcome.is_filled() {
                warn!(session_id, %order_id, "Close not confirmed, will need another attempt");
            }
            session = outcome.into_session();
        }
        Ok(session)
    }
}

fn context(error: TradeError, session: &Session, direction: Direction) -> TradeError {
    error.in_action(&session.id, &session.symbol, Some(direction))
}
