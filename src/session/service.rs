//! Session service: order merging, completion and plan settlement
//!
//! Every mutation holds the session's keyed lock for the whole
//! load-decide-save cycle. Completion commits the session first and then
//! settles the plan; the two steps are not atomic, which is what
//! [`SessionService::reconcile_plans`] repairs.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::model::{Session, TradeOrder};
use crate::common::errors::{Result, TradeError};
use crate::common::locks::KeyedLocks;
use crate::common::traits::SessionCatalog;
use crate::common::types::{Direction, OrderPurpose, SessionMode};
use crate::config::types::LockConfig;
use crate::plan::service::PlanService;

pub struct SessionService {
    catalog: Arc<dyn SessionCatalog>,
    plans: Arc<PlanService>,
    locks: KeyedLocks,
}

impl SessionService {
    pub fn new(catalog: Arc<dyn SessionCatalog>, plans: Arc<PlanService>, locks: &LockConfig) -> Self {
        Self {
            catalog,
            plans,
            locks: KeyedLocks::new("session", locks.acquire_timeout()),
        }
    }

    /// Unlocked read of the latest stored session
    pub fn plans(&self) -> &Arc<PlanService> {
        &self.plans
    }

    pub async fn get(&self, session_id: &str) -> Result<Session> {
        self.catalog
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| TradeError::SessionNotFound(session_id.to_string()))
    }

    /// Start a session around a filled primary order and mark the plan busy
    #[instrument(skip(self, main), fields(order_id = %main.order_id))]
    pub async fn create(
        &self,
        symbol: &str,
        direction: Direction,
        mode: SessionMode,
        main: TradeOrder,
    ) -> Result<Session> {
        validate_fill(&main)?;
        if main.purpose != OrderPurpose::MainOpen {
            return Err(TradeError::Validation(format!(
                "session must start with MAIN_OPEN, got {}",
                main.purpose
            )));
        }

        let session = Session::new(symbol, direction, mode, main);
        let _guard = self.locks.acquire(&session.id).await?;

        self.plans.open_session(symbol, &session.id).await?;
        if let Err(e) = self.catalog.save(&session).await {
            // Undo the plan reservation so the symbol is not stuck busy
            if let Err(undo) = self.plans.free_session(symbol, Some(&session.id)).await {
                error!(symbol, session_id = %session.id, error = %undo, "Failed to release plan after save error");
            }
            return Err(e);
        }

        info!(
            symbol,
            session_id = %session.id,
            %direction,
            %mode,
            "Session started"
        );
        Ok(session)
    }

    /// Merge a filled order into the session.
    ///
    /// Idempotent per order id. Recomputes rollups and activity flags from
    /// the full history and completes the session when nothing stays open.
    #[instrument(skip(self, order), fields(order_id = %order.order_id, purpose = %order.purpose))]
    pub async fn add_order(&self, session_id: &str, order: TradeOrder) -> Result<Session> {
        if order.order_id.trim().is_empty() {
            return Err(TradeError::Validation("order id is empty".to_string()));
        }
        validate_fill(&order)?;

        let _guard = self.locks.acquire(session_id).await?;
        let mut session = self.get(session_id).await?;

        if session.contains_order(&order.order_id) {
            debug!(session_id, "Order already recorded");
            return Ok(session);
        }
        if session.is_completed() {
            return Err(TradeError::StateConflict(format!(
                "session {} is completed, order {} not recorded",
                session_id, order.order_id
            )));
        }
        if session.orders.first().map(|o| o.purpose) != Some(OrderPurpose::MainOpen) {
            error!(session_id, "Stored session does not start with its MAIN_OPEN");
            return Err(TradeError::Unrecoverable(format!(
                "session {} has no MAIN_OPEN at the head of its history",
                session_id
            )));
        }
        validate_lineage(&session, &order)?;

        session.orders.push(order);
        session.recompute();
        let completed = !session.has_exposure() && session.complete(Utc::now());

        self.catalog.save(&session).await?;

        if completed {
            info!(
                session_id,
                symbol = %session.symbol,
                pnl = %session.pnl,
                commission = %session.commission,
                "Session completed"
            );
            self.settle(&mut session).await;
        }
        Ok(session)
    }

    /// Force the session to Completed regardless of open legs
    #[instrument(skip(self))]
    pub async fn close_session(&self, session_id: &str) -> Result<Session> {
        let _guard = self.locks.acquire(session_id).await?;
        let mut session = self.get(session_id).await?;

        if !session.complete(Utc::now()) {
            debug!(session_id, "Session already completed");
            return Ok(session);
        }
        if session.has_exposure() {
            warn!(session_id, symbol = %session.symbol, "Closing session with open legs");
        }

        self.catalog.save(&session).await?;
        self.settle(&mut session).await;
        Ok(session)
    }

    /// Run `f` against the session under its lock and store the result
    pub async fn mutate<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<(Session, R)> {
        let _guard = self.locks.acquire(session_id).await?;
        let mut session = self.get(session_id).await?;
        let result = f(&mut session);
        self.catalog.save(&session).await?;
        Ok((session, result))
    }

    /// Repair plans left busy by sessions that completed without settling.
    ///
    /// Safe to run any number of times; returns how many plans were repaired.
    #[instrument(skip(self))]
    pub async fn reconcile_plans(&self) -> Result<usize> {
        let mut repaired = 0;

        for plan in self.plans.list_plans().await? {
            if !plan.active {
                continue;
            }
            let Some(session_id) = plan.current_session_id.clone() else {
                warn!(symbol = %plan.symbol, "Active plan without session, releasing");
                if self.plans.free_session(&plan.symbol, None).await? {
                    repaired += 1;
                }
                continue;
            };

            let _guard = self.locks.acquire(&session_id).await?;
            match self.catalog.find_by_id(&session_id).await? {
                None => {
                    warn!(symbol = %plan.symbol, %session_id, "Plan points at unknown session, releasing");
                    if self.plans.free_session(&plan.symbol, Some(&session_id)).await? {
                        repaired += 1;
                    }
                }
                Some(mut session) if session.is_completed() => {
                    warn!(symbol = %plan.symbol, %session_id, "Settling completed session left on plan");
                    self.plans
                        .settle(&session.symbol, &session.id, session.net_profit())
                        .await?;
                    session.settled = true;
                    self.catalog.save(&session).await?;
                    repaired += 1;
                }
                Some(_) => {}
            }
        }

        if repaired > 0 {
            info!(repaired, "Plan reconciliation sweep repaired plans");
        }
        Ok(repaired)
    }

    /// Free and credit the plan; failures are left to the reconciliation sweep
    async fn settle(&self, session: &mut Session) {
        match self
            .plans
            .settle(&session.symbol, &session.id, session.net_profit())
            .await
        {
            Ok(_) => {
                session.settled = true;
                if let Err(e) = self.catalog.save(session).await {
                    warn!(session_id = %session.id, error = %e, "Failed to store settled flag");
                }
            }
            Err(e) => {
                error!(
                    session_id = %session.id,
                    symbol = %session.symbol,
                    error = %e,
                    "Plan settlement failed, leaving it to the reconciliation sweep"
                );
            }
        }
    }
}

fn validate_fill(order: &TradeOrder) -> Result<()> {
    if !order.is_filled() {
        return Err(TradeError::Validation(format!(
            "order {} is {}, only filled orders are recorded",
            order.order_id, order.status
        )));
    }
    Ok(())
}

/// Closes must reference an open of their own family; averages must
/// reference an open order of the same direction. Either is a conflict
/// once the parent's exposure is already offset.
fn validate_lineage(session: &Session, order: &TradeOrder) -> Result<()> {
    if order.symbol != session.symbol {
        return Err(TradeError::Validation(format!(
            "order {} is for {}, session trades {}",
            order.order_id, order.symbol, session.symbol
        )));
    }
    if order.purpose == OrderPurpose::MainOpen {
        return Err(TradeError::Validation(format!(
            "session {} already has its MAIN_OPEN",
            session.id
        )));
    }
    if order.purpose == OrderPurpose::HedgeOpen {
        return Ok(());
    }

    let parent_id = order.parent_order_id.as_deref().ok_or_else(|| {
        TradeError::Validation(format!("{} order {} has no parent", order.purpose, order.order_id))
    })?;
    let parent = session
        .find_order(parent_id)
        .ok_or_else(|| TradeError::OrderNotFound(parent_id.to_string()))?;

    let valid = if order.purpose == OrderPurpose::AveragingOpen {
        parent.purpose.is_open() && parent.direction == order.direction
    } else {
        parent.purpose.is_open() && parent.purpose.family() == order.purpose.family()
    };
    if !valid {
        return Err(TradeError::Validation(format!(
            "{} order {} cannot reference {} order {}",
            order.purpose, order.order_id, parent.purpose, parent.order_id
        )));
    }
    if session.graph().is_open_order_closed(parent_id) {
        return Err(TradeError::StateConflict(format!(
            "{} order {} references {}, which is already closed",
            order.purpose, order.order_id, parent_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::OrderStatus;
    use crate::config::types::{BatchConfig, EngineConfig};
    use crate::plan::model::{Plan, PlanMetrics, SymbolSizes};
    use crate::store::memory::{InMemoryPlanCatalog, InMemorySessionCatalog};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixture {
        plans: Arc<PlanService>,
        sessions: SessionService,
    }

    async fn fixture() -> Fixture {
        let plans = Arc::new(PlanService::new(
            Arc::new(InMemoryPlanCatalog::new()),
            &LockConfig::default(),
            BatchConfig::default(),
        ));
        let sizes = SymbolSizes {
            lot_size: dec!(0.001),
            tick_size: dec!(0.1),
            min_size: dec!(0.001),
        };
        let plan = Plan::new(
            "BTCUSDT",
            10,
            dec!(100),
            sizes,
            PlanMetrics::from_engine(&EngineConfig::default()),
        )
        .unwrap();
        plans.register(plan).await.unwrap();

        let sessions = SessionService::new(
            Arc::new(InMemorySessionCatalog::new()),
            plans.clone(),
            &LockConfig::default(),
        );
        Fixture { plans, sessions }
    }

    fn fill(id: &str, purpose: OrderPurpose, direction: Direction, parent: Option<&str>) -> TradeOrder {
        TradeOrder {
            order_id: id.to_string(),
            symbol: "BTCUSDT".to_string(),
            purpose,
            direction,
            status: OrderStatus::Filled,
            price: dec!(50000),
            count: dec!(0.002),
            pnl: Decimal::ZERO,
            commission: dec!(0.02),
            leverage: 10,
            parent_order_id: parent.map(str::to_string),
            related_hedge_id: None,
            pnl_high: Decimal::ZERO,
            trailing_active: false,
            order_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_marks_plan_busy() {
        let fx = fixture().await;
        let main = fill("1", OrderPurpose::MainOpen, Direction::Long, None);
        let session = fx
            .sessions
            .create("BTCUSDT", Direction::Long, SessionMode::Hedging, main.clone())
            .await
            .unwrap();

        assert!(session.active_long);
        assert!(!session.active_short);
        let plan = fx.plans.get_plan("BTCUSDT").await.unwrap();
        assert!(plan.active);
        assert_eq!(plan.current_session_id, Some(session.id.clone()));

        let second = fill("2", OrderPurpose::MainOpen, Direction::Short, None);
        let err = fx
            .sessions
            .create("BTCUSDT", Direction::Short, SessionMode::Hedging, second)
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_add_order_is_idempotent() {
        let fx = fixture().await;
        let main = fill("1", OrderPurpose::MainOpen, Direction::Long, None);
        let session = fx
            .sessions
            .create("BTCUSDT", Direction::Long, SessionMode::Hedging, main)
            .await
            .unwrap();

        let hedge = fill("2", OrderPurpose::HedgeOpen, Direction::Short, None);
        let once = fx.sessions.add_order(&session.id, hedge.clone()).await.unwrap();
        let twice = fx.sessions.add_order(&session.id, hedge).await.unwrap();

        assert_eq!(once.orders.len(), 2);
        assert_eq!(twice.orders.len(), 2);
        assert_eq!(twice.commission, dec!(0.04));
        assert_eq!(twice.hedge_count, 1);
        assert!(twice.active_short);
    }

    #[tokio::test]
    async fn test_empty_order_id_rejected() {
        let fx = fixture().await;
        let main = fill("1", OrderPurpose::MainOpen, Direction::Long, None);
        let session = fx
            .sessions
            .create("BTCUSDT", Direction::Long, SessionMode::Scalping, main)
            .await
            .unwrap();
        let err = fx
            .sessions
            .add_order(&session.id, fill("", OrderPurpose::MainClose, Direction::Long, Some("1")))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_close_completes_session_and_settles_once() {
        let fx = fixture().await;
        let main = fill("1", OrderPurpose::MainOpen, Direction::Long, None);
        let session = fx
            .sessions
            .create("BTCUSDT", Direction::Long, SessionMode::Scalping, main)
            .await
            .unwrap();

        let mut close = fill("2", OrderPurpose::MainClose, Direction::Long, Some("1"));
        close.pnl = dec!(1.50);
        let done = fx.sessions.add_order(&session.id, close.clone()).await.unwrap();

        assert!(done.is_completed());
        assert!(done.settled);
        assert!(done.ended_at.is_some());
        // 1.50 - (0.02 + 0.02)
        assert_eq!(done.net_profit(), dec!(1.46));

        let plan = fx.plans.get_plan("BTCUSDT").await.unwrap();
        assert!(!plan.active);
        assert_eq!(plan.profit, dec!(1.46));

        // Replays and forced closes do not post again
        fx.sessions.add_order(&session.id, close).await.unwrap();
        fx.sessions.close_session(&session.id).await.unwrap();
        assert_eq!(fx.plans.get_plan("BTCUSDT").await.unwrap().profit, dec!(1.46));
    }

    #[tokio::test]
    async fn test_late_order_on_completed_session_conflicts() {
        let fx = fixture().await;
        let main = fill("1", OrderPurpose::MainOpen, Direction::Long, None);
        let session = fx
            .sessions
            .create("BTCUSDT", Direction::Long, SessionMode::Hedging, main)
            .await
            .unwrap();
        fx.sessions.close_session(&session.id).await.unwrap();

        let err = fx
            .sessions
            .add_order(&session.id, fill("9", OrderPurpose::HedgeOpen, Direction::Short, None))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeError::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_close_must_match_family() {
        let fx = fixture().await;
        let main = fill("1", OrderPurpose::MainOpen, Direction::Long, None);
        let session = fx
            .sessions
            .create("BTCUSDT", Direction::Long, SessionMode::Hedging, main)
            .await
            .unwrap();

        let wrong = fill("2", OrderPurpose::HedgeClose, Direction::Long, Some("1"));
        assert!(fx.sessions.add_order(&session.id, wrong).await.is_err());
        let orphan = fill("3", OrderPurpose::MainClose, Direction::Long, Some("404"));
        assert!(matches!(
            fx.sessions.add_order(&session.id, orphan).await,
            Err(TradeError::OrderNotFound(_))
        ));
        assert_eq!(fx.sessions.get(&session.id).await.unwrap().orders.len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_plans_settles_stuck_session() {
        let fx = fixture().await;
        let main = fill("1", OrderPurpose::MainOpen, Direction::Long, None);
        let session = fx
            .sessions
            .create("BTCUSDT", Direction::Long, SessionMode::Scalping, main)
            .await
            .unwrap();

        // Simulate a crash between session completion and plan settlement
        fx.sessions
            .mutate(&session.id, |s| {
                s.complete(Utc::now());
            })
            .await
            .unwrap();
        assert!(fx.plans.get_plan("BTCUSDT").await.unwrap().active);

        assert_eq!(fx.sessions.reconcile_plans().await.unwrap(), 1);
        assert_eq!(fx.sessions.reconcile_plans().await.unwrap(), 0);

        let plan = fx.plans.get_plan("BTCUSDT").await.unwrap();
        assert!(!plan.active);
        assert_eq!(plan.profit, dec!(-0.02));
        assert!(fx.sessions.get(&session.id).await.unwrap().settled);
    }

    #[tokio::test]
    async fn test_second_close_of_closed_order_conflicts() {
        let fx = fixture().await;
        let main = fill("1", OrderPurpose::MainOpen, Direction::Long, None);
        let session = fx
            .sessions
            .create("BTCUSDT", Direction::Long, SessionMode::Hedging, main)
            .await
            .unwrap();
        // The open hedge keeps the session running after the main closes
        fx.sessions
            .add_order(&session.id, fill("H", OrderPurpose::HedgeOpen, Direction::Short, None))
            .await
            .unwrap();

        let mut first = fill("2", OrderPurpose::MainClose, Direction::Long, Some("1"));
        first.pnl = dec!(-20);
        fx.sessions.add_order(&session.id, first).await.unwrap();

        let mut second = fill("3", OrderPurpose::MainClose, Direction::Long, Some("1"));
        second.pnl = dec!(-20);
        let err = fx.sessions.add_order(&session.id, second).await.unwrap_err();
        assert!(matches!(err, TradeError::StateConflict(_)));

        let stored = fx.sessions.get(&session.id).await.unwrap();
        assert_eq!(stored.orders.len(), 3);
        assert_eq!(stored.pnl, dec!(-20));
        assert!(!stored.is_completed());
    }

    #[tokio::test]
    async fn test_close_of_root_closed_through_averaging_conflicts() {
        let fx = fixture().await;
        let main = fill("1", OrderPurpose::MainOpen, Direction::Long, None);
        let session = fx
            .sessions
            .create("BTCUSDT", Direction::Long, SessionMode::Hedging, main)
            .await
            .unwrap();
        for order in [
            fill("H", OrderPurpose::HedgeOpen, Direction::Short, None),
            fill("2", OrderPurpose::AveragingOpen, Direction::Long, Some("1")),
            fill("3", OrderPurpose::AveragingClose, Direction::Long, Some("2")),
        ] {
            fx.sessions.add_order(&session.id, order).await.unwrap();
        }

        let stale = fill("4", OrderPurpose::MainClose, Direction::Long, Some("1"));
        assert!(matches!(
            fx.sessions.add_order(&session.id, stale).await,
            Err(TradeError::StateConflict(_))
        ));
        let average_again = fill("5", OrderPurpose::AveragingOpen, Direction::Long, Some("1"));
        assert!(matches!(
            fx.sessions.add_order(&session.id, average_again).await,
            Err(TradeError::StateConflict(_))
        ));
        assert_eq!(fx.sessions.get(&session.id).await.unwrap().orders.len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_add_order_is_serialized() {
        let fx = fixture().await;
        let main = fill("1", OrderPurpose::MainOpen, Direction::Long, None);
        let session = fx
            .sessions
            .create("BTCUSDT", Direction::Long, SessionMode::Hedging, main)
            .await
            .unwrap();

        // Ten hedges, each delivered twice at the same time
        let ids: Vec<String> = (0..10).map(|i| format!("H{}", i)).collect();
        let writes = ids.iter().chain(ids.iter()).map(|id| {
            fx.sessions
                .add_order(&session.id, fill(id, OrderPurpose::HedgeOpen, Direction::Short, None))
        });
        let results = futures_util::future::join_all(writes).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let stored = fx.sessions.get(&session.id).await.unwrap();
        assert_eq!(stored.orders.len(), 11);
        assert_eq!(stored.hedge_count, 10);
        assert_eq!(stored.commission, dec!(0.22));
    }

    #[tokio::test]
    async fn test_session_without_main_open_is_unrecoverable() {
        let fx = fixture().await;
        let catalog = Arc::new(InMemorySessionCatalog::new());
        let sessions = SessionService::new(catalog.clone(), fx.plans.clone(), &LockConfig::default());

        let mut broken = Session::new(
            "BTCUSDT",
            Direction::Long,
            SessionMode::Hedging,
            fill("1", OrderPurpose::MainOpen, Direction::Long, None),
        );
        broken.orders.clear();
        catalog.save(&broken).await.unwrap();

        let err = sessions
            .add_order(&broken.id, fill("2", OrderPurpose::HedgeOpen, Direction::Short, None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::common::errors::ErrorKind::Unrecoverable);
        assert!(sessions.get(&broken.id).await.unwrap().orders.is_empty());
    }
}
