//! Per-tick monitoring loop and execution-report consumer

use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::orchestrator::{ExecutionOutcome, Orchestrator};
use crate::common::errors::Result;
use crate::common::traits::PriceFeed;
use crate::config::types::MonitorConfig;
use crate::exchange::messages::OrderUpdate;
use crate::plan::service::PlanService;
use crate::session::service::SessionService;
use crate::strategy::{Action, DecisionEngine};

/// Finished exchange records are kept this long for late duplicates
const RECORD_RETENTION_MINUTES: i64 = 60;

pub struct Monitor {
    engine: Arc<DecisionEngine>,
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<SessionService>,
    plans: Arc<PlanService>,
    prices: Arc<dyn PriceFeed>,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(
        engine: Arc<DecisionEngine>,
        orchestrator: Arc<Orchestrator>,
        sessions: Arc<SessionService>,
        plans: Arc<PlanService>,
        prices: Arc<dyn PriceFeed>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            engine,
            orchestrator,
            sessions,
            plans,
            prices,
            config,
        }
    }

    /// Evaluate the running session of `symbol` once and execute its action
    #[instrument(skip(self))]
    pub async fn tick_symbol(&self, symbol: &str) -> Result<Option<Action>> {
        let plan = self.plans.get_plan(symbol).await?;
        let Some(session_id) = plan.current_session_id.clone() else {
            return Ok(None);
        };
        let price = self.prices.current_price(symbol).await?;

        // Evaluate under the session lock so trailing marks are stored atomically
        let (session, action) = self
            .sessions
            .mutate(&session_id, |s| self.engine.evaluate(s, &plan, price, Utc::now()))
            .await?;
        let Some(action) = action else {
            return Ok(None);
        };

        info!(
            symbol,
            session_id = %session.id,
            reason = %action.reason(),
            purpose = %action.purpose(),
            direction = %action.direction(),
            %price,
            "Executing engine action"
        );
        let outcome = match &action {
            Action::Open {
                direction,
                purpose,
                parent_order_id,
                related_hedge_id,
                ..
            } => {
                self.orchestrator
                    .open_position(
                        &session,
                        *direction,
                        *purpose,
                        price,
                        &plan,
                        parent_order_id.clone(),
                        related_hedge_id.clone(),
                    )
                    .await?
            }
            Action::Close {
                order_id,
                purpose,
                related_hedge_id,
                ..
            } => {
                self.orchestrator
                    .close_position(&session, order_id, related_hedge_id.clone(), Some(*purpose))
                    .await?
            }
        };

        match outcome {
            ExecutionOutcome::Filled(updated) if updated.is_completed() => {
                self.engine.forget(&updated.id);
                info!(symbol, session_id = %updated.id, net = %updated.net_profit(), "Session finished");
            }
            ExecutionOutcome::Filled(_) => {}
            ExecutionOutcome::Unchanged(_) => {
                debug!(symbol, "Action not confirmed, retrying next tick");
            }
        }
        Ok(Some(action))
    }

    /// Tick every busy plan concurrently; returns how many actions ran
    pub async fn tick_all(&self) -> Result<usize> {
        let symbols: Vec<String> = self
            .plans
            .list_plans()
            .await?
            .into_iter()
            .filter(|p| p.active)
            .map(|p| p.symbol)
            .collect();

        let results = join_all(symbols.iter().map(|s| self.tick_symbol(s))).await;

        let mut actions = 0;
        for (symbol, result) in symbols.iter().zip(results) {
            match result {
                Ok(Some(_)) => actions += 1,
                Ok(None) => {}
                Err(e) if e.is_retryable() => {
                    warn!(%symbol, error = %e, "Tick failed, retrying next tick");
                }
                Err(e) => {
                    error!(%symbol, error = %e, kind = ?e.kind(), "Tick failed");
                }
            }
        }
        Ok(actions)
    }

    /// Housekeeping: settle pending orders, repair stuck plans and drop
    /// old exchange records
    pub async fn sweep(&self) -> Result<usize> {
        let committed = self.orchestrator.resolve_pending().await;
        if committed > 0 {
            info!(committed, "Committed pending fills found by query");
        }
        let repaired = self.sessions.reconcile_plans().await?;
        let pruned = self
            .orchestrator
            .reconciler()
            .prune(chrono::Duration::minutes(RECORD_RETENTION_MINUTES));
        if pruned > 0 {
            debug!(pruned, "Pruned finished order records");
        }
        Ok(repaired)
    }

    /// Run ticks on the configured interval until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        let sweep_every = u64::from(self.config.sweep_interval_ticks.max(1));
        let mut ticks: u64 = 0;

        info!(interval_ms = self.config.tick_interval_ms, "Monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if ticks % sweep_every == 0 {
                        if let Err(e) = self.sweep().await {
                            warn!(error = %e, "Reconciliation sweep failed");
                        }
                    }
                    ticks += 1;
                    if let Err(e) = self.tick_all().await {
                        warn!(error = %e, "Monitor tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(ticks, "Monitor stopped");
    }
}

/// Feed execution reports from the stream into the orchestrator.
///
/// Each report is handled on its own task so one slow lookup does not hold
/// up the others.
pub fn spawn_execution_consumer(
    orchestrator: Arc<Orchestrator>,
    mut reports: mpsc::Receiver<OrderUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = reports.recv().await {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                let order_id = update.order_id.clone();
                match orchestrator.on_execution_report(update).await {
                    Ok(Some(session)) => {
                        info!(%order_id, session_id = %session.id, "Late fill recorded");
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(%order_id, error = %e, "Failed to record execution report");
                    }
                }
            });
        }
        debug!("Execution report stream closed");
    })
}
