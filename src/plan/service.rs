//! Plan service: every plan mutation runs under the plan's keyed lock

use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::model::{Plan, PlanMetrics, SymbolSizes};
use crate::common::errors::{Result, TradeError};
use crate::common::locks::KeyedLocks;
use crate::common::traits::PlanCatalog;
use crate::config::types::{BatchConfig, LockConfig};

/// Exchange-side drift detected for one plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlanAdjustment {
    pub symbol: String,
    pub leverage: Option<u32>,
    pub sizes: Option<SymbolSizes>,
}

/// Outcome of a drift reconciliation batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriftReport {
    pub applied: usize,
    pub unchanged: usize,
    /// Symbol and reason for every adjustment that was not applied
    pub failed: Vec<(String, String)>,
}

impl DriftReport {
    fn merge(mut self, other: DriftReport) -> Self {
        self.applied += other.applied;
        self.unchanged += other.unchanged;
        self.failed.extend(other.failed);
        self
    }
}

/// Lock-guarded access to plans
pub struct PlanService {
    catalog: Arc<dyn PlanCatalog>,
    locks: KeyedLocks,
    batch: BatchConfig,
}

impl PlanService {
    pub fn new(catalog: Arc<dyn PlanCatalog>, locks: &LockConfig, batch: BatchConfig) -> Self {
        Self {
            catalog,
            locks: KeyedLocks::new("plan", locks.acquire_timeout()),
            batch,
        }
    }

    /// Unlocked read of the latest stored plan
    pub async fn get_plan(&self, symbol: &str) -> Result<Plan> {
        self.catalog
            .get_plan(symbol)
            .await?
            .ok_or_else(|| TradeError::PlanNotFound(symbol.to_string()))
    }

    pub async fn list_plans(&self) -> Result<Vec<Plan>> {
        self.catalog.list_plans().await
    }

    /// Store a new plan, refusing to overwrite an existing one
    pub async fn register(&self, plan: Plan) -> Result<Plan> {
        let _guard = self.locks.acquire(&plan.symbol).await?;
        if self.catalog.get_plan(&plan.symbol).await?.is_some() {
            return Err(TradeError::StateConflict(format!(
                "plan {} already exists",
                plan.symbol
            )));
        }
        self.catalog.save_plan(&plan).await?;
        info!(symbol = %plan.symbol, "Plan registered");
        Ok(plan)
    }

    /// Run `f` on a copy of the plan under its lock; store it only if `f` succeeds
    async fn with_plan<R>(&self, symbol: &str, f: impl FnOnce(&mut Plan) -> Result<R>) -> Result<R> {
        let _guard = self.locks.acquire(symbol).await?;
        self.apply_locked(symbol, f).await
    }

    /// Load, mutate and save; the caller must hold the plan lock
    async fn apply_locked<R>(
        &self,
        symbol: &str,
        f: impl FnOnce(&mut Plan) -> Result<R>,
    ) -> Result<R> {
        let mut plan = self.get_plan(symbol).await?;
        let result = f(&mut plan)?;
        self.catalog.save_plan(&plan).await?;
        Ok(result)
    }

    #[instrument(skip(self))]
    pub async fn open_session(&self, symbol: &str, session_id: &str) -> Result<Plan> {
        self.with_plan(symbol, |plan| {
            plan.open_session(session_id)?;
            Ok(plan.clone())
        })
        .await
    }

    /// Release the plan; `session_id` restricts the release to that session
    #[instrument(skip(self))]
    pub async fn free_session(&self, symbol: &str, session_id: Option<&str>) -> Result<bool> {
        self.with_plan(symbol, |plan| Ok(plan.free_session(session_id)))
            .await
    }

    #[instrument(skip(self))]
    pub async fn add_profit(&self, symbol: &str, amount: Decimal) -> Result<Plan> {
        self.with_plan(symbol, |plan| {
            plan.add_profit(amount);
            Ok(plan.clone())
        })
        .await
    }

    /// Free the plan and post the net result of `session_id`, at most once
    #[instrument(skip(self))]
    pub async fn settle(&self, symbol: &str, session_id: &str, net: Decimal) -> Result<bool> {
        let settled = self
            .with_plan(symbol, |plan| Ok(plan.settle(session_id, net)))
            .await?;
        if settled {
            info!(symbol, session_id, %net, "Session settled on plan");
        } else {
            debug!(symbol, session_id, "Session already settled");
        }
        Ok(settled)
    }

    #[instrument(skip(self))]
    pub async fn update_leverage(&self, symbol: &str, leverage: u32) -> Result<Plan> {
        self.with_plan(symbol, |plan| {
            plan.set_leverage(leverage)?;
            Ok(plan.clone())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn update_amount(&self, symbol: &str, amount: Decimal) -> Result<Plan> {
        self.with_plan(symbol, |plan| {
            plan.set_amount(amount)?;
            Ok(plan.clone())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn update_sizes(&self, symbol: &str, sizes: SymbolSizes) -> Result<Plan> {
        self.with_plan(symbol, |plan| {
            plan.set_sizes(sizes)?;
            Ok(plan.clone())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn update_metrics(&self, symbol: &str, metrics: PlanMetrics) -> Result<Plan> {
        self.with_plan(symbol, |plan| {
            plan.set_metrics(metrics)?;
            Ok(plan.clone())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn set_closed(&self, symbol: &str, closed: bool) -> Result<Plan> {
        self.with_plan(symbol, |plan| {
            plan.set_closed(closed);
            Ok(plan.clone())
        })
        .await
    }

    /// Apply leverage/size drift to many plans.
    ///
    /// Adjustments are sorted by symbol and cut into chunks; chunks run on a
    /// bounded number of concurrent workers. Each worker takes all of its
    /// chunk's locks in sorted order before touching any plan.
    #[instrument(skip(self, adjustments), fields(count = adjustments.len()))]
    pub async fn reconcile_drift(&self, mut adjustments: Vec<PlanAdjustment>) -> DriftReport {
        adjustments.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        let chunks: Vec<Vec<PlanAdjustment>> = adjustments
            .chunks(self.batch.chunk_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();

        let report = stream::iter(chunks)
            .map(|chunk| self.reconcile_chunk(chunk))
            .buffer_unordered(self.batch.workers.max(1))
            .fold(DriftReport::default(), |acc, part| async move { acc.merge(part) })
            .await;

        info!(
            applied = report.applied,
            unchanged = report.unchanged,
            failed = report.failed.len(),
            "Drift reconciliation finished"
        );
        report
    }

    async fn reconcile_chunk(&self, chunk: Vec<PlanAdjustment>) -> DriftReport {
        let mut report = DriftReport::default();
        let keys: Vec<String> = chunk.iter().map(|a| a.symbol.clone()).collect();

        let _guards = match self.locks.acquire_many(&keys).await {
            Ok(guards) => guards,
            Err(e) => {
                warn!(error = %e, "Could not lock drift chunk, skipping it");
                report.failed = chunk
                    .into_iter()
                    .map(|a| (a.symbol, e.to_string()))
                    .collect();
                return report;
            }
        };

        for adjustment in chunk {
            let outcome = self
                .apply_locked(&adjustment.symbol, |plan| {
                    let before = plan.clone();
                    if let Some(leverage) = adjustment.leverage {
                        plan.set_leverage(leverage)?;
                    }
                    if let Some(sizes) = adjustment.sizes {
                        plan.set_sizes(sizes)?;
                    }
                    Ok(before.leverage != plan.leverage || before.sizes != plan.sizes)
                })
                .await;

            match outcome {
                Ok(true) => report.applied += 1,
                Ok(false) => report.unchanged += 1,
                Err(e) => {
                    warn!(symbol = %adjustment.symbol, error = %e, "Drift adjustment rejected");
                    report.failed.push((adjustment.symbol, e.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::EngineConfig;
    use crate::store::memory::InMemoryPlanCatalog;
    use rust_decimal_macros::dec;

    fn sizes() -> SymbolSizes {
        SymbolSizes {
            lot_size: dec!(0.001),
            tick_size: dec!(0.1),
            min_size: dec!(0.001),
        }
    }

    async fn service_with(symbols: &[&str]) -> PlanService {
        let catalog = Arc::new(InMemoryPlanCatalog::new());
        let service = PlanService::new(
            catalog,
            &LockConfig::default(),
            BatchConfig {
                chunk_size: 2,
                workers: 2,
            },
        );
        let metrics = PlanMetrics::from_engine(&EngineConfig::default());
        for symbol in symbols {
            let plan = Plan::new(*symbol, 10, dec!(100), sizes(), metrics).unwrap();
            service.register(plan).await.unwrap();
        }
        service
    }

    #[tokio::test]
    async fn test_open_free_open() {
        let service = service_with(&["BTCUSDT"]).await;
        service.open_session("BTCUSDT", "s1").await.unwrap();
        let err = service.open_session("BTCUSDT", "s2").await.unwrap_err();
        assert!(matches!(err, TradeError::StateConflict(_)));

        assert!(service.free_session("BTCUSDT", None).await.unwrap());
        let plan = service.open_session("BTCUSDT", "s2").await.unwrap();
        assert_eq!(plan.current_session_id.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn test_failed_update_leaves_plan_untouched() {
        let service = service_with(&["BTCUSDT"]).await;
        assert!(service.update_leverage("BTCUSDT", 200).await.is_err());
        assert_eq!(service.get_plan("BTCUSDT").await.unwrap().leverage, 10);
        assert!(matches!(
            service.update_amount("NOPE", dec!(10)).await,
            Err(TradeError::PlanNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_drift_reports_each_adjustment() {
        let service = service_with(&["ADAUSDT", "BTCUSDT", "ETHUSDT"]).await;
        let adjustments = vec![
            PlanAdjustment {
                symbol: "ETHUSDT".into(),
                leverage: Some(25),
                sizes: None,
            },
            PlanAdjustment {
                symbol: "BTCUSDT".into(),
                leverage: Some(10),
                sizes: Some(sizes()),
            },
            PlanAdjustment {
                symbol: "ADAUSDT".into(),
                leverage: Some(500),
                sizes: None,
            },
            PlanAdjustment {
                symbol: "XRPUSDT".into(),
                leverage: Some(5),
                sizes: None,
            },
        ];

        let report = service.reconcile_drift(adjustments).await;
        assert_eq!(report.applied, 1);
        assert_eq!(report.unchanged, 1);
        let mut failed: Vec<String> = report.failed.into_iter().map(|(s, _)| s).collect();
        failed.sort();
        assert_eq!(failed, vec!["ADAUSDT".to_string(), "XRPUSDT".to_string()]);
        assert_eq!(service.get_plan("ETHUSDT").await.unwrap().leverage, 25);
        assert_eq!(service.get_plan("ADAUSDT").await.unwrap().leverage, 10);
    }

    #[tokio::test]
    async fn test_concurrent_profit_posts_are_serialized() {
        let service = Arc::new(service_with(&["BTCUSDT"]).await);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.add_profit("BTCUSDT", dec!(0.5)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(service.get_plan("BTCUSDT").await.unwrap().profit, dec!(10));
    }

    #[tokio::test]
    async fn test_overlapping_drift_batches_both_apply() {
        let service = service_with(&["ADAUSDT", "BTCUSDT", "ETHUSDT"]).await;
        let wider = SymbolSizes {
            lot_size: dec!(0.01),
            tick_size: dec!(0.5),
            min_size: dec!(0.01),
        };
        let leverage: Vec<PlanAdjustment> = ["BTCUSDT", "ETHUSDT", "ADAUSDT"]
            .iter()
            .map(|s| PlanAdjustment {
                symbol: s.to_string(),
                leverage: Some(20),
                sizes: None,
            })
            .collect();
        let resize: Vec<PlanAdjustment> = ["ETHUSDT", "ADAUSDT", "BTCUSDT"]
            .iter()
            .map(|s| PlanAdjustment {
                symbol: s.to_string(),
                leverage: None,
                sizes: Some(wider),
            })
            .collect();
        let profits = async {
            for _ in 0..10 {
                service.add_profit("BTCUSDT", dec!(1)).await.unwrap();
            }
        };

        let (first, second, _) = tokio::join!(
            service.reconcile_drift(leverage),
            service.reconcile_drift(resize),
            profits,
        );
        assert_eq!(first.applied, 3);
        assert!(first.failed.is_empty());
        assert_eq!(second.applied, 3);
        assert!(second.failed.is_empty());

        for symbol in ["ADAUSDT", "BTCUSDT", "ETHUSDT"] {
            let plan = service.get_plan(symbol).await.unwrap();
            assert_eq!(plan.leverage, 20);
            assert_eq!(plan.sizes, wider);
        }
        assert_eq!(service.get_plan("BTCUSDT").await.unwrap().profit, dec!(10));
    }
}
