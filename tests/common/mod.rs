//! Common test utilities and fixtures
//!
//! Builds the full service stack on top of the paper exchange, wired the
//! same way the binary does it.

#![allow(dead_code)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use futures_hedger::common::channels::create_execution_channel;
use futures_hedger::config::types::{
    BatchConfig, EngineConfig, ExecutionConfig, LockConfig, MonitorConfig, ReconcilerConfig,
};
use futures_hedger::plan::{PlanMetrics, SymbolSizes};
use futures_hedger::store::{InMemoryPlanCatalog, InMemoryPriceFeed, InMemorySessionCatalog};
use futures_hedger::trading::spawn_execution_consumer;
use futures_hedger::{
    DecisionEngine, FeeSchedule, Monitor, Orchestrator, OrderReconciler, PaperExchange, Plan, PlanService,
    SessionService, TradeActions,
};

pub const SYMBOL: &str = "BTCUSDT";
pub const START_PRICE: Decimal = dec!(50000);
/// 1000 USDT per order at 50000 is 0.02 BTC
pub const AMOUNT_PER_TRADE: Decimal = dec!(1000);
/// Paper taker rate
pub const TAKER_RATE: Decimal = dec!(0.00018);

pub struct Stack {
    pub prices: Arc<InMemoryPriceFeed>,
    pub exchange: Arc<PaperExchange>,
    pub plans: Arc<PlanService>,
    pub sessions: Arc<SessionService>,
    pub orchestrator: Arc<Orchestrator>,
    pub actions: TradeActions,
    pub monitor: Monitor,
    pub consumer: JoinHandle<()>,
}

impl Stack {
    pub async fn set_price(&self, price: Decimal) {
        self.prices.set_price(SYMBOL, price).await;
    }

    /// Wait until the plan for `SYMBOL` reports a running session
    pub async fn wait_for_session(&self) -> Option<String> {
        wait_until(Duration::from_secs(2), move || async move {
            self.plans.get_plan(SYMBOL).await.ok()?.current_session_id
        })
        .await
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

/// Short deadlines so timeouts are reached quickly in tests
pub fn fast_execution() -> ExecutionConfig {
    ExecutionConfig {
        fill_poll_interval_ms: 5,
        open_fill_timeout_ms: 100,
        close_fill_timeout_ms: 100,
        hedge_mode: true,
    }
}

pub fn btc_sizes() -> SymbolSizes {
    SymbolSizes {
        lot_size: dec!(0.001),
        tick_size: dec!(0.1),
        min_size: dec!(0.001),
    }
}

pub async fn stack() -> Stack {
    let prices = Arc::new(InMemoryPriceFeed::new());
    prices.set_price(SYMBOL, START_PRICE).await;

    let plans = Arc::new(PlanService::new(
        Arc::new(InMemoryPlanCatalog::new()),
        &LockConfig::default(),
        BatchConfig::default(),
    ));
    let engine = EngineConfig::default();
    let plan = Plan::new(
        SYMBOL,
        10,
        AMOUNT_PER_TRADE,
        btc_sizes(),
        PlanMetrics::from_engine(&engine),
    )
    .expect("valid plan");
    plans.register(plan).await.expect("plan registered");

    let (report_tx, report_rx) = create_execution_channel();
    let exchange = Arc::new(PaperExchange::new(prices.clone(), TAKER_RATE).with_execution_reports(report_tx));
    let reconciler = Arc::new(OrderReconciler::new(
        exchange.clone(),
        ReconcilerConfig::default(),
        true,
    ));
    let sessions = Arc::new(SessionService::new(
        Arc::new(InMemorySessionCatalog::new()),
        plans.clone(),
        &LockConfig::default(),
    ));
    let fees = FeeSchedule {
        maker_rate: dec!(0.0002),
        taker_rate: TAKER_RATE,
    };
    let orchestrator = Arc::new(Orchestrator::new(
        reconciler,
        sessions.clone(),
        fees,
        fast_execution(),
    ));
    let consumer = spawn_execution_consumer(orchestrator.clone(), report_rx);

    let actions = TradeActions::new(orchestrator.clone(), sessions.clone(), plans.clone(), prices.clone());
    let monitor = Monitor::new(
        Arc::new(DecisionEngine::new(engine)),
        orchestrator.clone(),
        sessions.clone(),
        plans.clone(),
        prices.clone(),
        MonitorConfig {
            tick_interval_ms: 10,
            sweep_interval_ticks: 5,
        },
    );

    Stack {
        prices,
        exchange,
        plans,
        sessions,
        orchestrator,
        actions,
        monitor,
        consumer,
    }
}

/// Poll `check` every few milliseconds until it yields a value
pub async fn wait_until<T, F, Fut>(limit: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    tokio::time::timeout(limit, async {
        loop {
            if let Some(value) = check().await {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .ok()
}
