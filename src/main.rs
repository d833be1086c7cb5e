//! FuturesHedger - Main Entry Point
//!
//! Runs the position monitor against the in-process paper exchange.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use futures_hedger::common::channels::create_execution_channel;
use futures_hedger::config::load_config;
use futures_hedger::store::{InMemoryPlanCatalog, InMemoryPriceFeed, InMemorySessionCatalog};
use futures_hedger::trading::spawn_execution_consumer;
use futures_hedger::{
    DecisionEngine, Direction, FeeSchedule, Monitor, Orchestrator, OrderReconciler, PaperExchange, Plan,
    PlanService, SessionMode, SessionService, TradeActions,
};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Starting paper price, as SYMBOL=PRICE (repeatable)
    #[arg(long = "price")]
    prices: Vec<String>,

    /// Session to open at startup, as SYMBOL=LONG|SHORT (repeatable)
    #[arg(long = "open")]
    open: Vec<String>,

    /// Open startup sessions in scalping mode instead of hedging
    #[arg(long)]
    scalping: bool,
}

fn parse_pair(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got {:?}", raw))?;
    Ok((key.trim().to_uppercase(), value.trim().to_string()))
}

fn parse_direction(raw: &str) -> Result<Direction> {
    match raw.to_uppercase().as_str() {
        "LONG" => Ok(Direction::Long),
        "SHORT" => Ok(Direction::Short),
        other => Err(anyhow!("unknown direction {:?}", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration (.env, file, APP__ environment)
    let config = load_config(Some(&args.config)).context("loading configuration")?;

    // Initialize logging
    let log_level = args.log_level.clone().unwrap_or_else(|| config.settings.log_level.clone());
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting FuturesHedger in paper mode");
    info!("Configuration file: {}", args.config);

    // Market data
    let prices = Arc::new(InMemoryPriceFeed::new());
    for raw in &args.prices {
        let (symbol, value) = parse_pair(raw)?;
        let price = Decimal::from_str(&value).with_context(|| format!("price for {}", symbol))?;
        prices.set_price(&symbol, price).await;
    }

    // Plans
    let plans = Arc::new(PlanService::new(
        Arc::new(InMemoryPlanCatalog::new()),
        &config.locks,
        config.batch.clone(),
    ));
    for seed in &config.plans {
        let plan = Plan::from_config(seed, &config.engine)?;
        plans.register(plan).await?;
        info!(symbol = %seed.symbol, "Plan registered");
    }

    // Execution stack
    let (report_tx, report_rx) = create_execution_channel();
    let exchange = Arc::new(
        PaperExchange::new(prices.clone(), config.fees.taker_rate).with_execution_reports(report_tx),
    );
    let reconciler = Arc::new(OrderReconciler::new(
        exchange,
        config.reconciler.clone(),
        config.execution.hedge_mode,
    ));
    let sessions = Arc::new(SessionService::new(
        Arc::new(InMemorySessionCatalog::new()),
        plans.clone(),
        &config.locks,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        reconciler,
        sessions.clone(),
        FeeSchedule::from_config(&config.fees),
        config.execution.clone(),
    ));
    let consumer = spawn_execution_consumer(orchestrator.clone(), report_rx);

    // Startup sessions
    let actions = TradeActions::new(orchestrator.clone(), sessions.clone(), plans.clone(), prices.clone());
    let mode = if args.scalping {
        SessionMode::Scalping
    } else {
        SessionMode::Hedging
    };
    for raw in &args.open {
        let (symbol, direction) = parse_pair(raw)?;
        let direction = parse_direction(&direction)?;
        match actions.open_session(&symbol, direction, mode).await {
            Ok(Some(session)) => info!(%symbol, session_id = %session.id, "Session opened"),
            Ok(None) => warn!(%symbol, "Opening fill not confirmed yet"),
            Err(e) => warn!(%symbol, error = %e, "Failed to open session"),
        }
    }

    let monitor = Monitor::new(
        Arc::new(DecisionEngine::new(config.engine.clone())),
        orchestrator,
        sessions,
        plans,
        prices,
        config.monitor.clone(),
    );

    info!("Application initialized successfully");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = tokio::spawn(async move { monitor.run(shutdown_rx).await });

    // Keep the application running
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, cleaning up...");

    shutdown_tx.send(true)?;
    monitor_task.await?;
    consumer.abort();

    Ok(())
}
