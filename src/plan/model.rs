//! Plan aggregate: per-symbol trading configuration and PnL ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::errors::{Result, TradeError};
use crate::config::types::{EngineConfig, PlanConfig};

pub const MIN_LEVERAGE: u32 = 1;
pub const MAX_LEVERAGE: u32 = 125;
pub const MIN_AMOUNT: Decimal = dec!(3);
pub const MAX_AMOUNT: Decimal = dec!(10000);
pub const METRIC_BOUND: Decimal = dec!(100);

/// Exchange size constraints for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolSizes {
    /// Quantity step
    pub lot_size: Decimal,
    /// Price step
    pub tick_size: Decimal,
    /// Smallest accepted order quantity
    pub min_size: Decimal,
}

impl SymbolSizes {
    pub fn validate(&self) -> Result<()> {
        if self.lot_size <= Decimal::ZERO || self.tick_size <= Decimal::ZERO {
            return Err(TradeError::Validation(format!(
                "lot size {} and tick size {} must be positive",
                self.lot_size, self.tick_size
            )));
        }
        if self.min_size < Decimal::ZERO {
            return Err(TradeError::Validation(format!(
                "min size {} must not be negative",
                self.min_size
            )));
        }
        Ok(())
    }
}

/// Per-plan PnL thresholds in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanMetrics {
    pub averaging_trigger_pct: Decimal,
    pub hedge_trigger_pct: Decimal,
}

impl PlanMetrics {
    pub fn from_engine(engine: &EngineConfig) -> Self {
        Self {
            averaging_trigger_pct: engine.averaging_trigger_pct,
            hedge_trigger_pct: engine.hedge_trigger_pct,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("averaging trigger", self.averaging_trigger_pct),
            ("hedge trigger", self.hedge_trigger_pct),
        ] {
            if value < -METRIC_BOUND || value > METRIC_BOUND {
                return Err(TradeError::Validation(format!(
                    "{} {} outside [-100, 100]",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Trading plan for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub symbol: String,
    pub leverage: u32,
    /// Quote amount committed per opening order
    pub amount_per_trade: Decimal,
    pub sizes: SymbolSizes,
    pub metrics: PlanMetrics,
    /// Cumulative realized net profit
    pub profit: Decimal,
    /// A non-terminal session exists for this symbol
    pub active: bool,
    /// Plan is disabled; no new sessions are opened
    pub closed: bool,
    pub current_session_id: Option<String>,
    /// Last session whose result was posted to `profit`
    #[serde(default)]
    pub last_settled_session: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(
        symbol: impl Into<String>,
        leverage: u32,
        amount_per_trade: Decimal,
        sizes: SymbolSizes,
        metrics: PlanMetrics,
    ) -> Result<Self> {
        validate_leverage(leverage)?;
        validate_amount(amount_per_trade)?;
        sizes.validate()?;
        metrics.validate()?;

        Ok(Self {
            symbol: symbol.into(),
            leverage,
            amount_per_trade,
            sizes,
            metrics,
            profit: Decimal::ZERO,
            active: false,
            closed: false,
            current_session_id: None,
            last_settled_session: None,
            updated_at: Utc::now(),
        })
    }

    pub fn from_config(config: &PlanConfig, engine: &EngineConfig) -> Result<Self> {
        let sizes = SymbolSizes {
            lot_size: config.lot_size,
            tick_size: config.tick_size,
            min_size: config.min_size,
        };
        Self::new(
            config.symbol.clone(),
            config.leverage,
            config.amount_per_trade,
            sizes,
            PlanMetrics::from_engine(engine),
        )
    }

    /// Mark the plan busy with `session_id`
    pub fn open_session(&mut self, session_id: &str) -> Result<()> {
        if self.closed {
            return Err(TradeError::StateConflict(format!(
                "plan {} is closed",
                self.symbol
            )));
        }
        if self.active {
            return Err(TradeError::StateConflict(format!(
                "plan {} already has active session {}",
                self.symbol,
                self.current_session_id.as_deref().unwrap_or("?")
            )));
        }
        self.active = true;
        self.current_session_id = Some(session_id.to_string());
        self.touch();
        Ok(())
    }

    /// Release the plan.
    ///
    /// With `Some(id)` the plan is only released if `id` is its current
    /// session; returns whether anything changed.
    pub fn free_session(&mut self, session_id: Option<&str>) -> bool {
        if !self.active && self.current_session_id.is_none() {
            return false;
        }
        if let Some(id) = session_id {
            if self.current_session_id.as_deref() != Some(id) {
                warn!(
                    symbol = %self.symbol,
                    session_id = id,
                    current = ?self.current_session_id,
                    "Refusing to free plan held by another session"
                );
                return false;
            }
        }
        self.active = false;
        self.current_session_id = None;
        self.touch();
        true
    }

    /// Post a signed amount to the ledger
    pub fn add_profit(&mut self, amount: Decimal) {
        self.profit += amount;
        self.touch();
    }

    /// Free the plan and post the session result, once per session
    pub fn settle(&mut self, session_id: &str, net: Decimal) -> bool {
        if self.last_settled_session.as_deref() == Some(session_id) {
            return false;
        }
        self.free_session(Some(session_id));
        self.profit += net;
        self.last_settled_session = Some(session_id.to_string());
        self.touch();
        true
    }

    pub fn set_leverage(&mut self, leverage: u32) -> Result<()> {
        validate_leverage(leverage)?;
        self.leverage = leverage;
        self.touch();
        Ok(())
    }

    pub fn set_amount(&mut self, amount: Decimal) -> Result<()> {
        validate_amount(amount)?;
        self.amount_per_trade = amount;
        self.touch();
        Ok(())
    }

    pub fn set_sizes(&mut self, sizes: SymbolSizes) -> Result<()> {
        sizes.validate()?;
        self.sizes = sizes;
        self.touch();
        Ok(())
    }

    pub fn set_metrics(&mut self, metrics: PlanMetrics) -> Result<()> {
        metrics.validate()?;
        self.metrics = metrics;
        self.touch();
        Ok(())
    }

    pub fn set_closed(&mut self, closed: bool) {
        self.closed = closed;
        self.touch();
    }

    /// Profit with trailing zeros stripped
    pub fn profit_display(&self) -> String {
        self.profit.normalize().to_string()
    }

    /// A new session may be opened right now
    pub fn can_open(&self) -> bool {
        !self.active && !self.closed
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn validate_leverage(leverage: u32) -> Result<()> {
    if !(MIN_LEVERAGE..=MAX_LEVERAGE).contains(&leverage) {
        return Err(TradeError::Validation(format!(
            "leverage {} outside [{}, {}]",
            leverage, MIN_LEVERAGE, MAX_LEVERAGE
        )));
    }
    Ok(())
}

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount < MIN_AMOUNT || amount > MAX_AMOUNT {
        return Err(TradeError::Validation(format!(
            "amount per trade {} outside [{}, {}]",
            amount, MIN_AMOUNT, MAX_AMOUNT
        )));
    }
    Ok(())
}
