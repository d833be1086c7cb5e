//! Trailing stop
//!
//! State lives on the tip order of each open position (`trailing_active`,
//! `pnl_high`) so it survives restarts together with the session.

use rust_decimal::Decimal;

use crate::config::types::EngineConfig;
use crate::session::model::TradeOrder;

/// Result of feeding one PnL sample to the trailing stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingSignal {
    /// Below activation, nothing tracked
    Idle,
    /// Just crossed the activation threshold
    Activated,
    /// High-water mark moved up
    Raised,
    /// Active, above the retrace level
    Holding,
    /// Retraced to or below the level; close the position
    Triggered,
}

#[derive(Debug, Clone)]
pub struct TrailingStop {
    activation_pct: Decimal,
    retrace_ratio: Decimal,
    commission_buffer_pct: Decimal,
}

impl TrailingStop {
    pub fn new(activation_pct: Decimal, retrace_ratio: Decimal, commission_buffer_pct: Decimal) -> Self {
        Self {
            activation_pct,
            retrace_ratio,
            commission_buffer_pct,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.trailing_activation_pct,
            config.trailing_retrace_ratio,
            config.commission_buffer_pct,
        )
    }

    /// Exit level for a given high-water mark, never negative
    pub fn retrace_level(&self, high: Decimal) -> Decimal {
        (high * self.retrace_ratio - self.commission_buffer_pct).max(Decimal::ZERO)
    }

    /// Advance the trailing state of `order` with the latest PnL%.
    ///
    /// A trigger clears the state, so one breach fires once.
    pub fn update(&self, order: &mut TradeOrder, pnl_pct: Decimal) -> TrailingSignal {
        if !order.trailing_active {
            if pnl_pct >= self.activation_pct {
                order.trailing_active = true;
                order.pnl_high = pnl_pct;
                return TrailingSignal::Activated;
            }
            return TrailingSignal::Idle;
        }

        if pnl_pct > order.pnl_high {
            order.pnl_high = pnl_pct;
            return TrailingSignal::Raised;
        }
        if pnl_pct <= self.retrace_level(order.pnl_high) {
            order.trailing_active = false;
            order.pnl_high = Decimal::ZERO;
            return TrailingSignal::Triggered;
        }
        TrailingSignal::Holding
    }
}
