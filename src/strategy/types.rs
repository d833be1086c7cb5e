use rust_decimal::Decimal;

use crate::common::types::{Direction, OrderPurpose};

/// Why the engine decided to act
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionReason {
    TrailingStop,
    ProtectiveExit,
    Hedge,
    Averaging,
}

impl std::fmt::Display for ActionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionReason::TrailingStop => write!(f, "trailing_stop"),
            ActionReason::ProtectiveExit => write!(f, "protective_exit"),
            ActionReason::Hedge => write!(f, "hedge"),
            ActionReason::Averaging => write!(f, "averaging"),
        }
    }
}

/// One order the engine wants placed
///
/// At most one action is produced per session per tick. The orchestrator
/// turns it into an exchange order and commits the fill to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Add exposure
    Open {
        direction: Direction,
        purpose: OrderPurpose,
        /// Order being averaged, for AVERAGING_OPEN
        parent_order_id: Option<String>,
        /// Main order being hedged, for HEDGE_OPEN
        related_hedge_id: Option<String>,
        reason: ActionReason,
        /// PnL% that triggered the decision
        pnl_pct: Decimal,
    },
    /// Remove the exposure of one open position, referenced by its tip order
    Close {
        order_id: String,
        direction: Direction,
        purpose: OrderPurpose,
        related_hedge_id: Option<String>,
        reason: ActionReason,
        pnl_pct: Decimal,
    },
}

impl Action {
    pub fn direction(&self) -> Direction {
        match self {
            Action::Open { direction, .. } | Action::Close { direction, .. } => *direction,
        }
    }

    pub fn purpose(&self) -> OrderPurpose {
        match self {
            Action::Open { purpose, .. } | Action::Close { purpose, .. } => *purpose,
        }
    }

    pub fn reason(&self) -> ActionReason {
        match self {
            Action::Open { reason, .. } | Action::Close { reason, .. } => *reason,
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Action::Close { .. })
    }
}
