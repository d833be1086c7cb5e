//! Protective exit for hedge pairs where both legs lose
//!
//! A session holds at most one armed exit. It arms on the best leg when both
//! legs are under water, fires when that leg keeps degrading, and expires
//! after the window without action.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::types::EngineConfig;

/// One open leg of a hedge pair
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    /// Tip order of the position
    pub order_id: String,
    pub pnl_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArmedExit {
    pub order_id: String,
    pub baseline_pct: Decimal,
    pub armed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectiveSignal {
    Idle,
    Armed,
    Holding,
    Disarmed,
    /// Close this order now
    Trigger(String),
}

pub struct ProtectiveExit {
    arm_best_pct: Decimal,
    arm_worst_pct: Decimal,
    degrade_pct: Decimal,
    window: Duration,
    armed: DashMap<String, ArmedExit>,
}

impl ProtectiveExit {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            arm_best_pct: config.protective_arm_best_pct,
            arm_worst_pct: config.protective_arm_worst_pct,
            degrade_pct: config.protective_degrade_pct,
            window: Duration::seconds(config.protective_window_seconds as i64),
            armed: DashMap::new(),
        }
    }

    pub fn armed(&self, session_id: &str) -> Option<ArmedExit> {
        self.armed.get(session_id).map(|a| a.value().clone())
    }

    pub fn disarm(&self, session_id: &str) {
        if self.armed.remove(session_id).is_some() {
            debug!(session_id, "Protective exit disarmed");
        }
    }

    /// Evaluate the session's open legs at `now`
    pub fn check(&self, session_id: &str, legs: &[Leg], now: DateTime<Utc>) -> ProtectiveSignal {
        let best = legs.iter().max_by(|a, b| a.pnl_pct.cmp(&b.pnl_pct));
        let worst = legs.iter().min_by(|a, b| a.pnl_pct.cmp(&b.pnl_pct));
        let arm_target = match (best, worst) {
            (Some(best), Some(worst))
                if legs.len() >= 2
                    && best.pnl_pct <= self.arm_best_pct
                    && worst.pnl_pct <= self.arm_worst_pct =>
            {
                Some(best)
            }
            _ => None,
        };

        if let Some(armed) = self.armed(session_id) {
            let Some(leg) = legs.iter().find(|l| l.order_id == armed.order_id) else {
                self.disarm(session_id);
                return match arm_target {
                    Some(best) => self.arm(session_id, best, now),
                    None => ProtectiveSignal::Disarmed,
                };
            };
            // A degraded sample wins over expiry on the same tick
            if leg.pnl_pct <= armed.baseline_pct - self.degrade_pct {
                info!(
                    session_id,
                    order_id = %armed.order_id,
                    baseline = %armed.baseline_pct,
                    pnl = %leg.pnl_pct,
                    "Protective exit triggered"
                );
                self.disarm(session_id);
                return ProtectiveSignal::Trigger(armed.order_id);
            }
            if now - armed.armed_at >= self.window {
                info!(session_id, order_id = %armed.order_id, "Protective exit expired");
                self.disarm(session_id);
                return ProtectiveSignal::Disarmed;
            }
            match arm_target {
                Some(best) if best.order_id != armed.order_id => {}
                _ => return ProtectiveSignal::Holding,
            }
        }

        match arm_target {
            Some(best) => self.arm(session_id, best, now),
            None => ProtectiveSignal::Idle,
        }
    }

    /// Replaces any earlier armed state of the session
    fn arm(&self, session_id: &str, best: &Leg, now: DateTime<Utc>) -> ProtectiveSignal {
        info!(
            session_id,
            order_id = %best.order_id,
            baseline = %best.pnl_pct,
            "Protective exit armed"
        );
        self.armed.insert(
            session_id.to_string(),
            ArmedExit {
                order_id: best.order_id.clone(),
                baseline_pct: best.pnl_pct,
                armed_at: now,
            },
        );
        ProtectiveSignal::Armed
    }
}
