//! Shared enums used across plans, sessions and exchange orders

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// The other direction
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Order side that increases exposure in this direction
    pub fn open_side(self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }

    /// Order side that reduces exposure in this direction
    pub fn close_side(self) -> Side {
        self.open_side().opposite()
    }

    /// Direction opened by an order on `side`
    pub fn from_open_side(side: Side) -> Self {
        match side {
            Side::Buy => Direction::Long,
            Side::Sell => Direction::Short,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Exchange order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// No further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Terminal without a fill
    pub fn is_dead(self) -> bool {
        self.is_terminal() && self != OrderStatus::Filled
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        };
        write!(f, "{}", s)
    }
}

/// Role of a trade order inside its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderPurpose {
    MainOpen,
    MainClose,
    MainPartialClose,
    HedgeOpen,
    HedgeClose,
    HedgePartialClose,
    AveragingOpen,
    AveragingClose,
}

/// Order family: the open and its matching closes share one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderFamily {
    Main,
    Hedge,
    Averaging,
}

impl OrderPurpose {
    pub fn family(self) -> OrderFamily {
        match self {
            OrderPurpose::MainOpen | OrderPurpose::MainClose | OrderPurpose::MainPartialClose => {
                OrderFamily::Main
            }
            OrderPurpose::HedgeOpen
            | OrderPurpose::HedgeClose
            | OrderPurpose::HedgePartialClose => OrderFamily::Hedge,
            OrderPurpose::AveragingOpen | OrderPurpose::AveragingClose => OrderFamily::Averaging,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(
            self,
            OrderPurpose::MainOpen | OrderPurpose::HedgeOpen | OrderPurpose::AveragingOpen
        )
    }

    pub fn is_close(self) -> bool {
        !self.is_open()
    }

    pub fn is_averaging(self) -> bool {
        self.family() == OrderFamily::Averaging
    }

    /// Purpose of the order that closes an order with this purpose.
    ///
    /// Only open purposes have a defined counterpart; anything else falls
    /// back to `HedgeClose` and is logged.
    pub fn close_purpose(self) -> OrderPurpose {
        match self {
            OrderPurpose::MainOpen => OrderPurpose::MainClose,
            OrderPurpose::HedgeOpen => OrderPurpose::HedgeClose,
            OrderPurpose::AveragingOpen => OrderPurpose::AveragingClose,
            other => {
                // TODO: decide whether closing a close order should be rejected outright
                warn!(purpose = %other, "No close purpose for non-open order, defaulting to HEDGE_CLOSE");
                OrderPurpose::HedgeClose
            }
        }
    }
}

impl std::fmt::Display for OrderPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderPurpose::MainOpen => "MAIN_OPEN",
            OrderPurpose::MainClose => "MAIN_CLOSE",
            OrderPurpose::MainPartialClose => "MAIN_PARTIAL_CLOSE",
            OrderPurpose::HedgeOpen => "HEDGE_OPEN",
            OrderPurpose::HedgeClose => "HEDGE_CLOSE",
            OrderPurpose::HedgePartialClose => "HEDGE_PARTIAL_CLOSE",
            OrderPurpose::AveragingOpen => "AVERAGING_OPEN",
            OrderPurpose::AveragingClose => "AVERAGING_CLOSE",
        };
        write!(f, "{}", s)
    }
}

/// Session lifecycle status; only ever moves from Active to Completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// Trading mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionMode {
    /// Single direction, trailing and averaging only
    Scalping,
    /// Losing main positions may be offset with opposite hedges
    Hedging,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Scalping => write!(f, "SCALPING"),
            SessionMode::Hedging => write!(f, "HEDGING"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_sides() {
        assert_eq!(Direction::Long.open_side(), Side::Buy);
        assert_eq!(Direction::Long.close_side(), Side::Sell);
        assert_eq!(Direction::Short.open_side(), Side::Sell);
        assert_eq!(Direction::Short.opposite(), Direction::Long);
    }

    #[test]
    fn test_close_purpose_lookup() {
        assert_eq!(OrderPurpose::MainOpen.close_purpose(), OrderPurpose::MainClose);
        assert_eq!(OrderPurpose::HedgeOpen.close_purpose(), OrderPurpose::HedgeClose);
        assert_eq!(
            OrderPurpose::AveragingOpen.close_purpose(),
            OrderPurpose::AveragingClose
        );
        // Non-open purposes fall back
        assert_eq!(OrderPurpose::MainClose.close_purpose(), OrderPurpose::HedgeClose);
    }

    #[test]
    fn test_status_terminality() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::Filled.is_dead());
        assert!(OrderStatus::Rejected.is_dead());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }
}
