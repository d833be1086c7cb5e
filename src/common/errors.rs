//! Error types for the trading engine

use rust_decimal::Decimal;
use thiserror::Error;

use super::types::Direction;

/// Result type alias using our TradeError
pub type Result<T> = std::result::Result<T, TradeError>;

/// Coarse failure classes used to decide how a caller reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or bounds; rejected synchronously, never retried
    Validation,
    /// Missing plan, session or order; nothing was mutated
    NotFound,
    /// Aggregate is in a state that forbids the operation
    StateConflict,
    /// Exchange call failure or fill timeout; retry on the next tick
    TransientIo,
    /// A lock or programming invariant is broken
    Unrecoverable,
}

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum TradeError {
    /// Input outside of its allowed bounds
    #[error("Validation error: {0}")]
    Validation(String),

    /// Order quantity rounds down to nothing
    #[error("Invalid quantity for {symbol}: amount {amount} at price {price} is below one lot")]
    InvalidQuantity {
        symbol: String,
        amount: Decimal,
        price: Decimal,
    },

    /// Plan not found
    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Order not found
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Aggregate state forbids the operation
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Exchange refused the order
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Exchange connectivity errors
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Keyed lock could not be acquired in time
    #[error("Lock on {key} not acquired after {waited_ms}ms")]
    LockTimeout { key: String, waited_ms: u64 },

    /// Broken internal invariant
    #[error("Unrecoverable error: {0}")]
    Unrecoverable(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure of a user-triggered action, with the context it ran in
    #[error("Action on session {session_id} ({symbol}, {direction:?}) failed: {source}")]
    Action {
        session_id: String,
        symbol: String,
        direction: Option<Direction>,
        #[source]
        source: Box<TradeError>,
    },
}

impl TradeError {
    /// Classify the error into one of the taxonomy classes
    pub fn kind(&self) -> ErrorKind {
        match self {
            TradeError::Validation(_)
            | TradeError::InvalidQuantity { .. }
            | TradeError::Configuration(_) => ErrorKind::Validation,
            TradeError::PlanNotFound(_)
            | TradeError::SessionNotFound(_)
            | TradeError::OrderNotFound(_) => ErrorKind::NotFound,
            TradeError::StateConflict(_) => ErrorKind::StateConflict,
            TradeError::OrderRejected(_)
            | TradeError::Exchange(_)
            | TradeError::Timeout(_)
            | TradeError::LockTimeout { .. } => ErrorKind::TransientIo,
            TradeError::Unrecoverable(_) => ErrorKind::Unrecoverable,
            TradeError::Action { source, .. } => source.kind(),
        }
    }

    /// Whether retrying later can succeed without any input change
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientIo
    }

    /// Wrap an error with the session context of a user-triggered action
    pub fn in_action(
        self,
        session_id: impl Into<String>,
        symbol: impl Into<String>,
        direction: Option<Direction>,
    ) -> Self {
        TradeError::Action {
            session_id: session_id.into(),
            symbol: symbol.into(),
            direction,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(TradeError::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(TradeError::SessionNotFound("s".into()).kind(), ErrorKind::NotFound);
        assert_eq!(TradeError::Exchange("down".into()).kind(), ErrorKind::TransientIo);
        assert!(TradeError::Timeout("fill".into()).is_retryable());
        assert!(!TradeError::StateConflict("busy".into()).is_retryable());
    }

    #[test]
    fn test_action_context_keeps_source_kind() {
        let err = TradeError::OrderNotFound("42".into()).in_action(
            "session-1",
            "BTCUSDT",
            Some(Direction::Long),
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let message = err.to_string();
        assert!(message.contains("session-1"));
        assert!(message.contains("BTCUSDT"));
        assert!(message.contains("Order not found: 42"));
    }
}
