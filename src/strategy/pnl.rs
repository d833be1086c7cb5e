//! Position profit arithmetic

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::common::types::Direction;

/// Signed price move from `entry` to `price`, as a fraction of entry
pub fn move_fraction(direction: Direction, entry: Decimal, price: Decimal) -> Decimal {
    if entry <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    match direction {
        Direction::Long => (price - entry) / entry,
        Direction::Short => (entry - price) / entry,
    }
}

/// Unleveraged PnL in percent
pub fn pnl_percent(direction: Direction, entry: Decimal, price: Decimal) -> Decimal {
    move_fraction(direction, entry, price) * dec!(100)
}

/// Realized quote PnL of closing `quantity` opened at `entry` at `exit`
pub fn realized_pnl(direction: Direction, entry: Decimal, exit: Decimal, quantity: Decimal) -> Decimal {
    (move_fraction(direction, entry, exit) * quantity * entry).round_dp(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_gains_when_price_falls() {
        assert_eq!(pnl_percent(Direction::Short, dec!(100), dec!(99)), dec!(1));
        assert_eq!(pnl_percent(Direction::Long, dec!(100), dec!(99)), dec!(-1));
    }

    #[test]
    fn test_realized_pnl_is_price_difference_times_quantity() {
        // (50500 - 50000) * 0.002
        assert_eq!(realized_pnl(Direction::Long, dec!(50000), dec!(50500), dec!(0.002)), dec!(1));
        assert_eq!(realized_pnl(Direction::Short, dec!(50000), dec!(50500), dec!(0.002)), dec!(-1));
    }

    #[test]
    fn test_zero_entry_is_flat() {
        assert_eq!(pnl_percent(Direction::Long, Decimal::ZERO, dec!(10)), Decimal::ZERO);
    }
}
