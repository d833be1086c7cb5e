use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::types::FeeConfig;

/// Commission rates for the futures account
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    /// Maker fee (providing liquidity) as a fraction of notional
    pub maker_rate: Decimal,
    /// Taker fee (taking liquidity) as a fraction of notional
    pub taker_rate: Decimal,
}

impl FeeSchedule {
    pub fn from_config(config: &FeeConfig) -> Self {
        Self {
            maker_rate: config.maker_rate,
            taker_rate: config.taker_rate,
        }
    }

    /// Commission charged for a market order
    ///
    /// Uses the exchange-reported amount when there is one, otherwise the
    /// taker rate on the fill notional.
    pub fn commission(&self, reported: Decimal, price: Decimal, quantity: Decimal) -> Decimal {
        if reported > Decimal::ZERO {
            reported
        } else {
            (price * quantity * self.taker_rate).round_dp(8)
        }
    }

    /// Taker cost of entering and leaving a position, in percent of notional
    ///
    /// With the default 0.018% taker rate this is the 0.036% buffer the
    /// trailing stop subtracts from its retrace level.
    pub fn round_trip_pct(&self) -> Decimal {
        self.taker_rate * dec!(2) * dec!(100)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::from_config(&FeeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_commission_wins() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.commission(dec!(0.05), dec!(50000), dec!(0.002)), dec!(0.05));
    }

    #[test]
    fn test_commission_falls_back_to_taker_rate() {
        let fees = FeeSchedule::default();
        // 50000 * 0.002 * 0.00018
        assert_eq!(fees.commission(Decimal::ZERO, dec!(50000), dec!(0.002)), dec!(0.018));
    }

    #[test]
    fn test_round_trip_matches_trailing_buffer() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.round_trip_pct(), dec!(0.036));
    }
}
