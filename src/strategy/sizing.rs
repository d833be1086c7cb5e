//! Order sizing

use rust_decimal::{Decimal, RoundingStrategy};

use crate::common::errors::{Result, TradeError};
use crate::plan::model::SymbolSizes;

/// Quantity bought by `amount` of quote currency at `price`, rounded down to
/// the symbol's lot size.
///
/// Fails with `InvalidQuantity` when nothing is left after rounding or the
/// result is below the exchange minimum.
pub fn order_quantity(symbol: &str, amount: Decimal, price: Decimal, sizes: &SymbolSizes) -> Result<Decimal> {
    if price <= Decimal::ZERO {
        return Err(TradeError::Validation(format!(
            "price {} for {} must be positive",
            price, symbol
        )));
    }
    if sizes.lot_size <= Decimal::ZERO {
        return Err(TradeError::Validation(format!(
            "lot size {} for {} must be positive",
            sizes.lot_size, symbol
        )));
    }

    let quantity = amount
        .checked_div(price)
        .and_then(|units| units.checked_div(sizes.lot_size))
        .map(|lots| lots.round_dp_with_strategy(0, RoundingStrategy::ToZero))
        .and_then(|lots| lots.checked_mul(sizes.lot_size))
        .map(|q| q.normalize())
        .ok_or_else(|| {
            TradeError::Validation(format!(
                "amount {} at price {} for {} is out of range",
                amount, price, symbol
            ))
        })?;

    let below_min = sizes.min_size > Decimal::ZERO && quantity < sizes.min_size;
    if quantity <= Decimal::ZERO || below_min {
        return Err(TradeError::InvalidQuantity {
            symbol: symbol.to_string(),
            amount,
            price,
        });
    }
    Ok(quantity)
}

/// Round a price down to the symbol's tick size
pub fn quantize_price(price: Decimal, sizes: &SymbolSizes) -> Decimal {
    if sizes.tick_size <= Decimal::ZERO {
        return price;
    }
    price
        .checked_div(sizes.tick_size)
        .map(|ticks| ticks.round_dp_with_strategy(0, RoundingStrategy::ToZero))
        .and_then(|ticks| ticks.checked_mul(sizes.tick_size))
        .map(|p| p.normalize())
        .unwrap_or(price)
}
