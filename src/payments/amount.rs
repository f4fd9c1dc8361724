use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::GatewayError;

const MINOR_UNITS_PER_MAJOR: Decimal = Decimal::ONE_HUNDRED;

/// Major units (naira) to the provider's integer minor units (kobo): `round(amount * 100)`
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    if amount <= Decimal::ZERO {
        return Err(GatewayError::AmountOutOfRange(amount.to_string()));
    }

    (amount * MINOR_UNITS_PER_MAJOR)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .filter(|minor| *minor > 0)
        .ok_or_else(|| GatewayError::AmountOutOfRange(amount.to_string()))
}

/// Provider minor units back to major units, exact to two places
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}
