use crate::errors::{EngineError, EngineResult};
use rust_decimal::Decimal;
use rust_decimal::prelude::*;

/// Returns the price corresponding to a given tick.
/// P = 1.0001 ^ tick
pub fn tick_to_price(tick: i32) -> EngineResult<Decimal> {
    let price_f64 = 1.0001f64.powi(tick);
    Decimal::from_f64(price_f64).ok_or(EngineError::Arithmetic("tick_to_price"))
}

/// Returns the tick corresponding to a given price.
/// tick = log_1.0001(P)
pub fn price_to_tick(price: Decimal) -> EngineResult<i32> {
    if price <= Decimal::ZERO {
        return Err(EngineError::Arithmetic("price_to_tick: nonpositive price"));
    }
    let price_f64 = price
        .to_f64()
        .ok_or(EngineError::Arithmetic("price_to_tick"))?;
    Ok(price_f64.log(1.0001f64).round() as i32)
}

/// Returns sqrt(1.0001 ^ tick).
pub fn sqrt_price_at_tick(tick: i32) -> EngineResult<Decimal> {
    let sqrt_f64 = 1.0001f64.powf(f64::from(tick) / 2.0);
    Decimal::from_f64(sqrt_f64).ok_or(EngineError::Arithmetic("sqrt_price_at_tick"))
}

/// Square root of a positive price.
pub fn sqrt_price(price: Decimal) -> EngineResult<Decimal> {
    if price <= Decimal::ZERO {
        return Err(EngineError::Arithmetic("sqrt_price: nonpositive price"));
    }
    let sqrt_f64 = price
        .to_f64()
        .ok_or(EngineError::Arithmetic("sqrt_price"))?
        .sqrt();
    Decimal::from_f64(sqrt_f64).ok_or(EngineError::Arithmetic("sqrt_price"))
}

/// Rounds a tick down to the nearest multiple of `spacing`.
#[must_use]
pub fn align_floor(tick: i32, spacing: i32) -> i32 {
    tick.div_euclid(spacing) * spacing
}

/// Whether a tick is a multiple of `spacing`.
#[must_use]
pub fn is_aligned(tick: i32, spacing: i32) -> bool {
    spacing != 0 && tick.rem_euclid(spacing) == 0
}
