use crate::errors::{EngineError, EngineResult};
use crate::token::TokenAmount;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;

/// Calculates the amount of token0 (x) given liquidity and price range.
/// delta_x = L * (1/sqrt(P_a) - 1/sqrt(P_b))
pub fn get_amount0_delta(
    liquidity: u128,
    sqrt_price_a: Decimal,
    sqrt_price_b: Decimal,
) -> EngineResult<TokenAmount> {
    if sqrt_price_a <= Decimal::ZERO || sqrt_price_b <= Decimal::ZERO {
        return Err(EngineError::Arithmetic(
            "get_amount0_delta: nonpositive sqrt price",
        ));
    }

    let (lower, upper) = sort(sqrt_price_a, sqrt_price_b);

    let num = upper - lower;
    let den = lower * upper;
    if den.is_zero() {
        return Err(EngineError::Arithmetic("get_amount0_delta: zero denominator"));
    }

    let liquidity_dec = Decimal::from_u128(liquidity)
        .ok_or(EngineError::Arithmetic("get_amount0_delta: liquidity"))?;
    let amount = liquidity_dec * (num / den);
    TokenAmount::from_decimal_floor(amount).ok_or(EngineError::Arithmetic("get_amount0_delta"))
}

/// Calculates the amount of token1 (y) given liquidity and price range.
/// delta_y = L * (sqrt(P_b) - sqrt(P_a))
pub fn get_amount1_delta(
    liquidity: u128,
    sqrt_price_a: Decimal,
    sqrt_price_b: Decimal,
) -> EngineResult<TokenAmount> {
    let (lower, upper) = sort(sqrt_price_a, sqrt_price_b);

    let liquidity_dec = Decimal::from_u128(liquidity)
        .ok_or(EngineError::Arithmetic("get_amount1_delta: liquidity"))?;
    let amount = liquidity_dec * (upper - lower);
    TokenAmount::from_decimal_floor(amount).ok_or(EngineError::Arithmetic("get_amount1_delta"))
}

/// Calculates liquidity for a given amount of token0 and price range.
/// L = amount0 * (sqrt(P_a) * sqrt(P_b)) / (sqrt(P_b) - sqrt(P_a))
pub fn get_liquidity_for_amount0(
    amount0: TokenAmount,
    sqrt_price_a: Decimal,
    sqrt_price_b: Decimal,
) -> EngineResult<u128> {
    let (lower, upper) = sort(sqrt_price_a, sqrt_price_b);

    let amount0_dec = amount0
        .to_decimal()
        .ok_or(EngineError::Arithmetic("get_liquidity_for_amount0"))?;

    let den = upper - lower;
    if den.is_zero() {
        return Err(EngineError::Arithmetic(
            "get_liquidity_for_amount0: range too small",
        ));
    }

    (amount0_dec * lower * upper / den)
        .to_u128()
        .ok_or(EngineError::Arithmetic("get_liquidity_for_amount0: overflow"))
}

/// Calculates liquidity for a given amount of token1 and price range.
/// L = amount1 / (sqrt(P_b) - sqrt(P_a))
pub fn get_liquidity_for_amount1(
    amount1: TokenAmount,
    sqrt_price_a: Decimal,
    sqrt_price_b: Decimal,
) -> EngineResult<u128> {
    let (lower, upper) = sort(sqrt_price_a, sqrt_price_b);

    let amount1_dec = amount1
        .to_decimal()
        .ok_or(EngineError::Arithmetic("get_liquidity_for_amount1"))?;

    let den = upper - lower;
    if den.is_zero() {
        return Err(EngineError::Arithmetic(
            "get_liquidity_for_amount1: range too small",
        ));
    }

    (amount1_dec / den)
        .to_u128()
        .ok_or(EngineError::Arithmetic("get_liquidity_for_amount1: overflow"))
}

/// Maximum liquidity mintable from an amount pair at the current sqrt price,
/// for a range [sqrt_lower, sqrt_upper]. One-sided when the price sits
/// outside the range.
pub fn liquidity_for_amounts(
    amount0: TokenAmount,
    amount1: TokenAmount,
    sqrt_price: Decimal,
    sqrt_lower: Decimal,
    sqrt_upper: Decimal,
) -> EngineResult<u128> {
    if sqrt_lower >= sqrt_upper {
        return Err(EngineError::Arithmetic(
            "liquidity_for_amounts: empty range",
        ));
    }

    if sqrt_price <= sqrt_lower {
        get_liquidity_for_amount0(amount0, sqrt_lower, sqrt_upper)
    } else if sqrt_price >= sqrt_upper {
        get_liquidity_for_amount1(amount1, sqrt_lower, sqrt_upper)
    } else {
        let l0 = get_liquidity_for_amount0(amount0, sqrt_price, sqrt_upper)?;
        let l1 = get_liquidity_for_amount1(amount1, sqrt_lower, sqrt_price)?;
        Ok(l0.min(l1))
    }
}

/// Token amounts a given liquidity occupies at the current sqrt price.
pub fn amounts_for_liquidity(
    liquidity: u128,
    sqrt_price: Decimal,
    sqrt_lower: Decimal,
    sqrt_upper: Decimal,
) -> EngineResult<(TokenAmount, TokenAmount)> {
    if sqrt_lower >= sqrt_upper {
        return Err(EngineError::Arithmetic(
            "amounts_for_liquidity: empty range",
        ));
    }

    if sqrt_price <= sqrt_lower {
        Ok((
            get_amount0_delta(liquidity, sqrt_lower, sqrt_upper)?,
            TokenAmount::zero(),
        ))
    } else if sqrt_price >= sqrt_upper {
        Ok((
            TokenAmount::zero(),
            get_amount1_delta(liquidity, sqrt_lower, sqrt_upper)?,
        ))
    } else {
        Ok((
            get_amount0_delta(liquidity, sqrt_price, sqrt_upper)?,
            get_amount1_delta(liquidity, sqrt_lower, sqrt_price)?,
        ))
    }
}

fn sort(a: Decimal, b: Decimal) -> (Decimal, Decimal) {
    if a < b { (a, b) } else { (b, a) }
}
