//! Ratio balancer: computes the ideal token0:token1 ratio implied by a
//! target range at the current price, then executes the single minimal
//! swap that brings the supplied pair to (or just past) that ratio.
//!
//! Deterministic given price and range; one attempt, no retries. The
//! downstream opener absorbs any residual as leftover.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use vault_domain::errors::{EngineError, EngineResult};
use vault_domain::math::tick;
use vault_domain::position::{PoolId, TickBounds};
use vault_domain::token::{TokenAmount, TokenId};
use vault_protocols::AmmAdapter;

/// One executed swap, as recorded by the balancer and the profit splitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapLeg {
    pub token_in: TokenId,
    pub token_out: TokenId,
    pub amount_in: TokenAmount,
    pub amount_out: TokenAmount,
}

/// The rebalanced pair, ready for deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceOutcome {
    pub amount0: TokenAmount,
    pub amount1: TokenAmount,
    pub swap: Option<SwapLeg>,
}

/// Brings a token pair into the deposit ratio of a target range.
pub struct RatioBalancer {
    amm: Arc<dyn AmmAdapter>,
}

impl RatioBalancer {
    #[must_use]
    pub fn new(amm: Arc<dyn AmmAdapter>) -> Self {
        Self { amm }
    }

    /// Swaps the excess side into the deficient side. The swap input never
    /// exceeds the supplied amount of that token.
    pub async fn balance(
        &self,
        pool: &PoolId,
        bounds: TickBounds,
        amount0: TokenAmount,
        amount1: TokenAmount,
    ) -> EngineResult<BalanceOutcome> {
        let (token0, token1) = self.amm.pool_tokens(pool).await?;
        let sp = self.amm.sqrt_price(pool).await?;
        let sl = tick::sqrt_price_at_tick(bounds.lower)?;
        let su = tick::sqrt_price_at_tick(bounds.upper)?;

        if sp <= Decimal::ZERO {
            return Err(EngineError::Arithmetic("balance: nonpositive sqrt price"));
        }
        if sl >= su {
            return Err(EngineError::EmptyTickRange {
                lower: bounds.lower,
                upper: bounds.upper,
            });
        }

        // Below the range only token0 earns; above it only token1.
        if sp <= sl {
            return self
                .swap_all(&token1, &token0, amount0, amount1, false)
                .await;
        }
        if sp >= su {
            return self
                .swap_all(&token0, &token1, amount0, amount1, true)
                .await;
        }

        // In range: per unit of liquidity the range wants
        //   unit0 = (su - sp) / (sp * su)   token0
        //   unit1 = (sp - sl)               token1
        let unit0 = (su - sp) / (sp * su);
        let unit1 = sp - sl;
        if unit0 <= Decimal::ZERO {
            return Err(EngineError::Arithmetic("balance: degenerate range"));
        }
        let ratio = unit1 / unit0;
        let price = sp * sp;

        let a0 = amount0
            .to_decimal()
            .ok_or(EngineError::Arithmetic("balance: amount0"))?;
        let a1 = amount1
            .to_decimal()
            .ok_or(EngineError::Arithmetic("balance: amount1"))?;

        let want1 = ratio * a0;
        if a1 < want1 {
            // token0 in excess: swapping dx leaves (a0 - dx, a1 + dx * p)
            // with (a1 + dx * p) / (a0 - dx) = ratio.
            let dx = (want1 - a1) / (ratio + price);
            let dx = TokenAmount::from_decimal_ceil(dx)
                .ok_or(EngineError::Arithmetic("balance: dx"))?
                .min(amount0);
            self.execute(&token0, &token1, dx, amount0, amount1, true)
                .await
        } else {
            // token1 in excess: swapping dy yields dy / p of token0.
            let dy = (a1 - want1) / (Decimal::ONE + ratio / price);
            let dy = TokenAmount::from_decimal_ceil(dy)
                .ok_or(EngineError::Arithmetic("balance: dy"))?
                .min(amount1);
            self.execute(&token1, &token0, dy, amount0, amount1, false)
                .await
        }
    }

    async fn swap_all(
        &self,
        token_in: &TokenId,
        token_out: &TokenId,
        amount0: TokenAmount,
        amount1: TokenAmount,
        zero_for_one: bool,
    ) -> EngineResult<BalanceOutcome> {
        let amount_in = if zero_for_one { amount0 } else { amount1 };
        self.execute(token_in, token_out, amount_in, amount0, amount1, zero_for_one)
            .await
    }

    async fn execute(
        &self,
        token_in: &TokenId,
        token_out: &TokenId,
        amount_in: TokenAmount,
        amount0: TokenAmount,
        amount1: TokenAmount,
        zero_for_one: bool,
    ) -> EngineResult<BalanceOutcome> {
        if amount_in.is_zero() {
            debug!("pair already at target ratio, no swap");
            return Ok(BalanceOutcome {
                amount0,
                amount1,
                swap: None,
            });
        }

        let amount_out = self.amm.swap(token_in, token_out, amount_in).await?;

        let (new0, new1) = if zero_for_one {
            (
                amount0
                    .checked_sub(amount_in)
                    .ok_or(EngineError::Arithmetic("balance: amount0 underflow"))?,
                amount1
                    .checked_add(amount_out)
                    .ok_or(EngineError::Arithmetic("balance: amount1 overflow"))?,
            )
        } else {
            (
                amount0
                    .checked_add(amount_out)
                    .ok_or(EngineError::Arithmetic("balance: amount0 overflow"))?,
                amount1
                    .checked_sub(amount_in)
                    .ok_or(EngineError::Arithmetic("balance: amount1 underflow"))?,
            )
        };

        info!(
            %token_in,
            %token_out,
            %amount_in,
            %amount_out,
            "balanced pair toward target ratio"
        );

        Ok(BalanceOutcome {
            amount0: new0,
            amount1: new1,
            swap: Some(SwapLeg {
                token_in: token_in.clone(),
                token_out: token_out.clone(),
                amount_in,
                amount_out,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use vault_protocols::SimAmm;

    fn weth() -> TokenId {
        TokenId::new("WETH")
    }
    fn dai() -> TokenId {
        TokenId::new("DAI")
    }

    async fn setup(price: Decimal) -> (RatioBalancer, PoolId) {
        let amm = Arc::new(SimAmm::new());
        let pool = PoolId::new("weth-dai");
        amm.add_pool(pool.clone(), weth(), dai(), price, 60).await;
        (RatioBalancer::new(amm), pool)
    }

    #[tokio::test]
    async fn test_one_sided_pair_gets_split() {
        let (balancer, pool) = setup(dec!(1)).await;

        // All token0, symmetric range around tick 0: roughly half swaps over.
        let out = balancer
            .balance(
                &pool,
                TickBounds::new(-600, 600),
                TokenAmount::from(1_000u64),
                TokenAmount::zero(),
            )
            .await
            .unwrap();

        let swap = out.swap.expect("swap expected");
        assert!(swap.amount_in >= TokenAmount::from(495u64));
        assert!(swap.amount_in <= TokenAmount::from(505u64));
        // Price 1: the pair total is conserved across the swap.
        assert_eq!(
            out.amount0.checked_add(out.amount1).unwrap(),
            TokenAmount::from(1_000u64)
        );
    }

    #[tokio::test]
    async fn test_swap_never_exceeds_supplied_amount() {
        let (balancer, pool) = setup(dec!(1)).await;

        // Price below the range: all token1 must become token0.
        let out = balancer
            .balance(
                &pool,
                TickBounds::new(600, 1200),
                TokenAmount::from(10u64),
                TokenAmount::from(500u64),
            )
            .await
            .unwrap();

        let swap = out.swap.expect("swap expected");
        assert_eq!(swap.token_in, dai());
        assert_eq!(swap.amount_in, TokenAmount::from(500u64));
        assert!(out.amount1.is_zero());
        assert_eq!(out.amount0, TokenAmount::from(510u64));
    }

    #[tokio::test]
    async fn test_above_range_swaps_token0_out() {
        let (balancer, pool) = setup(dec!(1)).await;

        let out = balancer
            .balance(
                &pool,
                TickBounds::new(-1200, -600),
                TokenAmount::from(500u64),
                TokenAmount::from(10u64),
            )
            .await
            .unwrap();

        let swap = out.swap.expect("swap expected");
        assert_eq!(swap.token_in, weth());
        assert!(out.amount0.is_zero());
    }

    #[tokio::test]
    async fn test_balanced_pair_swaps_at_most_dust() {
        let (balancer, pool) = setup(dec!(1)).await;

        let out = balancer
            .balance(
                &pool,
                TickBounds::new(-600, 600),
                TokenAmount::from(500u64),
                TokenAmount::from(500u64),
            )
            .await
            .unwrap();

        // The ideal ratio at tick 0 over a symmetric range is ~1; an equal
        // pair needs at most a rounding-unit swap.
        if let Some(swap) = out.swap {
            assert!(swap.amount_in <= TokenAmount::from(1u64));
        }
    }

    #[tokio::test]
    async fn test_empty_range_rejected() {
        let (balancer, pool) = setup(dec!(1)).await;
        let err = balancer
            .balance(
                &pool,
                TickBounds::new(600, 600),
                TokenAmount::from(1u64),
                TokenAmount::from(1u64),
            )
            .await;
        assert!(matches!(err, Err(EngineError::EmptyTickRange { .. })));
    }
}
