//! Fee settlement: converts a mix of the two position tokens into an exact
//! amount of the base settlement asset via canonical two-hop routing
//! (token → bridge → base), consuming token0 before token1.
//!
//! Routing is bounded to at most two swaps per input token regardless of
//! which pair the position holds. A token that already is the bridge or the
//! base asset skips the corresponding hop.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use vault_domain::errors::{EngineError, EngineResult};
use vault_domain::token::{AccountId, TokenAmount, TokenId};
use vault_protocols::AmmAdapter;

/// A request to extract an operator fee from a token quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub token0: TokenId,
    pub token1: TokenId,
    pub quota0: TokenAmount,
    pub quota1: TokenAmount,
    /// Fee owed, denominated in the base settlement asset.
    pub fee_amount: TokenAmount,
    pub receiver: AccountId,
}

/// Per-token consumption and the amount paid out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub consumed0: TokenAmount,
    pub consumed1: TokenAmount,
    /// Exactly the requested fee amount.
    pub paid: TokenAmount,
    /// Base-asset overshoot from ceiling-rounded quotes. Reported, never
    /// silently folded into the quota.
    pub dust: TokenAmount,
    /// Unconsumed quota, flowing to the next pipeline step untouched.
    pub remaining0: TokenAmount,
    pub remaining1: TokenAmount,
}

/// Settles operator fees out of position quotas.
pub struct FeeSettlement {
    amm: Arc<dyn AmmAdapter>,
    base_asset: TokenId,
    bridge_asset: TokenId,
}

impl FeeSettlement {
    #[must_use]
    pub fn new(amm: Arc<dyn AmmAdapter>, base_asset: TokenId, bridge_asset: TokenId) -> Self {
        Self {
            amm,
            base_asset,
            bridge_asset,
        }
    }

    /// Converts quota into exactly `fee_amount` of the base asset for the
    /// receiver.
    ///
    /// The convertible value of both quotas is quoted upfront; an
    /// insufficient quota fails before any swap executes.
    pub async fn settle(&self, request: &SettlementRequest) -> EngineResult<SettlementOutcome> {
        if request.fee_amount.is_zero() {
            return Ok(SettlementOutcome {
                consumed0: TokenAmount::zero(),
                consumed1: TokenAmount::zero(),
                paid: TokenAmount::zero(),
                dust: TokenAmount::zero(),
                remaining0: request.quota0,
                remaining1: request.quota1,
            });
        }

        let capacity0 = self.convertible(&request.token0, request.quota0).await?;
        let capacity1 = self.convertible(&request.token1, request.quota1).await?;
        let capacity = capacity0
            .checked_add(capacity1)
            .ok_or(EngineError::Arithmetic("settle: capacity overflow"))?;
        if capacity < request.fee_amount {
            return Err(EngineError::InsufficientQuota {
                required: request.fee_amount,
                available: capacity,
            });
        }

        let mut still_needed = request.fee_amount;
        let mut produced_total = TokenAmount::zero();
        let mut consumed = [TokenAmount::zero(), TokenAmount::zero()];

        let legs = [
            (&request.token0, request.quota0),
            (&request.token1, request.quota1),
        ];
        for (i, (token, quota)) in legs.into_iter().enumerate() {
            if still_needed.is_zero() {
                break;
            }
            let (used, produced) = self.extract(token, quota, still_needed).await?;
            consumed[i] = used;
            produced_total = produced_total
                .checked_add(produced)
                .ok_or(EngineError::Arithmetic("settle: proceeds overflow"))?;
            still_needed = still_needed
                .checked_sub(produced.min(still_needed))
                .ok_or(EngineError::Arithmetic("settle: needed underflow"))?;
        }

        // Upfront capacity covered the fee; the greedy pass can only stop
        // short on a quoting inconsistency in the collaborator.
        if !still_needed.is_zero() {
            return Err(EngineError::InsufficientQuota {
                required: request.fee_amount,
                available: produced_total,
            });
        }

        let dust = produced_total
            .checked_sub(request.fee_amount)
            .ok_or(EngineError::Arithmetic("settle: dust underflow"))?;
        let remaining0 = request
            .quota0
            .checked_sub(consumed[0])
            .ok_or(EngineError::Arithmetic("settle: quota0 underflow"))?;
        let remaining1 = request
            .quota1
            .checked_sub(consumed[1])
            .ok_or(EngineError::Arithmetic("settle: quota1 underflow"))?;

        info!(
            receiver = %request.receiver,
            paid = %request.fee_amount,
            consumed0 = %consumed[0],
            consumed1 = %consumed[1],
            dust = %dust,
            "operator fee settled"
        );

        Ok(SettlementOutcome {
            consumed0: consumed[0],
            consumed1: consumed[1],
            paid: request.fee_amount,
            dust,
            remaining0,
            remaining1,
        })
    }

    /// Quotes the base-asset amount a full quota of `token` can produce,
    /// without executing swaps.
    async fn convertible(&self, token: &TokenId, quota: TokenAmount) -> EngineResult<TokenAmount> {
        if quota.is_zero() {
            return Ok(TokenAmount::zero());
        }
        if token == &self.base_asset {
            return Ok(quota);
        }
        let bridge_out = if token == &self.bridge_asset {
            quota
        } else {
            self.amm
                .quote_output_for_input(token, &self.bridge_asset, quota)
                .await?
        };
        if self.bridge_asset == self.base_asset {
            return Ok(bridge_out);
        }
        Ok(self
            .amm
            .quote_output_for_input(&self.bridge_asset, &self.base_asset, bridge_out)
            .await?)
    }

    /// Converts up to `quota` of `token` toward `needed` base asset.
    /// Returns (input consumed, base asset produced).
    async fn extract(
        &self,
        token: &TokenId,
        quota: TokenAmount,
        needed: TokenAmount,
    ) -> EngineResult<(TokenAmount, TokenAmount)> {
        if quota.is_zero() {
            return Ok((TokenAmount::zero(), TokenAmount::zero()));
        }

        if token == &self.base_asset {
            let used = quota.min(needed);
            return Ok((used, used));
        }

        let bridge_needed = if self.bridge_asset == self.base_asset {
            needed
        } else {
            self.amm
                .quote_input_for_output(&self.bridge_asset, &self.base_asset, needed)
                .await?
        };
        let input_needed = if token == &self.bridge_asset {
            bridge_needed
        } else {
            self.amm
                .quote_input_for_output(token, &self.bridge_asset, bridge_needed)
                .await?
        };

        let used = quota.min(input_needed);
        if used.is_zero() {
            return Ok((TokenAmount::zero(), TokenAmount::zero()));
        }

        let bridge_out = if token == &self.bridge_asset {
            used
        } else {
            self.amm.swap(token, &self.bridge_asset, used).await?
        };
        let produced = if self.bridge_asset == self.base_asset {
            bridge_out
        } else {
            self.amm
                .swap(&self.bridge_asset, &self.base_asset, bridge_out)
                .await?
        };

        debug!(%token, %used, %produced, "settlement hop");
        Ok((used, produced))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use vault_domain::position::PoolId;
    use vault_protocols::SimAmm;

    fn weth() -> TokenId {
        TokenId::new("WETH")
    }
    fn dai() -> TokenId {
        TokenId::new("DAI")
    }
    fn usdc() -> TokenId {
        TokenId::new("USDC")
    }

    /// WETH/DAI at 1:1 and WETH/USDC at 1:1; USDC is the base asset, WETH
    /// the bridge.
    async fn setup() -> FeeSettlement {
        let amm = Arc::new(SimAmm::new());
        amm.add_pool(PoolId::new("weth-dai"), weth(), dai(), dec!(1), 60)
            .await;
        amm.add_pool(PoolId::new("weth-usdc"), weth(), usdc(), dec!(1), 60)
            .await;
        FeeSettlement::new(amm, usdc(), weth())
    }

    fn request(quota0: u64, quota1: u64, fee: u64) -> SettlementRequest {
        SettlementRequest {
            token0: weth(),
            token1: dai(),
            quota0: TokenAmount::from(quota0),
            quota1: TokenAmount::from(quota1),
            fee_amount: TokenAmount::from(fee),
            receiver: AccountId::new("keeper-1"),
        }
    }

    #[tokio::test]
    async fn test_fee_paid_from_bridge_token_only() {
        let settlement = setup().await;
        let outcome = settlement.settle(&request(500, 500, 100)).await.unwrap();

        // token0 is the bridge: one hop covers the whole fee.
        assert_eq!(outcome.consumed0, TokenAmount::from(100u64));
        assert_eq!(outcome.consumed1, TokenAmount::zero());
        assert_eq!(outcome.paid, TokenAmount::from(100u64));
        assert_eq!(outcome.dust, TokenAmount::zero());
        assert_eq!(outcome.remaining0, TokenAmount::from(400u64));
        assert_eq!(outcome.remaining1, TokenAmount::from(500u64));
    }

    #[tokio::test]
    async fn test_shortfall_spills_into_token1() {
        let settlement = setup().await;
        let outcome = settlement.settle(&request(60, 500, 100)).await.unwrap();

        assert_eq!(outcome.consumed0, TokenAmount::from(60u64));
        assert_eq!(outcome.consumed1, TokenAmount::from(40u64));
        assert_eq!(outcome.remaining0, TokenAmount::zero());
        assert_eq!(outcome.remaining1, TokenAmount::from(460u64));
    }

    #[tokio::test]
    async fn test_base_asset_quota_used_directly() {
        let settlement = setup().await;
        let request = SettlementRequest {
            token0: usdc(),
            token1: dai(),
            quota0: TokenAmount::from(150u64),
            quota1: TokenAmount::from(500u64),
            fee_amount: TokenAmount::from(100u64),
            receiver: AccountId::new("keeper-1"),
        };
        let outcome = settlement.settle(&request).await.unwrap();

        assert_eq!(outcome.consumed0, TokenAmount::from(100u64));
        assert_eq!(outcome.consumed1, TokenAmount::zero());
        assert_eq!(outcome.remaining0, TokenAmount::from(50u64));
    }

    #[tokio::test]
    async fn test_insufficient_quota_fails_upfront() {
        let settlement = setup().await;
        let err = settlement.settle(&request(30, 40, 100)).await;

        match err {
            Err(EngineError::InsufficientQuota {
                required,
                available,
            }) => {
                assert_eq!(required, TokenAmount::from(100u64));
                assert_eq!(available, TokenAmount::from(70u64));
            }
            other => panic!("expected InsufficientQuota, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_fee_is_a_no_op() {
        let settlement = setup().await;
        let outcome = settlement.settle(&request(500, 500, 0)).await.unwrap();

        assert!(outcome.paid.is_zero());
        assert_eq!(outcome.remaining0, TokenAmount::from(500u64));
        assert_eq!(outcome.remaining1, TokenAmount::from(500u64));
    }
}
