//! Profit splitter: at withdrawal, separates principal from profit and
//! distributes profit among depositor, curator, and protocol.
//!
//! The service fee is carved out of the gross performance fee, so per token
//! `performance_fee + service_fee + user_return == amount` holds exactly
//! before any consolidation swap.

use crate::balancer::SwapLeg;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use vault_domain::errors::{EngineError, EngineResult};
use vault_domain::fees::{FEE_RATIO_DENOMINATOR, apply_ratio};
use vault_domain::token::{AccountId, TokenAmount, TokenId};
use vault_protocols::{AmmAdapter, ReferencePricer};

/// Describes a value to be split. `original_deposit_value` anchors the
/// principal/profit boundary in the reference unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitSplitRequest {
    pub token0: TokenId,
    pub token1: TokenId,
    pub amount0: TokenAmount,
    pub amount1: TokenAmount,
    pub original_deposit_value: Decimal,
    pub performance_fee_recipient: Option<AccountId>,
    /// When set to one of the pair, the curator's share is consolidated
    /// into that token with a single swap.
    pub performance_fee_received_token: Option<TokenId>,
    /// Gross performance fee ratio charged on profit (10_000 = 100%).
    pub performance_fee_ratio: u32,
    /// Protocol's cut, looked up from the license-tier table. Bounded by
    /// half the performance ratio so the curator's net share stays larger.
    pub service_fee_ratio: u32,
    /// When set, the user's share is consolidated into that token.
    pub returned_token: Option<TokenId>,
}

/// Per-token split plus any consolidation swaps executed.
///
/// The `performance_fee` fields hold the curator's share net of the
/// service fee. The gross performance fee charged against profit is
/// `performance_fee + service_fee` per token; callers reconciling against
/// the quoted ratio must use that sum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitSplitOutcome {
    /// Curator's share, net of the service fee.
    pub performance_fee0: TokenAmount,
    pub performance_fee1: TokenAmount,
    /// Protocol's share.
    pub service_fee0: TokenAmount,
    pub service_fee1: TokenAmount,
    /// Depositor's share.
    pub user_return0: TokenAmount,
    pub user_return1: TokenAmount,
    pub swaps: Vec<SwapLeg>,
}

impl ProfitSplitOutcome {
    pub(crate) fn zero() -> Self {
        Self {
            performance_fee0: TokenAmount::zero(),
            performance_fee1: TokenAmount::zero(),
            service_fee0: TokenAmount::zero(),
            service_fee1: TokenAmount::zero(),
            user_return0: TokenAmount::zero(),
            user_return1: TokenAmount::zero(),
            swaps: Vec::new(),
        }
    }
}

/// Splits withdrawal value into principal and profit shares.
pub struct ProfitSplitter {
    amm: Arc<dyn AmmAdapter>,
    pricer: Arc<dyn ReferencePricer>,
}

impl ProfitSplitter {
    #[must_use]
    pub fn new(amm: Arc<dyn AmmAdapter>, pricer: Arc<dyn ReferencePricer>) -> Self {
        Self { amm, pricer }
    }

    pub async fn split(&self, request: &ProfitSplitRequest) -> EngineResult<ProfitSplitOutcome> {
        if request.amount0.is_zero() && request.amount1.is_zero() {
            return Err(EngineError::NothingToSplit);
        }
        self.validate_ratios(request)?;

        let value0 = self
            .pricer
            .reference_value(&request.token0, request.amount0)?;
        let value1 = self
            .pricer
            .reference_value(&request.token1, request.amount1)?;
        let total_value = value0 + value1;

        let mut outcome = if total_value <= request.original_deposit_value {
            // No profit: principal protection, everything to the user.
            let mut outcome = ProfitSplitOutcome::zero();
            outcome.user_return0 = request.amount0;
            outcome.user_return1 = request.amount1;
            outcome
        } else {
            self.apportion(request, total_value)?
        };

        self.consolidate_performance_fee(request, &mut outcome)
            .await?;
        self.consolidate_user_return(request, &mut outcome).await?;

        info!(
            recipient = ?request.performance_fee_recipient,
            performance_fee0 = %outcome.performance_fee0,
            performance_fee1 = %outcome.performance_fee1,
            service_fee0 = %outcome.service_fee0,
            service_fee1 = %outcome.service_fee1,
            user_return0 = %outcome.user_return0,
            user_return1 = %outcome.user_return1,
            "profit split"
        );

        Ok(outcome)
    }

    fn validate_ratios(&self, request: &ProfitSplitRequest) -> EngineResult<()> {
        if request.performance_fee_ratio > FEE_RATIO_DENOMINATOR {
            return Err(EngineError::FeeRatioOutOfRange(request.performance_fee_ratio));
        }
        // The curator's net share is performance - service; keeping the
        // service ratio at or below half preserves performance >= service.
        if request.service_fee_ratio.saturating_mul(2) > request.performance_fee_ratio {
            return Err(EngineError::ServiceFeeAbovePerformance {
                service: request.service_fee_ratio,
                performance: request.performance_fee_ratio,
            });
        }
        Ok(())
    }

    /// Apportions profit per token proportionally to each token's share of
    /// current value, then splits it into curator/protocol/user shares.
    fn apportion(
        &self,
        request: &ProfitSplitRequest,
        total_value: Decimal,
    ) -> EngineResult<ProfitSplitOutcome> {
        let profit_value = total_value - request.original_deposit_value;

        let mut outcome = ProfitSplitOutcome::zero();
        let shares = [
            (request.amount0, &mut outcome.performance_fee0, &mut outcome.service_fee0, &mut outcome.user_return0),
            (request.amount1, &mut outcome.performance_fee1, &mut outcome.service_fee1, &mut outcome.user_return1),
        ];
        for (amount, performance, service, user) in shares {
            let amount_dec = amount
                .to_decimal()
                .ok_or(EngineError::Arithmetic("split: amount"))?;
            // Multiply before dividing to keep round numbers exact.
            let profit = TokenAmount::from_decimal_floor(amount_dec * profit_value / total_value)
                .ok_or(EngineError::Arithmetic("split: profit"))?;

            let gross = apply_ratio(profit, request.performance_fee_ratio);
            let service_cut = apply_ratio(profit, request.service_fee_ratio);
            let net = gross
                .checked_sub(service_cut)
                .ok_or(EngineError::Arithmetic("split: service exceeds gross"))?;
            let returned = amount
                .checked_sub(gross)
                .ok_or(EngineError::Arithmetic("split: fee exceeds amount"))?;

            *performance = net;
            *service = service_cut;
            *user = returned;
        }
        Ok(outcome)
    }

    async fn consolidate_performance_fee(
        &self,
        request: &ProfitSplitRequest,
        outcome: &mut ProfitSplitOutcome,
    ) -> EngineResult<()> {
        let Some(token) = &request.performance_fee_received_token else {
            return Ok(());
        };
        let (fee0, fee1) = (outcome.performance_fee0, outcome.performance_fee1);
        let (new0, new1, swap) = self
            .consolidate(request, token, fee0, fee1)
            .await?;
        outcome.performance_fee0 = new0;
        outcome.performance_fee1 = new1;
        if let Some(swap) = swap {
            outcome.swaps.push(swap);
        }
        Ok(())
    }

    async fn consolidate_user_return(
        &self,
        request: &ProfitSplitRequest,
        outcome: &mut ProfitSplitOutcome,
    ) -> EngineResult<()> {
        let Some(token) = &request.returned_token else {
            return Ok(());
        };
        let (ret0, ret1) = (outcome.user_return0, outcome.user_return1);
        let (new0, new1, swap) = self
            .consolidate(request, token, ret0, ret1)
            .await?;
        outcome.user_return0 = new0;
        outcome.user_return1 = new1;
        if let Some(swap) = swap {
            outcome.swaps.push(swap);
        }
        Ok(())
    }

    /// Swaps one side of a share into the requested token of the pair.
    async fn consolidate(
        &self,
        request: &ProfitSplitRequest,
        into: &TokenId,
        share0: TokenAmount,
        share1: TokenAmount,
    ) -> EngineResult<(TokenAmount, TokenAmount, Option<SwapLeg>)> {
        if into == &request.token0 {
            if share1.is_zero() {
                return Ok((share0, share1, None));
            }
            let out = self
                .amm
                .swap(&request.token1, &request.token0, share1)
                .await?;
            let merged = share0
                .checked_add(out)
                .ok_or(EngineError::Arithmetic("consolidate: overflow"))?;
            Ok((
                merged,
                TokenAmount::zero(),
                Some(SwapLeg {
                    token_in: request.token1.clone(),
                    token_out: request.token0.clone(),
                    amount_in: share1,
                    amount_out: out,
                }),
            ))
        } else if into == &request.token1 {
            if share0.is_zero() {
                return Ok((share0, share1, None));
            }
            let out = self
                .amm
                .swap(&request.token0, &request.token1, share0)
                .await?;
            let merged = share1
                .checked_add(out)
                .ok_or(EngineError::Arithmetic("consolidate: overflow"))?;
            Ok((
                TokenAmount::zero(),
                merged,
                Some(SwapLeg {
                    token_in: request.token0.clone(),
                    token_out: request.token1.clone(),
                    amount_in: share0,
                    amount_out: out,
                }),
            ))
        } else {
            Err(EngineError::TokenNotInPair(into.clone()))
        }
    }
}
