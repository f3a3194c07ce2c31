//! Rebalance orchestrator: composes closer → fee settlement → ratio
//! balancer → opener into one atomic unit, and drives the deposit,
//! increase, and withdrawal paths against the position ledger.
//!
//! Atomicity: every pipeline runs inside an AMM checkpoint scope and ends
//! in a single terminal ledger write. A failure at any step reverts the
//! AMM to the checkpoint and leaves the ledger exactly as it was; success
//! releases the checkpoint. Checkpoints snapshot the whole AMM, so
//! checkpoint scopes serialize behind one engine-wide lock: a revert can
//! never discard the effects of another pipeline's commit.

use crate::balancer::{BalanceOutcome, RatioBalancer, SwapLeg};
use crate::config::EngineConfig;
use crate::ledger::PositionLedger;
use crate::lifecycle::{CloseOutcome, OpenOutcome, PositionCloser, PositionOpener};
use crate::settlement::{FeeSettlement, SettlementOutcome, SettlementRequest};
use crate::splitter::{ProfitSplitOutcome, ProfitSplitRequest, ProfitSplitter};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};
use vault_domain::errors::{EngineError, EngineResult};
use vault_domain::math::tick;
use vault_domain::position::{
    PoolId, Position, PositionHandle, PositionId, PositionStatus, StrategyId, TickBounds,
};
use vault_domain::token::{AccountId, TokenAmount, TokenId};
use vault_protocols::{AmmAdapter, OperatorRegistry, ReferencePricer};

/// Parameters for creating a position on first deposit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub depositor: AccountId,
    pub strategy_id: StrategyId,
    pub curator: Option<AccountId>,
    pub pool: PoolId,
    /// Range offsets relative to the spacing-aligned tick at mint time.
    pub tick_lower_diff: i32,
    pub tick_upper_diff: i32,
    pub amount0: TokenAmount,
    pub amount1: TokenAmount,
}

/// Result of a deposit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub position_id: PositionId,
    pub handle: PositionHandle,
    pub deposited_value: Decimal,
    pub deployed0: TokenAmount,
    pub deployed1: TokenAmount,
    pub leftover0: TokenAmount,
    pub leftover1: TokenAmount,
}

/// Result of a deposit-increase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncreaseReceipt {
    pub handle: PositionHandle,
    pub deposited_value: Decimal,
    pub leftover0: TokenAmount,
    pub leftover1: TokenAmount,
}

/// Full accounting of one rebalance, per token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceReceipt {
    pub closed_handle: PositionHandle,
    pub new_handle: PositionHandle,
    /// Fees collected by this rebalance's close.
    pub collected_fee0: TokenAmount,
    pub collected_fee1: TokenAmount,
    pub removed_principal0: TokenAmount,
    pub removed_principal1: TokenAmount,
    /// Quota consumed to pay the operator fee.
    pub fee_consumed0: TokenAmount,
    pub fee_consumed1: TokenAmount,
    pub fee_paid: TokenAmount,
    pub fee_dust: TokenAmount,
    /// The balancer's swap, if one was needed.
    pub swap: Option<SwapLeg>,
    pub deployed0: TokenAmount,
    pub deployed1: TokenAmount,
    pub leftover0: TokenAmount,
    pub leftover1: TokenAmount,
}

/// Result of a withdrawal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    pub returned0: TokenAmount,
    pub returned1: TokenAmount,
    pub returned_value: Decimal,
    pub split: ProfitSplitOutcome,
}

struct PipelineSteps {
    close: CloseOutcome,
    settle: SettlementOutcome,
    balance: BalanceOutcome,
    open: OpenOutcome,
}

/// Drives every position pipeline against the injected collaborators.
pub struct RebalanceOrchestrator {
    amm: Arc<dyn AmmAdapter>,
    pricer: Arc<dyn ReferencePricer>,
    operators: Arc<dyn OperatorRegistry>,
    ledger: Arc<PositionLedger>,
    config: EngineConfig,
    paused: AtomicBool,
    /// Serializes checkpoint scopes: the snapshot is global, so only one
    /// pipeline may hold one at a time.
    pipeline_serial: Mutex<()>,
    closer: PositionCloser,
    opener: PositionOpener,
    settlement: FeeSettlement,
    balancer: RatioBalancer,
    splitter: ProfitSplitter,
}

impl RebalanceOrchestrator {
    pub fn new(
        amm: Arc<dyn AmmAdapter>,
        pricer: Arc<dyn ReferencePricer>,
        operators: Arc<dyn OperatorRegistry>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            closer: PositionCloser::new(amm.clone()),
            opener: PositionOpener::new(amm.clone()),
            settlement: FeeSettlement::new(
                amm.clone(),
                config.base_asset.clone(),
                config.bridge_asset.clone(),
            ),
            balancer: RatioBalancer::new(amm.clone()),
            splitter: ProfitSplitter::new(amm.clone(), pricer.clone()),
            ledger: Arc::new(PositionLedger::new()),
            amm,
            pricer,
            operators,
            config,
            paused: AtomicBool::new(false),
            pipeline_serial: Mutex::new(()),
        })
    }

    /// Pauses or resumes the mutating entry points. Who may flip this is an
    /// outer-surface concern.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        info!(paused, "pause toggled");
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Read-only snapshot of a position record.
    pub async fn get_position_info(&self, id: PositionId) -> EngineResult<Position> {
        self.ledger.get(id).await
    }

    /// Creates a position: balances the supplied pair toward the target
    /// range and deploys it. The deposited reference value is anchored to
    /// the supplied amounts.
    pub async fn deposit(&self, request: DepositRequest) -> EngineResult<DepositReceipt> {
        self.ensure_not_paused()?;

        let diffs = (request.tick_lower_diff, request.tick_upper_diff);
        let bounds = self.target_bounds(&request.pool, diffs).await?;
        let (token0, token1) = self.amm.pool_tokens(&request.pool).await?;
        let deposited_value = self.pricer.reference_value(&token0, request.amount0)?
            + self.pricer.reference_value(&token1, request.amount1)?;

        let _serial = self.pipeline_serial.lock().await;
        let checkpoint = self.amm.checkpoint().await;
        let deployed = self
            .deploy(&request.pool, bounds, request.amount0, request.amount1)
            .await;
        let (_, open) = match deployed {
            Ok(outcome) => {
                self.amm.release(checkpoint).await;
                outcome
            }
            Err(e) => {
                self.amm.revert_to(checkpoint).await;
                warn!(error = %e, "deposit rolled back");
                return Err(e);
            }
        };

        let position_id = PositionId::new();
        let position = Position {
            id: position_id,
            depositor: request.depositor,
            strategy_id: request.strategy_id,
            curator: request.curator,
            pool: request.pool,
            handle: Some(open.handle),
            tick_lower_diff: diffs.0,
            tick_upper_diff: diffs.1,
            tick_lower: bounds.lower,
            tick_upper: bounds.upper,
            deposited_value,
            collected_fee0: TokenAmount::zero(),
            collected_fee1: TokenAmount::zero(),
            leftover0: open.leftover0,
            leftover1: open.leftover1,
            returned0: TokenAmount::zero(),
            returned1: TokenAmount::zero(),
            returned_value: Decimal::ZERO,
            status: PositionStatus::Running,
            opened_at: Utc::now(),
            closed_at: None,
        };
        self.ledger.insert(position).await;

        info!(
            position = %position_id,
            handle = %open.handle,
            %deposited_value,
            "position deposited"
        );

        Ok(DepositReceipt {
            position_id,
            handle: open.handle,
            deposited_value,
            deployed0: open.deployed0,
            deployed1: open.deployed1,
            leftover0: open.leftover0,
            leftover1: open.leftover1,
        })
    }

    /// Adds funds to a running position at its current bounds. The only
    /// mutation of the deposited reference value besides `deposit`.
    pub async fn increase(
        &self,
        caller: &AccountId,
        position_id: PositionId,
        amount0: TokenAmount,
        amount1: TokenAmount,
    ) -> EngineResult<IncreaseReceipt> {
        self.ensure_not_paused()?;

        let position = self.ledger.get(position_id).await?;
        let handle = self.running_handle(&position)?;
        if caller != &position.depositor {
            return Err(EngineError::Unauthorized(caller.clone()));
        }
        let _guard = self.ledger.begin_pipeline(position_id)?;

        let (token0, token1) = self.amm.pool_tokens(&position.pool).await?;
        let added_value = self.pricer.reference_value(&token0, amount0)?
            + self.pricer.reference_value(&token1, amount1)?;

        let _serial = self.pipeline_serial.lock().await;
        let checkpoint = self.amm.checkpoint().await;
        let result = self
            .run_increase(&position, handle, amount0, amount1)
            .await;
        let (close, open) = match result {
            Ok(outcome) => {
                self.amm.release(checkpoint).await;
                outcome
            }
            Err(e) => {
                self.amm.revert_to(checkpoint).await;
                warn!(position = %position_id, error = %e, "increase rolled back");
                return Err(e);
            }
        };

        let deposited_value = position.deposited_value + added_value;
        let collected_fee0 = self.accumulate(position.collected_fee0, close.fee0)?;
        let collected_fee1 = self.accumulate(position.collected_fee1, close.fee1)?;
        self.ledger
            .commit(position_id, |p| {
                p.handle = Some(open.handle);
                p.leftover0 = open.leftover0;
                p.leftover1 = open.leftover1;
                p.collected_fee0 = collected_fee0;
                p.collected_fee1 = collected_fee1;
                p.deposited_value = deposited_value;
            })
            .await?;

        info!(position = %position_id, %added_value, "position increased");

        Ok(IncreaseReceipt {
            handle: open.handle,
            deposited_value,
            leftover0: open.leftover0,
            leftover1: open.leftover1,
        })
    }

    /// Rebalances a position at its stored range offsets.
    pub async fn rebalance(
        &self,
        operator: &AccountId,
        position_id: PositionId,
        fee_receiver: AccountId,
        estimated_fee: TokenAmount,
        forced: bool,
    ) -> EngineResult<RebalanceReceipt> {
        self.execute_rebalance(operator, position_id, fee_receiver, estimated_fee, None, forced)
            .await
    }

    /// Rebalances a position, replacing its stored range offsets first.
    #[allow(clippy::too_many_arguments)]
    pub async fn rebalance_with_new_range(
        &self,
        operator: &AccountId,
        position_id: PositionId,
        fee_receiver: AccountId,
        estimated_fee: TokenAmount,
        new_tick_lower_diff: i32,
        new_tick_upper_diff: i32,
        forced: bool,
    ) -> EngineResult<RebalanceReceipt> {
        self.execute_rebalance(
            operator,
            position_id,
            fee_receiver,
            estimated_fee,
            Some((new_tick_lower_diff, new_tick_upper_diff)),
            forced,
        )
        .await
    }

    /// Closes a position, splits its value into principal and profit, and
    /// persists the final settlement. The record becomes read-only history.
    pub async fn withdraw(
        &self,
        caller: &AccountId,
        position_id: PositionId,
        performance_fee_received_token: Option<TokenId>,
        returned_token: Option<TokenId>,
    ) -> EngineResult<WithdrawReceipt> {
        let position = self.ledger.get(position_id).await?;
        let handle = self.running_handle(&position)?;
        if caller != &position.depositor {
            return Err(EngineError::Unauthorized(caller.clone()));
        }
        let _guard = self.ledger.begin_pipeline(position_id)?;

        let _serial = self.pipeline_serial.lock().await;
        let checkpoint = self.amm.checkpoint().await;
        let result = self
            .run_withdrawal(
                &position,
                handle,
                performance_fee_received_token,
                returned_token,
            )
            .await;
        let (close, split, returned_value) = match result {
            Ok(outcome) => {
                self.amm.release(checkpoint).await;
                outcome
            }
            Err(e) => {
                self.amm.revert_to(checkpoint).await;
                warn!(position = %position_id, error = %e, "withdrawal rolled back");
                return Err(e);
            }
        };

        let collected_fee0 = self.accumulate(position.collected_fee0, close.fee0)?;
        let collected_fee1 = self.accumulate(position.collected_fee1, close.fee1)?;
        let (returned0, returned1) = (split.user_return0, split.user_return1);
        self.ledger
            .commit(position_id, |p| {
                p.status = PositionStatus::Closed;
                p.handle = None;
                p.leftover0 = TokenAmount::zero();
                p.leftover1 = TokenAmount::zero();
                p.collected_fee0 = collected_fee0;
                p.collected_fee1 = collected_fee1;
                p.returned0 = returned0;
                p.returned1 = returned1;
                p.returned_value = returned_value;
                p.closed_at = Some(Utc::now());
            })
            .await?;

        info!(
            position = %position_id,
            %returned0,
            %returned1,
            %returned_value,
            "position withdrawn"
        );

        Ok(WithdrawReceipt {
            returned0,
            returned1,
            returned_value,
            split,
        })
    }

    /// Standalone fee settlement for an operator, inside its own
    /// checkpoint scope.
    pub async fn repay_fee(
        &self,
        operator: &AccountId,
        request: &SettlementRequest,
    ) -> EngineResult<SettlementOutcome> {
        self.authorize(operator)?;
        self.ensure_not_paused()?;

        let _serial = self.pipeline_serial.lock().await;
        let checkpoint = self.amm.checkpoint().await;
        match self.settlement.settle(request).await {
            Ok(outcome) => {
                self.amm.release(checkpoint).await;
                Ok(outcome)
            }
            Err(e) => {
                self.amm.revert_to(checkpoint).await;
                Err(e)
            }
        }
    }

    /// Standalone profit split, inside its own checkpoint scope.
    pub async fn split_profit(
        &self,
        request: &ProfitSplitRequest,
    ) -> EngineResult<ProfitSplitOutcome> {
        let _serial = self.pipeline_serial.lock().await;
        let checkpoint = self.amm.checkpoint().await;
        match self.splitter.split(request).await {
            Ok(outcome) => {
                self.amm.release(checkpoint).await;
                Ok(outcome)
            }
            Err(e) => {
                self.amm.revert_to(checkpoint).await;
                Err(e)
            }
        }
    }

    async fn execute_rebalance(
        &self,
        operator: &AccountId,
        position_id: PositionId,
        fee_receiver: AccountId,
        estimated_fee: TokenAmount,
        new_diffs: Option<(i32, i32)>,
        forced: bool,
    ) -> EngineResult<RebalanceReceipt> {
        self.authorize(operator)?;
        self.ensure_not_paused()?;

        let position = self.ledger.get(position_id).await?;
        let handle = self.running_handle(&position)?;
        let _guard = self.ledger.begin_pipeline(position_id)?;

        let current = self.amm.current_tick(&position.pool).await?;
        if !forced && position.bounds().contains(current) {
            return Err(EngineError::StillInRange {
                current,
                lower: position.tick_lower,
                upper: position.tick_upper,
            });
        }

        let diffs = new_diffs.unwrap_or((position.tick_lower_diff, position.tick_upper_diff));
        let bounds = self.target_bounds(&position.pool, diffs).await?;

        let _serial = self.pipeline_serial.lock().await;
        let checkpoint = self.amm.checkpoint().await;
        let steps = match self
            .run_pipeline(&position, handle, bounds, &fee_receiver, estimated_fee)
            .await
        {
            Ok(steps) => {
                self.amm.release(checkpoint).await;
                steps
            }
            Err(e) => {
                self.amm.revert_to(checkpoint).await;
                warn!(position = %position_id, error = %e, "rebalance rolled back");
                return Err(e);
            }
        };

        let collected_fee0 = self.accumulate(position.collected_fee0, steps.close.fee0)?;
        let collected_fee1 = self.accumulate(position.collected_fee1, steps.close.fee1)?;
        self.ledger
            .commit(position_id, |p| {
                p.handle = Some(steps.open.handle);
                p.tick_lower_diff = diffs.0;
                p.tick_upper_diff = diffs.1;
                p.tick_lower = bounds.lower;
                p.tick_upper = bounds.upper;
                p.leftover0 = steps.open.leftover0;
                p.leftover1 = steps.open.leftover1;
                p.collected_fee0 = collected_fee0;
                p.collected_fee1 = collected_fee1;
            })
            .await?;

        info!(
            position = %position_id,
            closed = %handle,
            opened = %steps.open.handle,
            bounds = %bounds,
            "rebalance committed"
        );

        Ok(RebalanceReceipt {
            closed_handle: steps.close.handle,
            new_handle: steps.open.handle,
            collected_fee0: steps.close.fee0,
            collected_fee1: steps.close.fee1,
            removed_principal0: steps.close.principal0,
            removed_principal1: steps.close.principal1,
            fee_consumed0: steps.settle.consumed0,
            fee_consumed1: steps.settle.consumed1,
            fee_paid: steps.settle.paid,
            fee_dust: steps.settle.dust,
            swap: steps.balance.swap,
            deployed0: steps.open.deployed0,
            deployed1: steps.open.deployed1,
            leftover0: steps.open.leftover0,
            leftover1: steps.open.leftover1,
        })
    }

    /// Close → settle → balance → reopen. Runs inside the caller's
    /// checkpoint scope; any error aborts the whole unit.
    async fn run_pipeline(
        &self,
        position: &Position,
        handle: PositionHandle,
        bounds: TickBounds,
        fee_receiver: &AccountId,
        estimated_fee: TokenAmount,
    ) -> EngineResult<PipelineSteps> {
        let close = self.closer.close(handle).await?;

        let quota0 = self.quota(close.principal0, close.fee0, position.leftover0)?;
        let quota1 = self.quota(close.principal1, close.fee1, position.leftover1)?;

        let (token0, token1) = self.amm.pool_tokens(&position.pool).await?;
        let settle = self
            .settlement
            .settle(&SettlementRequest {
                token0,
                token1,
                quota0,
                quota1,
                fee_amount: estimated_fee,
                receiver: fee_receiver.clone(),
            })
            .await?;

        let balance = self
            .balancer
            .balance(&position.pool, bounds, settle.remaining0, settle.remaining1)
            .await?;

        let open = self
            .opener
            .open(&position.pool, bounds, balance.amount0, balance.amount1)
            .await?;

        Ok(PipelineSteps {
            close,
            settle,
            balance,
            open,
        })
    }

    async fn run_increase(
        &self,
        position: &Position,
        handle: PositionHandle,
        amount0: TokenAmount,
        amount1: TokenAmount,
    ) -> EngineResult<(CloseOutcome, OpenOutcome)> {
        let close = self.closer.close(handle).await?;
        let quota0 = self
            .quota(close.principal0, close.fee0, position.leftover0)?
            .checked_add(amount0)
            .ok_or(EngineError::Arithmetic("increase: quota0 overflow"))?;
        let quota1 = self
            .quota(close.principal1, close.fee1, position.leftover1)?
            .checked_add(amount1)
            .ok_or(EngineError::Arithmetic("increase: quota1 overflow"))?;

        let (_, open) = self
            .deploy(&position.pool, position.bounds(), quota0, quota1)
            .await?;
        Ok((close, open))
    }

    async fn run_withdrawal(
        &self,
        position: &Position,
        handle: PositionHandle,
        performance_fee_received_token: Option<TokenId>,
        returned_token: Option<TokenId>,
    ) -> EngineResult<(CloseOutcome, ProfitSplitOutcome, Decimal)> {
        let close = self.closer.close(handle).await?;
        let total0 = self.quota(close.principal0, close.fee0, position.leftover0)?;
        let total1 = self.quota(close.principal1, close.fee1, position.leftover1)?;
        let (token0, token1) = self.amm.pool_tokens(&position.pool).await?;

        // Without a curator there is nobody to pay a performance fee to,
        // and the service fee is carved out of it.
        let (performance_fee_ratio, service_fee_ratio) = if position.curator.is_some() {
            (
                self.config.performance_fee_ratio,
                self.config.service_fee_ratio(),
            )
        } else {
            (0, 0)
        };

        // An empty position still closes cleanly.
        let split = if total0.is_zero() && total1.is_zero() {
            ProfitSplitOutcome::zero()
        } else {
            self.splitter
                .split(&ProfitSplitRequest {
                    token0: token0.clone(),
                    token1: token1.clone(),
                    amount0: total0,
                    amount1: total1,
                    original_deposit_value: position.deposited_value,
                    performance_fee_recipient: position.curator.clone(),
                    performance_fee_received_token,
                    performance_fee_ratio,
                    service_fee_ratio,
                    returned_token,
                })
                .await?
        };

        let returned_value = self.pricer.reference_value(&token0, split.user_return0)?
            + self.pricer.reference_value(&token1, split.user_return1)?;
        Ok((close, split, returned_value))
    }

    async fn deploy(
        &self,
        pool: &PoolId,
        bounds: TickBounds,
        amount0: TokenAmount,
        amount1: TokenAmount,
    ) -> EngineResult<(BalanceOutcome, OpenOutcome)> {
        let balance = self.balancer.balance(pool, bounds, amount0, amount1).await?;
        let open = self
            .opener
            .open(pool, bounds, balance.amount0, balance.amount1)
            .await?;
        Ok((balance, open))
    }

    /// Derives concrete bounds from range offsets and the current tick,
    /// validating spacing alignment.
    async fn target_bounds(&self, pool: &PoolId, diffs: (i32, i32)) -> EngineResult<TickBounds> {
        let spacing = self.amm.tick_spacing(pool).await?;
        for diff in [diffs.0, diffs.1] {
            if !tick::is_aligned(diff, spacing) {
                return Err(EngineError::InvalidTickSpacing {
                    tick: diff,
                    spacing,
                });
            }
        }
        if diffs.0 >= diffs.1 {
            return Err(EngineError::EmptyTickRange {
                lower: diffs.0,
                upper: diffs.1,
            });
        }
        let base = tick::align_floor(self.amm.current_tick(pool).await?, spacing);
        Ok(TickBounds::new(base + diffs.0, base + diffs.1))
    }

    fn running_handle(&self, position: &Position) -> EngineResult<PositionHandle> {
        if !position.is_running() {
            return Err(EngineError::PositionNotRunning(position.id));
        }
        position
            .handle
            .ok_or(EngineError::PositionNotRunning(position.id))
    }

    fn quota(
        &self,
        principal: TokenAmount,
        fee: TokenAmount,
        leftover: TokenAmount,
    ) -> EngineResult<TokenAmount> {
        principal
            .checked_add(fee)
            .and_then(|q| q.checked_add(leftover))
            .ok_or(EngineError::Arithmetic("quota overflow"))
    }

    fn accumulate(&self, total: TokenAmount, delta: TokenAmount) -> EngineResult<TokenAmount> {
        total
            .checked_add(delta)
            .ok_or(EngineError::Arithmetic("collected fee overflow"))
    }

    fn authorize(&self, operator: &AccountId) -> EngineResult<()> {
        if !self.operators.is_authorized(operator) {
            return Err(EngineError::Unauthorized(operator.clone()));
        }
        Ok(())
    }

    fn ensure_not_paused(&self) -> EngineResult<()> {
        if self.is_paused() {
            return Err(EngineError::Paused);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::Notify;
    use vault_domain::errors::AmmError;
    use vault_protocols::{
        CheckpointId, ClosedPosition, OpenedPosition, SimAmm, StaticOperatorSet,
    };

    fn weth() -> TokenId {
        TokenId::new("WETH")
    }
    fn dai() -> TokenId {
        TokenId::new("DAI")
    }
    fn usdc() -> TokenId {
        TokenId::new("USDC")
    }
    fn keeper() -> AccountId {
        AccountId::new("keeper-1")
    }
    fn alice() -> AccountId {
        AccountId::new("alice")
    }

    /// Adapter wrapper that parks the next armed `close_position` call
    /// until released, holding one pipeline open mid-flight.
    struct GatedAmm {
        inner: Arc<SimAmm>,
        armed: AtomicBool,
        entered: Notify,
        gate: Notify,
    }

    impl GatedAmm {
        fn new(inner: Arc<SimAmm>) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(false),
                entered: Notify::new(),
                gate: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl AmmAdapter for GatedAmm {
        async fn pool_tokens(&self, pool: &PoolId) -> Result<(TokenId, TokenId), AmmError> {
            self.inner.pool_tokens(pool).await
        }

        async fn current_tick(&self, pool: &PoolId) -> Result<i32, AmmError> {
            self.inner.current_tick(pool).await
        }

        async fn tick_spacing(&self, pool: &PoolId) -> Result<i32, AmmError> {
            self.inner.tick_spacing(pool).await
        }

        async fn sqrt_price(&self, pool: &PoolId) -> Result<Decimal, AmmError> {
            self.inner.sqrt_price(pool).await
        }

        async fn close_position(
            &self,
            handle: PositionHandle,
        ) -> Result<ClosedPosition, AmmError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.gate.notified().await;
            }
            self.inner.close_position(handle).await
        }

        async fn open_position(
            &self,
            pool: &PoolId,
            bounds: TickBounds,
            amount0: TokenAmount,
            amount1: TokenAmount,
        ) -> Result<OpenedPosition, AmmError> {
            self.inner.open_position(pool, bounds, amount0, amount1).await
        }

        async fn swap(
            &self,
            token_in: &TokenId,
            token_out: &TokenId,
            amount_in: TokenAmount,
        ) -> Result<TokenAmount, AmmError> {
            self.inner.swap(token_in, token_out, amount_in).await
        }

        async fn quote_output_for_input(
            &self,
            token_in: &TokenId,
            token_out: &TokenId,
            amount_in: TokenAmount,
        ) -> Result<TokenAmount, AmmError> {
            self.inner
                .quote_output_for_input(token_in, token_out, amount_in)
                .await
        }

        async fn quote_input_for_output(
            &self,
            token_in: &TokenId,
            token_out: &TokenId,
            amount_out: TokenAmount,
        ) -> Result<TokenAmount, AmmError> {
            self.inner
                .quote_input_for_output(token_in, token_out, amount_out)
                .await
        }

        async fn checkpoint(&self) -> CheckpointId {
            self.inner.checkpoint().await
        }

        async fn revert_to(&self, checkpoint: CheckpointId) {
            self.inner.revert_to(checkpoint).await
        }

        async fn release(&self, checkpoint: CheckpointId) {
            self.inner.release(checkpoint).await
        }
    }

    struct Harness {
        amm: Arc<SimAmm>,
        orchestrator: RebalanceOrchestrator,
        pool: PoolId,
    }

    /// WETH/DAI position pool and WETH/USDC routing pool, all at 1:1 with
    /// unit reference prices; USDC base asset, WETH bridge.
    async fn harness() -> Harness {
        let amm = Arc::new(SimAmm::new());
        let pool = PoolId::new("weth-dai");
        amm.add_pool(pool.clone(), weth(), dai(), dec!(1), 60).await;
        amm.add_pool(PoolId::new("weth-usdc"), weth(), usdc(), dec!(1), 60)
            .await;
        amm.set_reference_price(weth(), dec!(1));
        amm.set_reference_price(dai(), dec!(1));
        amm.set_reference_price(usdc(), dec!(1));

        let operators = Arc::new(StaticOperatorSet::new([keeper()]));
        let config = EngineConfig::new(usdc(), weth());
        let orchestrator =
            RebalanceOrchestrator::new(amm.clone(), amm.clone(), operators, config).unwrap();

        Harness {
            amm,
            orchestrator,
            pool,
        }
    }

    async fn deposit(h: &Harness, amount0: u64, amount1: u64) -> DepositReceipt {
        h.orchestrator
            .deposit(DepositRequest {
                depositor: alice(),
                strategy_id: StrategyId::new(),
                curator: Some(AccountId::new("curator-1")),
                pool: h.pool.clone(),
                tick_lower_diff: -600,
                tick_upper_diff: 600,
                amount0: TokenAmount::from(amount0),
                amount1: TokenAmount::from(amount1),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_deposit_creates_running_position() {
        let h = harness().await;
        let receipt = deposit(&h, 1_000_000, 1_000_000).await;

        assert_eq!(receipt.deposited_value, dec!(2000000));

        let info = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();
        assert_eq!(info.status, PositionStatus::Running);
        assert_eq!(info.handle, Some(receipt.handle));
        assert_eq!(info.deposited_value, dec!(2000000));
        assert_eq!(info.leftover0, receipt.leftover0);

        // deposited == deployed + leftover (unit prices, 1:1 pool).
        let total = receipt
            .deployed0
            .checked_add(receipt.deployed1)
            .and_then(|t| t.checked_add(receipt.leftover0))
            .and_then(|t| t.checked_add(receipt.leftover1))
            .unwrap();
        assert_eq!(total, TokenAmount::from(2_000_000u64));
    }

    #[tokio::test]
    async fn test_get_position_info_is_idempotent() {
        let h = harness().await;
        let receipt = deposit(&h, 10_000, 10_000).await;

        let first = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();
        let second = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_rebalance_requires_authorized_operator() {
        let h = harness().await;
        let receipt = deposit(&h, 10_000, 10_000).await;

        let err = h
            .orchestrator
            .rebalance(
                &AccountId::new("not-a-keeper"),
                receipt.position_id,
                keeper(),
                TokenAmount::from(10u64),
                true,
            )
            .await;
        assert!(matches!(err, Err(EngineError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_rebalance_respects_pause() {
        let h = harness().await;
        let receipt = deposit(&h, 10_000, 10_000).await;

        h.orchestrator.set_paused(true);
        let err = h
            .orchestrator
            .rebalance(
                &keeper(),
                receipt.position_id,
                keeper(),
                TokenAmount::from(10u64),
                true,
            )
            .await;
        assert!(matches!(err, Err(EngineError::Paused)));

        h.orchestrator.set_paused(false);
        assert!(h
            .orchestrator
            .rebalance(
                &keeper(),
                receipt.position_id,
                keeper(),
                TokenAmount::from(10u64),
                true,
            )
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_rebalance_in_range_refused_unless_forced() {
        let h = harness().await;
        let receipt = deposit(&h, 10_000, 10_000).await;

        let before = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();

        // Price has not moved: the current tick is inside the range.
        let err = h
            .orchestrator
            .rebalance(
                &keeper(),
                receipt.position_id,
                keeper(),
                TokenAmount::from(10u64),
                false,
            )
            .await;
        assert!(matches!(err, Err(EngineError::StillInRange { .. })));

        let after = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_forced_rebalance_conserves_tokens() {
        let h = harness().await;
        let receipt = deposit(&h, 1_000_000, 1_000_000).await;
        let prior = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();

        h.amm
            .credit_fees(
                receipt.handle,
                TokenAmount::from(500u64),
                TokenAmount::from(700u64),
            )
            .await
            .unwrap();

        let out = h
            .orchestrator
            .rebalance(
                &keeper(),
                receipt.position_id,
                keeper(),
                TokenAmount::from(100u64),
                true,
            )
            .await
            .unwrap();

        assert_eq!(out.closed_handle, receipt.handle);
        assert_ne!(out.new_handle, receipt.handle);
        assert_eq!(out.collected_fee0, TokenAmount::from(500u64));
        assert_eq!(out.collected_fee1, TokenAmount::from(700u64));
        assert_eq!(out.fee_paid, TokenAmount::from(100u64));

        // Per-token conservation, swap legs accounted explicitly:
        // principal + fee + prior leftover + swap_out ==
        //   fee_consumed + swap_in + deployed + leftover
        let (in0, out0, in1, out1) = match &out.swap {
            Some(leg) if leg.token_in == weth() => {
                (leg.amount_in, TokenAmount::zero(), TokenAmount::zero(), leg.amount_out)
            }
            Some(leg) => {
                (TokenAmount::zero(), leg.amount_out, leg.amount_in, TokenAmount::zero())
            }
            None => (
                TokenAmount::zero(),
                TokenAmount::zero(),
                TokenAmount::zero(),
                TokenAmount::zero(),
            ),
        };

        let lhs0 = out
            .removed_principal0
            .checked_add(out.collected_fee0)
            .and_then(|t| t.checked_add(prior.leftover0))
            .and_then(|t| t.checked_add(out0))
            .unwrap();
        let rhs0 = out
            .fee_consumed0
            .checked_add(in0)
            .and_then(|t| t.checked_add(out.deployed0))
            .and_then(|t| t.checked_add(out.leftover0))
            .unwrap();
        assert_eq!(lhs0, rhs0);

        let lhs1 = out
            .removed_principal1
            .checked_add(out.collected_fee1)
            .and_then(|t| t.checked_add(prior.leftover1))
            .and_then(|t| t.checked_add(out1))
            .unwrap();
        let rhs1 = out
            .fee_consumed1
            .checked_add(in1)
            .and_then(|t| t.checked_add(out.deployed1))
            .and_then(|t| t.checked_add(out.leftover1))
            .unwrap();
        assert_eq!(lhs1, rhs1);

        // Ledger picked up the terminal write.
        let info = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();
        assert_eq!(info.handle, Some(out.new_handle));
        assert_eq!(info.collected_fee0, TokenAmount::from(500u64));
        assert_eq!(info.collected_fee1, TokenAmount::from(700u64));
        assert_eq!(info.leftover0, out.leftover0);
        assert_eq!(info.deposited_value, prior.deposited_value);
    }

    #[tokio::test]
    async fn test_rebalance_after_price_move_without_force() {
        let h = harness().await;
        let receipt = deposit(&h, 1_000_000, 1_000_000).await;

        // Drive the price out of the [-600, 600] range.
        h.amm.set_pool_price(&h.pool, dec!(1.2)).await.unwrap();

        let out = h
            .orchestrator
            .rebalance(
                &keeper(),
                receipt.position_id,
                keeper(),
                TokenAmount::from(100u64),
                false,
            )
            .await
            .unwrap();

        // The new range re-centers on the moved price.
        let info = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();
        let current = h.amm.current_tick(&h.pool).await.unwrap();
        assert!(info.bounds().contains(current));
        assert_eq!(info.handle, Some(out.new_handle));
    }

    #[tokio::test]
    async fn test_rebalance_with_new_range_rejects_misaligned_diffs() {
        let h = harness().await;
        let receipt = deposit(&h, 10_000, 10_000).await;

        let err = h
            .orchestrator
            .rebalance_with_new_range(
                &keeper(),
                receipt.position_id,
                keeper(),
                TokenAmount::from(10u64),
                -50,
                70,
                true,
            )
            .await;
        assert!(matches!(err, Err(EngineError::InvalidTickSpacing { .. })));
    }

    #[tokio::test]
    async fn test_rebalance_with_new_range_updates_offsets() {
        let h = harness().await;
        let receipt = deposit(&h, 1_000_000, 1_000_000).await;

        h.orchestrator
            .rebalance_with_new_range(
                &keeper(),
                receipt.position_id,
                keeper(),
                TokenAmount::from(10u64),
                -1200,
                1200,
                true,
            )
            .await
            .unwrap();

        let info = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();
        assert_eq!(info.tick_lower_diff, -1200);
        assert_eq!(info.tick_upper_diff, 1200);
        assert_eq!(info.tick_upper - info.tick_lower, 2400);
    }

    #[tokio::test]
    async fn test_insufficient_fee_quota_rolls_everything_back() {
        let h = harness().await;
        let receipt = deposit(&h, 10_000, 10_000).await;
        let before = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();

        let err = h
            .orchestrator
            .rebalance(
                &keeper(),
                receipt.position_id,
                keeper(),
                TokenAmount::from(10_000_000_000u64),
                true,
            )
            .await;
        assert!(matches!(err, Err(EngineError::InsufficientQuota { .. })));

        // Ledger untouched and the close undone on the AMM side.
        let after = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();
        assert_eq!(before, after);
        assert!(!h.amm.is_closed(receipt.handle).await.unwrap());

        // The position is still usable.
        assert!(h
            .orchestrator
            .rebalance(
                &keeper(),
                receipt.position_id,
                keeper(),
                TokenAmount::from(10u64),
                true,
            )
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_failed_pipeline_cannot_undo_anothers_commit() {
        let inner = Arc::new(SimAmm::new());
        let pool = PoolId::new("weth-dai");
        inner
            .add_pool(pool.clone(), weth(), dai(), dec!(1), 60)
            .await;
        inner
            .add_pool(PoolId::new("weth-usdc"), weth(), usdc(), dec!(1), 60)
            .await;
        inner.set_reference_price(weth(), dec!(1));
        inner.set_reference_price(dai(), dec!(1));
        inner.set_reference_price(usdc(), dec!(1));

        let gated = Arc::new(GatedAmm::new(inner.clone()));
        let operators = Arc::new(StaticOperatorSet::new([keeper()]));
        let orchestrator = Arc::new(
            RebalanceOrchestrator::new(
                gated.clone(),
                inner.clone(),
                operators,
                EngineConfig::new(usdc(), weth()),
            )
            .unwrap(),
        );

        let deposit_request = || DepositRequest {
            depositor: alice(),
            strategy_id: StrategyId::new(),
            curator: Some(AccountId::new("curator-1")),
            pool: pool.clone(),
            tick_lower_diff: -600,
            tick_upper_diff: 600,
            amount0: TokenAmount::from(10_000u64),
            amount1: TokenAmount::from(10_000u64),
        };
        let a = orchestrator.deposit(deposit_request()).await.unwrap();
        let b = orchestrator.deposit(deposit_request()).await.unwrap();

        // Park the first pipeline inside its close. Its operator fee is
        // unpayable, so it will fail and revert once released.
        gated.armed.store(true, Ordering::SeqCst);
        let orch_a = orchestrator.clone();
        let a_id = a.position_id;
        let task_a = tokio::spawn(async move {
            orch_a
                .rebalance(
                    &keeper(),
                    a_id,
                    keeper(),
                    TokenAmount::from(10_000_000_000u64),
                    true,
                )
                .await
        });
        gated.entered.notified().await;

        // A second pipeline on another position must wait for the first
        // checkpoint scope to end rather than interleave with it.
        let orch_b = orchestrator.clone();
        let b_id = b.position_id;
        let task_b = tokio::spawn(async move {
            orch_b
                .rebalance(&keeper(), b_id, keeper(), TokenAmount::from(10u64), true)
                .await
        });
        tokio::task::yield_now().await;
        let parked = orchestrator.get_position_info(b.position_id).await.unwrap();
        assert_eq!(parked.handle, Some(b.handle));

        gated.gate.notify_one();
        let err = task_a.await.unwrap();
        assert!(matches!(err, Err(EngineError::InsufficientQuota { .. })));
        let out_b = task_b.await.unwrap().unwrap();

        // The failed pipeline's revert left the committed one intact.
        let info_b = orchestrator.get_position_info(b.position_id).await.unwrap();
        assert_eq!(info_b.handle, Some(out_b.new_handle));
        assert!(!inner.is_closed(out_b.new_handle).await.unwrap());

        // And the failed position itself is untouched and still open.
        let info_a = orchestrator.get_position_info(a.position_id).await.unwrap();
        assert_eq!(info_a.handle, Some(a.handle));
        assert!(!inner.is_closed(a.handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_pipelines_do_not_leak_checkpoints() {
        let h = harness().await;
        let receipt = deposit(&h, 1_000, 1_000).await;

        h.orchestrator
            .rebalance(
                &keeper(),
                receipt.position_id,
                keeper(),
                TokenAmount::from(10u64),
                true,
            )
            .await
            .unwrap();
        assert_eq!(h.amm.checkpoint_count().await, 0);

        // Failed pipelines drop their snapshot on revert as well.
        let err = h
            .orchestrator
            .rebalance(
                &keeper(),
                receipt.position_id,
                keeper(),
                TokenAmount::from(10_000_000_000u64),
                true,
            )
            .await;
        assert!(err.is_err());
        assert_eq!(h.amm.checkpoint_count().await, 0);

        h.orchestrator
            .withdraw(&alice(), receipt.position_id, None, None)
            .await
            .unwrap();
        assert_eq!(h.amm.checkpoint_count().await, 0);
    }

    #[tokio::test]
    async fn test_withdraw_without_profit_returns_deposit_value() {
        let h = harness().await;
        let receipt = deposit(&h, 10, 2).await;

        let out = h
            .orchestrator
            .withdraw(&alice(), receipt.position_id, None, None)
            .await
            .unwrap();

        // Price unchanged: value in == value out, zero fees.
        assert_eq!(out.returned_value, dec!(12));
        assert!(out.split.performance_fee0.is_zero());
        assert!(out.split.performance_fee1.is_zero());
        assert!(out.split.service_fee0.is_zero());
        assert!(out.split.service_fee1.is_zero());

        let info = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();
        assert_eq!(info.status, PositionStatus::Closed);
        assert_eq!(info.handle, None);
        assert_eq!(info.returned0, out.returned0);
        assert_eq!(info.returned_value, dec!(12));
        assert!(info.closed_at.is_some());
    }

    #[tokio::test]
    async fn test_withdraw_with_profit_pays_fees() {
        let h = harness().await;
        let receipt = deposit(&h, 1_000, 1_000).await;

        // Accrued fees are the profit: value rises from 2000 to 2200.
        h.amm
            .credit_fees(
                receipt.handle,
                TokenAmount::from(100u64),
                TokenAmount::from(100u64),
            )
            .await
            .unwrap();

        let out = h
            .orchestrator
            .withdraw(&alice(), receipt.position_id, None, None)
            .await
            .unwrap();

        assert!(out.split.performance_fee0 > TokenAmount::zero());
        assert!(out.split.service_fee0 <= out.split.performance_fee0);
        assert!(out.split.service_fee1 <= out.split.performance_fee1);

        // Everything adds back up: user + curator + protocol == 2200 in value.
        let fee_total = out
            .split
            .performance_fee0
            .checked_add(out.split.performance_fee1)
            .and_then(|t| t.checked_add(out.split.service_fee0))
            .and_then(|t| t.checked_add(out.split.service_fee1))
            .unwrap();
        let fee_value = fee_total.to_decimal().unwrap();
        assert_eq!(out.returned_value + fee_value, dec!(2200));

        // A second withdrawal is refused.
        let err = h
            .orchestrator
            .withdraw(&alice(), receipt.position_id, None, None)
            .await;
        assert!(matches!(err, Err(EngineError::PositionNotRunning(_))));
    }

    #[tokio::test]
    async fn test_withdraw_requires_depositor() {
        let h = harness().await;
        let receipt = deposit(&h, 1_000, 1_000).await;

        let err = h
            .orchestrator
            .withdraw(&AccountId::new("mallory"), receipt.position_id, None, None)
            .await;
        assert!(matches!(err, Err(EngineError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_increase_adds_deposited_value() {
        let h = harness().await;
        let receipt = deposit(&h, 1_000, 1_000).await;

        let out = h
            .orchestrator
            .increase(
                &alice(),
                receipt.position_id,
                TokenAmount::from(500u64),
                TokenAmount::from(500u64),
            )
            .await
            .unwrap();

        assert_eq!(out.deposited_value, dec!(3000));
        let info = h
            .orchestrator
            .get_position_info(receipt.position_id)
            .await
            .unwrap();
        assert_eq!(info.deposited_value, dec!(3000));
        assert_eq!(info.status, PositionStatus::Running);
        assert_eq!(info.handle, Some(out.handle));
        assert_ne!(Some(receipt.handle), info.handle);
    }

    #[tokio::test]
    async fn test_repay_fee_requires_authorization() {
        let h = harness().await;

        let request = SettlementRequest {
            token0: weth(),
            token1: dai(),
            quota0: TokenAmount::from(1_000u64),
            quota1: TokenAmount::from(1_000u64),
            fee_amount: TokenAmount::from(100u64),
            receiver: keeper(),
        };

        let err = h
            .orchestrator
            .repay_fee(&AccountId::new("rando"), &request)
            .await;
        assert!(matches!(err, Err(EngineError::Unauthorized(_))));

        let outcome = h.orchestrator.repay_fee(&keeper(), &request).await.unwrap();
        assert_eq!(outcome.paid, TokenAmount::from(100u64));
    }
}
