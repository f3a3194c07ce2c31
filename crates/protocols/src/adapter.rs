use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use vault_domain::errors::AmmError;
use vault_domain::position::{PoolId, PositionHandle, TickBounds};
use vault_domain::token::{TokenAmount, TokenId};

/// Result of fully liquidating a position: accrued fees and removed
/// principal, per token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub handle: PositionHandle,
    pub fee0: TokenAmount,
    pub fee1: TokenAmount,
    pub principal0: TokenAmount,
    pub principal1: TokenAmount,
}

/// Result of minting a new position: the handle and the amounts actually
/// deployed (never more than supplied).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OpenedPosition {
    pub handle: PositionHandle,
    pub deployed0: TokenAmount,
    pub deployed1: TokenAmount,
}

/// Marker for a point-in-time snapshot of AMM state, used by the engine's
/// transactional scope to roll back a failed pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointId(pub u64);

/// Interface to the external concentrated-liquidity AMM.
///
/// The engine composes these primitives into atomic pipelines; it assumes
/// no pricing model beyond what the quoter methods report.
#[async_trait]
pub trait AmmAdapter: Send + Sync {
    /// The token pair a pool trades, in canonical (token0, token1) order.
    async fn pool_tokens(&self, pool: &PoolId) -> Result<(TokenId, TokenId), AmmError>;

    /// Current tick of a pool.
    async fn current_tick(&self, pool: &PoolId) -> Result<i32, AmmError>;

    /// Tick spacing of the pool's fee tier.
    async fn tick_spacing(&self, pool: &PoolId) -> Result<i32, AmmError>;

    /// Current sqrt price (sqrt of token1-per-token0).
    async fn sqrt_price(&self, pool: &PoolId) -> Result<Decimal, AmmError>;

    /// Liquidates 100% of the position and collects all accrued fees.
    async fn close_position(&self, handle: PositionHandle) -> Result<ClosedPosition, AmmError>;

    /// Mints a new position at the given bounds with the given amounts.
    async fn open_position(
        &self,
        pool: &PoolId,
        bounds: TickBounds,
        amount0: TokenAmount,
        amount1: TokenAmount,
    ) -> Result<OpenedPosition, AmmError>;

    /// Executes an exact-input swap, returning the output amount.
    async fn swap(
        &self,
        token_in: &TokenId,
        token_out: &TokenId,
        amount_in: TokenAmount,
    ) -> Result<TokenAmount, AmmError>;

    /// Quotes the output of an exact-input swap without executing it.
    async fn quote_output_for_input(
        &self,
        token_in: &TokenId,
        token_out: &TokenId,
        amount_in: TokenAmount,
    ) -> Result<TokenAmount, AmmError>;

    /// Quotes the input required to obtain an exact output.
    async fn quote_input_for_output(
        &self,
        token_in: &TokenId,
        token_out: &TokenId,
        amount_out: TokenAmount,
    ) -> Result<TokenAmount, AmmError>;

    /// Snapshots the adapter state.
    async fn checkpoint(&self) -> CheckpointId;

    /// Restores the state captured by `checkpoint`, discarding every side
    /// effect since. Later checkpoints are invalidated.
    async fn revert_to(&self, checkpoint: CheckpointId);

    /// Discards a checkpoint once its scope has committed, freeing the
    /// snapshot. Reverting a released checkpoint is a no-op.
    async fn release(&self, checkpoint: CheckpointId);
}
