//! Deterministic in-memory AMM simulator.
//!
//! Pools execute swaps at their configured spot price with infinite depth;
//! curve and depth effects are outside this core. Checkpoints clone the
//! whole pool/position state, giving the engine a cheap transactional scope
//! to roll pipelines back against.

use crate::adapter::{AmmAdapter, CheckpointId, ClosedPosition, OpenedPosition};
use crate::registry::ReferencePricer;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use vault_domain::errors::{AmmError, EngineError};
use vault_domain::math::{liquidity, tick};
use vault_domain::position::{PoolId, PositionHandle, TickBounds};
use vault_domain::token::{TokenAmount, TokenId};

#[derive(Debug, Clone)]
struct SimPool {
    token0: TokenId,
    token1: TokenId,
    /// Spot price as token1 per token0.
    price: Decimal,
    tick_spacing: i32,
}

#[derive(Debug, Clone)]
struct SimPosition {
    pool: PoolId,
    bounds: TickBounds,
    liquidity: u128,
    fee0: TokenAmount,
    fee1: TokenAmount,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
struct SimState {
    pools: HashMap<PoolId, SimPool>,
    positions: HashMap<u64, SimPosition>,
    next_handle: u64,
}

impl SimState {
    fn pool(&self, pool: &PoolId) -> Result<&SimPool, AmmError> {
        self.pools
            .get(pool)
            .ok_or_else(|| AmmError::UnknownPool(pool.clone()))
    }

    fn pool_for_pair(&self, a: &TokenId, b: &TokenId) -> Result<&SimPool, AmmError> {
        self.pools
            .values()
            .find(|p| {
                (&p.token0 == a && &p.token1 == b) || (&p.token0 == b && &p.token1 == a)
            })
            .ok_or_else(|| AmmError::PoolNotFound(a.clone(), b.clone()))
    }
}

/// In-memory AMM with snapshot/restore support.
pub struct SimAmm {
    state: RwLock<SimState>,
    checkpoints: RwLock<HashMap<u64, SimState>>,
    next_checkpoint: AtomicU64,
    reference_prices: StdRwLock<HashMap<TokenId, Decimal>>,
}

impl SimAmm {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SimState::default()),
            checkpoints: RwLock::new(HashMap::new()),
            next_checkpoint: AtomicU64::new(0),
            reference_prices: StdRwLock::new(HashMap::new()),
        }
    }

    /// Registers a pool trading (token0, token1) at the given spot price.
    pub async fn add_pool(
        &self,
        id: PoolId,
        token0: TokenId,
        token1: TokenId,
        price: Decimal,
        tick_spacing: i32,
    ) {
        let mut state = self.state.write().await;
        state.pools.insert(
            id,
            SimPool {
                token0,
                token1,
                price,
                tick_spacing,
            },
        );
    }

    /// Moves a pool's spot price, e.g. to drive a position out of range.
    pub async fn set_pool_price(&self, pool: &PoolId, price: Decimal) -> Result<(), AmmError> {
        let mut state = self.state.write().await;
        let entry = state
            .pools
            .get_mut(pool)
            .ok_or_else(|| AmmError::UnknownPool(pool.clone()))?;
        entry.price = price;
        Ok(())
    }

    /// Accrues swap fees to an open position.
    pub async fn credit_fees(
        &self,
        handle: PositionHandle,
        fee0: TokenAmount,
        fee1: TokenAmount,
    ) -> Result<(), AmmError> {
        let mut state = self.state.write().await;
        let position = state
            .positions
            .get_mut(&handle.0)
            .ok_or(AmmError::UnknownPosition(handle))?;
        if position.closed {
            return Err(AmmError::PositionClosed(handle));
        }
        position.fee0 = position
            .fee0
            .checked_add(fee0)
            .ok_or(AmmError::Arithmetic("credit_fees"))?;
        position.fee1 = position
            .fee1
            .checked_add(fee1)
            .ok_or(AmmError::Arithmetic("credit_fees"))?;
        Ok(())
    }

    /// Sets the reference-unit price of a token.
    pub fn set_reference_price(&self, token: TokenId, price: Decimal) {
        if let Ok(mut prices) = self.reference_prices.write() {
            prices.insert(token, price);
        }
    }

    /// Number of live snapshots, for leak checks.
    pub async fn checkpoint_count(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    /// Whether a handle has been liquidated.
    pub async fn is_closed(&self, handle: PositionHandle) -> Result<bool, AmmError> {
        let state = self.state.read().await;
        state
            .positions
            .get(&handle.0)
            .map(|p| p.closed)
            .ok_or(AmmError::UnknownPosition(handle))
    }

    fn swap_amounts(
        pool: &SimPool,
        token_in: &TokenId,
        amount_in: TokenAmount,
    ) -> Result<TokenAmount, AmmError> {
        let amount = amount_in
            .to_decimal()
            .ok_or(AmmError::Arithmetic("swap"))?;
        let out = if token_in == &pool.token0 {
            amount * pool.price
        } else {
            amount / pool.price
        };
        TokenAmount::from_decimal_floor(out).ok_or(AmmError::Arithmetic("swap"))
    }

    fn input_for_output(
        pool: &SimPool,
        token_in: &TokenId,
        amount_out: TokenAmount,
    ) -> Result<TokenAmount, AmmError> {
        let amount = amount_out
            .to_decimal()
            .ok_or(AmmError::Arithmetic("quote"))?;
        let input = if token_in == &pool.token0 {
            amount / pool.price
        } else {
            amount * pool.price
        };
        TokenAmount::from_decimal_ceil(input).ok_or(AmmError::Arithmetic("quote"))
    }
}

impl Default for SimAmm {
    fn default() -> Self {
        Self::new()
    }
}

fn arith(_: EngineError) -> AmmError {
    AmmError::Arithmetic("liquidity math")
}

#[async_trait]
impl AmmAdapter for SimAmm {
    async fn pool_tokens(&self, pool: &PoolId) -> Result<(TokenId, TokenId), AmmError> {
        let state = self.state.read().await;
        let pool = state.pool(pool)?;
        Ok((pool.token0.clone(), pool.token1.clone()))
    }

    async fn current_tick(&self, pool: &PoolId) -> Result<i32, AmmError> {
        let state = self.state.read().await;
        let pool = state.pool(pool)?;
        tick::price_to_tick(pool.price).map_err(arith)
    }

    async fn tick_spacing(&self, pool: &PoolId) -> Result<i32, AmmError> {
        let state = self.state.read().await;
        Ok(state.pool(pool)?.tick_spacing)
    }

    async fn sqrt_price(&self, pool: &PoolId) -> Result<Decimal, AmmError> {
        let state = self.state.read().await;
        let pool = state.pool(pool)?;
        tick::sqrt_price(pool.price).map_err(arith)
    }

    async fn close_position(&self, handle: PositionHandle) -> Result<ClosedPosition, AmmError> {
        let mut state = self.state.write().await;

        let position = state
            .positions
            .get(&handle.0)
            .ok_or(AmmError::UnknownPosition(handle))?
            .clone();
        if position.closed {
            return Err(AmmError::PositionClosed(handle));
        }

        let pool = state.pool(&position.pool)?;
        let sp = tick::sqrt_price(pool.price).map_err(arith)?;
        let sl = tick::sqrt_price_at_tick(position.bounds.lower).map_err(arith)?;
        let su = tick::sqrt_price_at_tick(position.bounds.upper).map_err(arith)?;
        let (principal0, principal1) =
            liquidity::amounts_for_liquidity(position.liquidity, sp, sl, su).map_err(arith)?;

        let entry = state
            .positions
            .get_mut(&handle.0)
            .ok_or(AmmError::UnknownPosition(handle))?;
        entry.closed = true;
        entry.liquidity = 0;
        let (fee0, fee1) = (entry.fee0, entry.fee1);
        entry.fee0 = TokenAmount::zero();
        entry.fee1 = TokenAmount::zero();

        debug!(handle = %handle, %principal0, %principal1, %fee0, %fee1, "sim position closed");

        Ok(ClosedPosition {
            handle,
            fee0,
            fee1,
            principal0,
            principal1,
        })
    }

    async fn open_position(
        &self,
        pool_id: &PoolId,
        bounds: TickBounds,
        amount0: TokenAmount,
        amount1: TokenAmount,
    ) -> Result<OpenedPosition, AmmError> {
        let mut state = self.state.write().await;
        let pool = state.pool(pool_id)?;

        if !tick::is_aligned(bounds.lower, pool.tick_spacing)
            || !tick::is_aligned(bounds.upper, pool.tick_spacing)
            || bounds.lower >= bounds.upper
        {
            return Err(AmmError::MisalignedTicks {
                lower: bounds.lower,
                upper: bounds.upper,
                spacing: pool.tick_spacing,
            });
        }

        let sp = tick::sqrt_price(pool.price).map_err(arith)?;
        let sl = tick::sqrt_price_at_tick(bounds.lower).map_err(arith)?;
        let su = tick::sqrt_price_at_tick(bounds.upper).map_err(arith)?;

        let mintable =
            liquidity::liquidity_for_amounts(amount0, amount1, sp, sl, su).map_err(arith)?;
        let (deployed0, deployed1) =
            liquidity::amounts_for_liquidity(mintable, sp, sl, su).map_err(arith)?;
        // Floor rounding keeps the deployed side at or below the supplied
        // amounts; clamp regardless.
        let deployed0 = deployed0.min(amount0);
        let deployed1 = deployed1.min(amount1);

        let handle = PositionHandle(state.next_handle);
        state.next_handle += 1;
        state.positions.insert(
            handle.0,
            SimPosition {
                pool: pool_id.clone(),
                bounds,
                liquidity: mintable,
                fee0: TokenAmount::zero(),
                fee1: TokenAmount::zero(),
                closed: false,
            },
        );

        debug!(handle = %handle, %deployed0, %deployed1, "sim position opened");

        Ok(OpenedPosition {
            handle,
            deployed0,
            deployed1,
        })
    }

    async fn swap(
        &self,
        token_in: &TokenId,
        token_out: &TokenId,
        amount_in: TokenAmount,
    ) -> Result<TokenAmount, AmmError> {
        let state = self.state.read().await;
        let pool = state.pool_for_pair(token_in, token_out)?;
        let out = Self::swap_amounts(pool, token_in, amount_in)?;
        debug!(%token_in, %token_out, %amount_in, amount_out = %out, "sim swap");
        Ok(out)
    }

    async fn quote_output_for_input(
        &self,
        token_in: &TokenId,
        token_out: &TokenId,
        amount_in: TokenAmount,
    ) -> Result<TokenAmount, AmmError> {
        let state = self.state.read().await;
        let pool = state.pool_for_pair(token_in, token_out)?;
        Self::swap_amounts(pool, token_in, amount_in)
    }

    async fn quote_input_for_output(
        &self,
        token_in: &TokenId,
        token_out: &TokenId,
        amount_out: TokenAmount,
    ) -> Result<TokenAmount, AmmError> {
        let state = self.state.read().await;
        let pool = state.pool_for_pair(token_in, token_out)?;
        Self::input_for_output(pool, token_in, amount_out)
    }

    async fn checkpoint(&self) -> CheckpointId {
        let state = self.state.read().await.clone();
        let id = self.next_checkpoint.fetch_add(1, Ordering::SeqCst);
        self.checkpoints.write().await.insert(id, state);
        CheckpointId(id)
    }

    async fn revert_to(&self, checkpoint: CheckpointId) {
        let mut checkpoints = self.checkpoints.write().await;
        if let Some(snapshot) = checkpoints.remove(&checkpoint.0) {
            *self.state.write().await = snapshot;
            checkpoints.retain(|id, _| *id < checkpoint.0);
        }
    }

    async fn release(&self, checkpoint: CheckpointId) {
        self.checkpoints.write().await.remove(&checkpoint.0);
    }
}

impl ReferencePricer for SimAmm {
    fn reference_price(&self, token: &TokenId) -> Result<Decimal, AmmError> {
        let prices = self
            .reference_prices
            .read()
            .map_err(|_| AmmError::Arithmetic("reference price lock poisoned"))?;
        prices
            .get(token)
            .copied()
            .ok_or_else(|| AmmError::PoolNotFound(token.clone(), token.clone()))
    }
}
