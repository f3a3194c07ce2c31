//! Position closer and opener: thin, validated wrappers over the AMM.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use vault_domain::errors::{AmmError, EngineError, EngineResult};
use vault_domain::math::tick;
use vault_domain::position::{PoolId, PositionHandle, TickBounds};
use vault_domain::token::TokenAmount;
use vault_protocols::AmmAdapter;

/// Output of fully liquidating a position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CloseOutcome {
    pub handle: PositionHandle,
    pub fee0: TokenAmount,
    pub fee1: TokenAmount,
    pub principal0: TokenAmount,
    pub principal1: TokenAmount,
}

/// Output of opening a position: deployed amounts plus the un-deployed
/// remainder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OpenOutcome {
    pub handle: PositionHandle,
    pub deployed0: TokenAmount,
    pub deployed1: TokenAmount,
    pub leftover0: TokenAmount,
    pub leftover1: TokenAmount,
}

/// Liquidates 100% of a position's liquidity and collects accrued fees.
pub struct PositionCloser {
    amm: Arc<dyn AmmAdapter>,
}

impl PositionCloser {
    #[must_use]
    pub fn new(amm: Arc<dyn AmmAdapter>) -> Self {
        Self { amm }
    }

    pub async fn close(&self, handle: PositionHandle) -> EngineResult<CloseOutcome> {
        let closed = self.amm.close_position(handle).await.map_err(|e| match e {
            AmmError::PositionClosed(h) => EngineError::PositionAlreadyClosed(h),
            other => EngineError::Amm(other),
        })?;

        info!(
            handle = %handle,
            fee0 = %closed.fee0,
            fee1 = %closed.fee1,
            principal0 = %closed.principal0,
            principal1 = %closed.principal1,
            "position closed"
        );

        Ok(CloseOutcome {
            handle: closed.handle,
            fee0: closed.fee0,
            fee1: closed.fee1,
            principal0: closed.principal0,
            principal1: closed.principal1,
        })
    }
}

/// Opens a new position at validated tick bounds.
pub struct PositionOpener {
    amm: Arc<dyn AmmAdapter>,
}

impl PositionOpener {
    #[must_use]
    pub fn new(amm: Arc<dyn AmmAdapter>) -> Self {
        Self { amm }
    }

    pub async fn open(
        &self,
        pool: &PoolId,
        bounds: TickBounds,
        amount0: TokenAmount,
        amount1: TokenAmount,
    ) -> EngineResult<OpenOutcome> {
        let spacing = self.amm.tick_spacing(pool).await?;
        if !tick::is_aligned(bounds.lower, spacing) {
            return Err(EngineError::InvalidTickSpacing {
                tick: bounds.lower,
                spacing,
            });
        }
        if !tick::is_aligned(bounds.upper, spacing) {
            return Err(EngineError::InvalidTickSpacing {
                tick: bounds.upper,
                spacing,
            });
        }
        if bounds.lower >= bounds.upper {
            return Err(EngineError::EmptyTickRange {
                lower: bounds.lower,
                upper: bounds.upper,
            });
        }

        let opened = self.amm.open_position(pool, bounds, amount0, amount1).await?;

        let leftover0 = amount0
            .checked_sub(opened.deployed0)
            .ok_or(EngineError::Arithmetic("open: deployed0 exceeds supplied"))?;
        let leftover1 = amount1
            .checked_sub(opened.deployed1)
            .ok_or(EngineError::Arithmetic("open: deployed1 exceeds supplied"))?;

        info!(
            handle = %opened.handle,
            bounds = %bounds,
            deployed0 = %opened.deployed0,
            deployed1 = %opened.deployed1,
            leftover0 = %leftover0,
            leftover1 = %leftover1,
            "position opened"
        );

        Ok(OpenOutcome {
            handle: opened.handle,
            deployed0: opened.deployed0,
            deployed1: opened.deployed1,
            leftover0,
            leftover1,
        })
    }
}
