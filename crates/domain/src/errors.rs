use crate::position::{PoolId, PositionHandle, PositionId};
use crate::token::{AccountId, TokenAmount, TokenId};
use thiserror::Error;

/// Failures reported by the external AMM collaborator.
#[derive(Debug, Clone, Error)]
pub enum AmmError {
    #[error("no pool for pair {0} / {1}")]
    PoolNotFound(TokenId, TokenId),

    #[error("unknown pool {0}")]
    UnknownPool(PoolId),

    #[error("unknown position handle {0}")]
    UnknownPosition(PositionHandle),

    #[error("position handle {0} is already closed")]
    PositionClosed(PositionHandle),

    #[error("tick bounds [{lower}, {upper}] are not aligned to spacing {spacing}")]
    MisalignedTicks { lower: i32, upper: i32, spacing: i32 },

    #[error("arithmetic overflow in {0}")]
    Arithmetic(&'static str),
}

/// Error taxonomy of the rebalancing core.
///
/// Every variant is fatal to the call it surfaces from; pipelines abort
/// atomically and are never retried by the engine itself.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    // --- Authorization ---
    #[error("operator {0} is not on the whitelist")]
    Unauthorized(AccountId),

    #[error("module is paused")]
    Paused,

    // --- Eligibility ---
    #[error("current tick {current} is still inside [{lower}, {upper}]")]
    StillInRange { current: i32, lower: i32, upper: i32 },

    #[error("tick value {tick} is not a multiple of spacing {spacing}")]
    InvalidTickSpacing { tick: i32, spacing: i32 },

    #[error("tick range [{lower}, {upper}] is empty")]
    EmptyTickRange { lower: i32, upper: i32 },

    #[error("token {0} is not part of the position's pair")]
    TokenNotInPair(TokenId),

    // --- Resource ---
    #[error("quota cannot cover the fee: required {required}, convertible {available}")]
    InsufficientQuota {
        required: TokenAmount,
        available: TokenAmount,
    },

    #[error("position handle {0} is already closed")]
    PositionAlreadyClosed(PositionHandle),

    #[error("position {0} not found")]
    PositionNotFound(PositionId),

    #[error("position {0} is not running")]
    PositionNotRunning(PositionId),

    #[error("a pipeline is already in flight for position {0}")]
    PipelineInFlight(PositionId),

    #[error("nothing to split")]
    NothingToSplit,

    // --- Arithmetic / validation ---
    #[error("fee ratio {0} exceeds 100%")]
    FeeRatioOutOfRange(u32),

    #[error("service fee ratio {service} exceeds the curator share of performance ratio {performance}")]
    ServiceFeeAbovePerformance { service: u32, performance: u32 },

    #[error("arithmetic error in {0}")]
    Arithmetic(&'static str),

    #[error(transparent)]
    Amm(#[from] AmmError),
}

pub type EngineResult<T> = Result<T, EngineError>;
