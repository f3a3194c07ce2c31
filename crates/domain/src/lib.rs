//! Domain types for the vault rebalancing core.
//!
//! This crate holds the building blocks shared by every other crate:
//! - Token identities and U256-backed amounts
//! - The per-position ledger record and its identifiers
//! - Fee ratio arithmetic and the license-tier schedule
//! - Tick/price and concentrated-liquidity math
//! - The error taxonomy

/// Error taxonomy for the engine and the AMM collaborator.
pub mod errors;
/// Fee ratios and the license-tier schedule.
pub mod fees;
/// Tick, price, and liquidity math.
pub mod math;
/// Position record and identifiers.
pub mod position;
/// Tokens, accounts, and amounts.
pub mod token;

pub use errors::{AmmError, EngineError, EngineResult};
pub use position::{
    PoolId, Position, PositionHandle, PositionId, PositionStatus, StrategyId, TickBounds,
};
pub use token::{AccountId, TokenAmount, TokenId};
