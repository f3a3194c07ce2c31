use crate::token::{AccountId, TokenAmount};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable ledger identifier for a position. Assigned once on first deposit
/// and reused across every rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(pub Uuid);

impl PositionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the strategy a position follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyId(pub Uuid);

impl StrategyId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StrategyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a pool on the external AMM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolId(pub String);

impl PoolId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a concrete position on the external AMM. Changes on every
/// rebalance; the ledger-side [`PositionId`] does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionHandle(pub u64);

impl fmt::Display for PositionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tick bounds of a liquidity range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickBounds {
    pub lower: i32,
    pub upper: i32,
}

impl TickBounds {
    #[must_use]
    pub fn new(lower: i32, upper: i32) -> Self {
        Self { lower, upper }
    }

    /// Whether a tick lies inside the range, bounds inclusive.
    #[must_use]
    pub fn contains(&self, tick: i32) -> bool {
        tick >= self.lower && tick <= self.upper
    }
}

impl fmt::Display for TickBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Running,
    Closed,
}

/// The per-position ledger record. Single source of truth for deposited
/// value, collected fees, leftovers, and final returned amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    /// Owning depositor.
    pub depositor: AccountId,
    /// Strategy this position follows.
    pub strategy_id: StrategyId,
    /// Strategy curator receiving the performance fee, if any.
    pub curator: Option<AccountId>,
    /// Pool the position deploys into.
    pub pool: PoolId,
    /// Currently bound AMM handle. `None` once closed.
    pub handle: Option<PositionHandle>,
    /// Lower bound offset relative to the spacing-aligned tick at mint time.
    pub tick_lower_diff: i32,
    /// Upper bound offset relative to the spacing-aligned tick at mint time.
    pub tick_upper_diff: i32,
    /// Concrete bounds of the currently open range.
    pub tick_lower: i32,
    pub tick_upper: i32,
    /// Cumulative deposited value in the reference unit. Set only on
    /// deposit/increase, never mutated by rebalance.
    pub deposited_value: Decimal,
    /// Cumulative fees collected from the AMM, per token.
    pub collected_fee0: TokenAmount,
    pub collected_fee1: TokenAmount,
    /// Tokens held by the position but not deployed into the AMM.
    pub leftover0: TokenAmount,
    pub leftover1: TokenAmount,
    /// Final amounts returned to the depositor, set at withdrawal.
    pub returned0: TokenAmount,
    pub returned1: TokenAmount,
    /// Reference-unit value of the returned amounts.
    pub returned_value: Decimal,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == PositionStatus::Running
    }

    #[must_use]
    pub fn bounds(&self) -> TickBounds {
        TickBounds::new(self.tick_lower, self.tick_upper)
    }
}
