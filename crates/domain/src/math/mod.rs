//! Math for tick/price conversion and concentrated-liquidity amounts.

/// Concentrated-liquidity amount math.
pub mod liquidity;
/// Tick and price conversion.
pub mod tick;
