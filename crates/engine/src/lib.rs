//! Rebalancing and settlement engine for tokenized CLMM positions.
//!
//! This crate composes the pipeline components around the position ledger:
//! - Position closer/opener against the AMM collaborator
//! - Fee settlement via canonical token→bridge→base routing
//! - Ratio balancing ahead of redeployment
//! - The atomic rebalance orchestrator and the withdrawal path
//! - Profit splitting among depositor, curator, and protocol

/// Prelude module for convenient imports.
pub mod prelude;

/// Ratio balancer: one minimal swap toward the range's ideal ratio.
pub mod balancer;
/// Engine configuration.
pub mod config;
/// Position closer and opener.
pub mod lifecycle;
/// The position ledger.
pub mod ledger;
/// Rebalance orchestrator and withdrawal path.
pub mod orchestrator;
/// Fee settlement via two-hop routing.
pub mod settlement;
/// Profit splitter.
pub mod splitter;
