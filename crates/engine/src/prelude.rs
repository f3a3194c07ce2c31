//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types from the crate.
//!
//! # Example
//!
//! ```rust
//! use vault_engine::prelude::*;
//! ```

// Balancer
pub use crate::balancer::{BalanceOutcome, RatioBalancer, SwapLeg};

// Config
pub use crate::config::EngineConfig;

// Ledger
pub use crate::ledger::{PipelineGuard, PositionLedger};

// Lifecycle
pub use crate::lifecycle::{CloseOutcome, OpenOutcome, PositionCloser, PositionOpener};

// Orchestrator
pub use crate::orchestrator::{
    DepositReceipt, DepositRequest, IncreaseReceipt, RebalanceOrchestrator, RebalanceReceipt,
    WithdrawReceipt,
};

// Settlement
pub use crate::settlement::{FeeSettlement, SettlementOutcome, SettlementRequest};

// Splitter
pub use crate::splitter::{ProfitSplitOutcome, ProfitSplitRequest, ProfitSplitter};
