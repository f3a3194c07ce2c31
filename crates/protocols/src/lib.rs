//! Collaborator interfaces consumed by the rebalancing engine.
//!
//! The engine never talks to a concrete AMM; it goes through [`AmmAdapter`],
//! plus [`ReferencePricer`] for reference-unit valuation and
//! [`OperatorRegistry`] for operator authorization. [`sim::SimAmm`] is a
//! deterministic in-memory implementation used by tests and the engine's
//! transactional scope exercises.

/// The AMM collaborator interface.
pub mod adapter;
/// Operator authorization and reference pricing capabilities.
pub mod registry;
/// Deterministic in-memory AMM simulator.
pub mod sim;

pub use adapter::{AmmAdapter, CheckpointId, ClosedPosition, OpenedPosition};
pub use registry::{OperatorRegistry, ReferencePricer, StaticOperatorSet};
pub use sim::SimAmm;
