//! The position ledger: single source of truth for every position record.
//!
//! All writes are the terminal step of an already-atomic pipeline.
//! Pipelines themselves serialize at the orchestrator; the in-flight guard
//! additionally rejects a second pipeline for a position that already has
//! one pending, instead of queueing it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;
use vault_domain::errors::{EngineError, EngineResult};
use vault_domain::position::{Position, PositionId};

/// In-memory ledger of position records.
pub struct PositionLedger {
    positions: RwLock<HashMap<PositionId, Position>>,
    in_flight: Mutex<HashSet<PositionId>>,
}

/// Exclusive right to run a pipeline for one position. Released on drop.
pub struct PipelineGuard<'a> {
    ledger: &'a PositionLedger,
    id: PositionId,
}

impl Drop for PipelineGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.ledger.in_flight.lock() {
            in_flight.remove(&self.id);
        }
    }
}

impl PositionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Claims the pipeline slot for a position.
    pub fn begin_pipeline(&self, id: PositionId) -> EngineResult<PipelineGuard<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| EngineError::Arithmetic("in-flight lock poisoned"))?;
        if !in_flight.insert(id) {
            return Err(EngineError::PipelineInFlight(id));
        }
        Ok(PipelineGuard { ledger: self, id })
    }

    /// Inserts a freshly created position record.
    pub async fn insert(&self, position: Position) {
        debug!(position = %position.id, "ledger insert");
        self.positions.write().await.insert(position.id, position);
    }

    /// Read-only snapshot of a record. Repeated calls return identical
    /// results absent an intervening mutation.
    pub async fn get(&self, id: PositionId) -> EngineResult<Position> {
        self.positions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::PositionNotFound(id))
    }

    /// Applies a terminal write to a record. The mutation closure runs with
    /// the write lock held and must not fail; all validation happens before
    /// a pipeline reaches its commit.
    pub async fn commit<F>(&self, id: PositionId, mutate: F) -> EngineResult<()>
    where
        F: FnOnce(&mut Position),
    {
        let mut positions = self.positions.write().await;
        let position = positions
            .get_mut(&id)
            .ok_or(EngineError::PositionNotFound(id))?;
        mutate(position);
        debug!(position = %id, "ledger commit");
        Ok(())
    }
}

impl Default for PositionLedger {
    fn default() -> Self {
        Self::new()
    }
}
