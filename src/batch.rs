// src/batch.rs
//! Batch consistency updater: the single point where computed metrics reach
//! the station registry. One submission per cycle, all-or-nothing.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;

use crate::station::{BatchUpdateItem, RegistryError, StationRegistry};

#[derive(Debug, Error)]
pub enum BatchError {
    /// The registry rejected the batch; nothing was applied.
    #[error("batch update failed: {0}")]
    Failed(#[from] RegistryError),
}

#[derive(Clone)]
pub struct BatchUpdater {
    registry: Arc<dyn StationRegistry>,
}

impl BatchUpdater {
    pub fn new(registry: Arc<dyn StationRegistry>) -> Self {
        Self { registry }
    }

    /// Apply `items` as one batch. An empty batch is a no-op returning 0
    /// without touching the registry.
    pub async fn apply(&self, items: &[BatchUpdateItem]) -> Result<usize, BatchError> {
        if items.is_empty() {
            return Ok(0);
        }
        let applied = self.registry.batch_update(items).await?;
        counter!("batch_applied_total").increment(applied as u64);
        tracing::debug!(applied, "batch update applied");
        Ok(applied)
    }
}
