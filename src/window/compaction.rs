//! Compaction engine: memory-pressure tracking and payload shrinking.
//!
//! Pressure is estimated by a pluggable sizing function over the chunk count
//! and the stored unit total, expressed as a fraction of the configured
//! ceiling. Crossing [`PRESSURE_ENGAGE_RATIO`] engages the flag; dropping
//! back below clears it. While the flag is engaged, every deactivation is
//! followed by compaction of that chunk.

use std::sync::Arc;

use tracing::{debug, info};

use super::chunk::{Chunk, ChunkPayload};
use crate::WindowConfig;

/// Fraction of the sizing ceiling at which the pressure flag engages.
pub const PRESSURE_ENGAGE_RATIO: f64 = 0.8;

/// Estimated footprint as a fraction of the ceiling, from the current chunk
/// count and stored unit total.
pub type SizingFn = dyn Fn(u64, u64) -> f64 + Send + Sync;

/// Default estimate: whichever of the chunk-count and unit-total ceilings is
/// closer to exhaustion.
fn default_sizing(config: &WindowConfig) -> Arc<SizingFn> {
    let max_chunks = config.max_resident_chunks.max(1) as f64;
    let max_units = config.max_total_units.max(1) as f64;
    Arc::new(move |chunk_count, total_units| {
        (chunk_count as f64 / max_chunks).max(total_units as f64 / max_units)
    })
}

/// Memory-pressure flag fed by the sizing function.
pub struct MemoryPressure {
    sizing: Arc<SizingFn>,
    /// Custom function survives snapshot import; the default is rebuilt
    /// against the imported configuration
    custom: bool,
    engaged: bool,
}

impl std::fmt::Debug for MemoryPressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPressure")
            .field("custom", &self.custom)
            .field("engaged", &self.engaged)
            .finish()
    }
}

impl MemoryPressure {
    pub fn from_config(config: &WindowConfig) -> Self {
        Self {
            sizing: default_sizing(config),
            custom: false,
            engaged: false,
        }
    }

    pub fn with_sizing(sizing: Arc<SizingFn>) -> Self {
        Self {
            sizing,
            custom: true,
            engaged: false,
        }
    }

    pub fn engaged(&self) -> bool {
        self.engaged
    }

    /// Re-evaluate the flag after a mutation. Returns the new state.
    pub fn update(&mut self, chunk_count: u64, total_units: u64) -> bool {
        let estimate = (self.sizing)(chunk_count, total_units);
        let engaged = estimate >= PRESSURE_ENGAGE_RATIO;
        if engaged != self.engaged {
            info!(
                estimate,
                chunk_count, total_units, engaged, "memory pressure changed"
            );
            self.engaged = engaged;
        }
        engaged
    }

    /// Swap in the imported configuration, keeping a caller-supplied sizing
    /// function if one was installed.
    pub(crate) fn reconfigure(&mut self, config: &WindowConfig) {
        if !self.custom {
            self.sizing = default_sizing(config);
        }
    }
}

/// Shrink a deactivated chunk to its residual record: the payload is
/// discarded (unrecoverable here) and metadata is reduced to priority only.
/// `unit_count`, `position`, `created_at`, and links are untouched.
///
/// Active chunks are never compacted; returns whether anything changed.
pub fn compact<T>(chunk: &mut Chunk<T>) -> bool {
    if chunk.active || chunk.is_compacted() {
        return false;
    }
    if matches!(chunk.payload, ChunkPayload::Detached) {
        // Nothing resident to discard, but the chunk now counts as compacted
        debug!(chunk = %chunk.id, "compacted detached chunk");
        chunk.payload = ChunkPayload::Residual;
        chunk.metadata.shrink();
        return true;
    }
    chunk.payload = ChunkPayload::Residual;
    chunk.metadata.shrink();
    debug!(chunk = %chunk.id, units = chunk.unit_count, "compacted chunk payload");
    true
}
