//! Garbage collector: scores chunks and removes the lowest-value inactive
//! ones, repairing continuity links as it goes.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::chunk::{Chunk, ChunkId};
use super::index::WindowIndex;

/// Outcome of one collection pass.
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    /// Ids removed, in removal order (lowest score first)
    pub removed: Vec<ChunkId>,

    /// Sum of the removed chunks' unit counts
    pub reclaimed_units: u64,

    /// Chunk population before the pass
    pub population_before: usize,
}

/// Retention score: higher survives longer.
///
/// Base 1.0, +10 while active, up to +5 decaying linearly over the first five
/// hours of age, +5 x priority, halved once compacted.
pub fn score_chunk<T>(chunk: &Chunk<T>, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - chunk.created_at).num_seconds().max(0) as f64 / 3600.0;
    let mut score = 1.0;
    if chunk.active {
        score += 10.0;
    }
    score += (5.0 - age_hours).max(0.0);
    score += chunk.metadata.priority * 5.0;
    if chunk.is_compacted() {
        score *= 0.5;
    }
    score
}

/// Pick the lowest-scoring inactive chunks for removal. The quota is
/// `gc_removal_fraction` of the whole population (rounded up), capped by the
/// inactive pool; active chunks are never eligible. Ties keep insertion
/// order.
pub fn select_victims<T>(
    index: &WindowIndex<T>,
    removal_fraction: f64,
    now: DateTime<Utc>,
) -> Vec<ChunkId> {
    let population = index.chunk_count();
    if population == 0 {
        return Vec::new();
    }

    let mut inactive: Vec<(f64, ChunkId)> = index
        .iter_in_order()
        .filter(|chunk| !chunk.active)
        .map(|chunk| (score_chunk(chunk, now), chunk.id))
        .collect();
    if inactive.is_empty() {
        return Vec::new();
    }

    // Stable sort preserves insertion order between equal scores
    inactive.sort_by(|a, b| a.0.total_cmp(&b.0));

    let quota = ((population as f64 * removal_fraction).ceil() as usize).min(inactive.len());
    let victims: Vec<ChunkId> = inactive.into_iter().take(quota).map(|(_, id)| id).collect();
    debug!(
        population,
        quota,
        victims = victims.len(),
        "selected garbage collection victims"
    );
    victims
}
