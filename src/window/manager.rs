//! Window manager: the single logical owner tying chunker, index, eviction,
//! compaction, garbage collection, continuity, and persistence together.
//!
//! All mutations run under one write lock with no await points inside the
//! critical section, so every batch, eviction, GC pass, and import commits
//! atomically. Read-only queries take the read lock concurrently and only
//! ever observe committed state.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::chunk::{Chunk, ChunkId, ChunkMetadata, ChunkPayload};
use super::chunker::Chunker;
use super::compaction::{self, MemoryPressure, SizingFn};
use super::continuity;
use super::gc::{self, GcReport};
use super::index::WindowIndex;
use super::snapshot::SessionSnapshot;
use crate::{MemloomError, Result, WindowConfig};

/// Point-in-time view of the manager's aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub total_units: u64,
    pub active_units: u64,
    pub chunk_count: u64,
    pub active_chunk_count: u64,
    pub inactive_chunk_count: u64,
    pub memory_pressure: bool,
    pub utilization_ratio: f64,
    pub compression_ratio: f64,
    /// Passes completed since construction, import, or clear
    pub gc_run_count: u64,
}

/// Everything behind the lock.
struct WindowState<T> {
    config: WindowConfig,
    chunker: Chunker,
    index: WindowIndex<T>,
    pressure: MemoryPressure,
    gc_runs: u64,
}

/// Sliding-window memory manager over opaque units of type `T`.
///
/// Cloning is cheap and shares the underlying window.
pub struct WindowManager<T> {
    state: Arc<RwLock<WindowState<T>>>,
}

impl<T> Clone for WindowManager<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> WindowManager<T> {
    /// Create a manager with the default sizing function.
    pub fn new(config: WindowConfig) -> Result<Self> {
        config.validate()?;
        let pressure = MemoryPressure::from_config(&config);
        Ok(Self::build(config, pressure))
    }

    /// Create a manager with a caller-supplied sizing function for the
    /// memory-pressure estimate.
    pub fn with_sizing(config: WindowConfig, sizing: Arc<SizingFn>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, MemoryPressure::with_sizing(sizing)))
    }

    fn build(config: WindowConfig, pressure: MemoryPressure) -> Self {
        Self {
            state: Arc::new(RwLock::new(WindowState {
                chunker: Chunker::from_config(&config),
                index: WindowIndex::new(),
                pressure,
                gc_runs: 0,
                config,
            })),
        }
    }

    /// Current configuration (changes on import).
    pub async fn config(&self) -> WindowConfig {
        self.state.read().await.config.clone()
    }

    /// Aggregate statistics for the committed state.
    pub async fn get_statistics(&self) -> WindowStats {
        stats_of(&*self.state.read().await)
    }

    /// Run one garbage-collection pass now.
    pub async fn run_gc(&self) -> GcReport {
        let mut state = self.state.write().await;
        run_collection(&mut state)
    }

    /// Explicitly destroy a chunk, repairing links and index entries.
    pub async fn remove_chunk(&self, id: ChunkId) -> Result<()> {
        let mut state = self.state.write().await;
        state.index.remove_chunk(id)?;
        let (chunk_count, total_units) = (state.index.chunk_count() as u64, state.index.total_units());
        state.pressure.update(chunk_count, total_units);
        Ok(())
    }

    /// Drop every chunk and reset counters; configuration and sizing are
    /// kept.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.index.clear();
        state.gc_runs = 0;
        state.pressure.update(0, 0);
        info!("cleared window state");
    }

    /// Export the entire state as a versioned, payload-stripped snapshot.
    pub async fn export(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        SessionSnapshot::capture(&state.index, &state.config, stats_of(&state))
    }

    /// Validate `snapshot` and atomically replace all internal state with
    /// it. On any error the current state is untouched. Restored chunks are
    /// payload-free until re-populated via [`WindowManager::restore_payload`];
    /// `gc_run_count` restarts at zero.
    pub async fn import(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let mut state = self.state.write().await;
        let (index, config) = snapshot.restore::<T>()?;

        state.chunker = Chunker::from_config(&config);
        state.pressure.reconfigure(&config);
        state.index = index;
        state.config = config;
        state.gc_runs = 0;
        let (chunk_count, total_units) = (state.index.chunk_count() as u64, state.index.total_units());
        state.pressure.update(chunk_count, total_units);
        info!(chunks = chunk_count, "imported session snapshot");
        Ok(())
    }
}

impl<T: Clone> WindowManager<T> {
    /// Ingest a batch of units, splitting it into overlapping chunks.
    ///
    /// Runs eviction first when the batch would overflow the active budget;
    /// fails with `CapacityExceeded` (before any state change) if the
    /// eligible active chunks cannot cover the overflow. The batch commits
    /// atomically.
    pub async fn add_units(&self, units: &[T], metadata: ChunkMetadata) -> Result<Vec<ChunkId>> {
        self.ingest(units, metadata, false).await
    }

    /// Like [`WindowManager::add_units`], but the eviction scan may also
    /// deactivate priority-protected chunks.
    pub async fn add_units_forced(
        &self,
        units: &[T],
        metadata: ChunkMetadata,
    ) -> Result<Vec<ChunkId>> {
        self.ingest(units, metadata, true).await
    }

    async fn ingest(&self, units: &[T], metadata: ChunkMetadata, force: bool) -> Result<Vec<ChunkId>> {
        if units.is_empty() {
            return Ok(Vec::new());
        }
        let mut metadata = metadata;
        metadata.priority = metadata.priority.clamp(0.0, 1.0);

        let mut state = self.state.write().await;
        let state = &mut *state;

        let base = state.index.stream_units();
        let batch = state
            .chunker
            .split(base, units, &metadata, state.index.ids_mut());
        let incoming: u64 = batch.iter().map(|c| c.unit_count).sum();

        // Two-phase eviction: a failing plan mutates nothing
        let victims = state.index.plan_eviction(
            incoming,
            state.config.active_window_units,
            state.config.high_priority_threshold,
            force,
        )?;
        if !victims.is_empty() {
            let under_pressure = state.pressure.engaged();
            let mut freed = 0u64;
            for id in &victims {
                freed += state.index.deactivate(*id);
                if under_pressure {
                    if let Some(chunk) = state.index.get_mut(*id) {
                        compaction::compact(chunk);
                    }
                }
            }
            info!(
                evicted = victims.len(),
                freed, forced = force, "evicted chunks from the active window"
            );
        }

        let ids = state.index.register_batch(batch);
        state
            .pressure
            .update(state.index.chunk_count() as u64, state.index.total_units());
        debug!(chunks = ids.len(), units = incoming, "ingested batch");

        let utilization =
            state.index.total_units() as f64 / state.config.max_total_units.max(1) as f64;
        if utilization > state.config.gc_utilization_threshold {
            debug!(utilization, "utilization over threshold, collecting");
            run_collection(state);
        }
        Ok(ids)
    }

    /// Single-chunk lookup.
    pub async fn get_chunk(&self, id: ChunkId) -> Result<Chunk<T>> {
        let state = self.state.read().await;
        state
            .index
            .get(id)
            .cloned()
            .ok_or(MemloomError::ChunkNotFound(id))
    }

    /// Chunks intersecting `[start_position, end_position)`, ascending.
    pub async fn get_chunks_by_range(&self, start_position: u64, end_position: u64) -> Vec<Chunk<T>> {
        let state = self.state.read().await;
        state
            .index
            .chunks_in_range(start_position, end_position)
            .into_iter()
            .cloned()
            .collect()
    }

    /// The chain segment around `id`: up to `before` predecessors and
    /// `after` successors that still exist, in stream order.
    pub async fn get_with_continuity(
        &self,
        id: ChunkId,
        before: usize,
        after: usize,
    ) -> Result<Vec<Chunk<T>>> {
        let state = self.state.read().await;
        Ok(continuity::resolve(&state.index, id, before, after)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Re-populate a snapshot-restored chunk from the external source of
    /// truth. Only `Detached` chunks accept a payload: compaction is
    /// irreversible and resident chunks already own theirs.
    pub async fn restore_payload(&self, id: ChunkId, units: Vec<T>) -> Result<()> {
        let mut state = self.state.write().await;
        let chunk = state
            .index
            .get_mut(id)
            .ok_or(MemloomError::ChunkNotFound(id))?;
        match chunk.payload {
            ChunkPayload::Detached => {
                if units.len() as u64 != chunk.unit_count {
                    return Err(MemloomError::PayloadMismatch {
                        expected: chunk.unit_count,
                        got: units.len() as u64,
                    });
                }
                chunk.payload = ChunkPayload::Inline(units);
                debug!(chunk = %id, "restored chunk payload");
                Ok(())
            }
            ChunkPayload::Inline(_) | ChunkPayload::Residual => {
                Err(MemloomError::PayloadNotRestorable(id))
            }
        }
    }
}

impl<T: Send + Sync + 'static> WindowManager<T> {
    /// Spawn the periodic garbage-collection task. Each tick takes the write
    /// lock for exactly one atomic pass, so aborting the task between ticks
    /// never leaves partial state.
    ///
    /// The interval is read once at spawn time.
    pub fn spawn_gc_loop(&self) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let period = state.read().await.config.gc_interval;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a fresh interval fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut state = state.write().await;
                run_collection(&mut state);
            }
        })
    }
}

/// One atomic collection pass over locked state.
fn run_collection<T>(state: &mut WindowState<T>) -> GcReport {
    let population_before = state.index.chunk_count();
    let victims = gc::select_victims(&state.index, state.config.gc_removal_fraction, Utc::now());

    let mut removed = Vec::with_capacity(victims.len());
    let mut reclaimed_units = 0u64;
    for id in victims {
        match state.index.remove_chunk(id) {
            Ok(chunk) => {
                reclaimed_units += chunk.unit_count;
                removed.push(id);
            }
            // Best-effort maintenance: log and let the next pass retry
            Err(e) => warn!(chunk = %id, error = %e, "garbage collection skipped chunk"),
        }
    }

    state.gc_runs += 1;
    state
        .pressure
        .update(state.index.chunk_count() as u64, state.index.total_units());
    info!(
        removed = removed.len(),
        reclaimed_units, population_before, "garbage collection pass complete"
    );
    GcReport {
        removed,
        reclaimed_units,
        population_before,
    }
}

fn stats_of<T>(state: &WindowState<T>) -> WindowStats {
    let chunk_count = state.index.chunk_count();
    let active_chunk_count = state.index.active_chunk_count();
    let compacted = state.index.compacted_chunk_count();
    WindowStats {
        total_units: state.index.total_units(),
        active_units: state.index.active_units(),
        chunk_count: chunk_count as u64,
        active_chunk_count: active_chunk_count as u64,
        inactive_chunk_count: (chunk_count - active_chunk_count) as u64,
        memory_pressure: state.pressure.engaged(),
        utilization_ratio: state.index.total_units() as f64
            / state.config.max_total_units.max(1) as f64,
        compression_ratio: if chunk_count == 0 {
            0.0
        } else {
            compacted as f64 / chunk_count as f64
        },
        gc_run_count: state.gc_runs,
    }
}
