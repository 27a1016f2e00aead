//! Window index: chunk arena, insertion order, position lookup, and the
//! eviction controller.
//!
//! Chunks live in an arena keyed by opaque handles; insertion order and a
//! position B-tree are secondary indexes over the same handles. All derived
//! totals (`total_units`, `active_units`) are kept consistent on every
//! mutation.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::chunk::{Chunk, ChunkId, IdAllocator};
use crate::{MemloomError, Result};

/// The aggregate owning all chunks.
#[derive(Debug)]
pub struct WindowIndex<T> {
    /// Arena of chunk records
    chunks: HashMap<ChunkId, Chunk<T>>,

    /// Chunk ids in insertion order (positions strictly increasing)
    order: Vec<ChunkId>,

    /// Start position -> chunk id, over all non-collected chunks
    by_position: BTreeMap<u64, ChunkId>,

    /// Sum of `unit_count` over all chunks
    total_units: u64,

    /// Sum of `unit_count` over active chunks
    active_units: u64,

    /// Absolute length of the ingested stream; base position for the next
    /// batch, monotone across garbage collection
    stream_units: u64,

    /// Handle source
    ids: IdAllocator,
}

impl<T> Default for WindowIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WindowIndex<T> {
    pub fn new() -> Self {
        Self {
            chunks: HashMap::new(),
            order: Vec::new(),
            by_position: BTreeMap::new(),
            total_units: 0,
            active_units: 0,
            stream_units: 0,
            ids: IdAllocator::new(),
        }
    }

    /// Rebuild an index from restored chunk records. The caller has already
    /// validated ordering and link integrity; totals, the position index, the
    /// stream length, and the id allocator are recomputed here.
    pub(crate) fn from_restored(chunks: HashMap<ChunkId, Chunk<T>>, order: Vec<ChunkId>) -> Self {
        let mut index = Self::new();
        let mut max_id = None;
        for id in &order {
            let chunk = &chunks[id];
            index.total_units += chunk.unit_count;
            if chunk.active {
                index.active_units += chunk.unit_count;
            }
            index.stream_units = index.stream_units.max(chunk.end_position());
            index.by_position.insert(chunk.position, chunk.id);
            max_id = Some(max_id.map_or(chunk.id, |m: ChunkId| m.max(chunk.id)));
        }
        if let Some(max_id) = max_id {
            index.ids = IdAllocator::starting_after(max_id);
        }
        index.order = order;
        index.chunks = chunks;
        index
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk<T>> {
        self.chunks.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ChunkId) -> Option<&mut Chunk<T>> {
        self.chunks.get_mut(&id)
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.chunks.contains_key(&id)
    }

    pub fn chunk_count(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Chunk ids in insertion order.
    pub fn order(&self) -> &[ChunkId] {
        &self.order
    }

    /// Chunks in insertion order.
    pub fn iter_in_order(&self) -> impl Iterator<Item = &Chunk<T>> {
        self.order.iter().map(|id| &self.chunks[id])
    }

    pub fn total_units(&self) -> u64 {
        self.total_units
    }

    pub fn active_units(&self) -> u64 {
        self.active_units
    }

    pub fn stream_units(&self) -> u64 {
        self.stream_units
    }

    pub fn active_chunk_count(&self) -> usize {
        self.iter_in_order().filter(|c| c.active).count()
    }

    pub fn compacted_chunk_count(&self) -> usize {
        self.iter_in_order().filter(|c| c.is_compacted()).count()
    }

    pub(crate) fn ids_mut(&mut self) -> &mut IdAllocator {
        &mut self.ids
    }

    /// Publish a fully constructed batch. The head is linked to the current
    /// tail of the window, totals and indexes are updated per chunk. Callers
    /// hold the write lock for the whole call, so no partially registered
    /// batch is ever observable.
    pub fn register_batch(&mut self, mut batch: Vec<Chunk<T>>) -> Vec<ChunkId> {
        let Some(first) = batch.first() else {
            return Vec::new();
        };

        if let Some(tail_id) = self.order.last().copied() {
            let head_id = first.id;
            batch[0].prev_id = Some(tail_id);
            if let Some(tail) = self.chunks.get_mut(&tail_id) {
                tail.next_id = Some(head_id);
            }
        }

        let mut registered = Vec::with_capacity(batch.len());
        for chunk in batch {
            debug_assert!(
                self.order
                    .last()
                    .is_none_or(|last| self.chunks[last].position < chunk.position),
                "chunk positions must be strictly increasing in insertion order"
            );
            self.total_units += chunk.unit_count;
            if chunk.active {
                self.active_units += chunk.unit_count;
            }
            self.stream_units = self.stream_units.max(chunk.end_position());
            self.by_position.insert(chunk.position, chunk.id);
            self.order.push(chunk.id);
            registered.push(chunk.id);
            self.chunks.insert(chunk.id, chunk);
        }
        registered
    }

    /// Flip a chunk out of the active window. Payload and compaction state
    /// are untouched. Returns the freed unit count (0 if already inactive or
    /// unknown).
    pub fn deactivate(&mut self, id: ChunkId) -> u64 {
        match self.chunks.get_mut(&id) {
            Some(chunk) if chunk.active => {
                chunk.active = false;
                self.active_units -= chunk.unit_count;
                debug!(chunk = %id, freed = chunk.unit_count, "deactivated chunk");
                chunk.unit_count
            }
            _ => 0,
        }
    }

    /// Permanently remove a chunk, repairing continuity links and secondary
    /// indexes. Neighbors are linked to each other when both exist; otherwise
    /// the dangling end on the survivor is cleared.
    pub fn remove_chunk(&mut self, id: ChunkId) -> Result<Chunk<T>> {
        let chunk = self
            .chunks
            .remove(&id)
            .ok_or(MemloomError::ChunkNotFound(id))?;

        if let Some(prev_id) = chunk.prev_id {
            if let Some(prev) = self.chunks.get_mut(&prev_id) {
                prev.next_id = chunk.next_id;
            }
        }
        if let Some(next_id) = chunk.next_id {
            if let Some(next) = self.chunks.get_mut(&next_id) {
                next.prev_id = chunk.prev_id;
            }
        }

        self.order.retain(|other| *other != id);
        self.by_position.remove(&chunk.position);
        self.total_units -= chunk.unit_count;
        if chunk.active {
            self.active_units -= chunk.unit_count;
        }
        Ok(chunk)
    }

    /// Chunks whose span intersects `[start, end)`, ascending by position.
    pub fn chunks_in_range(&self, start: u64, end: u64) -> Vec<&Chunk<T>> {
        if start >= end {
            return Vec::new();
        }
        let mut result: Vec<&Chunk<T>> = Vec::new();

        // Chunks starting before `start` can still straddle it; overlap is
        // bounded to adjacent chunks, so walk back only while spans reach in.
        for (_, id) in self.by_position.range(..start).rev() {
            let chunk = &self.chunks[id];
            if chunk.end_position() > start {
                result.push(chunk);
            } else {
                break;
            }
        }
        result.reverse();

        for (_, id) in self.by_position.range(start..end) {
            result.push(&self.chunks[id]);
        }
        result
    }

    /// Select active chunks to deactivate so that `incoming` more units fit
    /// under `budget`. Scans oldest first and skips chunks whose priority
    /// exceeds `protect_above` unless `force` is set.
    ///
    /// Selection does not mutate: when the eligible chunks cannot cover the
    /// overflow this fails with `CapacityExceeded` and no deactivation has
    /// happened.
    pub fn plan_eviction(
        &self,
        incoming: u64,
        budget: u64,
        protect_above: f64,
        force: bool,
    ) -> Result<Vec<ChunkId>> {
        let needed = (self.active_units + incoming).saturating_sub(budget);
        if needed == 0 {
            return Ok(Vec::new());
        }

        let mut victims = Vec::new();
        let mut freed = 0u64;
        for id in &self.order {
            let chunk = &self.chunks[id];
            if !chunk.active {
                continue;
            }
            if !force && chunk.metadata.priority > protect_above {
                continue;
            }
            victims.push(*id);
            freed += chunk.unit_count;
            if freed >= needed {
                return Ok(victims);
            }
        }
        Err(MemloomError::CapacityExceeded {
            needed,
            freeable: freed,
        })
    }

    /// Drop every chunk and reset the derived totals. The id allocator is
    /// kept so handles are never reused within one manager lifetime.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.order.clear();
        self.by_position.clear();
        self.total_units = 0;
        self.active_units = 0;
        self.stream_units = 0;
    }
}
