//! Batch chunker: splits an incoming unit run into overlapping chunks.

use super::chunk::{Chunk, ChunkMetadata, IdAllocator};
use crate::WindowConfig;

/// Splits unit batches into chunks of at most `chunk_unit_size` units, with
/// consecutive chunks of one batch sharing exactly `overlap_unit_size` units.
/// The first and last chunk of a batch may carry less overlap at the stream
/// boundary.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_units: u64,
    overlap_units: u64,
}

impl Chunker {
    /// Build from a validated configuration (`overlap < chunk size` holds).
    pub fn from_config(config: &WindowConfig) -> Self {
        Self {
            chunk_units: config.chunk_unit_size,
            overlap_units: config.overlap_unit_size,
        }
    }

    /// Split `units` into linked chunks starting at absolute stream offset
    /// `base_position`. Returns the chunks in stream order, already linked
    /// `prev`/`next` among themselves; the caller links the batch head to the
    /// tail of the previous batch when it commits.
    pub fn split<T: Clone>(
        &self,
        base_position: u64,
        units: &[T],
        metadata: &ChunkMetadata,
        ids: &mut IdAllocator,
    ) -> Vec<Chunk<T>> {
        if units.is_empty() {
            return Vec::new();
        }

        let len = units.len() as u64;
        let step = self.chunk_units - self.overlap_units;
        let mut chunks: Vec<Chunk<T>> = Vec::new();
        let mut start = 0u64;

        loop {
            let end = (start + self.chunk_units).min(len);
            let slice = units[start as usize..end as usize].to_vec();
            let mut chunk = Chunk::new(
                ids.allocate(),
                base_position + start,
                slice,
                metadata.clone(),
            );

            if let Some(prev) = chunks.last_mut() {
                prev.next_id = Some(chunk.id);
                chunk.prev_id = Some(prev.id);
            }
            chunks.push(chunk);

            if end == len {
                break;
            }
            start += step;
        }

        chunks
    }
}
