//! Continuity resolver: reconstructs the chain of chunks around an anchor
//! via the `prev`/`next` links, regardless of active or compacted state.

use std::collections::VecDeque;

use super::chunk::{Chunk, ChunkId};
use super::index::WindowIndex;
use crate::{MemloomError, Result};

/// Walk up to `before` hops backward and `after` hops forward from `anchor`,
/// returning the chain segment that currently exists in stream order.
///
/// A link pointing at a collected chunk ends the walk in that direction; the
/// result is then shorter than requested rather than an error. Only a missing
/// anchor fails.
pub fn resolve<'a, T>(
    index: &'a WindowIndex<T>,
    anchor: ChunkId,
    before: usize,
    after: usize,
) -> Result<Vec<&'a Chunk<T>>> {
    let anchor_chunk = index
        .get(anchor)
        .ok_or(MemloomError::ChunkNotFound(anchor))?;

    let mut chain: VecDeque<&Chunk<T>> = VecDeque::with_capacity(before + after + 1);
    chain.push_back(anchor_chunk);

    let mut cursor = anchor_chunk.prev_id;
    for _ in 0..before {
        match cursor.and_then(|id| index.get(id)) {
            Some(chunk) => {
                chain.push_front(chunk);
                cursor = chunk.prev_id;
            }
            None => break,
        }
    }

    let mut cursor = anchor_chunk.next_id;
    for _ in 0..after {
        match cursor.and_then(|id| index.get(id)) {
            Some(chunk) => {
                chain.push_back(chunk);
                cursor = chunk.next_id;
            }
            None => break,
        }
    }

    Ok(chain.into())
}
