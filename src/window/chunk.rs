//! Chunk data model: opaque handles, metadata, and payload states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque, stable handle for a chunk.
///
/// Handles are allocated monotonically and never reused within one manager
/// lifetime, so a dangling reference can be detected instead of silently
/// resolving to a newer chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk-{}", self.0)
    }
}

/// Monotonic [`ChunkId`] source.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Resume allocation after the ids already present in restored state.
    pub fn starting_after(max_seen: ChunkId) -> Self {
        Self {
            next: max_seen.0 + 1,
        }
    }

    pub fn allocate(&mut self) -> ChunkId {
        let id = ChunkId(self.next);
        self.next += 1;
        id
    }
}

/// Caller-supplied chunk metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Importance in `[0, 1]`; chunks above the configured threshold are
    /// protected from ordinary eviction
    pub priority: f64,

    /// Free-form tags
    pub tags: Vec<String>,

    /// Arbitrary caller key/value data
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for ChunkMetadata {
    fn default() -> Self {
        Self {
            priority: 0.5,
            tags: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl ChunkMetadata {
    pub fn with_priority(priority: f64) -> Self {
        Self {
            priority: priority.clamp(0.0, 1.0),
            tags: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Reduce to the residual form kept after compaction: priority only.
    pub(crate) fn shrink(&mut self) {
        self.tags.clear();
        self.extra.clear();
    }
}

/// Payload states of a chunk. `Inline` and `Residual` are mutually exclusive
/// lifetime stages; `Detached` only occurs for chunks rebuilt from a
/// payload-stripped snapshot.
#[derive(Debug, Clone)]
pub enum ChunkPayload<T> {
    /// Owned unit sequence
    Inline(Vec<T>),
    /// Payload discarded by compaction; not recoverable by this crate
    Residual,
    /// Imported without payload; may be re-populated from an external log
    Detached,
}

impl<T> ChunkPayload<T> {
    pub fn units(&self) -> Option<&[T]> {
        match self {
            Self::Inline(units) => Some(units),
            Self::Residual | Self::Detached => None,
        }
    }
}

/// A contiguous run of units plus bookkeeping metadata.
#[derive(Debug, Clone)]
pub struct Chunk<T> {
    /// Stable handle
    pub id: ChunkId,

    /// Absolute offset of the first unit in the global stream
    pub position: u64,

    /// Number of units this chunk represents (survives compaction)
    pub unit_count: u64,

    /// Unit payload, or what is left of it
    pub payload: ChunkPayload<T>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Caller-supplied metadata
    pub metadata: ChunkMetadata,

    /// Resident in the active window
    pub active: bool,

    /// Continuity link to the immediate predecessor
    pub prev_id: Option<ChunkId>,

    /// Continuity link to the immediate successor
    pub next_id: Option<ChunkId>,
}

impl<T> Chunk<T> {
    pub fn new(id: ChunkId, position: u64, units: Vec<T>, metadata: ChunkMetadata) -> Self {
        Self {
            id,
            position,
            unit_count: units.len() as u64,
            payload: ChunkPayload::Inline(units),
            created_at: Utc::now(),
            metadata,
            active: true,
            prev_id: None,
            next_id: None,
        }
    }

    /// Exclusive end position of this chunk's span.
    pub fn end_position(&self) -> u64 {
        self.position + self.unit_count
    }

    /// Whether the payload has been shrunk to the residual record.
    pub fn is_compacted(&self) -> bool {
        matches!(self.payload, ChunkPayload::Residual)
    }

    /// The owned units, if the payload is still resident.
    pub fn units(&self) -> Option<&[T]> {
        self.payload.units()
    }
}
