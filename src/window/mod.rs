//! Sliding-window memory subsystem.
//!
//! One module per component: chunk data model, batch chunker, window index
//! with eviction, compaction under memory pressure, garbage collection,
//! continuity resolution, and versioned session snapshots. `WindowManager`
//! ties them together behind a single-writer lock.

mod chunk;
mod chunker;
mod compaction;
mod continuity;
mod gc;
mod index;
mod manager;
mod snapshot;

pub use chunk::{Chunk, ChunkId, ChunkMetadata, ChunkPayload, IdAllocator};
pub use chunker::Chunker;
pub use compaction::{MemoryPressure, SizingFn, PRESSURE_ENGAGE_RATIO};
pub use gc::GcReport;
pub use index::WindowIndex;
pub use manager::{WindowManager, WindowStats};
pub use snapshot::{ChunkRecord, ContinuityLink, SessionSnapshot, SNAPSHOT_VERSION};
