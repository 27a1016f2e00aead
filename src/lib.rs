//! Memloom - sliding-window memory manager
//!
//! Ingests an unbounded, ordered stream of opaque units, splits it into
//! overlapping chunks, and keeps a bounded active subset resident:
//! - Deactivates the oldest active chunks when the active budget is exceeded
//! - Compacts deactivated chunks under memory pressure
//! - Garbage-collects the lowest-value inactive chunks on a timer or when
//!   utilization crosses a threshold
//! - Reconstructs neighboring context across chunk boundaries via links
//! - Exports/imports its entire state as a versioned snapshot

pub mod window;

pub use window::{
    Chunk, ChunkId, ChunkMetadata, ChunkPayload, GcReport, SessionSnapshot, SizingFn,
    WindowManager, WindowStats,
};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the window manager.
///
/// All knobs are overridable at construction via the `with_*` builders and
/// validated by [`WindowConfig::validate`] before any state is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Ceiling on total stored units across all chunks
    pub max_total_units: u64,

    /// Budget for units held by active chunks
    pub active_window_units: u64,

    /// Maximum units per chunk
    pub chunk_unit_size: u64,

    /// Units shared between consecutive chunks of one batch
    pub overlap_unit_size: u64,

    /// Chunk-count ceiling used by the default sizing function
    pub max_resident_chunks: u64,

    /// Utilization ratio that triggers an opportunistic GC pass
    pub gc_utilization_threshold: f64,

    /// Period of the background GC task
    pub gc_interval: Duration,

    /// Chunks with `priority` above this are skipped by eviction
    pub high_priority_threshold: f64,

    /// Fraction of the chunk population removed per GC pass
    pub gc_removal_fraction: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_total_units: 1_000_000,
            active_window_units: 100_000,
            chunk_unit_size: 10_000,
            overlap_unit_size: 500,
            max_resident_chunks: 20,
            gc_utilization_threshold: 0.9,
            gc_interval: Duration::from_secs(60),
            high_priority_threshold: 0.8,
            gc_removal_fraction: 0.2,
        }
    }
}

impl WindowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_total_units(mut self, units: u64) -> Self {
        self.max_total_units = units;
        self
    }

    pub fn with_active_window_units(mut self, units: u64) -> Self {
        self.active_window_units = units;
        self
    }

    pub fn with_chunk_unit_size(mut self, units: u64) -> Self {
        self.chunk_unit_size = units;
        self
    }

    pub fn with_overlap_unit_size(mut self, units: u64) -> Self {
        self.overlap_unit_size = units;
        self
    }

    pub fn with_max_resident_chunks(mut self, chunks: u64) -> Self {
        self.max_resident_chunks = chunks;
        self
    }

    pub fn with_gc_utilization_threshold(mut self, ratio: f64) -> Self {
        self.gc_utilization_threshold = ratio;
        self
    }

    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    pub fn with_high_priority_threshold(mut self, threshold: f64) -> Self {
        self.high_priority_threshold = threshold;
        self
    }

    pub fn with_gc_removal_fraction(mut self, fraction: f64) -> Self {
        self.gc_removal_fraction = fraction;
        self
    }

    /// Check the invariants between knobs.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_unit_size == 0 {
            return Err(MemloomError::InvalidConfiguration(
                "chunk_unit_size must be non-zero".to_string(),
            ));
        }
        if self.overlap_unit_size >= self.chunk_unit_size {
            return Err(MemloomError::InvalidConfiguration(format!(
                "overlap_unit_size ({}) must be smaller than chunk_unit_size ({})",
                self.overlap_unit_size, self.chunk_unit_size
            )));
        }
        if self.active_window_units > self.max_total_units {
            return Err(MemloomError::InvalidConfiguration(format!(
                "active_window_units ({}) must not exceed max_total_units ({})",
                self.active_window_units, self.max_total_units
            )));
        }
        if !(0.0..=1.0).contains(&self.gc_removal_fraction) {
            return Err(MemloomError::InvalidConfiguration(format!(
                "gc_removal_fraction ({}) must be within [0, 1]",
                self.gc_removal_fraction
            )));
        }
        Ok(())
    }
}

/// Result type for memloom operations
pub type Result<T> = std::result::Result<T, MemloomError>;

/// Errors that can occur in memloom
#[derive(Debug, thiserror::Error)]
pub enum MemloomError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("active window capacity exceeded: {needed} units needed, {freeable} freeable")]
    CapacityExceeded { needed: u64, freeable: u64 },

    #[error("unsupported snapshot version: {0}")]
    VersionMismatch(String),

    #[error("chunk not found: {0}")]
    ChunkNotFound(ChunkId),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("payload does not match chunk: expected {expected} units, got {got}")]
    PayloadMismatch { expected: u64, got: u64 },

    #[error("chunk {0} payload cannot be restored")]
    PayloadNotRestorable(ChunkId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
