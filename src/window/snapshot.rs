//! Session persistence: versioned, payload-stripped snapshots of the whole
//! window state.
//!
//! Exported chunks carry structure and metadata only (`has_units: false`);
//! raw content queries work again once an external source of truth
//! re-populates the detached chunks. Import validates before it touches
//! anything, so a rejected snapshot leaves the current state intact.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::chunk::{Chunk, ChunkId, ChunkMetadata, ChunkPayload};
use super::index::WindowIndex;
use super::manager::WindowStats;
use crate::{MemloomError, Result, WindowConfig};

/// Version written by [`SessionSnapshot::capture`].
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Versions [`SessionSnapshot::restore`] accepts.
const SUPPORTED_VERSIONS: &[&str] = &[SNAPSHOT_VERSION];

/// One chunk, stripped of its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub position: u64,
    pub unit_count: u64,
    pub created_at: DateTime<Utc>,
    pub metadata: ChunkMetadata,
    pub compacted: bool,
    /// Always false: unit payloads never leave this subsystem
    pub has_units: bool,
}

/// Continuity links of one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuityLink {
    pub id: ChunkId,
    pub prev: Option<ChunkId>,
    pub next: Option<ChunkId>,
}

/// Complete exported manager state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub config: WindowConfig,
    pub stats: WindowStats,
    pub chunks: Vec<ChunkRecord>,
    pub chunk_order: Vec<ChunkId>,
    pub active_chunk_ids: Vec<ChunkId>,
    pub continuity_links: Vec<ContinuityLink>,
}

impl SessionSnapshot {
    /// Capture the current state. Chunk records follow insertion order.
    pub(crate) fn capture<T>(
        index: &WindowIndex<T>,
        config: &WindowConfig,
        stats: WindowStats,
    ) -> Self {
        let mut chunks = Vec::with_capacity(index.chunk_count());
        let mut active_chunk_ids = Vec::new();
        let mut continuity_links = Vec::with_capacity(index.chunk_count());

        for chunk in index.iter_in_order() {
            chunks.push(ChunkRecord {
                id: chunk.id,
                position: chunk.position,
                unit_count: chunk.unit_count,
                created_at: chunk.created_at,
                metadata: chunk.metadata.clone(),
                compacted: chunk.is_compacted(),
                has_units: false,
            });
            if chunk.active {
                active_chunk_ids.push(chunk.id);
            }
            continuity_links.push(ContinuityLink {
                id: chunk.id,
                prev: chunk.prev_id,
                next: chunk.next_id,
            });
        }

        Self {
            version: SNAPSHOT_VERSION.to_string(),
            exported_at: Utc::now(),
            config: config.clone(),
            stats,
            chunks,
            chunk_order: index.order().to_vec(),
            active_chunk_ids,
            continuity_links,
        }
    }

    /// Validate the snapshot and rebuild an index from it. Nothing shared is
    /// mutated: on any error the caller keeps its current state.
    ///
    /// Imported chunks come back `Detached` (or `Residual` when compacted)
    /// and are addressable but cannot serve raw content until re-populated.
    pub(crate) fn restore<T>(&self) -> Result<(WindowIndex<T>, WindowConfig)> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            return Err(MemloomError::VersionMismatch(self.version.clone()));
        }
        self.config
            .validate()
            .map_err(|e| MemloomError::CorruptSnapshot(format!("embedded config: {e}")))?;

        let mut chunks: HashMap<ChunkId, Chunk<T>> = HashMap::with_capacity(self.chunks.len());
        for record in &self.chunks {
            let chunk = Chunk {
                id: record.id,
                position: record.position,
                unit_count: record.unit_count,
                payload: if record.compacted {
                    ChunkPayload::Residual
                } else {
                    ChunkPayload::Detached
                },
                created_at: record.created_at,
                metadata: record.metadata.clone(),
                active: false,
                prev_id: None,
                next_id: None,
            };
            if chunks.insert(record.id, chunk).is_some() {
                return Err(MemloomError::CorruptSnapshot(format!(
                    "duplicate chunk record {}",
                    record.id
                )));
            }
        }

        if self.chunk_order.len() != chunks.len()
            || self.chunk_order.iter().collect::<HashSet<_>>().len() != chunks.len()
        {
            return Err(MemloomError::CorruptSnapshot(
                "chunk_order is not a permutation of the chunk records".to_string(),
            ));
        }
        let mut last_position = None;
        for id in &self.chunk_order {
            let chunk = chunks.get(id).ok_or_else(|| {
                MemloomError::CorruptSnapshot(format!("chunk_order references unknown {id}"))
            })?;
            if last_position.is_some_and(|last| chunk.position <= last) {
                return Err(MemloomError::CorruptSnapshot(format!(
                    "positions not strictly increasing at {id}"
                )));
            }
            last_position = Some(chunk.position);
        }

        for link in &self.continuity_links {
            for referenced in [Some(link.id), link.prev, link.next].into_iter().flatten() {
                if !chunks.contains_key(&referenced) {
                    return Err(MemloomError::CorruptSnapshot(format!(
                        "continuity link references unknown {referenced}"
                    )));
                }
            }
            if let Some(chunk) = chunks.get_mut(&link.id) {
                chunk.prev_id = link.prev;
                chunk.next_id = link.next;
            }
        }

        let mut active_units = 0u64;
        for id in &self.active_chunk_ids {
            let chunk = chunks.get_mut(id).ok_or_else(|| {
                MemloomError::CorruptSnapshot(format!("active set references unknown {id}"))
            })?;
            if chunk.is_compacted() {
                return Err(MemloomError::CorruptSnapshot(format!(
                    "{id} is both active and compacted"
                )));
            }
            chunk.active = true;
            active_units += chunk.unit_count;
        }
        if active_units > self.config.active_window_units {
            return Err(MemloomError::CorruptSnapshot(format!(
                "active units ({active_units}) exceed the window budget ({})",
                self.config.active_window_units
            )));
        }

        let total_units: u64 = chunks.values().map(|c| c.unit_count).sum();
        if total_units != self.stats.total_units {
            return Err(MemloomError::CorruptSnapshot(format!(
                "stats disagree with records: total_units {} vs {}",
                self.stats.total_units, total_units
            )));
        }

        let index = WindowIndex::from_restored(chunks, self.chunk_order.clone());
        info!(
            chunks = index.chunk_count(),
            total_units = index.total_units(),
            "restored session snapshot"
        );
        Ok((index, self.config.clone()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MemloomError::CorruptSnapshot(e.to_string()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| MemloomError::CorruptSnapshot(e.to_string()))
    }

    /// Write the snapshot as JSON.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_json()?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read a snapshot previously written with [`SessionSnapshot::save`].
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }
}
