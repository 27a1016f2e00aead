//! Integration tests for the sliding-window memory manager

use std::sync::Arc;

use memloom::{ChunkMetadata, MemloomError, SessionSnapshot, WindowConfig, WindowManager};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn units(n: u64) -> Vec<u32> {
    (0..n as u32).collect()
}

/// Chunk geometry: 100 units at size 40 / overlap 10 produce spans
/// [0,40), [30,70), [60,100).
#[tokio::test]
async fn splits_stream_into_overlapping_chunks() {
    init_tracing();
    let config = WindowConfig::new()
        .with_chunk_unit_size(40)
        .with_overlap_unit_size(10);
    let manager = WindowManager::new(config).unwrap();

    let ids = manager
        .add_units(&units(100), ChunkMetadata::default())
        .await
        .unwrap();
    assert_eq!(ids.len(), 3);

    let mut spans = Vec::new();
    for id in &ids {
        let chunk = manager.get_chunk(*id).await.unwrap();
        spans.push((chunk.position, chunk.end_position()));
    }
    assert_eq!(spans, vec![(0, 40), (30, 70), (60, 100)]);
}

/// A second ingest that overflows the 50-unit budget deactivates the oldest
/// chunk(s) and keeps `active_units` under the budget.
#[tokio::test]
async fn overflowing_ingest_deactivates_oldest_chunks() {
    init_tracing();
    let config = WindowConfig::new()
        .with_active_window_units(50)
        .with_chunk_unit_size(30)
        .with_overlap_unit_size(0);
    let manager = WindowManager::new(config).unwrap();

    let first = manager
        .add_units(&units(30), ChunkMetadata::default())
        .await
        .unwrap();
    manager
        .add_units(&units(30), ChunkMetadata::default())
        .await
        .unwrap();

    let stats = manager.get_statistics().await;
    assert!(stats.active_units <= 50);
    // At least the 10-unit overflow was freed; here the whole oldest chunk
    assert!(!manager.get_chunk(first[0]).await.unwrap().active);
    // Deactivation never deletes
    assert_eq!(stats.total_units, 60);
}

/// Crossing 90% utilization of `max_total_units` triggers a collection that
/// removes about a fifth of the population from the inactive pool.
#[tokio::test]
async fn high_utilization_triggers_collection() {
    init_tracing();
    let config = WindowConfig::new()
        .with_max_total_units(100)
        .with_active_window_units(50)
        .with_chunk_unit_size(10)
        .with_overlap_unit_size(0)
        .with_gc_utilization_threshold(0.9);
    let manager = WindowManager::new(config).unwrap();

    manager
        .add_units(&units(50), ChunkMetadata::default())
        .await
        .unwrap();
    // 95 total units: the ingest itself runs the opportunistic pass
    manager
        .add_units(&units(45), ChunkMetadata::default())
        .await
        .unwrap();

    let stats = manager.get_statistics().await;
    assert!(stats.gc_run_count >= 1);
    assert!(stats.total_units < 95);
    // Only inactive chunks were collectable
    assert!(stats.active_units <= 50);
}

/// Importing an unsupported snapshot version fails and leaves the manager
/// untouched.
#[tokio::test]
async fn version_mismatch_rejects_import() {
    init_tracing();
    let manager = WindowManager::new(WindowConfig::default()).unwrap();
    manager
        .add_units(&units(100), ChunkMetadata::default())
        .await
        .unwrap();
    let before = manager.get_statistics().await;

    let mut snapshot = manager.export().await;
    snapshot.version = "9.9".to_string();
    assert!(matches!(
        manager.import(&snapshot).await,
        Err(MemloomError::VersionMismatch(v)) if v == "9.9"
    ));
    assert_eq!(manager.get_statistics().await, before);
}

/// A high-priority chunk survives eviction pressure even as the oldest
/// active chunk.
#[tokio::test]
async fn high_priority_chunk_survives_eviction() {
    init_tracing();
    let config = WindowConfig::new()
        .with_active_window_units(50)
        .with_chunk_unit_size(20)
        .with_overlap_unit_size(0)
        .with_high_priority_threshold(0.8);
    let manager = WindowManager::new(config).unwrap();

    let protected = manager
        .add_units(&units(20), ChunkMetadata::with_priority(0.9))
        .await
        .unwrap();
    manager
        .add_units(&units(20), ChunkMetadata::default())
        .await
        .unwrap();
    manager
        .add_units(&units(20), ChunkMetadata::default())
        .await
        .unwrap();

    assert!(manager.get_chunk(protected[0]).await.unwrap().active);
    assert!(manager.get_statistics().await.active_units <= 50);
}

/// Conservation: `total_units` always equals the sum of chunk unit counts,
/// through ingests, eviction, and collection.
#[tokio::test]
async fn total_units_match_chunk_records() {
    init_tracing();
    let config = WindowConfig::new()
        .with_max_total_units(10_000)
        .with_active_window_units(300)
        .with_chunk_unit_size(40)
        .with_overlap_unit_size(10);
    let manager = WindowManager::new(config).unwrap();

    // Deterministic pseudo-random batch sizes
    let mut seed: u64 = 0x2545_f491;
    for _ in 0..20 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let n = 1 + (seed >> 33) % 120;
        manager
            .add_units_forced(&units(n), ChunkMetadata::default())
            .await
            .unwrap();
        if seed % 5 == 0 {
            manager.run_gc().await;
        }

        let stats = manager.get_statistics().await;
        let snapshot = manager.export().await;
        let recorded: u64 = snapshot.chunks.iter().map(|c| c.unit_count).sum();
        assert_eq!(stats.total_units, recorded);
        assert!(stats.active_units <= 300);
    }
}

/// Collection safety: no active chunk ever disappears, whatever the mix of
/// active, inactive, protected, and compacted chunks.
#[tokio::test]
async fn collection_never_removes_active_chunks() {
    init_tracing();
    let config = WindowConfig::new()
        .with_max_total_units(10_000)
        .with_active_window_units(200)
        .with_chunk_unit_size(25)
        .with_overlap_unit_size(5)
        .with_gc_removal_fraction(0.5);
    // Constant pressure so evictions also compact
    let manager = WindowManager::with_sizing(config, Arc::new(|_, _| 1.0)).unwrap();

    let mut seed: u64 = 0x9e37_79b9;
    let mut saw_compacted = false;
    for round in 0..10 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let n = 10 + (seed >> 33) % 80;
        let priority = (seed % 100) as f64 / 100.0;
        manager
            .add_units_forced(&units(n), ChunkMetadata::with_priority(priority))
            .await
            .unwrap();

        // Compaction precondition: compacted chunks are never active
        let snapshot = manager.export().await;
        for record in &snapshot.chunks {
            if record.compacted {
                saw_compacted = true;
                assert!(!snapshot.active_chunk_ids.contains(&record.id));
            }
        }

        let active_before = snapshot.active_chunk_ids;
        let report = manager.run_gc().await;
        for id in &active_before {
            assert!(
                manager.get_chunk(*id).await.is_ok(),
                "round {round}: active chunk {id} vanished"
            );
            assert!(!report.removed.contains(id));
        }
    }
    assert!(saw_compacted, "pressure evictions should have compacted chunks");
}

/// Range queries return every chunk whose span intersects the window,
/// including a straddling predecessor.
#[tokio::test]
async fn range_query_covers_overlapping_spans() {
    init_tracing();
    let config = WindowConfig::new()
        .with_chunk_unit_size(40)
        .with_overlap_unit_size(10);
    let manager = WindowManager::new(config).unwrap();

    let ids = manager
        .add_units(&units(100), ChunkMetadata::default())
        .await
        .unwrap();

    let hits = manager.get_chunks_by_range(45, 65).await;
    let got: Vec<_> = hits.iter().map(|c| c.id).collect();
    assert_eq!(got, vec![ids[1], ids[2]]);

    assert!(manager.get_chunks_by_range(100, 200).await.is_empty());

    // Collected chunks drop out of the position index
    manager.remove_chunk(ids[1]).await.unwrap();
    let got: Vec<_> = manager
        .get_chunks_by_range(0, 100)
        .await
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(got, vec![ids[0], ids[2]]);
}

/// Continuity: a chunk with both neighbors resolves to [prev, chunk, next],
/// and keeps resolving after a neighbor is removed.
#[tokio::test]
async fn continuity_returns_neighbors_in_stream_order() {
    init_tracing();
    let config = WindowConfig::new()
        .with_chunk_unit_size(40)
        .with_overlap_unit_size(10);
    let manager = WindowManager::new(config).unwrap();

    let ids = manager
        .add_units(&units(100), ChunkMetadata::default())
        .await
        .unwrap();
    let chain = manager.get_with_continuity(ids[1], 1, 1).await.unwrap();
    let got: Vec<_> = chain.iter().map(|c| c.id).collect();
    assert_eq!(got, vec![ids[0], ids[1], ids[2]]);

    // Removing a neighbor shortens the chain instead of failing
    manager.remove_chunk(ids[2]).await.unwrap();
    let chain = manager.get_with_continuity(ids[1], 1, 1).await.unwrap();
    assert_eq!(chain.len(), 2);

    // Only a missing anchor is an error
    assert!(matches!(
        manager.get_with_continuity(ids[2], 1, 1).await,
        Err(MemloomError::ChunkNotFound(_))
    ));
}

/// Structural idempotence: importing an export reproduces chunk order,
/// continuity links, and statistics (minus the documented counter reset).
#[tokio::test]
async fn import_of_export_is_structurally_idempotent() {
    init_tracing();
    let config = WindowConfig::new()
        .with_active_window_units(120)
        .with_chunk_unit_size(40)
        .with_overlap_unit_size(10);
    let manager = WindowManager::new(config.clone()).unwrap();
    manager
        .add_units(&units(100), ChunkMetadata::with_priority(0.7))
        .await
        .unwrap();
    manager
        .add_units(&units(100), ChunkMetadata::default())
        .await
        .unwrap();
    manager.run_gc().await;

    let exported = manager.export().await;
    let other: WindowManager<u32> = WindowManager::new(config).unwrap();
    other.import(&exported).await.unwrap();
    let reexported = other.export().await;

    assert_eq!(reexported.chunk_order, exported.chunk_order);
    assert_eq!(reexported.continuity_links, exported.continuity_links);
    assert_eq!(reexported.chunks, exported.chunks);
    let mut stats = reexported.stats.clone();
    stats.gc_run_count = exported.stats.gc_run_count;
    assert_eq!(stats, exported.stats);
}

/// Snapshots survive a trip through the filesystem.
#[tokio::test]
async fn snapshot_file_round_trip() {
    init_tracing();
    let manager = WindowManager::new(WindowConfig::default()).unwrap();
    manager
        .add_units(&units(500), ChunkMetadata::default())
        .await
        .unwrap();

    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("session.json");
    let snapshot = manager.export().await;
    snapshot.save(&path).await.unwrap();

    let loaded = SessionSnapshot::load(&path).await.unwrap();
    assert_eq!(loaded.chunk_order, snapshot.chunk_order);
    assert_eq!(loaded.chunks, snapshot.chunks);

    let other: WindowManager<u32> = WindowManager::new(WindowConfig::default()).unwrap();
    other.import(&loaded).await.unwrap();
    assert_eq!(
        other.get_statistics().await.total_units,
        snapshot.stats.total_units
    );
}

/// Construction rejects impossible knob combinations.
#[tokio::test]
async fn invalid_configuration_is_rejected_at_construction() {
    init_tracing();
    let overlap_too_large = WindowConfig::new()
        .with_chunk_unit_size(100)
        .with_overlap_unit_size(200);
    assert!(matches!(
        WindowManager::<u32>::new(overlap_too_large),
        Err(MemloomError::InvalidConfiguration(_))
    ));

    let window_above_total = WindowConfig::new()
        .with_max_total_units(100)
        .with_active_window_units(500);
    assert!(matches!(
        WindowManager::<u32>::new(window_above_total),
        Err(MemloomError::InvalidConfiguration(_))
    ));
}
