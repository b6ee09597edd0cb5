//! Tile service tests against the synthetic decoder.
//!
//! Tests verify:
//! - The concrete DZI scenarios (descriptor, grid bounds, tiny pyramids)
//! - Error kinds for missing slides, bad formats and bad levels
//! - Single download and single render under concurrent requests
//! - Tile cache round-trips that never touch the decoder
//! - Randomised grid, memory and idempotence properties

use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use dzi_tiler::tile::{DziInfo, TileCacheKey, TileFormat, TileLayout, TileRequest};
use dzi_tiler::TileError;

use super::test_utils::{
    image_dimensions, is_valid_jpeg, is_valid_png, test_env, test_env_with_decoder,
    wait_for_tile, DecoderStats, MemoryStore, SyntheticDecoder,
};

fn request(path: &str, level: u32, col: u32, row: u32, format: &str) -> TileRequest {
    TileRequest::new(path, level, col, row, format)
}

// =============================================================================
// Concrete Scenarios
// =============================================================================

#[tokio::test]
async fn test_scenario_grid_bounds() {
    let store = MemoryStore::new().with_synthetic("slides/a.svs", 1000, 600, 1);
    let env = test_env(store, TileLayout::new(510, 1, true));

    let dzi = env.service.get_dzi("slides/a.svs").await.unwrap();
    assert_eq!(dzi.info.levels, 10);

    let tile = env
        .service
        .get_tile(request("slides/a.svs", 9, 0, 0, "jpeg"))
        .await
        .unwrap();
    assert!(is_valid_jpeg(&tile.data));
    assert_eq!(tile.format, TileFormat::Jpeg);

    let result = env
        .service
        .get_tile(request("slides/a.svs", 9, 2, 2, "jpeg"))
        .await;
    match result {
        Err(TileError::OutOfBounds { level, col, row, .. }) => {
            assert_eq!((level, col, row), (9, 2, 2));
        }
        other => panic!("Expected OutOfBounds, got {:?}", other.map(|r| r.data.len())),
    }
}

#[tokio::test]
async fn test_scenario_descriptor() {
    let store = MemoryStore::new().with_synthetic("slides/a.svs", 1000, 600, 1);
    let env = test_env(store, TileLayout::new(510, 1, true));

    let dzi = env.service.get_dzi("slides/a.svs").await.unwrap();
    assert!(dzi.xml.contains("TileSize=\"510\""));
    assert!(dzi.xml.contains("Overlap=\"1\""));
    assert!(dzi.xml.contains("Width=\"1000\""));
    assert!(dzi.xml.contains("Height=\"600\""));
}

#[tokio::test]
async fn test_scenario_single_tile_pyramid() {
    let store = MemoryStore::new().with_synthetic("small.png", 256, 256, 1);
    let env = test_env(store, TileLayout::new(256, 0, true));

    let dzi = env.service.get_dzi("small.png").await.unwrap();
    assert_eq!(dzi.info.levels, 9);

    let smallest = env
        .service
        .get_tile(request("small.png", 0, 0, 0, "png"))
        .await
        .unwrap();
    assert!(is_valid_png(&smallest.data));
    assert_eq!(image_dimensions(&smallest.data), (1, 1));

    let full = env
        .service
        .get_tile(request("small.png", 8, 0, 0, "png"))
        .await
        .unwrap();
    assert_eq!(image_dimensions(&full.data), (256, 256));
}

#[tokio::test]
async fn test_scenario_missing_slide() {
    let env = test_env(MemoryStore::new(), TileLayout::default());

    match env.service.get_dzi("slides/missing.svs").await {
        Err(TileError::NotFound { path }) => assert!(path.contains("slides/missing.svs")),
        other => panic!("Expected NotFound, got {:?}", other),
    }

    let result = env
        .service
        .get_tile(request("slides/missing.svs", 0, 0, 0, "jpeg"))
        .await;
    assert!(matches!(result, Err(TileError::NotFound { .. })));
}

#[tokio::test]
async fn test_scenario_unsupported_format() {
    let store = MemoryStore::new().with_synthetic("slides/a.svs", 1000, 600, 1);
    let env = test_env(store, TileLayout::default());

    let result = env
        .service
        .get_tile(request("slides/a.svs", 9, 0, 0, "bmp"))
        .await;
    assert!(matches!(result, Err(TileError::BadRequest(_))));

    // Rejected before the slide is fetched
    assert_eq!(env.store.stream_calls("slides/a.svs").await, 0);
}

#[tokio::test]
async fn test_scenario_concurrent_requests_fetch_once() {
    let stats = Arc::new(DecoderStats::default());
    let decoder = SyntheticDecoder::new(stats.clone()).with_read_delay(Duration::from_millis(50));
    let store = MemoryStore::new().with_synthetic("slides/a.svs", 1000, 600, 1);
    let env = test_env_with_decoder(store, TileLayout::default(), decoder, stats);

    let (first, second) = tokio::join!(
        env.service.get_tile(request("slides/a.svs", 9, 1, 1, "jpeg")),
        env.service.get_tile(request("slides/a.svs", 9, 1, 1, "jpeg")),
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.data, second.data);
    assert_eq!(env.store.stream_calls("slides/a.svs").await, 1);
    assert_eq!(env.stats.opens(), 1);
    assert_eq!(env.stats.reads(), 1);
}

#[tokio::test]
async fn test_concurrent_tiles_of_one_slide_share_download() {
    let store = MemoryStore::new().with_synthetic("slides/a.svs", 1000, 600, 1);
    let env = Arc::new(test_env(store, TileLayout::new(254, 1, true)));

    let mut tasks = Vec::new();
    for col in 0..4 {
        for row in 0..3 {
            let env = env.clone();
            tasks.push(tokio::spawn(async move {
                env.service
                    .get_tile(request("slides/a.svs", 9, col, row, "jpeg"))
                    .await
                    .map(|r| r.data.len())
            }));
        }
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap() > 0);
    }

    assert_eq!(env.store.stream_calls("slides/a.svs").await, 1);
    assert_eq!(env.stats.opens(), 1);
}

// =============================================================================
// Tile Cache
// =============================================================================

#[tokio::test]
async fn test_tile_cache_round_trip_skips_decoder() {
    let store = MemoryStore::new().with_synthetic("slides/a.svs", 1000, 600, 3);
    let env = test_env(store, TileLayout::default());

    let first = env
        .service
        .get_tile(request("slides/a.svs", 8, 0, 0, "png"))
        .await
        .unwrap();
    assert!(!first.cache_hit);

    let key = TileCacheKey::new("slides/a.svs", 8, 0, 0, TileFormat::Png);
    wait_for_tile(env.service.tile_cache(), &key).await;

    assert!(env.service.release_handle("slides/a.svs").await);
    let reads = env.stats.reads();
    let opens = env.stats.opens();

    let second = env
        .service
        .get_tile(request("slides/a.svs", 8, 0, 0, "png"))
        .await
        .unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.data, first.data);
    assert_eq!(env.stats.reads(), reads);
    assert_eq!(env.stats.opens(), opens);
}

#[tokio::test]
async fn test_formats_are_cached_separately() {
    let store = MemoryStore::new().with_synthetic("slides/a.svs", 1000, 600, 1);
    let env = test_env(store, TileLayout::default());

    let jpeg = env
        .service
        .get_tile(request("slides/a.svs", 5, 0, 0, "jpg"))
        .await
        .unwrap();
    wait_for_tile(
        env.service.tile_cache(),
        &TileCacheKey::new("slides/a.svs", 5, 0, 0, TileFormat::Jpeg),
    )
    .await;

    let png = env
        .service
        .get_tile(request("slides/a.svs", 5, 0, 0, "png"))
        .await
        .unwrap();

    assert!(is_valid_jpeg(&jpeg.data));
    assert!(is_valid_png(&png.data));
    assert!(!png.cache_hit);

    // "jpg" and "jpeg" name the same cached tile
    let again = env
        .service
        .get_tile(request("slides/a.svs", 5, 0, 0, "JPEG"))
        .await
        .unwrap();
    assert!(again.cache_hit);
    assert_eq!(again.data, jpeg.data);
}

#[tokio::test]
async fn test_leading_slash_names_same_object() {
    let store = MemoryStore::new().with_synthetic("slides/a.svs", 1000, 600, 1);
    let env = test_env(store, TileLayout::default());

    let plain = env.service.get_dzi("slides/a.svs").await.unwrap();
    let slashed = env.service.get_dzi("/slides/a.svs").await.unwrap();
    assert_eq!(plain.xml, slashed.xml);
}

// =============================================================================
// Internal Levels
// =============================================================================

#[tokio::test]
async fn test_low_levels_read_from_reduced_level() {
    let store = MemoryStore::new().with_synthetic("slides/big.svs", 40000, 30000, 4);
    let env = test_env(store, TileLayout::default());
    let layout = TileLayout::default();
    let cap = (2 * layout.padded_size() as usize).pow(2) * 4;

    let dzi = env.service.get_dzi("slides/big.svs").await.unwrap();
    assert_eq!(dzi.info.levels, 16);

    for level in [0, 4, 8, 12] {
        let tile = env
            .service
            .get_tile(request("slides/big.svs", level, 0, 0, "jpeg"))
            .await
            .unwrap();
        assert!(is_valid_jpeg(&tile.data));
    }
    assert!(env.stats.max_region_bytes() <= cap);
}

#[tokio::test]
async fn test_level_outside_pyramid_is_bad_request() {
    let store = MemoryStore::new().with_synthetic("slides/a.svs", 1000, 600, 1);
    let env = test_env(store, TileLayout::default());

    let result = env
        .service
        .get_tile(request("slides/a.svs", 10, 0, 0, "jpeg"))
        .await;
    assert!(matches!(result, Err(TileError::BadRequest(_))));
}

#[tokio::test]
async fn test_empty_path_is_bad_request() {
    let env = test_env(MemoryStore::new(), TileLayout::default());
    assert!(matches!(
        env.service.get_dzi("/").await,
        Err(TileError::BadRequest(_))
    ));
}

#[tokio::test]
async fn test_unreadable_slide_is_decoder_error() {
    let store = MemoryStore::new().with_object("slides/broken.svs", "not a slide");
    let env = test_env(store, TileLayout::default());

    assert!(matches!(
        env.service.get_dzi("slides/broken.svs").await,
        Err(TileError::Decoder(_))
    ));
}

// =============================================================================
// Randomised Properties
// =============================================================================

#[tokio::test]
async fn test_random_grids_and_memory_cap() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    for case in 0..12 {
        let tile_size = rng.random_range(16..96u32);
        let overlap = rng.random_range(0..4u32);
        let width = rng.random_range(1..400u64);
        let height = rng.random_range(1..400u64);
        let levels = rng.random_range(1..4u32);
        let layout = TileLayout::new(tile_size, overlap, true);

        let store = MemoryStore::new().with_synthetic("slide", width, height, levels);
        let env = test_env(store, layout);

        let dzi = env.service.get_dzi("slide").await.unwrap();
        let info = DziInfo {
            width,
            height,
            tile_size,
            overlap,
            levels: dzi.info.levels,
        };
        assert_eq!(dzi.info, info, "case {}", case);

        let level = rng.random_range(0..dzi.info.levels);
        let (cols, rows) = dzi.info.tile_grid(level);
        for col in 0..cols as u32 {
            for row in 0..rows as u32 {
                let tile = env
                    .service
                    .get_tile(request("slide", level, col, row, "png"))
                    .await
                    .unwrap();
                let (w, h) = image_dimensions(&tile.data);
                assert!(w >= 1 && h >= 1);
                assert!(w as u64 <= layout.padded_size() && h as u64 <= layout.padded_size());
            }
        }

        for (col, row) in [(cols as u32, 0), (0, rows as u32)] {
            let result = env
                .service
                .get_tile(request("slide", level, col, row, "png"))
                .await;
            assert!(
                matches!(result, Err(TileError::OutOfBounds { .. })),
                "case {}: ({}, {}) at level {} should be out of bounds",
                case,
                col,
                row,
                level
            );
        }

        let cap = (2 * layout.padded_size() as usize).pow(2) * 4;
        assert!(env.stats.max_region_bytes() <= cap, "case {}", case);
    }
}

#[tokio::test]
async fn test_dzi_is_idempotent() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let width = rng.random_range(1..100_000u64);
    let height = rng.random_range(1..100_000u64);

    let store = MemoryStore::new().with_synthetic("slide", width, height, 3);
    let env = test_env(store, TileLayout::default());

    let first = env.service.get_dzi("slide").await.unwrap();
    for _ in 0..5 {
        assert_eq!(env.service.get_dzi("slide").await.unwrap().xml, first.xml);
    }
    assert_eq!(env.stats.opens(), 1);
}
