//! End-to-end streaming through an in-process host

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tile_streamer::config::{default_tilesets, CacheConfig};
use tile_streamer::persistence::CompressionType;
use tile_streamer::world::{StorageBackend, WorldSpaceResolver};
use tile_streamer::{
    CellEvent, CellHost, CellKey, CellPos, LocalCellSource, LocalPos, SpaceToken, StreamerConfig, Tile,
    TileSetRegistry, WindowManager, WindowState, WorldPos,
};
use tokio::runtime::Handle;

fn config(width: usize) -> StreamerConfig {
    let mut config = StreamerConfig::default();
    config.world.cell_width = width;
    config.world.cell_height = width;
    config
}

fn memory_host(config: &StreamerConfig, cache: CacheConfig) -> (Arc<CellHost>, Arc<WorldSpaceResolver>) {
    let registry = Arc::new(TileSetRegistry::new(&default_tilesets()).expect("valid tile sets"));
    let resolver =
        Arc::new(WorldSpaceResolver::from_config(config, registry, StorageBackend::Memory).expect("resolver"));
    (CellHost::new(resolver.clone(), cache), resolver)
}

fn file_host(config: &StreamerConfig, dir: &std::path::Path) -> Arc<CellHost> {
    let registry = Arc::new(TileSetRegistry::new(&default_tilesets()).expect("valid tile sets"));
    let backend = StorageBackend::Files {
        save_dir: dir.to_path_buf(),
        compression: CompressionType::Gzip,
    };
    let resolver = Arc::new(WorldSpaceResolver::from_config(config, registry, backend).expect("resolver"));
    CellHost::new(resolver, config.cache)
}

fn overworld(x: i32, y: i32) -> CellKey {
    CellKey::new(SpaceToken::world("Overworld"), CellPos::new(x, y))
}

async fn wait_for_center(window: &WindowManager, center: CellPos) {
    let mut expected: Vec<CellPos> = center.window(1).collect();
    expected.sort();
    for _ in 0..600 {
        if window.state() == WindowState::Idle && window.active_cells() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("window did not settle on {:?}", center);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_window_walk_replaces_one_column_per_step() {
    let config = config(16);
    let (host, _) = memory_host(&config, config.cache);
    let source = Arc::new(LocalCellSource::new(host.clone(), SpaceToken::world("Overworld")));
    let window = WindowManager::new(source, config.world.dims(), 1, Handle::current());

    window.on_position_update(WorldPos::new(8, 8));
    wait_for_center(&window, CellPos::new(0, 0)).await;
    assert_eq!(window.drain_events().len(), 9);

    for step in 1..4 {
        window.on_position_update(WorldPos::new(step * 16 + 8, 8));
        wait_for_center(&window, CellPos::new(step, 0)).await;

        let events = window.drain_events();
        let removed: Vec<CellPos> = events
            .iter()
            .filter(|e| matches!(e, CellEvent::Removed { .. }))
            .map(CellEvent::coords)
            .collect();
        let added: Vec<CellPos> = events
            .iter()
            .filter(|e| matches!(e, CellEvent::Added { .. }))
            .map(CellEvent::coords)
            .collect();
        assert_eq!(removed.len(), 3);
        assert_eq!(added.len(), 3);
        assert!(removed.iter().all(|c| c.x == step - 2));
        assert!(added.iter().all(|c| c.x == step + 1));
    }
    assert_eq!(host.load_count(), 9 + 3 * 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_latest_position_wins() {
    let config = config(16);
    let (host, _) = memory_host(&config, config.cache);
    let source = Arc::new(LocalCellSource::new(host.clone(), SpaceToken::world("Overworld")));
    let window = WindowManager::new(source, config.world.dims(), 1, Handle::current());

    for x in 0..20 {
        window.on_position_update(WorldPos::new(x * 16, 0));
    }
    // Fetches started for intermediate centers may still land, so only the
    // final window is required to be complete
    let target = CellPos::new(19, 0);
    for _ in 0..600 {
        let active = window.active_cells();
        if window.state() == WindowState::Idle && target.window(1).all(|c| active.contains(&c)) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(window.center(), Some(target));
    let active = window.active_cells();
    assert!(target.window(1).all(|c| active.contains(&c)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_load_once() {
    let config = config(16);
    let (host, resolver) = memory_host(&config, config.cache);

    let requests = (0..16).map(|_| {
        let host = host.clone();
        tokio::spawn(async move { host.get_cell(overworld(5, 5)).await })
    });
    let cells: Vec<_> = join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.expect("join").expect("cell"))
        .collect();

    assert!(cells.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(host.load_count(), 1);
    let store = resolver.memory_store("Overworld").expect("store");
    assert_eq!(store.read_count(), 1);
}

#[tokio::test]
async fn test_evicted_edit_survives_reload() {
    let config = config(16);
    let cache = CacheConfig {
        min_resident: 2,
        max_resident: 2,
        per_consumer: 1,
    };
    let (host, resolver) = memory_host(&config, cache);

    let cell = host.get_cell(overworld(3, 3)).await.expect("load");
    cell.write()
        .place(1, LocalPos::new(4, 4), Tile::new(2, 1, 1))
        .expect("place");
    drop(cell);

    host.get_cell(overworld(4, 3)).await.expect("load");
    host.get_cell(overworld(5, 3)).await.expect("load");
    assert!(!host.is_resident(&overworld(3, 3)));
    let store = resolver.memory_store("Overworld").expect("store");
    assert!(store.contains(CellPos::new(3, 3)));

    let reloaded = host.get_cell(overworld(3, 3)).await.expect("reload");
    let reloaded = reloaded.read();
    assert_eq!(reloaded.get_tile(1, LocalPos::new(4, 4)), Some(Tile::new(2, 1, 1)));
    assert!(!reloaded.is_solid(LocalPos::new(4, 4)));
}

#[tokio::test]
async fn test_edits_persist_across_hosts_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(16);

    {
        let host = file_host(&config, dir.path());
        let cell = host.get_cell(overworld(-2, 7)).await.expect("load");
        cell.write()
            .place(2, LocalPos::new(15, 0), Tile::new(2, 0, 0))
            .expect("place");
        assert_eq!(host.flush_all().expect("flush"), 1);
    }
    assert!(dir.path().join("Overworld").join("-2_7.cell").exists());

    let host = file_host(&config, dir.path());
    let cell = host.get_cell(overworld(-2, 7)).await.expect("reload");
    let cell = cell.read();
    assert_eq!(cell.get_tile(2, LocalPos::new(15, 0)), Some(Tile::new(2, 0, 0)));
    assert!(cell.is_solid(LocalPos::new(15, 0)));
    assert!(!cell.is_dirty());
}

#[tokio::test]
async fn test_unknown_space_is_rejected() {
    let config = config(16);
    let (host, _) = memory_host(&config, config.cache);
    let result = host
        .get_cell(CellKey::new(SpaceToken::world("../escape"), CellPos::new(0, 0)))
        .await;
    assert!(result.is_err());
    assert_eq!(host.resident_count(), 0);
}
