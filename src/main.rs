//! Walks a consumer window across a world stored on disk and logs what
//! streams in and out.
//!
//! Usage: tile-streamer [config.toml]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tile_streamer::config::GROUND_TILESET;
use tile_streamer::world::{StorageBackend, WorldSpaceResolver};
use tile_streamer::{
    CellEvent, CellHost, LocalCellSource, LocalPos, SpaceToken, StreamerConfig, Tile, TileSetRegistry, WindowManager,
    WorldPos,
};

fn load_config() -> Result<StreamerConfig> {
    match std::env::args().nth(1) {
        Some(path) => StreamerConfig::load(&path).with_context(|| format!("loading config from {}", path)),
        None => Ok(StreamerConfig::default()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info,tile_streamer=debug")).init();

    let config = load_config()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building runtime")?;

    let registry = Arc::new(TileSetRegistry::new(&config.tilesets)?);
    let backend = StorageBackend::Files {
        save_dir: config.storage.save_dir.clone(),
        compression: config.storage.compression,
    };
    let resolver = Arc::new(WorldSpaceResolver::from_config(&config, registry.clone(), backend)?);
    let host = CellHost::new(resolver, config.cache);
    let space = SpaceToken::world(config.world.space_name.clone());
    let dims = config.world.dims();

    let source = Arc::new(LocalCellSource::new(host.clone(), space.clone()));
    let mut window = WindowManager::new(source, dims, config.world.window_radius, runtime.handle().clone());

    // Walk three cells east, one step per cell
    for step in 0..4 {
        let position = WorldPos::new(step * dims.width as i32 + 1, 1);
        window.on_position_update(position);
        std::thread::sleep(Duration::from_millis(200));

        for event in window.drain_events() {
            match event {
                CellEvent::Added { coords, cell } => {
                    let cell = cell.read();
                    log::info!(
                        "[main] + ({}, {}) with {} tile sets leased",
                        coords.x,
                        coords.y,
                        cell.ticket_count()
                    );
                }
                CellEvent::Removed { coords } => log::info!("[main] - ({}, {})", coords.x, coords.y),
            }
        }

        let standing = [position];
        log::info!(
            "[main] step {}: {} active cells, position valid: {}",
            step,
            window.active_cells().len(),
            window.position_valid(&standing)
        );
    }

    // Leave a mark in the current center cell so the walk persists something
    if let Some(center) = window.center() {
        if let Some(cell) = window.cell(center) {
            let forest = registry.tile_set_code(GROUND_TILESET).context("ground tile set is registered")?;
            cell.write().place(1, LocalPos::new(2, 2), Tile::new(forest, 1, 1))?;
        }
    }

    window.shutdown();
    let written = host.flush_all()?;
    log::info!(
        "[main] done: {} cells loaded, {} written on shutdown",
        host.load_count(),
        written
    );
    Ok(())
}
