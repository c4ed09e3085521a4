//! Window of active cells around a moving position
//!
//! Position updates only record the latest requested center and wake a
//! dedicated worker thread, so reporting never blocks on loading. The worker
//! drops cells that left the window and starts fetches for cells that
//! entered it; each fetch publishes an `Added` event when it completes.
//!
//! Fetches are not cancelled. A fetch that completes after the window has
//! moved on still adds its cell, which can leave a cell outside the window
//! in the active set until the next recenter removes it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;

use crate::streaming::CellSource;
use crate::world::{CellDims, CellPos, SharedCell, WorldPos};

/// View update for the downstream consumer
#[derive(Debug, Clone)]
pub enum CellEvent {
    Added { coords: CellPos, cell: SharedCell },
    Removed { coords: CellPos },
}

impl CellEvent {
    pub fn coords(&self) -> CellPos {
        match self {
            CellEvent::Added { coords, .. } | CellEvent::Removed { coords } => *coords,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Idle,
    Recentering,
}

const IDLE: u8 = 0;
const RECENTERING: u8 = 1;

#[derive(Debug, Default)]
struct Signal {
    latest: Option<CellPos>,
    shutdown: bool,
}

struct WindowShared {
    source: Arc<dyn CellSource>,
    dims: CellDims,
    radius: i32,
    runtime: Handle,
    signal: Mutex<Signal>,
    wake: Condvar,
    state: AtomicU8,
    center: Mutex<Option<CellPos>>,
    active: DashMap<CellPos, SharedCell>,
    fetching: Mutex<HashSet<CellPos>>,
    events: Sender<CellEvent>,
}

pub struct WindowManager {
    shared: Arc<WindowShared>,
    events: Receiver<CellEvent>,
    worker: Option<JoinHandle<()>>,
}

impl WindowManager {
    /// Start a window of `(2 * radius + 1)^2` cells. Fetches run on `runtime`.
    pub fn new(source: Arc<dyn CellSource>, dims: CellDims, radius: i32, runtime: Handle) -> Self {
        let (sender, events) = unbounded();
        let shared = Arc::new(WindowShared {
            source,
            dims,
            radius: radius.max(1),
            runtime,
            signal: Mutex::new(Signal::default()),
            wake: Condvar::new(),
            state: AtomicU8::new(IDLE),
            center: Mutex::new(None),
            active: DashMap::new(),
            fetching: Mutex::new(HashSet::new()),
            events: sender,
        });

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("window-manager".to_string())
            .spawn(move || worker_shared.run())
            .map_err(|e| log::error!("[window_manager::new] failed to start worker: {}", e))
            .ok();

        Self { shared, events, worker }
    }

    /// Record a new reference position. Only the latest position before the
    /// worker wakes is applied.
    pub fn on_position_update(&self, position: WorldPos) {
        let center = position.to_cell_pos(self.shared.dims);
        let mut signal = self.shared.signal.lock();
        if *self.shared.center.lock() != Some(center) {
            self.shared.state.store(RECENTERING, Ordering::SeqCst);
        }
        signal.latest = Some(center);
        self.shared.wake.notify_one();
    }

    pub fn state(&self) -> WindowState {
        match self.shared.state.load(Ordering::SeqCst) {
            RECENTERING => WindowState::Recentering,
            _ => WindowState::Idle,
        }
    }

    /// Center of the last applied window
    pub fn center(&self) -> Option<CellPos> {
        *self.shared.center.lock()
    }

    /// Coordinates currently in the active set
    pub fn active_cells(&self) -> Vec<CellPos> {
        let mut cells: Vec<CellPos> = self.shared.active.iter().map(|entry| *entry.key()).collect();
        cells.sort();
        cells
    }

    pub fn cell(&self, coords: CellPos) -> Option<SharedCell> {
        self.shared.active.get(&coords).map(|entry| entry.value().clone())
    }

    /// True when no world position is solid. Positions in cells that are not
    /// active are not checked.
    pub fn position_valid(&self, positions: &[WorldPos]) -> bool {
        positions.iter().all(|position| {
            let (coords, local) = position.to_cell_coords(self.shared.dims);
            match self.shared.active.get(&coords) {
                Some(cell) => !cell.read().is_solid(local),
                None => true,
            }
        })
    }

    /// Event queue for the single downstream consumer
    pub fn events(&self) -> &Receiver<CellEvent> {
        &self.events
    }

    pub fn drain_events(&self) -> Vec<CellEvent> {
        self.events.try_iter().collect()
    }

    /// Stop the worker and hand every active cell back to the source
    pub fn shutdown(&mut self) {
        self.stop_worker();
        // Fetches completing from here on see the shutdown flag and release their own cell
        let drained: Vec<(CellPos, SharedCell)> = {
            let _fetching = self.shared.fetching.lock();
            let coords: Vec<CellPos> = self.shared.active.iter().map(|entry| *entry.key()).collect();
            coords.into_iter().filter_map(|coords| self.shared.active.remove(&coords)).collect()
        };
        for (coords, cell) in drained {
            self.shared.source.release(coords, &cell);
        }
        log::info!("[window_manager::shutdown] window released");
    }

    fn stop_worker(&mut self) {
        self.shared.signal.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("[window_manager::stop_worker] worker panicked");
            }
        }
    }
}

impl Drop for WindowManager {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

impl WindowShared {
    fn run(self: Arc<Self>) {
        loop {
            let target = {
                let mut signal = self.signal.lock();
                while signal.latest.is_none() && !signal.shutdown {
                    self.wake.wait(&mut signal);
                }
                if signal.shutdown {
                    break;
                }
                signal.latest.take()
            };

            if let Some(center) = target {
                self.recenter(center);
            }

            let signal = self.signal.lock();
            if signal.latest.is_none() {
                self.state.store(IDLE, Ordering::SeqCst);
            }
        }
        log::debug!("[window_manager::run] worker stopped");
    }

    fn recenter(self: &Arc<Self>, center: CellPos) {
        {
            let mut applied = self.center.lock();
            if *applied == Some(center) {
                return;
            }
            *applied = Some(center);
        }

        let leaving: Vec<CellPos> = self
            .active
            .iter()
            .map(|entry| *entry.key())
            .filter(|coords| coords.chebyshev_distance(center) > self.radius)
            .collect();
        for coords in &leaving {
            if let Some((coords, cell)) = self.active.remove(coords) {
                self.source.release(coords, &cell);
                let _ = self.events.send(CellEvent::Removed { coords });
            }
        }

        let missing: Vec<CellPos> = {
            let mut fetching = self.fetching.lock();
            center
                .window(self.radius)
                .filter(|coords| !self.active.contains_key(coords) && fetching.insert(*coords))
                .collect()
        };
        let started = missing.len();
        for coords in missing {
            self.spawn_fetch(coords);
        }

        log::info!(
            "[window_manager::recenter] centered on ({}, {}): {} removed, {} fetching",
            center.x,
            center.y,
            leaving.len(),
            started
        );
    }

    fn spawn_fetch(self: &Arc<Self>, coords: CellPos) {
        let shared = self.clone();
        let fetch = self.source.get_cell(coords);
        self.runtime.spawn(async move {
            let result = fetch.await;
            match result {
                Ok(cell) => {
                    // Leaving `fetching` and entering `active` is one step under the fetching lock
                    let late = {
                        let mut fetching = shared.fetching.lock();
                        fetching.remove(&coords);
                        if shared.signal.lock().shutdown {
                            true
                        } else {
                            // Event first, so a consumer that sees the cell active has its event queued
                            let _ = shared.events.send(CellEvent::Added { coords, cell: cell.clone() });
                            shared.active.insert(coords, cell.clone());
                            false
                        }
                    };
                    if late {
                        shared.source.release(coords, &cell);
                        return;
                    }
                    log::debug!("[window_manager::fetch] cell ({}, {}) active", coords.x, coords.y);
                }
                Err(e) => {
                    shared.fetching.lock().remove(&coords);
                    log::error!("[window_manager::fetch] cell ({}, {}) failed: {}", coords.x, coords.y, e);
                }
            }
        });
    }
}
