use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::CacheConfig;
use crate::error::{EngineError, EngineResult};
use crate::world::{CellPos, SharedCell, Space, SpaceResolver, SpaceToken};

/// Correlation key for cells in the cache and on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub space: SpaceToken,
    pub coords: CellPos,
}

impl CellKey {
    pub fn new(space: SpaceToken, coords: CellPos) -> Self {
        Self { space, coords }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@({}, {})", self.space, self.coords.x, self.coords.y)
    }
}

/// A connected consumer of cells (a local window or a remote peer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer#{}", self.0)
    }
}

type CellFetch = Shared<BoxFuture<'static, EngineResult<SharedCell>>>;

/// Bounded cache of resident cells with load-on-miss.
///
/// Residency is FIFO by load order. The target capacity follows the number of
/// connected consumers, clamped to the configured bounds. Dirty cells are
/// written back before they are evicted.
pub struct CellHost {
    resolver: Arc<dyn SpaceResolver>,
    cache: CacheConfig,
    resident: DashMap<CellKey, SharedCell>,
    in_flight: DashMap<CellKey, CellFetch>,
    residency: Mutex<VecDeque<CellKey>>,
    spaces: Mutex<FxHashMap<SpaceToken, Arc<dyn Space>>>,
    consumers: Mutex<FxHashSet<ConsumerId>>,
    capacity: AtomicUsize,
    next_consumer: AtomicU64,
    loads: AtomicUsize,
}

impl CellHost {
    pub fn new(resolver: Arc<dyn SpaceResolver>, cache: CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            resolver,
            cache,
            resident: DashMap::new(),
            in_flight: DashMap::new(),
            residency: Mutex::new(VecDeque::new()),
            spaces: Mutex::new(FxHashMap::default()),
            consumers: Mutex::new(FxHashSet::default()),
            capacity: AtomicUsize::new(cache.capacity_for(0)),
            next_consumer: AtomicU64::new(1),
            loads: AtomicUsize::new(0),
        })
    }

    /// Resident cell for `key`, loading it on a miss. Concurrent misses for
    /// the same key share a single load.
    pub async fn get_cell(self: &Arc<Self>, key: CellKey) -> EngineResult<SharedCell> {
        if let Some(cell) = self.resident.get(&key) {
            return Ok(cell.value().clone());
        }

        let fetch = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                // A load may have been admitted between the miss above and taking the entry
                if let Some(cell) = self.resident.get(&key) {
                    return Ok(cell.value().clone());
                }

                let host = Arc::clone(self);
                let load_key = key.clone();
                let handle = tokio::task::spawn_blocking(move || host.load_and_admit(&load_key));
                let fetch = async move { handle.await.map_err(EngineError::from).and_then(|result| result) }
                    .boxed()
                    .shared();
                entry.insert(fetch.clone());
                fetch
            }
        };

        fetch.await
    }

    /// Resident cell without triggering a load
    pub fn get_resident(&self, key: &CellKey) -> Option<SharedCell> {
        self.resident.get(key).map(|entry| entry.value().clone())
    }

    fn load_and_admit(&self, key: &CellKey) -> EngineResult<SharedCell> {
        let result = self.space(&key.space).and_then(|space| {
            self.loads.fetch_add(1, Ordering::SeqCst);
            space.load(key.coords)
        });

        let result = match result {
            Ok(cell) => {
                let shared = cell.into_shared();
                self.resident.insert(key.clone(), shared.clone());
                self.residency.lock().push_back(key.clone());
                log::debug!("[cell_host::load] {} is resident", key);
                Ok(shared)
            }
            Err(e) => {
                log::error!("[cell_host::load] failed to load {}: {}", key, e);
                Err(e)
            }
        };

        // Only after admission, so a new caller finds either the fetch or the cell
        self.in_flight.remove(key);
        self.enforce_capacity();
        result
    }

    /// Space for a token, resolved once and memoized
    pub fn space(&self, token: &SpaceToken) -> EngineResult<Arc<dyn Space>> {
        let mut spaces = self.spaces.lock();
        if let Some(space) = spaces.get(token) {
            return Ok(space.clone());
        }
        let space = self.resolver.resolve(token)?;
        spaces.insert(token.clone(), space.clone());
        Ok(space)
    }

    /// Register a consumer and grow the target capacity
    pub fn connect(&self, consumer: ConsumerId) -> bool {
        let added = self.consumers.lock().insert(consumer);
        if added {
            let capacity = self.recompute_capacity();
            log::info!("[cell_host::connect] {} connected, capacity {}", consumer, capacity);
        }
        added
    }

    /// Remove a consumer; shrinking the capacity may evict immediately
    pub fn disconnect(&self, consumer: ConsumerId) -> bool {
        let removed = self.consumers.lock().remove(&consumer);
        if removed {
            let capacity = self.recompute_capacity();
            log::info!("[cell_host::disconnect] {} disconnected, capacity {}", consumer, capacity);
            self.enforce_capacity();
        }
        removed
    }

    /// Fresh id for a consumer that does not have one yet
    pub fn allocate_consumer_id(&self) -> ConsumerId {
        ConsumerId(self.next_consumer.fetch_add(1, Ordering::SeqCst))
    }

    fn recompute_capacity(&self) -> usize {
        let consumers = self.consumers.lock().len();
        let capacity = self.cache.capacity_for(consumers);
        self.capacity.store(capacity, Ordering::SeqCst);
        capacity
    }

    fn enforce_capacity(&self) {
        let capacity = self.capacity();
        loop {
            let victim = {
                let mut residency = self.residency.lock();
                if residency.len() <= capacity {
                    return;
                }
                residency.pop_front()
            };
            let Some(key) = victim else {
                return;
            };
            if !self.evict(&key) {
                // Stays resident and first in line for the next pass
                self.residency.lock().push_front(key);
                return;
            }
        }
    }

    /// Store a dirty cell, then drop it. A cell that cannot be stored stays resident.
    fn evict(&self, key: &CellKey) -> bool {
        let Some(cell) = self.get_resident(key) else {
            return true;
        };
        let mut guard = cell.write();
        if guard.is_dirty() {
            let stored = self.space(&key.space).and_then(|space| space.store(key.coords, &guard));
            if let Err(e) = stored {
                log::error!("[cell_host::evict] keeping {} resident, store failed: {}", key, e);
                return false;
            }
            guard.mark_clean();
        }
        self.resident.remove(key);
        if let Err(e) = guard.release_tickets() {
            log::warn!("[cell_host::evict] {}: {}", key, e);
        }
        log::debug!("[cell_host::evict] evicted {}", key);
        true
    }

    /// A consumer stopped using a cell; its changes are written back now
    pub fn signal_dispose(&self, consumer: ConsumerId, key: &CellKey) -> EngineResult<()> {
        log::debug!("[cell_host::signal_dispose] {} released {}", consumer, key);
        self.flush(key).map(|_| ())
    }

    /// Write a resident cell back if it has changed. Returns whether it was written.
    pub fn flush(&self, key: &CellKey) -> EngineResult<bool> {
        match self.get_resident(key) {
            Some(cell) => self.flush_cell(key, &cell),
            None => Ok(false),
        }
    }

    /// Write back every dirty resident cell, returning how many were written
    pub fn flush_all(&self) -> EngineResult<usize> {
        let cells: Vec<(CellKey, SharedCell)> = self
            .resident
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut written = 0;
        let mut first_error = None;
        for (key, cell) in cells {
            match self.flush_cell(&key, &cell) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    log::warn!("[cell_host::flush_all] failed to store {}: {}", key, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Write a cell back if dirty, whether or not it is still resident
    pub fn flush_cell(&self, key: &CellKey, cell: &SharedCell) -> EngineResult<bool> {
        let mut cell = cell.write();
        if !cell.is_dirty() {
            return Ok(false);
        }
        self.space(&key.space)?.store(key.coords, &cell)?;
        cell.mark_clean();
        log::debug!("[cell_host::flush] stored {}", key);
        Ok(true)
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    pub fn is_resident(&self, key: &CellKey) -> bool {
        self.resident.contains_key(key)
    }

    /// Resident keys, oldest first
    pub fn residency_order(&self) -> Vec<CellKey> {
        self.residency.lock().iter().cloned().collect()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().len()
    }

    /// Number of loads handed to spaces so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CellHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellHost")
            .field("resident", &self.resident.len())
            .field("in_flight", &self.in_flight.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
