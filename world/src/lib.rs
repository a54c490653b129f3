#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative tile and user state for hexfront.
//!
//! [`StateStore`] fronts a persistent [`Backend`] with a short-lived read
//! cache and a write-behind [`PendingBatch`]. Writes become visible to readers
//! of the same store immediately and reach durable storage when the batch is
//! flushed, either on a timer, when the batch crosses its high-water mark, or
//! on demand. A failed flush keeps the batch for the next attempt.

mod backend;
mod batch;
mod sqlite;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError},
    time::{Duration, Instant},
};

use hexfront_core::{AxialBounds, ChangeSet, Coord, Tile, User, Username};
use thiserror::Error;
use tracing::{debug, warn};

pub use backend::{Backend, MemoryBackend};
pub use batch::PendingBatch;
pub use sqlite::SqliteBackend;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);
const DEFAULT_CACHE_CAPACITY: usize = 200_000;
const DEFAULT_HIGH_WATER_MARK: usize = 2_000;
const DEFAULT_MAX_REGION_RADIUS: u32 = 100;
const DEFAULT_MAX_REGION_TILES: usize = 10_000;

/// Failures raised by persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite rejected a statement.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A serialized column could not be encoded or decoded.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// A stored row violates the data model.
    #[error("corrupt row: {0}")]
    CorruptRow(String),
    /// The backend could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Tunables for caching, batching and region reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    cache_ttl: Duration,
    cache_capacity: usize,
    high_water_mark: usize,
    max_region_radius: u32,
    max_region_tiles: usize,
}

impl StoreConfig {
    /// Replaces how long a cached read stays authoritative.
    #[must_use]
    pub const fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// Replaces the maximum number of cached tile entries.
    #[must_use]
    pub const fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    /// Replaces the pending-batch size that forces an immediate flush.
    #[must_use]
    pub const fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    /// Replaces the largest radius served by [`StateStore::get_region`].
    #[must_use]
    pub const fn with_max_region_radius(mut self, max_region_radius: u32) -> Self {
        self.max_region_radius = max_region_radius;
        self
    }

    /// Replaces the largest number of tiles returned by a region read.
    #[must_use]
    pub const fn with_max_region_tiles(mut self, max_region_tiles: usize) -> Self {
        self.max_region_tiles = max_region_tiles;
        self
    }

    /// Pending-batch size that forces an immediate flush.
    #[must_use]
    pub const fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            max_region_radius: DEFAULT_MAX_REGION_RADIUS,
            max_region_tiles: DEFAULT_MAX_REGION_TILES,
        }
    }
}

/// Counters describing the store's batching behaviour.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Keys waiting for the next flush.
    pub pending: usize,
    /// Tile entries held by the read cache.
    pub cached_tiles: usize,
    /// User entries held by the read cache.
    pub cached_users: usize,
    /// Successful flushes since start-up.
    pub flushes: u64,
    /// Failed flush attempts since start-up.
    pub failed_flushes: u64,
    /// Message of the most recent flush failure, cleared by the next success.
    pub last_flush_error: Option<String>,
}

#[derive(Clone, Debug)]
struct Cached<T> {
    value: T,
    loaded_at: Instant,
}

impl<T> Cached<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            loaded_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() < ttl
    }
}

#[derive(Debug, Default)]
struct StoreState {
    pending: PendingBatch,
    inflight: Option<Arc<PendingBatch>>,
    tiles: HashMap<Coord, Cached<Option<Tile>>>,
    users: HashMap<Username, Cached<Option<User>>>,
    capitals: HashMap<Coord, Username>,
    flushes: u64,
    failed_flushes: u64,
    last_flush_error: Option<String>,
}

impl StoreState {
    fn staged_tile(&self, coord: Coord) -> Option<Option<Tile>> {
        self.pending
            .tile(coord)
            .or_else(|| self.inflight.as_ref().and_then(|batch| batch.tile(coord)))
            .map(|tile| tile.cloned())
    }

    fn staged_user(&self, username: &Username) -> Option<Option<User>> {
        self.pending
            .user(username)
            .or_else(|| {
                self.inflight
                    .as_ref()
                    .and_then(|batch| batch.user(username))
            })
            .map(|user| user.cloned())
    }

    fn fresh_tile(&self, coord: Coord, ttl: Duration) -> Option<Option<Tile>> {
        self.tiles
            .get(&coord)
            .filter(|cached| cached.is_fresh(ttl))
            .map(|cached| cached.value.clone())
    }

    fn fresh_user(&self, username: &Username, ttl: Duration) -> Option<Option<User>> {
        self.users
            .get(username)
            .filter(|cached| cached.is_fresh(ttl))
            .map(|cached| cached.value.clone())
    }

    fn cache_tile(&mut self, coord: Coord, tile: Option<Tile>, config: &StoreConfig) {
        if self.tiles.len() >= config.cache_capacity {
            let ttl = config.cache_ttl;
            self.tiles.retain(|_, cached| cached.is_fresh(ttl));
            if self.tiles.len() >= config.cache_capacity {
                self.tiles.clear();
            }
        }
        let _ = self.tiles.insert(coord, Cached::new(tile));
    }

    fn cache_user(&mut self, username: Username, user: Option<User>) {
        let _ = self.users.insert(username, Cached::new(user));
    }

    fn index_capital(&mut self, username: &Username, user: Option<&User>) {
        if let Some(user) = user {
            if self.capitals.get(&user.capital) == Some(username) {
                return;
            }
        }
        self.capitals.retain(|_, holder| holder != username);
        if let Some(user) = user {
            let _ = self.capitals.insert(user.capital, username.clone());
        }
    }
}

/// Cache and write-coalescing layer in front of a [`Backend`].
///
/// Every method is synchronous. Cache misses, [`flush`](Self::flush) and the
/// high-water flush inside [`stage`](Self::stage) call the backend on the
/// calling thread, so on an async runtime they block that worker for the
/// duration of the backend call.
#[derive(Debug)]
pub struct StateStore {
    backend: Box<dyn Backend>,
    config: StoreConfig,
    state: Mutex<StoreState>,
    flush_lock: Mutex<()>,
}

impl StateStore {
    /// Opens a store over `backend`, indexing the capitals of every stored user.
    pub fn open(backend: impl Backend + 'static, config: StoreConfig) -> Result<Self, StoreError> {
        let users = backend.load_all_users()?;
        let mut state = StoreState::default();
        for user in &users {
            let _ = state
                .capitals
                .insert(user.capital, user.username.clone());
        }
        debug!(users = users.len(), "state store opened");
        Ok(Self {
            backend: Box::new(backend),
            config,
            state: Mutex::new(state),
            flush_lock: Mutex::new(()),
        })
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        lock(&self.state)
    }

    /// Reads a tile, observing every write made through this store.
    pub fn get_tile(&self, coord: Coord) -> Result<Option<Tile>, StoreError> {
        let ttl = self.config.cache_ttl;
        {
            let state = self.lock_state();
            if let Some(staged) = state.staged_tile(coord) {
                return Ok(staged);
            }
            if let Some(cached) = state.fresh_tile(coord, ttl) {
                return Ok(cached);
            }
        }

        let loaded = self.backend.load_tile(coord)?;

        let mut state = self.lock_state();
        if let Some(staged) = state.staged_tile(coord) {
            return Ok(staged);
        }
        if let Some(cached) = state.fresh_tile(coord, ttl) {
            return Ok(cached);
        }
        state.cache_tile(coord, loaded.clone(), &self.config);
        Ok(loaded)
    }

    /// Reads a user, observing every write made through this store.
    pub fn get_user(&self, username: &Username) -> Result<Option<User>, StoreError> {
        let ttl = self.config.cache_ttl;
        {
            let state = self.lock_state();
            if let Some(staged) = state.staged_user(username) {
                return Ok(staged);
            }
            if let Some(cached) = state.fresh_user(username, ttl) {
                return Ok(cached);
            }
        }

        let loaded = self.backend.load_user(username)?;

        let mut state = self.lock_state();
        if let Some(staged) = state.staged_user(username) {
            return Ok(staged);
        }
        if let Some(cached) = state.fresh_user(username, ttl) {
            return Ok(cached);
        }
        state.cache_user(username.clone(), loaded.clone());
        Ok(loaded)
    }

    /// Stages tile replacements and removals.
    pub fn set_tiles(&self, changes: &ChangeSet) {
        self.stage(changes, Vec::new());
    }

    /// Stages user replacements (`Some`) and removals (`None`).
    pub fn set_users<I>(&self, updates: I)
    where
        I: IntoIterator<Item = (Username, Option<User>)>,
    {
        self.stage(&ChangeSet::new(), updates.into_iter().collect());
    }

    /// Stages tile and user writes of one logical operation together.
    ///
    /// Both halves land under a single lock acquisition, so no reader observes
    /// one without the other.
    pub fn stage(&self, changes: &ChangeSet, users: Vec<(Username, Option<User>)>) {
        let pending = {
            let mut state = self.lock_state();
            for (coord, tile) in changes.iter() {
                let tile = tile.cloned();
                state.pending.stage_tile(coord, tile.clone());
                state.cache_tile(coord, tile, &self.config);
            }
            for (username, user) in users {
                state.index_capital(&username, user.as_ref());
                state.pending.stage_user(username.clone(), user.clone());
                state.cache_user(username, user);
            }
            state.pending.len()
        };

        if pending >= self.config.high_water_mark {
            self.flush_over_high_water(pending);
        }
    }

    fn flush_over_high_water(&self, pending: usize) {
        let _guard = match self.flush_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        debug!(pending, "pending batch crossed high-water mark");
        if let Err(error) = self.flush_locked() {
            warn!(%error, pending, "high-water flush failed; batch retained");
        }
    }

    /// Drains the pending batch into the backend as one transaction.
    ///
    /// Returns the number of keys written. On failure the batch is merged back
    /// beneath any writes staged during the attempt and the error is returned.
    pub fn flush(&self) -> Result<usize, StoreError> {
        let _guard = lock(&self.flush_lock);
        self.flush_locked()
    }

    fn flush_locked(&self) -> Result<usize, StoreError> {
        let batch = {
            let mut state = self.lock_state();
            if state.pending.is_empty() {
                return Ok(0);
            }
            let batch = Arc::new(std::mem::take(&mut state.pending));
            state.inflight = Some(Arc::clone(&batch));
            batch
        };
        let entries = batch.len();
        let result = self.backend.commit(&batch);

        let mut state = self.lock_state();
        state.inflight = None;
        match result {
            Ok(()) => {
                for (coord, tile) in batch.tiles() {
                    state.cache_tile(coord, tile.cloned(), &self.config);
                }
                for (username, user) in batch.users() {
                    state.cache_user(username.clone(), user.cloned());
                }
                state.flushes += 1;
                state.last_flush_error = None;
                debug!(entries, "flushed pending batch");
                Ok(entries)
            }
            Err(error) => {
                let newer = std::mem::take(&mut state.pending);
                let mut restored = Arc::try_unwrap(batch).unwrap_or_else(|shared| (*shared).clone());
                restored.merge(newer);
                state.pending = restored;
                state.failed_flushes += 1;
                state.last_flush_error = Some(error.to_string());
                warn!(%error, entries, "flush failed; batch retained for retry");
                Err(error)
            }
        }
    }

    /// Occupied tiles within `radius` of `center`, nearest first.
    ///
    /// The radius is clamped to the configured maximum and the result is
    /// capped at the configured tile count.
    pub fn get_region(&self, center: Coord, radius: u32) -> Result<Vec<(Coord, Tile)>, StoreError> {
        let radius = radius.min(self.config.max_region_radius);
        let bounds = AxialBounds::around(center, radius);
        let tiles = self.overlay(
            |backend| backend.load_tiles_in(bounds),
            |coord| bounds.contains(coord),
        )?;

        let mut region: Vec<(Coord, Tile)> = tiles
            .into_iter()
            .filter(|(coord, _)| coord.distance(center) <= radius)
            .collect();
        region.sort_by_key(|(coord, _)| (coord.distance(center), *coord));
        region.truncate(self.config.max_region_tiles);
        Ok(region)
    }

    // Holds the flush lock so the backend cannot change between the durable
    // read and the pending overlay.
    fn overlay<L, F>(&self, load: L, mut within: F) -> Result<BTreeMap<Coord, Tile>, StoreError>
    where
        L: FnOnce(&dyn Backend) -> Result<Vec<(Coord, Tile)>, StoreError>,
        F: FnMut(Coord) -> bool,
    {
        let _guard = lock(&self.flush_lock);
        let mut tiles: BTreeMap<Coord, Tile> = load(self.backend.as_ref())?.into_iter().collect();
        let state = self.lock_state();
        for (coord, tile) in state.pending.tiles() {
            if !within(coord) {
                continue;
            }
            match tile {
                Some(tile) => {
                    let _ = tiles.insert(coord, tile.clone());
                }
                None => {
                    let _ = tiles.remove(&coord);
                }
            }
        }
        Ok(tiles)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Snapshot reads over the whole store.
pub mod query {
    use hexfront_core::{Coord, Territory, Username};

    use super::{StateStore, StoreError, StoreStats};

    /// Point-in-time copy of every occupied tile, pending writes included.
    pub fn territory(store: &StateStore) -> Result<Territory, StoreError> {
        let tiles = store.overlay(|backend| backend.load_all_tiles(), |_| true)?;
        Ok(tiles.into_iter().collect())
    }

    /// Coordinates of every owned or bonus-flagged tile.
    pub fn occupied_coords(store: &StateStore) -> Result<Vec<Coord>, StoreError> {
        let tiles = store.overlay(|backend| backend.load_all_tiles(), |_| true)?;
        Ok(tiles.into_keys().collect())
    }

    /// Every user's capital.
    #[must_use]
    pub fn capitals(store: &StateStore) -> Vec<(Username, Coord)> {
        let mut capitals: Vec<(Username, Coord)> = store
            .lock_state()
            .capitals
            .iter()
            .map(|(coord, username)| (username.clone(), *coord))
            .collect();
        capitals.sort();
        capitals
    }

    /// User whose capital sits on `coord`, if any.
    #[must_use]
    pub fn capital_owner(store: &StateStore, coord: Coord) -> Option<Username> {
        store.lock_state().capitals.get(&coord).cloned()
    }

    /// Batching and cache counters.
    #[must_use]
    pub fn stats(store: &StateStore) -> StoreStats {
        let state = store.lock_state();
        StoreStats {
            pending: state.pending.len(),
            cached_tiles: state.tiles.len(),
            cached_users: state.users.len(),
            flushes: state.flushes,
            failed_flushes: state.failed_flushes,
            last_flush_error: state.last_flush_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Username {
        Username::parse("alice").unwrap()
    }

    #[test]
    fn staged_writes_shadow_negative_cache() {
        let store = StateStore::open(MemoryBackend::new(), StoreConfig::default()).unwrap();
        let coord = Coord::new(2, 2);
        assert_eq!(store.get_tile(coord).unwrap(), None);

        let mut changes = ChangeSet::new();
        changes.set(coord, Tile::owned(alice(), 4));
        store.set_tiles(&changes);
        assert_eq!(store.get_tile(coord).unwrap(), Some(Tile::owned(alice(), 4)));
    }

    #[test]
    fn cache_capacity_evicts_entries() {
        let config = StoreConfig::default()
            .with_cache_capacity(4)
            .with_cache_ttl(Duration::from_secs(60));
        let store = StateStore::open(MemoryBackend::new(), config).unwrap();
        for q in 0..10 {
            let _ = store.get_tile(Coord::new(q, 0)).unwrap();
        }
        assert!(query::stats(&store).cached_tiles <= 4);
    }

    #[test]
    fn capitals_follow_user_writes() {
        let store = StateStore::open(MemoryBackend::new(), StoreConfig::default()).unwrap();
        let user = User::new(alice(), hexfront_core::Credential::new("pw"), Coord::new(1, 1));
        store.set_users([(alice(), Some(user))]);
        assert_eq!(query::capital_owner(&store, Coord::new(1, 1)), Some(alice()));

        store.set_users([(alice(), None)]);
        assert!(query::capitals(&store).is_empty());
    }
}
