//! Durable storage seam behind the state store.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use hexfront_core::{AxialBounds, Coord, Tile, User, Username};

use crate::{lock, PendingBatch, StoreError};

/// Persistent tile and user storage.
///
/// Implementations must apply [`Backend::commit`] atomically: either every
/// entry of the batch becomes durable or none does.
pub trait Backend: fmt::Debug + Send + Sync {
    /// Loads a single tile.
    fn load_tile(&self, coord: Coord) -> Result<Option<Tile>, StoreError>;

    /// Loads a single user.
    fn load_user(&self, username: &Username) -> Result<Option<User>, StoreError>;

    /// Loads every stored tile inside the window.
    fn load_tiles_in(&self, bounds: AxialBounds) -> Result<Vec<(Coord, Tile)>, StoreError>;

    /// Loads every stored tile.
    fn load_all_tiles(&self) -> Result<Vec<(Coord, Tile)>, StoreError>;

    /// Loads every stored user.
    fn load_all_users(&self) -> Result<Vec<User>, StoreError>;

    /// Applies all upserts and deletions of the batch in one transaction.
    fn commit(&self, batch: &PendingBatch) -> Result<(), StoreError>;
}

/// Hash-map backend used for tests and ephemeral runs.
///
/// Clones share the same storage, so a test can keep a handle for failure
/// injection after moving another clone into the store.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tiles: HashMap<Coord, Tile>,
    users: HashMap<Username, User>,
    failures_remaining: usize,
    commits: u64,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail without applying anything.
    pub fn fail_next_commits(&self, count: usize) {
        lock(&self.inner).failures_remaining = count;
    }

    /// Number of successful commits so far.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        lock(&self.inner).commits
    }

    /// Durable tile state, bypassing any cache.
    #[must_use]
    pub fn durable_tile(&self, coord: Coord) -> Option<Tile> {
        lock(&self.inner).tiles.get(&coord).cloned()
    }

    /// Writes a tile directly into durable storage, as another process would.
    pub fn seed_tile(&self, coord: Coord, tile: Tile) {
        let _ = lock(&self.inner).tiles.insert(coord, tile);
    }
}

impl Backend for MemoryBackend {
    fn load_tile(&self, coord: Coord) -> Result<Option<Tile>, StoreError> {
        Ok(lock(&self.inner).tiles.get(&coord).cloned())
    }

    fn load_user(&self, username: &Username) -> Result<Option<User>, StoreError> {
        Ok(lock(&self.inner).users.get(username).cloned())
    }

    fn load_tiles_in(&self, bounds: AxialBounds) -> Result<Vec<(Coord, Tile)>, StoreError> {
        Ok(lock(&self.inner)
            .tiles
            .iter()
            .filter(|(coord, _)| bounds.contains(**coord))
            .map(|(coord, tile)| (*coord, tile.clone()))
            .collect())
    }

    fn load_all_tiles(&self) -> Result<Vec<(Coord, Tile)>, StoreError> {
        Ok(lock(&self.inner)
            .tiles
            .iter()
            .map(|(coord, tile)| (*coord, tile.clone()))
            .collect())
    }

    fn load_all_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(lock(&self.inner).users.values().cloned().collect())
    }

    fn commit(&self, batch: &PendingBatch) -> Result<(), StoreError> {
        let mut state = lock(&self.inner);
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(StoreError::Unavailable("injected commit failure".to_owned()));
        }

        for (coord, tile) in batch.tiles() {
            match tile {
                Some(tile) => {
                    let _ = state.tiles.insert(coord, tile.clone());
                }
                None => {
                    let _ = state.tiles.remove(&coord);
                }
            }
        }
        for (username, user) in batch.users() {
            match user {
                Some(user) => {
                    let _ = state.users.insert(username.clone(), user.clone());
                }
                None => {
                    let _ = state.users.remove(username);
                }
            }
        }
        state.commits += 1;
        Ok(())
    }
}
