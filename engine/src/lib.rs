#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Orchestration of hexfront's player-facing operations.
//!
//! [`Engine`] owns the state store, the spawn cache and the bonus placer and
//! exposes the operation set used by transports: joining, acting on a tile,
//! the periodic decay and bonus ticks, region and leaderboard reads.
//!
//! Every mutating operation holds one writer lock from the moment it reads
//! territory until its change set is staged, so two operations never
//! interleave writes to the same tile. Each operation stages its writes as a
//! single batch and publishes exactly one [`ChangeSet`] to subscribers.

mod probe;
mod schedule;

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use hexfront_core::{
    ChangeSet, Coord, Credential, Leaderboard, Tile, User, Username, UsernameError,
};
use hexfront_system_bonus::{BonusPlacer, Config as BonusConfig};
use hexfront_system_cascade::{cascade, Config as CascadeConfig};
use hexfront_system_connectivity::decay;
use hexfront_system_occupancy::Config as OccupancyConfig;
use hexfront_system_spawning::{Config as SpawnConfig, SpawnCache, SpawnError, SpawnStats};
use hexfront_world::{query, Backend, StateStore, StoreConfig, StoreError, StoreStats};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub use probe::StoreProbe;
pub use schedule::Background;

/// Reasons a join is refused.
#[derive(Debug, Error)]
pub enum JoinError {
    /// The username breaks the naming rule.
    #[error("invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),
    /// The user exists and the credential does not match.
    #[error("wrong credential")]
    WrongCredential,
    /// No spawn point satisfied the separation rule within the retry budget.
    #[error("no spawn point available")]
    NoSpawnAvailable,
    /// Persistence failed.
    #[error(transparent)]
    Storage(#[from] StoreError),
    /// Spawn generation failed.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Reasons a tile action is refused.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The acting user does not exist.
    #[error("unknown user")]
    UnknownUser,
    /// The tile does not touch the user's territory.
    #[error("tile is not adjacent to your territory")]
    NotAdjacent,
    /// The tile is another user's capital.
    #[error("capitals cannot be attacked")]
    CapitalImmune,
    /// Persistence failed.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Failures of ticks, reads and start-up.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Persistence failed.
    #[error(transparent)]
    Storage(#[from] StoreError),
    /// Spawn bookkeeping failed.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_DECAY_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_BONUS_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_LEADERBOARD_SIZE: usize = 5;
const DEFAULT_JOIN_ATTEMPTS: u32 = 3;
const DEFAULT_BROADCAST_CAPACITY: usize = 1_024;

/// Aggregated tuning for the engine and every subsystem it drives.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Write-behind cache and batching.
    pub store: StoreConfig,
    /// Occupancy sectors.
    pub occupancy: OccupancyConfig,
    /// Spawn pool.
    pub spawning: SpawnConfig,
    /// Capture cascade.
    pub cascade: CascadeConfig,
    /// Bonus placement.
    pub bonus: BonusConfig,
    /// Period of the background flush.
    pub flush_interval: Duration,
    /// Period of the decay pass.
    pub decay_interval: Duration,
    /// Period of bonus placement.
    pub bonus_interval: Duration,
    /// Period of spawn-cache maintenance.
    pub maintenance_interval: Duration,
    /// Entries per leaderboard list.
    pub leaderboard_size: usize,
    /// Spawn points tried per join before giving up.
    pub join_attempts: u32,
    /// Change-set messages buffered per subscriber.
    pub broadcast_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            occupancy: OccupancyConfig::default(),
            spawning: SpawnConfig::default(),
            cascade: CascadeConfig::default(),
            bonus: BonusConfig::default(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            decay_interval: DEFAULT_DECAY_INTERVAL,
            bonus_interval: DEFAULT_BONUS_INTERVAL,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            leaderboard_size: DEFAULT_LEADERBOARD_SIZE,
            join_attempts: DEFAULT_JOIN_ATTEMPTS,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

/// Successful join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The user's capital.
    pub capital: Coord,
    /// Occupied tiles around the capital.
    pub tiles: Vec<(Coord, Tile)>,
    /// Whether the user was created by this join rather than logged in.
    pub created: bool,
}

/// Combined store and spawn counters.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineStats {
    /// Batching and cache counters.
    pub store: StoreStats,
    /// Spawn pool counters.
    pub spawns: SpawnStats,
}

/// Shared game engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    store: Arc<StateStore>,
    spawns: Arc<SpawnCache<StoreProbe>>,
    bonus: Mutex<BonusPlacer>,
    writer: tokio::sync::Mutex<()>,
    changes: broadcast::Sender<ChangeSet>,
}

impl Engine {
    /// Opens the store over `backend`, reloads the persisted spawn pool and
    /// indexes current territory.
    pub fn open(backend: impl Backend + 'static, config: EngineConfig) -> Result<Self, EngineError> {
        let store = Arc::new(StateStore::open(backend, config.store)?);
        let spawns = Arc::new(SpawnCache::new(
            config.spawning.clone(),
            config.occupancy,
            StoreProbe::new(Arc::clone(&store)),
        ));
        if let Err(error) = spawns.load_pool() {
            warn!(%error, "ignoring unreadable spawn pool");
        }
        let tiles = spawns.rebuild_index()?;
        let (changes, _) = broadcast::channel(config.broadcast_capacity.max(1));
        info!(tiles, pooled = spawns.pool_len(), "engine opened");

        Ok(Self {
            bonus: Mutex::new(BonusPlacer::new(config.bonus)),
            config,
            store,
            spawns,
            writer: tokio::sync::Mutex::new(()),
            changes,
        })
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Underlying state store.
    #[must_use]
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Underlying spawn cache.
    #[must_use]
    pub fn spawns(&self) -> &Arc<SpawnCache<StoreProbe>> {
        &self.spawns
    }

    /// Receives one [`ChangeSet`] per completed mutating operation.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeSet> {
        self.changes.subscribe()
    }

    fn publish(&self, changes: &ChangeSet) {
        if changes.is_empty() {
            return;
        }
        // No subscribers is not an error.
        let _ = self.changes.send(changes.clone());
    }

    /// Logs an existing user in, or creates the user on a fresh spawn point
    /// surrounded by bonus tiles.
    pub async fn join(&self, username: &str, credential: Credential) -> Result<JoinOutcome, JoinError> {
        let username = Username::parse(username)?;
        if let Some(user) = self.store.get_user(&username)? {
            return self.login(&user, &credential);
        }

        for attempt in 0..self.config.join_attempts {
            let Some(point) = self.spawns.get_spawn_point().await? else {
                break;
            };

            let _writer = self.writer.lock().await;
            if let Some(user) = self.store.get_user(&username)? {
                return self.login(&user, &credential);
            }
            // The point may have been crowded by a join that committed first.
            if !self.spawns.is_valid(point)? {
                debug!(%point, attempt, "spawn point lost to a concurrent join");
                continue;
            }

            let mut changes = ChangeSet::new();
            changes.set(point, Tile::owned(username.clone(), 1));
            let scatter = {
                let mut placer = lock(&self.bonus);
                placer.initial_scatter(point, |coord| {
                    Ok::<_, StoreError>(self.store.get_tile(coord)?.is_none())
                })?
            };
            for coord in scatter {
                changes.set(coord, Tile::bonus());
            }

            let user = User::new(username.clone(), credential, point);
            self.store
                .stage(&changes, vec![(username.clone(), Some(user))]);
            for (coord, _) in changes.iter() {
                self.spawns.record_occupied(coord);
            }
            let reach = self
                .spawns
                .config()
                .min_distance()
                .saturating_add(self.config.bonus.initial_radius());
            let _ = self.spawns.invalidate_near(point, reach);
            self.publish(&changes);
            info!(%username, capital = %point, bonus = changes.len() - 1, "user spawned");

            let tiles = self
                .store
                .get_region(point, self.config.bonus.initial_radius())?;
            return Ok(JoinOutcome {
                capital: point,
                tiles,
                created: true,
            });
        }

        warn!(%username, "join failed: no spawn point available");
        Err(JoinError::NoSpawnAvailable)
    }

    fn login(&self, user: &User, credential: &Credential) -> Result<JoinOutcome, JoinError> {
        if !user.credential.matches(credential) {
            return Err(JoinError::WrongCredential);
        }
        let tiles = self
            .store
            .get_region(user.capital, self.config.bonus.initial_radius())?;
        debug!(username = %user.username, "user logged in");
        Ok(JoinOutcome {
            capital: user.capital,
            tiles,
            created: false,
        })
    }

    /// Applies `username`'s click on `coord` and returns the resulting writes.
    ///
    /// Bonus tiles start a capture cascade; enemy tiles lose one population or
    /// are captured; vacant tiles are claimed; the user's own tiles grow. Every
    /// target except the user's own tiles must touch the user's territory.
    pub async fn act(&self, username: &Username, coord: Coord) -> Result<ChangeSet, ActionError> {
        let _writer = self.writer.lock().await;
        if self.store.get_user(username)?.is_none() {
            return Err(ActionError::UnknownUser);
        }

        let mut changes = ChangeSet::new();
        match self.store.get_tile(coord)? {
            Some(tile) if tile.has_bonus => {
                self.require_adjacent(username, coord)?;
                let outcome = cascade(
                    coord,
                    username,
                    &self.config.cascade,
                    |cell| self.store.get_tile(cell),
                    |cell| query::capital_owner(&self.store, cell).is_some(),
                )?;
                changes = outcome.changes;
            }
            Some(tile) if tile.is_owned_by(username) => {
                changes.set(
                    coord,
                    Tile {
                        population: tile.population.saturating_add(1),
                        ..tile
                    },
                );
            }
            Some(tile) => {
                self.require_adjacent(username, coord)?;
                if query::capital_owner(&self.store, coord).is_some() {
                    return Err(ActionError::CapitalImmune);
                }
                let next = if tile.population > 1 {
                    Tile {
                        population: tile.population - 1,
                        ..tile
                    }
                } else {
                    Tile::owned(username.clone(), 1)
                };
                changes.set(coord, next);
            }
            None => {
                self.require_adjacent(username, coord)?;
                changes.set(coord, Tile::owned(username.clone(), 1));
            }
        }

        self.store.set_tiles(&changes);
        for (cell, tile) in changes.iter() {
            if tile.is_some() {
                self.spawns.record_occupied(cell);
            }
        }
        self.publish(&changes);
        Ok(changes)
    }

    fn require_adjacent(&self, username: &Username, coord: Coord) -> Result<(), ActionError> {
        for neighbor in coord.neighbors() {
            if self
                .store
                .get_tile(neighbor)?
                .is_some_and(|tile| tile.is_owned_by(username))
            {
                return Ok(());
            }
        }
        Err(ActionError::NotAdjacent)
    }

    /// Runs one decay pass over every user and returns the combined writes.
    pub async fn tick_decay(&self) -> Result<ChangeSet, EngineError> {
        let _writer = self.writer.lock().await;
        let territory = query::territory(&self.store)?;
        let capitals = query::capitals(&self.store);

        let mut changes = ChangeSet::new();
        let report = decay(&territory, &capitals, &mut changes);
        self.store.set_tiles(&changes);
        self.publish(&changes);
        info!(
            decayed = report.decayed,
            removed = report.removed,
            recovered = report.recovered,
            "decay pass finished"
        );
        Ok(changes)
    }

    /// Places a bounded number of bonus tiles near players' territory.
    pub async fn tick_spawn_bonus(&self) -> Result<ChangeSet, EngineError> {
        let _writer = self.writer.lock().await;
        let territory = query::territory(&self.store)?;
        let players: Vec<Username> = query::capitals(&self.store)
            .into_iter()
            .map(|(username, _)| username)
            .collect();

        let mut changes = ChangeSet::new();
        let report = lock(&self.bonus).plan_cycle(&territory, &players, &mut changes);
        self.store.set_tiles(&changes);
        for (coord, _) in changes.iter() {
            self.spawns.record_occupied(coord);
        }
        self.publish(&changes);
        info!(placed = report.placed, saturated = report.saturated, "bonus tiles placed");
        Ok(changes)
    }

    /// Occupied tiles around `center`, nearest first, clamped and capped.
    pub fn get_region(&self, center: Coord, radius: u32) -> Result<Vec<(Coord, Tile)>, EngineError> {
        Ok(self.store.get_region(center, radius)?)
    }

    /// Top users by population and by area.
    pub fn get_leaderboard(&self) -> Result<Leaderboard, EngineError> {
        let territory = query::territory(&self.store)?;
        Ok(Leaderboard::rank(&territory, self.config.leaderboard_size))
    }

    /// Replaces the advisory explored-tile set stored for `username`.
    pub async fn sync_explored_tiles(
        &self,
        username: &Username,
        explored: Vec<Coord>,
    ) -> Result<(), ActionError> {
        let _writer = self.writer.lock().await;
        let Some(mut user) = self.store.get_user(username)? else {
            return Err(ActionError::UnknownUser);
        };
        user.explored_tiles = explored;
        self.store.set_users([(username.clone(), Some(user))]);
        Ok(())
    }

    /// Flushes pending writes; returns the number of keys written.
    pub fn flush(&self) -> Result<usize, EngineError> {
        Ok(self.store.flush()?)
    }

    /// Refreshes a stale occupancy index and tops up a thin spawn pool.
    pub fn maintain(&self) -> Result<(), EngineError> {
        Ok(self.spawns.maintain()?)
    }

    /// Store and spawn counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            store: query::stats(&self.store),
            spawns: self.spawns.stats(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
