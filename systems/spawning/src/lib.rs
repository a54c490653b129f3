#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Spawn-point cache handing out well-separated capitals in amortized O(1).
//!
//! The cache holds a pool of pre-validated coordinates. Each hand-out pops the
//! newest candidate and re-validates it against the occupancy index and a
//! direct territory lookup, because the map may have changed since the pool
//! was generated. Generation is single-flight: callers that arrive while a
//! generation is running wait for it and reuse its result.

mod generator;

use std::{
    error::Error as StdError,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use hexfront_core::{AxialBounds, Coord};
use hexfront_system_occupancy::{Config as OccupancyConfig, OccupancyIndex};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_MIN_DISTANCE: u32 = 150;
const DEFAULT_TARGET_SIZE: usize = 500;
const DEFAULT_LOW_WATERMARK: usize = 50;
const DEFAULT_MAINTENANCE_FLOOR: usize = 100;
const DEFAULT_MAX_RING_ATTEMPTS: u32 = 10;
const DEFAULT_MAX_REGENERATIONS: u32 = 1;
const DEFAULT_SECTOR_REFRESH: Duration = Duration::from_secs(5 * 60);

const FALLBACK_SECTORS: usize = 50;
const FALLBACK_POINTS_PER_SECTOR: usize = 5;

/// Read access to authoritative territory needed for validation.
pub trait TerritoryProbe: Send + Sync {
    /// Error raised by the underlying store.
    type Error: StdError + Send + Sync + 'static;

    /// Reports whether the cell holds neither an owner nor a bonus flag.
    fn is_vacant(&self, coord: Coord) -> Result<bool, Self::Error>;

    /// Every owned or bonus-flagged coordinate.
    fn occupied_coords(&self) -> Result<Vec<Coord>, Self::Error>;
}

/// Failures raised while producing or persisting spawn points.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The territory probe failed.
    #[error("territory lookup failed: {0}")]
    Probe(#[source] Box<dyn StdError + Send + Sync>),
    /// The pool file could not be read or written.
    #[error("spawn cache file error: {0}")]
    CacheFile(#[from] std::io::Error),
    /// The pool file did not contain a JSON list of `[q, r]` pairs.
    #[error("spawn cache file is malformed: {0}")]
    CacheFormat(#[from] serde_json::Error),
}

impl SpawnError {
    fn probe<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        Self::Probe(Box::new(error))
    }
}

/// Configuration parameters for the spawn-point cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    min_distance: u32,
    target_size: usize,
    low_watermark: usize,
    maintenance_floor: usize,
    max_ring_attempts: u32,
    max_regenerations: u32,
    sector_refresh: Duration,
    cache_path: Option<PathBuf>,
    rng_seed: Option<u64>,
}

impl Config {
    /// Replaces the minimum hex distance between a spawn and any occupied tile.
    #[must_use]
    pub const fn with_min_distance(mut self, min_distance: u32) -> Self {
        self.min_distance = min_distance;
        self
    }

    /// Replaces the number of points each generation aims for.
    #[must_use]
    pub const fn with_target_size(mut self, target_size: usize) -> Self {
        self.target_size = target_size;
        self
    }

    /// Replaces the pool size below which a hand-out starts background generation.
    #[must_use]
    pub const fn with_low_watermark(mut self, low_watermark: usize) -> Self {
        self.low_watermark = low_watermark;
        self
    }

    /// Replaces the pool size below which maintenance regenerates.
    #[must_use]
    pub const fn with_maintenance_floor(mut self, maintenance_floor: usize) -> Self {
        self.maintenance_floor = maintenance_floor;
        self
    }

    /// Replaces the number of rings searched per generation.
    #[must_use]
    pub const fn with_max_ring_attempts(mut self, max_ring_attempts: u32) -> Self {
        self.max_ring_attempts = max_ring_attempts;
        self
    }

    /// Replaces how many generations one hand-out may wait for after draining the pool.
    #[must_use]
    pub const fn with_max_regenerations(mut self, max_regenerations: u32) -> Self {
        self.max_regenerations = max_regenerations;
        self
    }

    /// Replaces the maximum age of the occupancy index before maintenance rebuilds it.
    #[must_use]
    pub const fn with_sector_refresh(mut self, sector_refresh: Duration) -> Self {
        self.sector_refresh = sector_refresh;
        self
    }

    /// Persists the pool at `path`.
    #[must_use]
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Seeds candidate jitter for reproducible generations.
    #[must_use]
    pub const fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Minimum hex distance between a spawn and any occupied tile.
    #[must_use]
    pub const fn min_distance(&self) -> u32 {
        self.min_distance
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_distance: DEFAULT_MIN_DISTANCE,
            target_size: DEFAULT_TARGET_SIZE,
            low_watermark: DEFAULT_LOW_WATERMARK,
            maintenance_floor: DEFAULT_MAINTENANCE_FLOOR,
            max_ring_attempts: DEFAULT_MAX_RING_ATTEMPTS,
            max_regenerations: DEFAULT_MAX_REGENERATIONS,
            sector_refresh: DEFAULT_SECTOR_REFRESH,
            cache_path: None,
            rng_seed: None,
        }
    }
}

/// Snapshot of the cache's bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnStats {
    /// Points currently pooled.
    pub pool_size: usize,
    /// Non-empty occupancy sectors.
    pub sectors: usize,
    /// Whether a generation is running.
    pub generating: bool,
    /// Generations completed since start-up.
    pub generations: u64,
    /// Age of the occupancy index.
    pub last_rebuild: Option<Duration>,
}

/// Pool of validated spawn points backed by a sectorized occupancy index.
#[derive(Debug)]
pub struct SpawnCache<P> {
    config: Config,
    probe: P,
    index: OccupancyIndex,
    pool: Mutex<Vec<Coord>>,
    rng: Mutex<ChaCha8Rng>,
    generation: tokio::sync::Mutex<()>,
    epoch: AtomicU64,
    generating: AtomicBool,
    background: AtomicBool,
}

impl<P: TerritoryProbe + 'static> SpawnCache<P> {
    /// Creates an empty cache over `probe`.
    #[must_use]
    pub fn new(config: Config, occupancy: OccupancyConfig, probe: P) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            index: OccupancyIndex::new(occupancy.covering(config.min_distance)),
            config,
            probe,
            pool: Mutex::new(Vec::new()),
            rng: Mutex::new(rng),
            generation: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
            generating: AtomicBool::new(false),
            background: AtomicBool::new(false),
        }
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Occupancy index consulted by every validation.
    #[must_use]
    pub fn index(&self) -> &OccupancyIndex {
        &self.index
    }

    /// Territory probe used for direct lookups.
    #[must_use]
    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Points currently pooled.
    #[must_use]
    pub fn pool_len(&self) -> usize {
        lock(&self.pool).len()
    }

    /// Loads a previously persisted pool, replacing the in-memory one.
    ///
    /// Returns the number of points loaded; a missing file loads nothing.
    pub fn load_pool(&self) -> Result<usize, SpawnError> {
        let Some(path) = self.config.cache_path.as_ref() else {
            return Ok(0);
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(error) => return Err(error.into()),
        };
        let pairs: Vec<[i32; 2]> = serde_json::from_str(&raw)?;
        let points: Vec<Coord> = pairs.into_iter().map(|[q, r]| Coord::new(q, r)).collect();
        let loaded = points.len();
        *lock(&self.pool) = points;
        info!(points = loaded, path = %path.display(), "spawn pool loaded");
        Ok(loaded)
    }

    /// Rebuilds the occupancy index from the probe's current snapshot.
    ///
    /// Points recorded while the snapshot is taken stay indexed.
    pub fn rebuild_index(&self) -> Result<usize, SpawnError> {
        self.index
            .rebuild_from(|| self.probe.occupied_coords().map_err(SpawnError::probe))
    }

    /// Hands out a spawn point that is vacant and at least the minimum distance
    /// from every occupied tile at the moment of return.
    ///
    /// Returns `Ok(None)` when neither the pool nor the allowed regenerations
    /// produce a valid point.
    pub async fn get_spawn_point(self: &Arc<Self>) -> Result<Option<Coord>, SpawnError> {
        if self.pool_len() < self.config.low_watermark {
            self.spawn_background_generation();
        }

        let mut regenerations = 0;
        loop {
            while let Some(candidate) = self.pop() {
                if self.is_valid(candidate)? {
                    return Ok(Some(candidate));
                }
                debug!(%candidate, "discarding stale spawn point");
            }

            if regenerations >= self.config.max_regenerations {
                warn!(regenerations, "spawn pool exhausted");
                return Ok(None);
            }
            regenerations += 1;
            let _ = self.generate().await?;
        }
    }

    /// Re-checks a point against the index and a direct lookup.
    pub fn is_valid(&self, candidate: Coord) -> Result<bool, SpawnError> {
        if !self.index.is_far_enough(candidate, self.config.min_distance) {
            return Ok(false);
        }
        self.probe.is_vacant(candidate).map_err(SpawnError::probe)
    }

    fn pop(&self) -> Option<Coord> {
        lock(&self.pool).pop()
    }

    /// Marks a coordinate occupied in the index without touching the pool.
    pub fn record_occupied(&self, coord: Coord) {
        self.index.record_occupied(coord);
    }

    /// Drops pooled points closer than `radius` to `coord`; returns how many.
    pub fn invalidate_near(&self, coord: Coord, radius: u32) -> usize {
        let (removed, snapshot) = {
            let mut pool = lock(&self.pool);
            let before = pool.len();
            pool.retain(|point| point.distance(coord) >= radius);
            let removed = before - pool.len();
            (removed, (removed > 0).then(|| pool.clone()))
        };
        if let Some(points) = snapshot {
            debug!(%coord, radius, removed, "invalidated nearby spawn points");
            self.persist(&points);
        }
        removed
    }

    /// Completes a join: records the capital and drops pooled points near it.
    pub fn on_user_spawned(&self, capital: Coord) {
        self.record_occupied(capital);
        let _ = self.invalidate_near(capital, self.config.min_distance);
    }

    /// Starts a generation on the runtime unless one is already queued.
    pub fn spawn_background_generation(self: &Arc<Self>) {
        if self.background.swap(true, Ordering::AcqRel) {
            return;
        }
        let cache = Arc::clone(self);
        let _ = tokio::spawn(async move {
            if let Err(error) = cache.generate().await {
                warn!(%error, "background spawn generation failed");
            }
            cache.background.store(false, Ordering::Release);
        });
    }

    /// Periodic upkeep: refreshes a stale index and tops up a thin pool.
    pub fn maintain(self: &Arc<Self>) -> Result<(), SpawnError> {
        if self.index.needs_rebuild(self.config.sector_refresh) {
            let tiles = self.rebuild_index()?;
            debug!(tiles, "occupancy index refreshed by maintenance");
        }
        if self.pool_len() < self.config.maintenance_floor {
            self.spawn_background_generation();
        }
        Ok(())
    }

    /// Regenerates the pool, or waits for the generation already running.
    ///
    /// Returns the pool size afterwards.
    pub async fn generate(&self) -> Result<usize, SpawnError> {
        let observed = self.epoch.load(Ordering::Acquire);
        let _guard = self.generation.lock().await;
        if self.epoch.load(Ordering::Acquire) != observed {
            return Ok(self.pool_len());
        }

        let outcome = {
            let _flag = GeneratingFlag::raise(&self.generating);
            self.run_generation().await
        };

        let points = outcome?;
        let generated = points.len();
        *lock(&self.pool) = points.clone();
        let _ = self.epoch.fetch_add(1, Ordering::AcqRel);
        self.persist(&points);
        info!(points = generated, "spawn pool regenerated");
        Ok(generated)
    }

    async fn run_generation(&self) -> Result<Vec<Coord>, SpawnError> {
        let _ = self.rebuild_index()?;
        let min_distance = f64::from(self.config.min_distance);
        let target = self.config.target_size;
        let accepted = OccupancyIndex::new(OccupancyConfig::new(self.config.min_distance));
        let mut points = Vec::new();

        let center = self.index.centroid().unwrap_or((0.0, 0.0));
        let map_radius = self.index.bounds().map_or(0.0, |bounds| {
            let width = i64::from(bounds.max_q) - i64::from(bounds.min_q);
            let height = i64::from(bounds.max_r) - i64::from(bounds.min_r);
            width.max(height) as f64 / 2.0
        });

        let mut radius = map_radius + min_distance;
        for attempt in 0..self.config.max_ring_attempts {
            if points.len() >= target {
                break;
            }
            let candidates = {
                let mut rng = lock(&self.rng);
                generator::ring_candidates(&mut *rng, center, radius, min_distance)
            };
            let found = self.accept(candidates, &accepted, &mut points)?;
            debug!(attempt, radius, found, "searched spawn ring");
            radius = generator::next_ring_radius(radius, min_distance, attempt);
            tokio::task::yield_now().await;
        }

        if points.len() < target {
            let search = match self.index.bounds() {
                Some(bounds) => bounds,
                None => AxialBounds::around(Coord::new(0, 0), 0),
            }
            .expanded(self.config.min_distance.saturating_mul(2));
            for window in self.index.empty_sectors(search, FALLBACK_SECTORS) {
                if points.len() >= target {
                    break;
                }
                let candidates = {
                    let mut rng = lock(&self.rng);
                    generator::window_candidates(&mut *rng, window, FALLBACK_POINTS_PER_SECTOR)
                };
                let _ = self.accept(candidates, &accepted, &mut points)?;
            }
            tokio::task::yield_now().await;
        }

        // Joins that completed during the search were recorded after the rebuild.
        points.retain(|point| self.index.is_far_enough(*point, self.config.min_distance));
        Ok(points)
    }

    fn accept(
        &self,
        candidates: Vec<Coord>,
        accepted: &OccupancyIndex,
        points: &mut Vec<Coord>,
    ) -> Result<usize, SpawnError> {
        let min_distance = self.config.min_distance;
        let mut found = 0;
        for candidate in candidates {
            if points.len() >= self.config.target_size {
                break;
            }
            if !accepted.is_far_enough(candidate, min_distance) || !self.is_valid(candidate)? {
                continue;
            }
            accepted.record_occupied(candidate);
            points.push(candidate);
            found += 1;
        }
        Ok(found)
    }

    fn persist(&self, points: &[Coord]) {
        let Some(path) = self.config.cache_path.as_ref() else {
            return;
        };
        let pairs: Vec<[i32; 2]> = points.iter().map(|point| [point.q(), point.r()]).collect();
        let written = serde_json::to_string(&pairs)
            .map_err(SpawnError::from)
            .and_then(|json| std::fs::write(path, json).map_err(SpawnError::from));
        if let Err(error) = written {
            warn!(%error, path = %path.display(), "failed to persist spawn pool");
        }
    }

    /// Pool, index and generation counters.
    #[must_use]
    pub fn stats(&self) -> SpawnStats {
        SpawnStats {
            pool_size: self.pool_len(),
            sectors: self.index.sector_count(),
            generating: self.generating.load(Ordering::Acquire),
            generations: self.epoch.load(Ordering::Acquire),
            last_rebuild: self.index.rebuild_age(),
        }
    }
}

// Lowered on drop, so a cancelled generation does not stay reported as running.
struct GeneratingFlag<'a>(&'a AtomicBool);

impl<'a> GeneratingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for GeneratingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
