#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Sectorized occupancy index used to reject crowded spawn candidates.
//!
//! Occupied coordinates are bucketed into square sectors of `sector_size`
//! axial cells. A separation query only inspects the candidate's own sector
//! and the ring of sectors that can hold a tile closer than the requested
//! distance, which is the surrounding 3×3 block whenever the sector size is at
//! least that distance.
//!
//! The index is rebuilt wholesale from a store snapshot and appended to
//! between rebuilds. A rebuild assembles the new sector map off to the side
//! and swaps it in under the write lock, so queries never observe a partially
//! built map. Coordinates recorded while a rebuild's snapshot is being taken
//! are journaled and replayed into the new map before the swap.

use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, Instant},
};

use hexfront_core::{AxialBounds, Coord};
use tracing::debug;

const DEFAULT_SECTOR_SIZE: u32 = 200;

/// Configuration parameters for the occupancy index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    sector_size: u32,
}

impl Config {
    /// Creates a configuration with the given sector edge length.
    #[must_use]
    pub const fn new(sector_size: u32) -> Self {
        Self {
            sector_size: if sector_size == 0 { 1 } else { sector_size },
        }
    }

    /// Widens the sector edge so a neighbourhood of `min_distance` spans at most 3×3 sectors.
    #[must_use]
    pub const fn covering(self, min_distance: u32) -> Self {
        if self.sector_size >= min_distance {
            self
        } else {
            Self::new(min_distance)
        }
    }

    /// Sector edge length in axial cells.
    #[must_use]
    pub const fn sector_size(&self) -> u32 {
        self.sector_size
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_SECTOR_SIZE)
    }
}

/// Coarse bucket identifier: `(floor(q / S), floor(r / S))`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectorKey {
    q: i32,
    r: i32,
}

impl SectorKey {
    /// Sector column.
    #[must_use]
    pub const fn q(&self) -> i32 {
        self.q
    }

    /// Sector row.
    #[must_use]
    pub const fn r(&self) -> i32 {
        self.r
    }
}

#[derive(Debug, Default)]
struct SectorMap {
    buckets: HashMap<SectorKey, HashSet<Coord>>,
    bounds: Option<AxialBounds>,
    sum_q: i64,
    sum_r: i64,
    count: usize,
    rebuilt_at: Option<Instant>,
}

impl SectorMap {
    fn insert(&mut self, key: SectorKey, coord: Coord) -> bool {
        if !self.buckets.entry(key).or_default().insert(coord) {
            return false;
        }
        self.count += 1;
        self.sum_q += i64::from(coord.q());
        self.sum_r += i64::from(coord.r());
        self.bounds = Some(match self.bounds {
            Some(bounds) => AxialBounds {
                min_q: bounds.min_q.min(coord.q()),
                max_q: bounds.max_q.max(coord.q()),
                min_r: bounds.min_r.min(coord.r()),
                max_r: bounds.max_r.max(coord.r()),
            },
            None => AxialBounds {
                min_q: coord.q(),
                max_q: coord.q(),
                min_r: coord.r(),
                max_r: coord.r(),
            },
        });
        true
    }
}

// Recordings made while at least one rebuild is between snapshot and swap.
#[derive(Debug, Default)]
struct Journal {
    open: usize,
    recorded: Vec<Coord>,
}

/// Process-wide set of occupied coordinates bucketed by sector.
#[derive(Debug)]
pub struct OccupancyIndex {
    sector_size: i32,
    map: RwLock<SectorMap>,
    journal: Mutex<Journal>,
}

impl OccupancyIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            sector_size: i32::try_from(config.sector_size()).unwrap_or(i32::MAX),
            map: RwLock::new(SectorMap::default()),
            journal: Mutex::new(Journal::default()),
        }
    }

    /// Sector containing the coordinate.
    #[must_use]
    pub fn sector_key(&self, coord: Coord) -> SectorKey {
        SectorKey {
            q: coord.q().div_euclid(self.sector_size),
            r: coord.r().div_euclid(self.sector_size),
        }
    }

    /// Replaces the whole index with the provided occupied set.
    pub fn rebuild(&self, occupied: impl IntoIterator<Item = Coord>) {
        let _ = self.rebuild_from(|| Ok::<_, Infallible>(occupied.into_iter().collect()));
    }

    /// Replaces the whole index with the set returned by `snapshot`.
    ///
    /// Anything passed to [`record_occupied`](Self::record_occupied) after the
    /// snapshot starts survives the swap. Returns the number of indexed tiles.
    pub fn rebuild_from<E>(
        &self,
        snapshot: impl FnOnce() -> Result<Vec<Coord>, E>,
    ) -> Result<usize, E> {
        let mark = {
            let mut journal = self.journal();
            journal.open += 1;
            journal.recorded.len()
        };
        let occupied = match snapshot() {
            Ok(occupied) => occupied,
            Err(error) => {
                Self::close(&mut self.journal());
                return Err(error);
            }
        };

        let mut fresh = SectorMap::default();
        for coord in occupied {
            let _ = fresh.insert(self.sector_key(coord), coord);
        }

        let mut map = self.write();
        let mut journal = self.journal();
        let replayed = journal.recorded.len() - mark;
        for &coord in &journal.recorded[mark..] {
            let _ = fresh.insert(self.sector_key(coord), coord);
        }
        Self::close(&mut journal);
        fresh.rebuilt_at = Some(Instant::now());
        let tiles = fresh.count;
        let sectors = fresh.buckets.len();
        *map = fresh;

        debug!(tiles, sectors, replayed, "occupancy index rebuilt");
        Ok(tiles)
    }

    fn close(journal: &mut Journal) {
        journal.open = journal.open.saturating_sub(1);
        if journal.open == 0 {
            journal.recorded.clear();
        }
    }

    /// Adds a freshly occupied coordinate without waiting for a rebuild.
    pub fn record_occupied(&self, coord: Coord) {
        let key = self.sector_key(coord);
        let mut map = self.write();
        let _ = map.insert(key, coord);
        let mut journal = self.journal();
        if journal.open > 0 {
            journal.recorded.push(coord);
        }
    }

    /// Reports whether every indexed tile is at least `min_distance` away.
    #[must_use]
    pub fn is_far_enough(&self, coord: Coord, min_distance: u32) -> bool {
        if min_distance == 0 {
            return true;
        }
        let center = self.sector_key(coord);
        let span = self.sector_span(min_distance);
        let map = self.read();

        for dq in -span..=span {
            for dr in -span..=span {
                let key = SectorKey {
                    q: center.q.saturating_add(dq),
                    r: center.r.saturating_add(dr),
                };
                let Some(bucket) = map.buckets.get(&key) else {
                    continue;
                };
                if bucket
                    .iter()
                    .any(|occupied| occupied.distance(coord) < min_distance)
                {
                    return false;
                }
            }
        }
        true
    }

    // Any tile closer than `min_distance` differs by less than that on both
    // axial axes, so it lives within this many sectors of the candidate.
    fn sector_span(&self, min_distance: u32) -> i32 {
        let size = u32::try_from(self.sector_size).unwrap_or(u32::MAX);
        i32::try_from(min_distance.div_ceil(size).max(1)).unwrap_or(i32::MAX)
    }

    /// Cell windows of sectors inside `bounds` that hold no occupied tile.
    #[must_use]
    pub fn empty_sectors(&self, bounds: AxialBounds, limit: usize) -> Vec<AxialBounds> {
        let low = self.sector_key(Coord::new(bounds.min_q, bounds.min_r));
        let high = self.sector_key(Coord::new(bounds.max_q, bounds.max_r));
        let size = self.sector_size;
        let map = self.read();

        let mut windows = Vec::new();
        for sq in low.q..=high.q {
            for sr in low.r..=high.r {
                if windows.len() >= limit {
                    return windows;
                }
                let key = SectorKey { q: sq, r: sr };
                if map.buckets.get(&key).is_some_and(|bucket| !bucket.is_empty()) {
                    continue;
                }
                let min_q = sq.saturating_mul(size);
                let min_r = sr.saturating_mul(size);
                windows.push(AxialBounds {
                    min_q: min_q.max(bounds.min_q),
                    max_q: min_q.saturating_add(size - 1).min(bounds.max_q),
                    min_r: min_r.max(bounds.min_r),
                    max_r: min_r.saturating_add(size - 1).min(bounds.max_r),
                });
            }
        }
        windows
    }

    /// Smallest window containing every indexed tile.
    #[must_use]
    pub fn bounds(&self) -> Option<AxialBounds> {
        self.read().bounds
    }

    /// Mean axial position of every indexed tile.
    #[must_use]
    pub fn centroid(&self) -> Option<(f64, f64)> {
        let map = self.read();
        if map.count == 0 {
            return None;
        }
        let count = map.count as f64;
        Some((map.sum_q as f64 / count, map.sum_r as f64 / count))
    }

    /// Number of indexed tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().count
    }

    /// Reports whether nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().count == 0
    }

    /// Number of non-empty sectors.
    #[must_use]
    pub fn sector_count(&self) -> usize {
        self.read().buckets.len()
    }

    /// Time elapsed since the last wholesale rebuild.
    #[must_use]
    pub fn rebuild_age(&self) -> Option<Duration> {
        self.read().rebuilt_at.map(|at| at.elapsed())
    }

    /// Reports whether the index was never rebuilt or is older than `max_age`.
    #[must_use]
    pub fn needs_rebuild(&self, max_age: Duration) -> bool {
        self.rebuild_age().map_or(true, |age| age >= max_age)
    }

    fn read(&self) -> RwLockReadGuard<'_, SectorMap> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SectorMap> {
        self.map.write().unwrap_or_else(PoisonError::into_inner)
    }

    // Always taken after the map lock when both are held.
    fn journal(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_keys_floor_negative_coordinates() {
        let index = OccupancyIndex::new(Config::new(200));
        let key = index.sector_key(Coord::new(-1, 199));
        assert_eq!((key.q(), key.r()), (-1, 0));
        let key = index.sector_key(Coord::new(-200, -201));
        assert_eq!((key.q(), key.r()), (-1, -2));
    }

    #[test]
    fn span_widens_when_sectors_are_small() {
        let index = OccupancyIndex::new(Config::new(10));
        assert_eq!(index.sector_span(150), 15);
        assert_eq!(index.sector_span(5), 1);
    }

    #[test]
    fn covering_widens_sector_size() {
        assert_eq!(Config::new(100).covering(150).sector_size(), 150);
        assert_eq!(Config::new(200).covering(150).sector_size(), 200);
    }

    #[test]
    fn recordings_during_a_snapshot_survive_the_swap() {
        let index = OccupancyIndex::new(Config::default());
        let tiles = index
            .rebuild_from(|| {
                index.record_occupied(Coord::new(5_000, 0));
                Ok::<_, Infallible>(vec![Coord::new(0, 0)])
            })
            .unwrap();

        assert_eq!(tiles, 2);
        assert!(!index.is_far_enough(Coord::new(5_010, 0), 150));
        assert!(index.journal().recorded.is_empty(), "journal closes with the rebuild");
    }

    #[test]
    fn failed_snapshot_keeps_the_previous_map() {
        let index = OccupancyIndex::new(Config::default());
        index.rebuild([Coord::new(0, 0)]);
        let failed = index.rebuild_from(|| Err::<Vec<Coord>, _>("store offline"));

        assert_eq!(failed, Err("store offline"));
        assert_eq!(index.len(), 1);
        assert_eq!(index.journal().open, 0);
    }

    #[test]
    fn duplicate_records_are_ignored() {
        let index = OccupancyIndex::new(Config::default());
        index.record_occupied(Coord::new(1, 1));
        index.record_occupied(Coord::new(1, 1));
        assert_eq!(index.len(), 1);
        assert_eq!(index.centroid(), Some((1.0, 1.0)));
    }
}
