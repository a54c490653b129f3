#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Bonus-tile placement around player territory.
//!
//! Bonus tiles are scattered at random polar offsets from a player's tiles:
//! a batch around every new capital, and a bounded number per periodic cycle.
//! A density cap keeps a player's surroundings from filling up with unclaimed
//! bonus tiles.

use std::{collections::HashSet, f64::consts::TAU};

use hexfront_core::{AxialBounds, ChangeSet, Coord, Territory, Tile, Username};
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

const DEFAULT_RADIUS: u32 = 50;
const DEFAULT_ATTEMPTS: u32 = 50;
const DEFAULT_MAX_PER_CYCLE: usize = 64;
const DEFAULT_DENSITY_LIMIT: f64 = 0.025;
const DEFAULT_INITIAL_COUNT: usize = 100;
const DEFAULT_INITIAL_RADIUS: u32 = 50;

/// Configuration parameters for bonus placement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    radius: u32,
    attempts: u32,
    max_per_cycle: usize,
    density_limit: f64,
    initial_count: usize,
    initial_radius: u32,
    rng_seed: Option<u64>,
}

impl Config {
    /// Replaces the scatter radius used by periodic placement.
    #[must_use]
    pub const fn with_radius(mut self, radius: u32) -> Self {
        self.radius = radius;
        self
    }

    /// Replaces the number of random offsets tried per placement.
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Replaces the cap on placements per periodic cycle.
    #[must_use]
    pub const fn with_max_per_cycle(mut self, max_per_cycle: usize) -> Self {
        self.max_per_cycle = max_per_cycle;
        self
    }

    /// Replaces the bonus density at which a player stops receiving tiles.
    #[must_use]
    pub const fn with_density_limit(mut self, density_limit: f64) -> Self {
        self.density_limit = density_limit;
        self
    }

    /// Replaces the number of bonus tiles scattered around a new capital.
    #[must_use]
    pub const fn with_initial_count(mut self, initial_count: usize) -> Self {
        self.initial_count = initial_count;
        self
    }

    /// Replaces the radius of the scatter around a new capital.
    #[must_use]
    pub const fn with_initial_radius(mut self, initial_radius: u32) -> Self {
        self.initial_radius = initial_radius;
        self
    }

    /// Seeds placement for reproducible runs.
    #[must_use]
    pub const fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Radius of the scatter around a new capital.
    #[must_use]
    pub const fn initial_radius(&self) -> u32 {
        self.initial_radius
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            radius: DEFAULT_RADIUS,
            attempts: DEFAULT_ATTEMPTS,
            max_per_cycle: DEFAULT_MAX_PER_CYCLE,
            density_limit: DEFAULT_DENSITY_LIMIT,
            initial_count: DEFAULT_INITIAL_COUNT,
            initial_radius: DEFAULT_INITIAL_RADIUS,
            rng_seed: None,
        }
    }
}

/// Tally of one periodic placement cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BonusReport {
    /// Bonus tiles placed.
    pub placed: usize,
    /// Players skipped because their surroundings were saturated.
    pub saturated: usize,
}

/// Stateful bonus placer owning its random stream.
#[derive(Debug)]
pub struct BonusPlacer {
    config: Config,
    rng: ChaCha8Rng,
}

impl BonusPlacer {
    /// Creates a placer using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { config, rng }
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Tries `attempts` random offsets within `radius` of `center` and returns
    /// the first one `is_vacant` accepts.
    pub fn scatter_around<F, E>(
        &mut self,
        center: Coord,
        radius: u32,
        attempts: u32,
        mut is_vacant: F,
    ) -> Result<Option<Coord>, E>
    where
        F: FnMut(Coord) -> Result<bool, E>,
    {
        if radius == 0 {
            return Ok(None);
        }
        for _ in 0..attempts {
            let angle = self.rng.gen_range(0.0..TAU);
            let distance = self.rng.gen_range(1.0..=f64::from(radius));
            let candidate = Coord::new(
                center.q().saturating_add((distance * angle.cos()).round() as i32),
                center.r().saturating_add((distance * angle.sin()).round() as i32),
            );
            if candidate != center && is_vacant(candidate)? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Picks up to the configured number of vacant cells around a new capital.
    pub fn initial_scatter<F, E>(&mut self, capital: Coord, mut is_vacant: F) -> Result<Vec<Coord>, E>
    where
        F: FnMut(Coord) -> Result<bool, E>,
    {
        let mut placed = HashSet::new();
        let mut ordered = Vec::new();
        for _ in 0..self.config.initial_count {
            let found = self.scatter_around(
                capital,
                self.config.initial_radius,
                self.config.attempts,
                |candidate| {
                    if placed.contains(&candidate) {
                        return Ok(false);
                    }
                    is_vacant(candidate)
                },
            )?;
            if let Some(coord) = found {
                let _ = placed.insert(coord);
                ordered.push(coord);
            }
        }
        Ok(ordered)
    }

    /// Places at most one bonus tile per player, up to the per-cycle cap,
    /// recording each into `out`.
    pub fn plan_cycle(
        &mut self,
        territory: &Territory,
        players: &[Username],
        out: &mut ChangeSet,
    ) -> BonusReport {
        let mut report = BonusReport::default();
        let owned = territory.by_owner();
        let mut order: Vec<&Username> = players.iter().collect();
        order.shuffle(&mut self.rng);

        for player in order {
            if report.placed >= self.config.max_per_cycle {
                break;
            }
            let Some(tiles) = owned.get(player) else {
                continue;
            };
            if tiles.is_empty() {
                continue;
            }
            if density(territory, player, tiles, self.config.radius) >= self.config.density_limit {
                report.saturated += 1;
                continue;
            }

            let anchor = tiles[self.rng.gen_range(0..tiles.len())];
            let found = self.scatter_around(
                anchor,
                self.config.radius,
                self.config.attempts,
                |candidate| {
                    Ok::<_, std::convert::Infallible>(
                        territory.tile(candidate).is_none() && !out.contains(candidate),
                    )
                },
            );
            if let Ok(Some(coord)) = found {
                out.set(coord, Tile::bonus());
                report.placed += 1;
            }
        }

        debug!(placed = report.placed, saturated = report.saturated, "bonus cycle planned");
        report
    }
}

/// Share of free cells around `player`'s territory already holding an
/// unclaimed bonus tile.
///
/// The window is the territory's bounding box grown by `radius`; the
/// denominator excludes the player's own tiles. A window with no free cells
/// counts as saturated.
#[must_use]
pub fn density(territory: &Territory, player: &Username, tiles: &[Coord], radius: u32) -> f64 {
    let Some(window) = AxialBounds::enclosing(tiles.iter().copied()).map(|b| b.expanded(radius))
    else {
        return 0.0;
    };

    let mut bonus = 0_u64;
    let mut own = 0_u64;
    for (coord, tile) in territory.iter() {
        if !window.contains(coord) {
            continue;
        }
        if tile.is_owned_by(player) {
            own += 1;
        } else if tile.owner.is_none() && tile.has_bonus {
            bonus += 1;
        }
    }

    let free = window.area().saturating_sub(own);
    if free == 0 {
        return f64::INFINITY;
    }
    bonus as f64 / free as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scatter_stays_within_radius() {
        let mut placer = BonusPlacer::new(Config::default().with_rng_seed(3));
        let center = Coord::new(-20, 40);
        for _ in 0..50 {
            let found = placer
                .scatter_around(center, 50, 10, |_| Ok::<_, std::convert::Infallible>(true))
                .unwrap()
                .expect("an always-vacant map yields a cell");
            assert!(found.distance(center) <= 100, "{found} strayed too far");
            assert_ne!(found, center);
        }
    }

    #[test]
    fn zero_radius_places_nothing() {
        let mut placer = BonusPlacer::new(Config::default().with_rng_seed(3));
        let found = placer
            .scatter_around(Coord::new(0, 0), 0, 10, |_| Ok::<_, std::convert::Infallible>(true))
            .unwrap();
        assert!(found.is_none());
    }
}
