//! TOML settings file mapped onto [`EngineConfig`].

use std::{fs, path::Path, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use hexfront_engine::EngineConfig;
use hexfront_system_bonus::Config as BonusConfig;
use hexfront_system_cascade::Config as CascadeConfig;
use hexfront_system_occupancy::Config as OccupancyConfig;
use hexfront_system_spawning::Config as SpawnConfig;
use hexfront_world::StoreConfig;
use serde::Deserialize;

/// Every tunable the server reads at start-up.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Settings {
    pub(crate) database: Option<PathBuf>,
    pub(crate) store: StoreSettings,
    pub(crate) spawning: SpawnSettings,
    pub(crate) bonus: BonusSettings,
    pub(crate) cascade: CascadeSettings,
    pub(crate) schedule: ScheduleSettings,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct StoreSettings {
    cache_ttl_secs: u64,
    cache_capacity: usize,
    high_water_mark: usize,
    max_region_radius: u32,
    max_region_tiles: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 10,
            cache_capacity: 200_000,
            high_water_mark: 2_000,
            max_region_radius: 100,
            max_region_tiles: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct SpawnSettings {
    min_distance: u32,
    sector_size: Option<u32>,
    target_size: usize,
    low_watermark: usize,
    maintenance_floor: usize,
    max_ring_attempts: u32,
    sector_refresh_secs: u64,
    cache_path: Option<PathBuf>,
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            min_distance: 150,
            sector_size: None,
            target_size: 500,
            low_watermark: 50,
            maintenance_floor: 100,
            max_ring_attempts: 10,
            sector_refresh_secs: 300,
            cache_path: Some(PathBuf::from("spawn_cache.json")),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct BonusSettings {
    radius: u32,
    attempts: u32,
    max_per_cycle: usize,
    density_limit: f64,
    initial_count: usize,
    initial_radius: u32,
}

impl Default for BonusSettings {
    fn default() -> Self {
        Self {
            radius: 50,
            attempts: 50,
            max_per_cycle: 64,
            density_limit: 0.025,
            initial_count: 100,
            initial_radius: 50,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct CascadeSettings {
    max_visited: usize,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self { max_visited: 4_096 }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ScheduleSettings {
    flush_ms: u64,
    decay_secs: u64,
    bonus_secs: u64,
    maintenance_secs: u64,
    leaderboard_size: usize,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            flush_ms: 1_000,
            decay_secs: 30,
            bonus_secs: 60,
            maintenance_secs: 60,
            leaderboard_size: 5,
        }
    }
}

impl Settings {
    /// Reads `path`, falling back to defaults for anything it leaves out.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings at {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("invalid settings in {}", path.display()))
    }

    pub(crate) fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse settings toml")
    }

    /// Builds the engine configuration, seeding every random source from
    /// `seed` when one is given.
    pub(crate) fn engine_config(&self, seed: Option<u64>) -> EngineConfig {
        let spawn = &self.spawning;
        let mut spawning = SpawnConfig::default()
            .with_min_distance(spawn.min_distance)
            .with_target_size(spawn.target_size)
            .with_low_watermark(spawn.low_watermark)
            .with_maintenance_floor(spawn.maintenance_floor)
            .with_max_ring_attempts(spawn.max_ring_attempts)
            .with_sector_refresh(Duration::from_secs(spawn.sector_refresh_secs));
        if let Some(path) = &spawn.cache_path {
            spawning = spawning.with_cache_path(path.clone());
        }

        let bonus = &self.bonus;
        let mut bonus_config = BonusConfig::default()
            .with_radius(bonus.radius)
            .with_attempts(bonus.attempts)
            .with_max_per_cycle(bonus.max_per_cycle)
            .with_density_limit(bonus.density_limit)
            .with_initial_count(bonus.initial_count)
            .with_initial_radius(bonus.initial_radius);

        if let Some(seed) = seed {
            spawning = spawning.with_rng_seed(seed);
            bonus_config = bonus_config.with_rng_seed(seed.wrapping_add(1));
        }

        let occupancy = spawn
            .sector_size
            .map_or_else(OccupancyConfig::default, OccupancyConfig::new)
            .covering(spawn.min_distance);

        let store = &self.store;
        let schedule = &self.schedule;
        EngineConfig {
            store: StoreConfig::default()
                .with_cache_ttl(Duration::from_secs(store.cache_ttl_secs))
                .with_cache_capacity(store.cache_capacity)
                .with_high_water_mark(store.high_water_mark)
                .with_max_region_radius(store.max_region_radius)
                .with_max_region_tiles(store.max_region_tiles),
            occupancy,
            spawning,
            cascade: CascadeConfig::new(self.cascade.max_visited),
            bonus: bonus_config,
            flush_interval: Duration::from_millis(schedule.flush_ms),
            decay_interval: Duration::from_secs(schedule.decay_secs),
            bonus_interval: Duration::from_secs(schedule.bonus_secs),
            maintenance_interval: Duration::from_secs(schedule.maintenance_secs),
            leaderboard_size: schedule.leaderboard_size,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let settings = Settings::parse("").expect("empty settings parse");
        assert_eq!(settings, Settings::default());

        let config = settings.engine_config(None);
        assert_eq!(config.spawning.min_distance(), 150);
        assert_eq!(config.store.high_water_mark(), 2_000);
        assert_eq!(config.decay_interval, Duration::from_secs(30));
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let settings = Settings::parse(
            r#"
            database = "world.db"

            [spawning]
            min_distance = 40

            [schedule]
            decay_secs = 5
            "#,
        )
        .expect("settings parse");

        assert_eq!(settings.database, Some(PathBuf::from("world.db")));
        let config = settings.engine_config(Some(7));
        assert_eq!(config.spawning.min_distance(), 40);
        assert_eq!(config.decay_interval, Duration::from_secs(5));
        assert_eq!(config.bonus_interval, Duration::from_secs(60));
        assert_eq!(config.occupancy.sector_size(), 200);
    }

    #[test]
    fn sectors_widen_to_cover_the_separation_distance() {
        let settings = Settings::parse("[spawning]\nmin_distance = 300\nsector_size = 50\n")
            .expect("settings parse");
        assert_eq!(settings.engine_config(None).occupancy.sector_size(), 300);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Settings::parse("[store]\nttl = 3\n").is_err());
    }
}
