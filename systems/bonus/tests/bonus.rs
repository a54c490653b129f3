use std::{collections::HashSet, convert::Infallible};

use hexfront_core::{ChangeSet, Coord, Territory, Tile, Username};
use hexfront_system_bonus::{density, BonusPlacer, Config};

fn name(value: &str) -> Username {
    Username::parse(value).expect("valid username")
}

fn seeded() -> Config {
    Config::default().with_rng_seed(0xb0b0)
}

#[test]
fn initial_scatter_places_distinct_vacant_cells() {
    let mut placer = BonusPlacer::new(seeded().with_initial_count(30));
    let capital = Coord::new(500, -500);
    let blocked = Coord::new(501, -500);

    let placed = placer
        .initial_scatter(capital, |coord| Ok::<_, Infallible>(coord != blocked))
        .unwrap();

    assert_eq!(placed.len(), 30, "an open map fills every slot");
    let unique: HashSet<Coord> = placed.iter().copied().collect();
    assert_eq!(unique.len(), placed.len(), "no cell is placed twice");
    assert!(!unique.contains(&blocked));
    assert!(!unique.contains(&capital));
}

#[test]
fn cycle_places_at_most_one_per_player_and_respects_cap() {
    let players: Vec<Username> = (0..5).map(|index| name(&format!("p{index}"))).collect();
    let mut territory = Territory::new();
    for (index, player) in players.iter().enumerate() {
        let offset = i32::try_from(index).unwrap() * 1_000;
        territory.insert(Coord::new(offset, 0), Tile::owned(player.clone(), 1));
    }

    let mut placer = BonusPlacer::new(seeded().with_max_per_cycle(3));
    let mut changes = ChangeSet::new();
    let report = placer.plan_cycle(&territory, &players, &mut changes);

    assert_eq!(report.placed, 3);
    assert_eq!(changes.len(), 3);
    for (coord, tile) in changes.iter() {
        assert_eq!(tile, Some(&Tile::bonus()));
        assert!(territory.tile(coord).is_none(), "bonus tiles land on vacant cells");
    }
}

#[test]
fn saturated_players_are_skipped() {
    let alice = name("alice");
    let mut territory = Territory::new();
    territory.insert(Coord::new(0, 0), Tile::owned(alice.clone(), 1));
    // A 3x3 window (radius 1) around one tile has 8 free cells.
    territory.insert(Coord::new(1, 0), Tile::bonus());

    let ratio = density(&territory, &alice, &[Coord::new(0, 0)], 1);
    assert!((ratio - 1.0 / 8.0).abs() < 1e-9);

    let mut placer = BonusPlacer::new(seeded().with_radius(1).with_density_limit(0.1));
    let mut changes = ChangeSet::new();
    let report = placer.plan_cycle(&territory, &[alice], &mut changes);
    assert_eq!(report.saturated, 1);
    assert!(changes.is_empty());
}

#[test]
fn players_without_tiles_receive_nothing() {
    let mut placer = BonusPlacer::new(seeded());
    let mut changes = ChangeSet::new();
    let report = placer.plan_cycle(&Territory::new(), &[name("ghost")], &mut changes);
    assert_eq!(report.placed, 0);
    assert!(changes.is_empty());
}
