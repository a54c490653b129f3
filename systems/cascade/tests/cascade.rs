use std::{collections::HashMap, convert::Infallible};

use hexfront_core::{ChangeSet, Coord, Tile, Username};
use hexfront_system_cascade::{cascade, CascadeOutcome, Config};

fn name(value: &str) -> Username {
    Username::parse(value).expect("valid username")
}

struct Map {
    tiles: HashMap<Coord, Tile>,
    capitals: Vec<Coord>,
}

impl Map {
    fn new() -> Self {
        Self {
            tiles: HashMap::new(),
            capitals: Vec::new(),
        }
    }

    fn put(&mut self, coord: Coord, tile: Tile) {
        let _ = self.tiles.insert(coord, tile);
    }

    fn run(&self, trigger: Coord, actor: &Username, config: Config) -> CascadeOutcome {
        cascade(
            trigger,
            actor,
            &config,
            |coord| Ok::<_, Infallible>(self.tiles.get(&coord).cloned()),
            |coord| self.capitals.contains(&coord),
        )
        .unwrap()
    }

    fn apply(&mut self, changes: &ChangeSet) {
        for (coord, tile) in changes.iter() {
            match tile {
                Some(tile) => self.put(coord, tile.clone()),
                None => {
                    let _ = self.tiles.remove(&coord);
                }
            }
        }
    }
}

#[test]
fn bonus_chain_resolves_in_one_change_set() {
    let alice = name("alice");
    let mut map = Map::new();
    for q in 0..4 {
        map.put(Coord::new(q, 0), Tile::bonus());
    }

    let outcome = map.run(Coord::new(0, 0), &alice, Config::default());

    assert_eq!(outcome.visited, 4, "trigger plus three chained bonus tiles");
    assert!(!outcome.truncated);
    for q in 0..4 {
        let tile = outcome
            .changes
            .get(Coord::new(q, 0))
            .flatten()
            .expect("chained tile captured");
        assert!(tile.is_owned_by(&alice));
        assert!(!tile.has_bonus, "bonus flag cleared on capture");
    }
    assert!(outcome
        .changes
        .iter()
        .all(|(_, tile)| tile.is_some_and(|tile| !tile.has_bonus)));
}

#[test]
fn capitals_are_immune_and_enemies_weaken() {
    let alice = name("alice");
    let bob = name("bob");
    let mut map = Map::new();
    map.put(Coord::new(0, 0), Tile::bonus());
    map.put(Coord::new(1, 0), Tile::owned(bob.clone(), 1));
    map.capitals.push(Coord::new(1, 0));
    map.put(Coord::new(-1, 0), Tile::owned(bob.clone(), 5));
    map.put(Coord::new(0, 1), Tile::owned(bob.clone(), 1));
    map.put(Coord::new(0, -1), Tile::owned(alice.clone(), 2));

    let outcome = map.run(Coord::new(0, 0), &alice, Config::default());
    let changes = &outcome.changes;

    assert!(changes.get(Coord::new(1, 0)).is_none(), "capital untouched");
    assert_eq!(
        changes.get(Coord::new(-1, 0)),
        Some(Some(&Tile::owned(bob, 4)))
    );
    assert_eq!(
        changes.get(Coord::new(0, 1)),
        Some(Some(&Tile::owned(alice.clone(), 1))),
        "single-population enemy tile is captured"
    );
    assert_eq!(
        changes.get(Coord::new(0, -1)),
        Some(Some(&Tile::owned(alice, 3))),
        "own tile gains population"
    );
}

#[test]
fn rerunning_a_resolved_trigger_never_drops_below_one() {
    let alice = name("alice");
    let bob = name("bob");
    let mut map = Map::new();
    map.put(Coord::new(0, 0), Tile::bonus());
    map.put(Coord::new(1, 0), Tile::bonus());
    map.put(Coord::new(-1, 0), Tile::owned(bob, 2));

    let first = map.run(Coord::new(0, 0), &alice, Config::default());
    map.apply(&first.changes);
    let second = map.run(Coord::new(0, 0), &alice, Config::default());

    assert_eq!(second.visited, 1, "no bonus flags remain to chain through");
    assert!(second.changes.get(Coord::new(0, 0)).is_none(), "trigger left as is");
    for (_, tile) in second.changes.iter() {
        let tile = tile.expect("cascades never delete tiles");
        assert!(tile.population >= 1);
        assert!(!tile.has_bonus);
    }
}

#[test]
fn visit_cap_truncates_long_chains() {
    let alice = name("alice");
    let mut map = Map::new();
    for q in 0..20 {
        map.put(Coord::new(q, 0), Tile::bonus());
    }

    let outcome = map.run(Coord::new(0, 0), &alice, Config::new(5));
    assert!(outcome.truncated);
    assert_eq!(outcome.visited, 5);
    assert!(
        outcome.changes.get(Coord::new(19, 0)).is_none(),
        "tiles beyond the cap are not reached"
    );
}

#[test]
fn chained_bonus_tiles_reset_when_expanded() {
    let alice = name("alice");
    let mut map = Map::new();
    map.put(Coord::new(0, 0), Tile::bonus());
    // Adjacent to the trigger and to each other.
    map.put(Coord::new(1, 0), Tile::bonus());
    map.put(Coord::new(1, -1), Tile::bonus());

    let outcome = map.run(Coord::new(0, 0), &alice, Config::default());

    assert_eq!(outcome.visited, 3);
    assert_eq!(
        outcome.changes.get(Coord::new(1, -1)),
        Some(Some(&Tile::owned(alice.clone(), 1))),
        "expanded last, so nothing grows it afterwards"
    );
    assert_eq!(
        outcome.changes.get(Coord::new(1, 0)),
        Some(Some(&Tile::owned(alice.clone(), 2))),
        "grown once by its chained neighbour after its own reset"
    );
    assert_eq!(
        outcome.changes.get(Coord::new(0, 0)),
        Some(Some(&Tile::owned(alice, 3))),
        "trigger grows once per expanded neighbour"
    );
}

#[test]
fn queued_bonus_tiles_beyond_the_cap_keep_their_flag() {
    let alice = name("alice");
    let mut map = Map::new();
    for q in 0..3 {
        map.put(Coord::new(q, 0), Tile::bonus());
    }

    let outcome = map.run(Coord::new(0, 0), &alice, Config::new(1));
    assert!(outcome.truncated);
    assert!(
        outcome.changes.get(Coord::new(1, 0)).is_none(),
        "an unexpanded bonus tile is left for a later cascade"
    );
}
