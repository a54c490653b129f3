use hexfront_core::{ChangeSet, Coord, Territory, Tile, Username};
use hexfront_system_connectivity::{connected_tiles, decay};

fn name(value: &str) -> Username {
    Username::parse(value).expect("valid username")
}

/// Alice owns a blob around the origin plus (3, 0), cut off by Bob at (2, 0).
fn wedged_map() -> (Territory, Username, Username) {
    let alice = name("alice");
    let bob = name("bob");
    let mut territory = Territory::new();
    for coord in [Coord::new(0, 0), Coord::new(1, 0), Coord::new(0, 1)] {
        territory.insert(coord, Tile::owned(alice.clone(), 2));
    }
    territory.insert(Coord::new(3, 0), Tile::owned(alice.clone(), 3));
    territory.insert(Coord::new(2, 0), Tile::owned(bob.clone(), 1));
    // Bob's capital is far away; his wedge is itself disconnected.
    territory.insert(Coord::new(40, 40), Tile::owned(bob.clone(), 1));
    (territory, alice, bob)
}

fn alice_reach(territory: &Territory, alice: &Username) -> std::collections::HashSet<Coord> {
    connected_tiles(Coord::new(0, 0), |cell| territory.owner_at(cell) == Some(alice))
}

#[test]
fn enemy_wedge_severs_and_neutral_gap_reconnects() {
    let (mut territory, alice, _) = wedged_map();
    let reached = alice_reach(&territory, &alice);
    assert!(!reached.contains(&Coord::new(3, 0)), "wedge must sever");
    assert_eq!(reached.len(), 3);

    let mut changes = ChangeSet::new();
    changes.set(Coord::new(2, 0), Tile::owned(alice.clone(), 1));
    territory.apply(&changes);
    let reached = alice_reach(&territory, &alice);
    assert!(reached.contains(&Coord::new(3, 0)), "recaptured bridge reconnects");

    let mut changes = ChangeSet::new();
    changes.remove(Coord::new(2, 0));
    territory.apply(&changes);
    assert!(
        !alice_reach(&territory, &alice).contains(&Coord::new(3, 0)),
        "a neutral gap severs too"
    );
}

#[test]
fn decay_decrements_once_and_flags() {
    let (territory, alice, bob) = wedged_map();
    let capitals = vec![(alice.clone(), Coord::new(0, 0)), (bob, Coord::new(40, 40))];

    let mut changes = ChangeSet::new();
    let report = decay(&territory, &capitals, &mut changes);

    let severed = changes
        .get(Coord::new(3, 0))
        .flatten()
        .expect("severed tile must be rewritten");
    assert_eq!(severed.population, 2, "population drops by exactly one");
    assert!(severed.is_disconnected);
    assert_eq!(
        changes.get(Coord::new(2, 0)),
        Some(None),
        "bob's severed single-population wedge is removed"
    );
    assert!(changes.get(Coord::new(0, 0)).is_none(), "connected tiles are untouched");
    assert_eq!(report.decayed, 1);
    assert_eq!(report.removed, 1);
    assert!(report.skipped.is_empty());
}

#[test]
fn reconnected_tiles_recover_without_penalty() {
    let alice = name("alice");
    let mut territory = Territory::new();
    territory.insert(Coord::new(0, 0), Tile::owned(alice.clone(), 1));
    territory.insert(
        Coord::new(1, 0),
        Tile {
            is_disconnected: true,
            ..Tile::owned(alice.clone(), 4)
        },
    );

    let mut changes = ChangeSet::new();
    let report = decay(&territory, &[(alice.clone(), Coord::new(0, 0))], &mut changes);

    assert_eq!(report.recovered, 1);
    assert_eq!(
        changes.get(Coord::new(1, 0)),
        Some(Some(&Tile::owned(alice, 4))),
        "flag cleared, population kept"
    );
}

#[test]
fn repeated_passes_remove_after_reaching_one() {
    let alice = name("alice");
    let mut territory = Territory::new();
    territory.insert(Coord::new(0, 0), Tile::owned(alice.clone(), 1));
    territory.insert(Coord::new(5, 5), Tile::owned(alice.clone(), 2));
    let capitals = [(alice, Coord::new(0, 0))];

    let mut first = ChangeSet::new();
    let _ = decay(&territory, &capitals, &mut first);
    territory.apply(&first);
    assert_eq!(territory.tile(Coord::new(5, 5)).map(|tile| tile.population), Some(1));

    let mut second = ChangeSet::new();
    let _ = decay(&territory, &capitals, &mut second);
    territory.apply(&second);
    assert!(territory.tile(Coord::new(5, 5)).is_none());
    assert!(territory.tile(Coord::new(0, 0)).is_some(), "capital never decays");
}
