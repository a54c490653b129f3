#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Capital reachability and the decay pass built on top of it.

use std::collections::{HashSet, VecDeque};

use hexfront_core::{ChangeSet, Coord, Territory, Tile, Username};
use tracing::error;

/// Collects every cell reachable from `capital` through cells for which
/// `is_owned` holds.
///
/// Traversal never crosses a cell that fails the predicate, so a single enemy
/// or neutral cell severs everything behind it. Returns an empty set when the
/// capital itself fails the predicate.
pub fn connected_tiles<F>(capital: Coord, mut is_owned: F) -> HashSet<Coord>
where
    F: FnMut(Coord) -> bool,
{
    let mut reached = HashSet::new();
    if !is_owned(capital) {
        return reached;
    }

    let mut queue = VecDeque::new();
    let _ = reached.insert(capital);
    queue.push_back(capital);

    while let Some(cell) = queue.pop_front() {
        for neighbor in cell.neighbors() {
            if reached.contains(&neighbor) || !is_owned(neighbor) {
                continue;
            }
            let _ = reached.insert(neighbor);
            queue.push_back(neighbor);
        }
    }

    reached
}

/// Tally of one decay pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecayReport {
    /// Disconnected tiles that lost one population.
    pub decayed: usize,
    /// Disconnected tiles that reached zero and became neutral.
    pub removed: usize,
    /// Reconnected tiles whose disconnection flag was cleared.
    pub recovered: usize,
    /// Users skipped because their capital was not theirs.
    pub skipped: Vec<Username>,
}

/// Penalizes territory severed from its capital.
///
/// For every `(user, capital)` pair, tiles the user owns outside the set
/// connected to the capital lose one population and are flagged, or are
/// removed when already at one. Connected tiles carrying the flag have it
/// cleared. All resulting writes are recorded into `out`.
pub fn decay(
    territory: &Territory,
    capitals: &[(Username, Coord)],
    out: &mut ChangeSet,
) -> DecayReport {
    let mut report = DecayReport::default();
    let owned = territory.by_owner();

    for (user, capital) in capitals {
        let Some(tiles) = owned.get(user) else {
            continue;
        };

        if !territory
            .tile(*capital)
            .is_some_and(|tile| tile.is_owned_by(user))
        {
            error!(%user, %capital, "capital is not owned by its user; skipping decay");
            debug_assert!(false, "capital {capital} of {user} is not owned by them");
            report.skipped.push(user.clone());
            continue;
        }

        let connected = connected_tiles(*capital, |cell| territory.owner_at(cell) == Some(user));

        for coord in tiles {
            let Some(tile) = territory.tile(*coord) else {
                continue;
            };
            if connected.contains(coord) {
                if tile.is_disconnected {
                    out.set(
                        *coord,
                        Tile {
                            is_disconnected: false,
                            ..tile.clone()
                        },
                    );
                    report.recovered += 1;
                }
            } else if tile.population > 1 {
                out.set(
                    *coord,
                    Tile {
                        population: tile.population - 1,
                        is_disconnected: true,
                        ..tile.clone()
                    },
                );
                report.decayed += 1;
            } else {
                out.remove(*coord);
                report.removed += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unowned_capital_reaches_nothing() {
        assert!(connected_tiles(Coord::new(0, 0), |_| false).is_empty());
    }

    #[test]
    fn flood_fill_stops_at_the_predicate() {
        let owned: HashSet<Coord> = [Coord::new(0, 0), Coord::new(1, 0), Coord::new(3, 0)]
            .into_iter()
            .collect();
        let reached = connected_tiles(Coord::new(0, 0), |cell| owned.contains(&cell));
        assert_eq!(reached.len(), 2);
        assert!(!reached.contains(&Coord::new(3, 0)));
    }
}
