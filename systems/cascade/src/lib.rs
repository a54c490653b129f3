#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Breadth-first capture cascade triggered by claiming a bonus tile.
//!
//! The cascade reads tiles through a caller-supplied loader and records every
//! write into one [`ChangeSet`], which doubles as the working overlay so later
//! waves observe earlier ones. Callers commit the set as a single batch and
//! broadcast it once.

use std::collections::{HashSet, VecDeque};

use hexfront_core::{ChangeSet, Coord, Tile, Username};
use tracing::{debug, warn};

const DEFAULT_MAX_VISITED: usize = 4_096;

/// Configuration parameters for the cascade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    max_visited: usize,
}

impl Config {
    /// Creates a configuration capping the number of expanded tiles.
    #[must_use]
    pub const fn new(max_visited: usize) -> Self {
        Self { max_visited }
    }

    /// Upper bound on tiles expanded by one cascade.
    #[must_use]
    pub const fn max_visited(&self) -> usize {
        self.max_visited
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VISITED)
    }
}

/// Result of one cascade.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    /// Every tile touched, in its final state.
    pub changes: ChangeSet,
    /// Number of tiles expanded.
    pub visited: usize,
    /// Set when the cascade stopped at the visit cap with work remaining.
    pub truncated: bool,
}

/// Propagates a capture by `actor` outward from `trigger`.
///
/// The trigger becomes the actor's with population one when it is vacant or a
/// bonus tile. Every expanded tile then affects its six neighbours: capitals
/// are skipped, vacant cells are claimed, the actor's own tiles gain one
/// population, enemy tiles lose one or are captured at one, and bonus tiles are
/// queued to be expanded under the same rule as the trigger. Bonus tiles left in
/// the queue when the visit cap is hit keep their flag.
///
/// Adjacency of the trigger to the actor's territory is the caller's check.
pub fn cascade<L, C, E>(
    trigger: Coord,
    actor: &Username,
    config: &Config,
    mut load: L,
    mut is_capital: C,
) -> Result<CascadeOutcome, E>
where
    L: FnMut(Coord) -> Result<Option<Tile>, E>,
    C: FnMut(Coord) -> bool,
{
    let mut changes = ChangeSet::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([trigger]);
    let mut truncated = false;

    let mut current = |changes: &ChangeSet, coord: Coord| -> Result<Option<Tile>, E> {
        match changes.get(coord) {
            Some(staged) => Ok(staged.cloned()),
            None => load(coord),
        }
    };

    while let Some(cell) = queue.pop_front() {
        if visited.contains(&cell) {
            continue;
        }
        if visited.len() >= config.max_visited {
            truncated = true;
            break;
        }
        let _ = visited.insert(cell);

        let tile = current(&changes, cell)?;
        if tile.as_ref().map_or(true, |tile| tile.has_bonus) {
            changes.set(cell, Tile::owned(actor.clone(), 1));
        }

        for neighbor in cell.neighbors() {
            if is_capital(neighbor) {
                continue;
            }
            let next = match current(&changes, neighbor)? {
                // Keeps its flag until expanded, where the trigger rule resets it.
                Some(tile) if tile.has_bonus => {
                    if !visited.contains(&neighbor) {
                        queue.push_back(neighbor);
                    }
                    continue;
                }
                Some(tile) if tile.is_owned_by(actor) => Tile {
                    population: tile.population.saturating_add(1),
                    ..tile
                },
                Some(tile) if tile.owner.is_some() && tile.population > 1 => Tile {
                    population: tile.population - 1,
                    ..tile
                },
                _ => Tile::owned(actor.clone(), 1),
            };
            changes.set(neighbor, next);
        }
    }

    if truncated {
        warn!(%trigger, %actor, visited = visited.len(), "cascade stopped at visit cap");
    }
    debug!(%trigger, %actor, visited = visited.len(), touched = changes.len(), "cascade resolved");

    Ok(CascadeOutcome {
        changes,
        visited: visited.len(),
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, convert::Infallible};

    use super::*;

    #[test]
    fn lone_bonus_claims_trigger_and_ring() {
        let actor = Username::parse("alice").unwrap();
        let mut map = HashMap::new();
        let _ = map.insert(Coord::new(0, 0), Tile::bonus());

        let outcome = cascade(
            Coord::new(0, 0),
            &actor,
            &Config::default(),
            |coord| Ok::<_, Infallible>(map.get(&coord).cloned()),
            |_| false,
        )
        .unwrap();

        assert_eq!(outcome.visited, 1);
        assert_eq!(outcome.changes.len(), 7);
        assert!(outcome
            .changes
            .iter()
            .all(|(_, tile)| tile == Some(&Tile::owned(actor.clone(), 1))));
    }
}
