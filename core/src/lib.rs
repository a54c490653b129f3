#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the hexfront territory engine.
//!
//! This crate defines the data model every other crate speaks: axial
//! coordinates and hex geometry, [`Tile`] and [`User`] records, the
//! [`ChangeSet`] deltas produced by each logical operation, and the
//! [`Territory`] snapshot that pure systems read. The authoritative state
//! store persists these values, systems compute change sets from snapshots,
//! and the engine commits each change set as a single batch.

mod hex;

use std::{
    borrow::Borrow,
    collections::{btree_map, BTreeMap, HashMap},
    fmt,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use hex::{distance, AxialBounds, Coord, Cube, NEIGHBOR_OFFSETS};

/// Longest username accepted at the boundary.
pub const MAX_USERNAME_LENGTH: usize = 20;

/// Reasons a username is rejected.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum UsernameError {
    /// The username was empty.
    #[error("username must not be empty")]
    Empty,
    /// The username exceeded [`MAX_USERNAME_LENGTH`] characters.
    #[error("username cannot exceed {max} characters (got {length})")]
    TooLong {
        /// Number of characters supplied.
        length: usize,
        /// Maximum number of characters allowed.
        max: usize,
    },
    /// The username contained a character outside `[A-Za-z0-9_]`.
    #[error("username must be alphanumeric (found {0:?})")]
    InvalidCharacter(char),
}

/// Unique, validated player identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Validates the provided name against the alphanumeric-plus-underscore rule.
    pub fn parse(value: impl Into<String>) -> Result<Self, UsernameError> {
        let value = value.into();
        if value.is_empty() {
            return Err(UsernameError::Empty);
        }
        let length = value.chars().count();
        if length > MAX_USERNAME_LENGTH {
            return Err(UsernameError::TooLong {
                length,
                max: MAX_USERNAME_LENGTH,
            });
        }
        if let Some(invalid) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        {
            return Err(UsernameError::InvalidCharacter(invalid));
        }
        Ok(Self(value))
    }

    /// Borrowed string form of the username.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = UsernameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl Borrow<str> for Username {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// Opaque login credential. Compared verbatim, never interpreted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wraps the provided secret.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Reports whether the supplied credential matches this one.
    #[must_use]
    pub fn matches(&self, other: &Credential) -> bool {
        self.0 == other.0
    }

    /// Raw credential text, used only by persistence.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(..)")
    }
}

/// State of a single hex cell.
///
/// A tile with neither an owner nor the bonus flag is indistinguishable from
/// an absent tile and is never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Player controlling the tile, if any.
    pub owner: Option<Username>,
    /// Population living on the tile; meaningful only when owned.
    pub population: u32,
    /// Marks a capturable bonus tile that triggers a cascade.
    pub has_bonus: bool,
    /// Set by the decay pass while the tile is severed from its capital.
    pub is_disconnected: bool,
}

impl Tile {
    /// Creates a tile owned by `owner` with the given population.
    #[must_use]
    pub fn owned(owner: Username, population: u32) -> Self {
        Self {
            owner: Some(owner),
            population,
            has_bonus: false,
            is_disconnected: false,
        }
    }

    /// Creates an unowned bonus tile.
    #[must_use]
    pub fn bonus() -> Self {
        Self {
            owner: None,
            population: 0,
            has_bonus: true,
            is_disconnected: false,
        }
    }

    /// Reports whether the tile carries an owner or the bonus flag.
    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.owner.is_some() || self.has_bonus
    }

    /// Reports whether the tile is owned by `user`.
    #[must_use]
    pub fn is_owned_by(&self, user: &Username) -> bool {
        self.owner.as_ref() == Some(user)
    }
}

/// Registered player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique player identifier.
    pub username: Username,
    /// Opaque login credential.
    pub credential: Credential,
    /// Immortal home tile fixed at creation.
    pub capital: Coord,
    /// Client-reported visibility set; advisory only.
    pub explored_tiles: Vec<Coord>,
}

impl User {
    /// Creates a freshly spawned user whose explored set holds only the capital.
    #[must_use]
    pub fn new(username: Username, credential: Credential, capital: Coord) -> Self {
        Self {
            username,
            credential,
            capital,
            explored_tiles: vec![capital],
        }
    }
}

/// Ordered set of tile deltas produced by one logical operation.
///
/// `None` marks a tile that was removed (became neutral).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    tiles: BTreeMap<Coord, Option<Tile>>,
}

impl ChangeSet {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the new state of a tile, normalising empty tiles to removals.
    pub fn record(&mut self, coord: Coord, tile: Option<Tile>) {
        let tile = tile.filter(Tile::is_occupied);
        let _ = self.tiles.insert(coord, tile);
    }

    /// Records a tile write.
    pub fn set(&mut self, coord: Coord, tile: Tile) {
        self.record(coord, Some(tile));
    }

    /// Records a tile removal.
    pub fn remove(&mut self, coord: Coord) {
        self.record(coord, None);
    }

    /// Latest recorded state of a tile, if the set touches it.
    #[must_use]
    pub fn get(&self, coord: Coord) -> Option<Option<&Tile>> {
        self.tiles.get(&coord).map(Option::as_ref)
    }

    /// Reports whether the set touches the coordinate.
    #[must_use]
    pub fn contains(&self, coord: Coord) -> bool {
        self.tiles.contains_key(&coord)
    }

    /// Number of tiles touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Reports whether no tile was touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Iterates over touched tiles in coordinate order.
    pub fn iter(&self) -> impl Iterator<Item = (Coord, Option<&Tile>)> {
        self.tiles.iter().map(|(coord, tile)| (*coord, tile.as_ref()))
    }

    /// Folds a later change set into this one; later writes win.
    pub fn merge(&mut self, later: ChangeSet) {
        self.tiles.extend(later.tiles);
    }
}

impl IntoIterator for ChangeSet {
    type Item = (Coord, Option<Tile>);
    type IntoIter = btree_map::IntoIter<Coord, Option<Tile>>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiles.into_iter()
    }
}

impl FromIterator<(Coord, Option<Tile>)> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = (Coord, Option<Tile>)>>(iter: I) -> Self {
        let mut changes = ChangeSet::new();
        for (coord, tile) in iter {
            changes.record(coord, tile);
        }
        changes
    }
}

/// Point-in-time snapshot of every occupied tile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Territory {
    tiles: HashMap<Coord, Tile>,
}

impl Territory {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a tile; empty tiles are dropped.
    pub fn insert(&mut self, coord: Coord, tile: Tile) {
        if tile.is_occupied() {
            let _ = self.tiles.insert(coord, tile);
        } else {
            let _ = self.tiles.remove(&coord);
        }
    }

    /// Applies a change set on top of the snapshot.
    pub fn apply(&mut self, changes: &ChangeSet) {
        for (coord, tile) in changes.iter() {
            match tile {
                Some(tile) => self.insert(coord, tile.clone()),
                None => {
                    let _ = self.tiles.remove(&coord);
                }
            }
        }
    }

    /// Tile stored at the coordinate.
    #[must_use]
    pub fn tile(&self, coord: Coord) -> Option<&Tile> {
        self.tiles.get(&coord)
    }

    /// Owner of the tile at the coordinate.
    #[must_use]
    pub fn owner_at(&self, coord: Coord) -> Option<&Username> {
        self.tile(coord).and_then(|tile| tile.owner.as_ref())
    }

    /// Number of occupied tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Reports whether the snapshot holds no tiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Iterates over every occupied tile in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (Coord, &Tile)> {
        self.tiles.iter().map(|(coord, tile)| (*coord, tile))
    }

    /// Groups owned tiles by owner in a single pass.
    #[must_use]
    pub fn by_owner(&self) -> HashMap<&Username, Vec<Coord>> {
        let mut grouped: HashMap<&Username, Vec<Coord>> = HashMap::new();
        for (coord, tile) in &self.tiles {
            if let Some(owner) = tile.owner.as_ref() {
                grouped.entry(owner).or_default().push(*coord);
            }
        }
        grouped
    }
}

impl FromIterator<(Coord, Tile)> for Territory {
    fn from_iter<I: IntoIterator<Item = (Coord, Tile)>>(iter: I) -> Self {
        let mut territory = Territory::new();
        for (coord, tile) in iter {
            territory.insert(coord, tile);
        }
        territory
    }
}

/// Aggregate standing of a single player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Player described by the entry.
    pub username: Username,
    /// Summed population over every owned tile.
    pub population: u64,
    /// Number of owned tiles.
    pub area: u64,
}

/// Top players ranked by population and by area.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaderboard {
    /// Highest summed population first.
    pub by_population: Vec<LeaderboardEntry>,
    /// Largest owned area first.
    pub by_area: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    /// Ranks every owner in the snapshot, keeping the top `size` of each list.
    #[must_use]
    pub fn rank(territory: &Territory, size: usize) -> Self {
        let mut stats: HashMap<&Username, (u64, u64)> = HashMap::new();
        for (_, tile) in territory.iter() {
            if let Some(owner) = tile.owner.as_ref() {
                let entry = stats.entry(owner).or_insert((0, 0));
                entry.0 += u64::from(tile.population);
                entry.1 += 1;
            }
        }

        let entries: Vec<LeaderboardEntry> = stats
            .into_iter()
            .map(|(username, (population, area))| LeaderboardEntry {
                username: username.clone(),
                population,
                area,
            })
            .collect();

        let mut by_population = entries.clone();
        by_population.sort_by(|a, b| {
            b.population
                .cmp(&a.population)
                .then_with(|| a.username.cmp(&b.username))
        });
        by_population.truncate(size);

        let mut by_area = entries;
        by_area.sort_by(|a, b| b.area.cmp(&a.area).then_with(|| a.username.cmp(&b.username)));
        by_area.truncate(size);

        Self {
            by_population,
            by_area,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> Username {
        Username::parse(value).expect("valid username")
    }

    #[test]
    fn username_rules() {
        assert!(Username::parse("player_01").is_ok());
        assert_eq!(Username::parse(""), Err(UsernameError::Empty));
        assert_eq!(
            Username::parse("a".repeat(21)),
            Err(UsernameError::TooLong {
                length: 21,
                max: MAX_USERNAME_LENGTH
            })
        );
        assert_eq!(
            Username::parse("bad name"),
            Err(UsernameError::InvalidCharacter(' '))
        );
        assert!(Username::parse("a".repeat(20)).is_ok());
    }

    #[test]
    fn username_deserialisation_validates() {
        let parsed: Result<Username, _> = serde_json::from_str("\"no-dashes\"");
        assert!(parsed.is_err());
        let parsed: Username = serde_json::from_str("\"ok_name\"").unwrap();
        assert_eq!(parsed.as_str(), "ok_name");
    }

    #[test]
    fn change_set_normalises_empty_tiles() {
        let mut changes = ChangeSet::new();
        changes.set(Coord::new(0, 0), Tile::default());
        assert_eq!(changes.get(Coord::new(0, 0)), Some(None));

        changes.set(Coord::new(0, 0), Tile::bonus());
        assert_eq!(changes.get(Coord::new(0, 0)), Some(Some(&Tile::bonus())));
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn territory_apply_removes_and_inserts() {
        let alice = name("alice");
        let mut territory: Territory = [
            (Coord::new(0, 0), Tile::owned(alice.clone(), 3)),
            (Coord::new(1, 0), Tile::bonus()),
        ]
        .into_iter()
        .collect();

        let mut changes = ChangeSet::new();
        changes.remove(Coord::new(1, 0));
        changes.set(Coord::new(2, 0), Tile::owned(alice.clone(), 1));
        territory.apply(&changes);

        assert!(territory.tile(Coord::new(1, 0)).is_none());
        assert_eq!(territory.owner_at(Coord::new(2, 0)), Some(&alice));
        assert_eq!(territory.by_owner().get(&alice).map(Vec::len), Some(2));
    }

    #[test]
    fn leaderboard_ranks_population_and_area() {
        let alice = name("alice");
        let bob = name("bob");
        let territory: Territory = [
            (Coord::new(0, 0), Tile::owned(alice.clone(), 10)),
            (Coord::new(5, 0), Tile::owned(bob.clone(), 1)),
            (Coord::new(6, 0), Tile::owned(bob.clone(), 1)),
        ]
        .into_iter()
        .collect();

        let board = Leaderboard::rank(&territory, 5);
        assert_eq!(board.by_population[0].username, alice);
        assert_eq!(board.by_area[0].username, bob);
        assert_eq!(board.by_area[0].area, 2);

        let top_one = Leaderboard::rank(&territory, 1);
        assert_eq!(top_one.by_population.len(), 1);
    }

    #[test]
    fn credential_debug_is_redacted() {
        let secret = Credential::new("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
        assert!(secret.matches(&Credential::new("hunter2")));
    }
}
