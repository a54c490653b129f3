//! Pending write batch drained by each flush.

use std::collections::BTreeMap;

use hexfront_core::{ChangeSet, Coord, Tile, User, Username};

/// Coalesced full-value writes awaiting persistence.
///
/// Every entry is either a replacement value or a deletion marker (`None`);
/// staging the same key twice keeps only the latest value.
#[derive(Clone, Debug, Default)]
pub struct PendingBatch {
    tiles: ChangeSet,
    users: BTreeMap<Username, Option<User>>,
}

impl PendingBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a tile replacement or removal.
    pub fn stage_tile(&mut self, coord: Coord, tile: Option<Tile>) {
        self.tiles.record(coord, tile);
    }

    /// Stages a user replacement or removal.
    pub fn stage_user(&mut self, username: Username, user: Option<User>) {
        let _ = self.users.insert(username, user);
    }

    /// Staged state of a tile, if the batch touches it.
    #[must_use]
    pub fn tile(&self, coord: Coord) -> Option<Option<&Tile>> {
        self.tiles.get(coord)
    }

    /// Staged state of a user, if the batch touches it.
    #[must_use]
    pub fn user(&self, username: &Username) -> Option<Option<&User>> {
        self.users.get(username).map(Option::as_ref)
    }

    /// Staged tile entries in coordinate order.
    pub fn tiles(&self) -> impl Iterator<Item = (Coord, Option<&Tile>)> {
        self.tiles.iter()
    }

    /// Staged user entries in username order.
    pub fn users(&self) -> impl Iterator<Item = (&Username, Option<&User>)> {
        self.users.iter().map(|(name, user)| (name, user.as_ref()))
    }

    /// Total number of staged keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len() + self.users.len()
    }

    /// Reports whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty() && self.users.is_empty()
    }

    /// Layers `newer` on top of this batch; entries in `newer` win.
    pub fn merge(&mut self, newer: PendingBatch) {
        self.tiles.merge(newer.tiles);
        self.users.extend(newer.users);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_newer_entries() {
        let owner = Username::parse("alice").unwrap();
        let mut older = PendingBatch::new();
        older.stage_tile(Coord::new(0, 0), Some(Tile::owned(owner.clone(), 1)));
        older.stage_tile(Coord::new(1, 0), Some(Tile::bonus()));

        let mut newer = PendingBatch::new();
        newer.stage_tile(Coord::new(0, 0), Some(Tile::owned(owner.clone(), 7)));

        older.merge(newer);
        assert_eq!(older.len(), 2);
        assert_eq!(
            older.tile(Coord::new(0, 0)),
            Some(Some(&Tile::owned(owner, 7))),
            "newer write must survive the merge"
        );
        assert_eq!(older.tile(Coord::new(1, 0)), Some(Some(&Tile::bonus())));
    }
}
