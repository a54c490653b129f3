//! Store-backed territory probe for spawn validation.

use std::sync::Arc;

use hexfront_core::Coord;
use hexfront_system_spawning::TerritoryProbe;
use hexfront_world::{query, StateStore, StoreError};

/// Answers spawn-validation lookups from the state store.
#[derive(Clone, Debug)]
pub struct StoreProbe(Arc<StateStore>);

impl StoreProbe {
    /// Wraps a shared store handle.
    #[must_use]
    pub fn new(store: Arc<StateStore>) -> Self {
        Self(store)
    }
}

impl TerritoryProbe for StoreProbe {
    type Error = StoreError;

    fn is_vacant(&self, coord: Coord) -> Result<bool, Self::Error> {
        Ok(self.0.get_tile(coord)?.is_none())
    }

    fn occupied_coords(&self) -> Result<Vec<Coord>, Self::Error> {
        query::occupied_coords(&self.0)
    }
}
