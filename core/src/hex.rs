//! Axial hex lattice geometry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Axial neighbour offsets `(dq, dr)` in clockwise order starting east.
pub const NEIGHBOR_OFFSETS: [(i32, i32); 6] = [(1, 0), (1, -1), (0, -1), (-1, 0), (-1, 1), (0, 1)];

/// Location of a single hex cell expressed in axial coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    q: i32,
    r: i32,
}

impl Coord {
    /// Creates a new axial coordinate.
    #[must_use]
    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    /// Column-like axial component.
    #[must_use]
    pub const fn q(&self) -> i32 {
        self.q
    }

    /// Row-like axial component.
    #[must_use]
    pub const fn r(&self) -> i32 {
        self.r
    }

    /// Converts the axial coordinate into its cube representation.
    #[must_use]
    pub const fn to_cube(self) -> Cube {
        Cube {
            x: self.q as i64,
            y: -(self.q as i64) - self.r as i64,
            z: self.r as i64,
        }
    }

    /// Enumerates the six adjacent cells.
    #[must_use]
    pub fn neighbors(self) -> [Coord; 6] {
        NEIGHBOR_OFFSETS.map(|(dq, dr)| {
            Coord::new(self.q.saturating_add(dq), self.r.saturating_add(dr))
        })
    }

    /// Hex distance between two cells.
    #[must_use]
    pub fn distance(self, other: Coord) -> u32 {
        distance(self, other)
    }

    /// Reports whether `other` shares an edge with this cell.
    #[must_use]
    pub fn is_adjacent(self, other: Coord) -> bool {
        distance(self, other) == 1
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.q, self.r)
    }
}

/// Cube coordinate triple satisfying `x + y + z == 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cube {
    /// Cube x component, equal to axial `q`.
    pub x: i64,
    /// Cube y component, equal to `-q - r`.
    pub y: i64,
    /// Cube z component, equal to axial `r`.
    pub z: i64,
}

/// Computes `(|q1-q2| + |q1+r1-q2-r2| + |r1-r2|) / 2`.
#[must_use]
pub fn distance(a: Coord, b: Coord) -> u32 {
    let dq = i64::from(a.q) - i64::from(b.q);
    let dr = i64::from(a.r) - i64::from(b.r);
    let doubled = dq.abs() + (dq + dr).abs() + dr.abs();
    u32::try_from(doubled / 2).unwrap_or(u32::MAX)
}

/// Axis-aligned window over axial coordinates, inclusive on every edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxialBounds {
    /// Smallest `q` contained in the window.
    pub min_q: i32,
    /// Largest `q` contained in the window.
    pub max_q: i32,
    /// Smallest `r` contained in the window.
    pub min_r: i32,
    /// Largest `r` contained in the window.
    pub max_r: i32,
}

impl AxialBounds {
    /// Window that contains every cell within `radius` of `center`.
    #[must_use]
    pub fn around(center: Coord, radius: u32) -> Self {
        let radius = i32::try_from(radius).unwrap_or(i32::MAX);
        Self {
            min_q: center.q.saturating_sub(radius),
            max_q: center.q.saturating_add(radius),
            min_r: center.r.saturating_sub(radius),
            max_r: center.r.saturating_add(radius),
        }
    }

    /// Smallest window containing all provided coordinates.
    #[must_use]
    pub fn enclosing(coords: impl IntoIterator<Item = Coord>) -> Option<Self> {
        let mut iter = coords.into_iter();
        let first = iter.next()?;
        let mut bounds = Self {
            min_q: first.q,
            max_q: first.q,
            min_r: first.r,
            max_r: first.r,
        };
        for coord in iter {
            bounds.min_q = bounds.min_q.min(coord.q);
            bounds.max_q = bounds.max_q.max(coord.q);
            bounds.min_r = bounds.min_r.min(coord.r);
            bounds.max_r = bounds.max_r.max(coord.r);
        }
        Some(bounds)
    }

    /// Grows the window by `margin` cells on every side.
    #[must_use]
    pub fn expanded(self, margin: u32) -> Self {
        let margin = i32::try_from(margin).unwrap_or(i32::MAX);
        Self {
            min_q: self.min_q.saturating_sub(margin),
            max_q: self.max_q.saturating_add(margin),
            min_r: self.min_r.saturating_sub(margin),
            max_r: self.max_r.saturating_add(margin),
        }
    }

    /// Reports whether the coordinate lies inside the window.
    #[must_use]
    pub fn contains(&self, coord: Coord) -> bool {
        (self.min_q..=self.max_q).contains(&coord.q) && (self.min_r..=self.max_r).contains(&coord.r)
    }

    /// Number of axial cells covered by the window.
    #[must_use]
    pub fn area(&self) -> u64 {
        let width = (i64::from(self.max_q) - i64::from(self.min_q) + 1).max(0);
        let height = (i64::from(self.max_r) - i64::from(self.min_r) + 1).max(0);
        u64::try_from(width * height).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbors_are_all_at_distance_one() {
        let origin = Coord::new(3, -7);
        for neighbor in origin.neighbors() {
            assert_eq!(origin.distance(neighbor), 1);
            assert!(origin.is_adjacent(neighbor));
        }
    }

    #[test]
    fn distance_matches_cube_metric() {
        let a = Coord::new(0, 0);
        let b = Coord::new(3, -1);
        assert_eq!(distance(a, b), 3);
        assert_eq!(distance(b, a), 3);

        let ca = a.to_cube();
        let cb = b.to_cube();
        let cube = ((ca.x - cb.x).abs() + (ca.y - cb.y).abs() + (ca.z - cb.z).abs()) / 2;
        assert_eq!(u32::try_from(cube).unwrap(), distance(a, b));
    }

    #[test]
    fn distance_does_not_overflow_at_extremes() {
        let a = Coord::new(i32::MIN, i32::MIN);
        let b = Coord::new(i32::MAX, i32::MAX);
        assert!(distance(a, b) > 0);
    }

    #[test]
    fn cube_components_sum_to_zero() {
        let cube = Coord::new(-4, 9).to_cube();
        assert_eq!(cube.x + cube.y + cube.z, 0);
    }

    #[test]
    fn bounds_enclose_and_expand() {
        let bounds = AxialBounds::enclosing([Coord::new(-2, 5), Coord::new(4, -1)]).unwrap();
        assert_eq!(bounds.area(), 7 * 7);
        assert!(bounds.contains(Coord::new(0, 0)));
        assert!(!bounds.contains(Coord::new(5, 0)));
        assert!(bounds.expanded(1).contains(Coord::new(5, 0)));
        assert!(AxialBounds::enclosing(std::iter::empty()).is_none());
    }
}
