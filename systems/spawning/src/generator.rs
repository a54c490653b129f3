//! Candidate placement for spawn-point generation.

use std::f64::consts::TAU;

use hexfront_core::{AxialBounds, Coord};
use rand::Rng;

const MIN_RING_POINTS: usize = 20;
const MAX_RING_POINTS: usize = 100;
const RING_SPACING: f64 = 0.8;
const ANGLE_JITTER: f64 = 0.1;
const RADIUS_JITTER: f64 = 0.15;
const RING_GROWTH: f64 = 100.0;

/// Number of evenly spaced candidates placed on a ring.
pub(crate) fn ring_point_count(radius: f64, min_distance: f64) -> usize {
    let spacing = (min_distance * RING_SPACING).max(1.0);
    let count = (TAU * radius / spacing).ceil();
    if count.is_finite() && count > 0.0 {
        (count as usize).clamp(MIN_RING_POINTS, MAX_RING_POINTS)
    } else {
        MIN_RING_POINTS
    }
}

/// Radius of the ring searched after `attempt` (zero-based) came up short.
pub(crate) fn next_ring_radius(radius: f64, min_distance: f64, attempt: u32) -> f64 {
    radius + min_distance + f64::from(attempt) * RING_GROWTH
}

/// Jittered candidates around one ring centred on `center`.
pub(crate) fn ring_candidates<R: Rng>(
    rng: &mut R,
    center: (f64, f64),
    radius: f64,
    min_distance: f64,
) -> Vec<Coord> {
    let count = ring_point_count(radius, min_distance);
    let radius_jitter = min_distance * RADIUS_JITTER;
    (0..count)
        .map(|index| {
            let angle = TAU * index as f64 / count as f64
                + rng.gen_range(-ANGLE_JITTER..=ANGLE_JITTER);
            let distance = radius + rng.gen_range(-radius_jitter..=radius_jitter);
            to_coord(
                center.0 + distance * angle.cos(),
                center.1 + distance * angle.sin(),
            )
        })
        .collect()
}

/// Uniformly random cells inside `window`.
pub(crate) fn window_candidates<R: Rng>(rng: &mut R, window: AxialBounds, count: usize) -> Vec<Coord> {
    (0..count)
        .map(|_| {
            Coord::new(
                rng.gen_range(window.min_q..=window.max_q),
                rng.gen_range(window.min_r..=window.max_r),
            )
        })
        .collect()
}

fn to_coord(q: f64, r: f64) -> Coord {
    // Float-to-int `as` saturates at the i32 range.
    Coord::new(q.round() as i32, r.round() as i32)
}
