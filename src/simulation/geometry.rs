//! Geometry calculations for links passing through buildings.
//!
//! Contains helper functions for:
//! - Segment vs. axis-aligned box clipping (slab method)
//! - Counting external wall crossings of a link
//! - Counting floor slabs crossed inside a building

use super::types::{Building, Point};

/// Clipped segments shorter than this (in parametric units) are treated as
/// grazing contact and do not count as entering the building.
const GRAZING_EPSILON: f64 = 1e-9;

/// Clip the segment `p1 -> p2` against the building volume.
///
/// Returns the parametric interval `(t_enter, t_exit)` with
/// `0 <= t_enter <= t_exit <= 1`, or `None` when the segment misses the box.
pub fn clip_segment(p1: &Point, p2: &Point, building: &Building) -> Option<(f64, f64)> {
    let origin = [p1.x, p1.y, p1.z];
    let direction = [p2.x - p1.x, p2.y - p1.y, p2.z - p1.z];
    let lower = [building.x_min, building.y_min, 0.0];
    let upper = [building.x_max, building.y_max, building.height];

    let mut t_enter: f64 = 0.0;
    let mut t_exit: f64 = 1.0;
    for axis in 0..3 {
        if direction[axis] == 0.0 {
            // Parallel to this slab: must already lie within it
            if origin[axis] < lower[axis] || origin[axis] > upper[axis] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / direction[axis];
        let mut t0 = (lower[axis] - origin[axis]) * inv;
        let mut t1 = (upper[axis] - origin[axis]) * inv;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        t_enter = t_enter.max(t0);
        t_exit = t_exit.min(t1);
        if t_enter > t_exit {
            return None;
        }
    }
    Some((t_enter, t_exit))
}

/// Number of times the link `p1 -> p2` crosses the building envelope (0, 1 or 2).
///
/// A link with one endpoint indoors crosses once; a link passing through the
/// building from outside to outside crosses twice; an indoor-to-indoor link in
/// the same building does not cross the envelope at all.
pub fn boundary_crossings(p1: &Point, p2: &Point, building: &Building) -> u32 {
    let Some((t_enter, t_exit)) = clip_segment(p1, p2, building) else {
        return 0;
    };
    let inside1 = building.contains(p1);
    let inside2 = building.contains(p2);
    match (inside1, inside2) {
        (true, true) => 0,
        (true, false) | (false, true) => 1,
        (false, false) => {
            if t_exit - t_enter > GRAZING_EPSILON {
                2
            } else {
                0
            }
        }
    }
}

/// Number of intermediate floor slabs the link crosses while inside the building.
///
/// Slabs sit at `k * floor_height` for `k = 1..floors`; the ground and the roof
/// are not counted here since the roof is part of the external envelope.
pub fn floor_slabs_crossed(p1: &Point, p2: &Point, building: &Building) -> u32 {
    let Some((t_enter, t_exit)) = clip_segment(p1, p2, building) else {
        return 0;
    };
    let z_at = |t: f64| p1.z + (p2.z - p1.z) * t;
    let (z_a, z_b) = (z_at(t_enter), z_at(t_exit));
    let (z_low, z_high) = (z_a.min(z_b), z_a.max(z_b));
    let floor_height = building.floor_height();

    (1..building.floors)
        .map(|k| k as f64 * floor_height)
        .filter(|slab| *slab > z_low && *slab < z_high)
        .count() as u32
}
