//! Ray-casting point-in-polygon test.
//!
//! Coordinates are treated as a flat plane with `x = longitude` and
//! `y = latitude`. A point lying exactly on an edge or vertex counts as
//! inside, matching the inclusive `distance <= radius` rule for circles.

use super::LatLng;

/// Tolerance for the collinearity test used by the on-edge check.
const EDGE_EPSILON: f64 = 1e-12;

/// Returns the ring without a trailing vertex that repeats the first one.
pub(crate) fn open_ring(vertices: &[LatLng]) -> &[LatLng] {
    match (vertices.first(), vertices.last()) {
        (Some(first), Some(last)) if vertices.len() > 1 && first == last => {
            &vertices[..vertices.len() - 1]
        }
        _ => vertices,
    }
}

fn on_segment(p: LatLng, a: LatLng, b: LatLng) -> bool {
    let (px, py) = (p.longitude, p.latitude);
    let (ax, ay) = (a.longitude, a.latitude);
    let (bx, by) = (b.longitude, b.latitude);

    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    let scale = (bx - ax).abs().max((by - ay).abs()).max(1.0);
    if cross.abs() > EDGE_EPSILON * scale {
        return false;
    }

    px >= ax.min(bx) && px <= ax.max(bx) && py >= ay.min(by) && py <= ay.max(by)
}

/// Ray casting over an open ring of at least three vertices.
///
/// Callers validate the vertex count.
pub(crate) fn ray_cast(point: LatLng, ring: &[LatLng]) -> bool {
    let n = ring.len();
    let (x, y) = (point.longitude, point.latitude);

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = ring[i];
        let vj = ring[j];

        if on_segment(point, vj, vi) {
            return true;
        }

        let (xi, yi) = (vi.longitude, vi.latitude);
        let (xj, yj) = (vj.longitude, vj.latitude);
        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }

    inside
}
