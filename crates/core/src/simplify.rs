//! Zoom-based geometry simplification.
//!
//! Douglas-Peucker over the flat coordinate arrays, run as a single pass per
//! ring: every vertex gets an importance score (the maximum perpendicular
//! distance found when it was chosen as a split point), and vertices whose
//! score exceeds the squared tolerance survive. Matches tippecanoe's
//! approach of simplifying to tile resolution - the tolerance is expressed
//! in tile-pixel units and shrinks with each zoom level.
//!
//! Points pass through untouched. Polygon rings whose bounding-box area
//! falls under the tolerance are dropped outright; the box area is a cheap
//! proxy that avoids scoring rings that could never survive.

use crate::feature::{assemble_rings, remap_parts, ring_ranges, RawFeature};
use crate::header::GeometryType;
use crate::tile::Bbox;

/// Squared tolerance in Mercator unit space for a pixel tolerance at `z`.
pub fn sq_tolerance(tolerance: f64, z: u8, extent: u32) -> f64 {
    let t = tolerance / ((1u64 << z) as f64 * extent as f64);
    t * t
}

/// Simplify a feature's lines/rings to the given squared tolerance.
///
/// Returns `None` when every ring collapses. Points and multipoints pass
/// through unchanged.
pub fn simplify_feature(mut feature: RawFeature, sq_tol: f64) -> Option<RawFeature> {
    match feature.geometry_type {
        GeometryType::Point | GeometryType::MultiPoint | GeometryType::Unknown => {
            return Some(feature)
        }
        _ => {}
    }

    let polygonal = feature.geometry_type.is_polygonal();
    let ranges = ring_ranges(feature.ends.as_deref(), feature.pair_count());
    let ring_count = ranges.len();
    let mut rings: Vec<Vec<f64>> = Vec::new();
    let mut survived: Vec<Option<usize>> = vec![None; ring_count];

    for (i, (start, end)) in ranges.into_iter().enumerate() {
        let ring = &feature.xy[start * 2..end * 2];

        if polygonal {
            let bbox = Bbox::of_coords(ring);
            if bbox.width() * bbox.height() < sq_tol {
                continue;
            }
        }

        let simplified = simplify_ring(ring, sq_tol);
        if simplified.len() >= 4 {
            survived[i] = Some(rings.len());
            rings.push(simplified);
        }
    }

    if rings.is_empty() {
        return None;
    }

    feature.parts = feature
        .parts
        .as_deref()
        .and_then(|parts| remap_parts(parts, ring_count, &survived));
    let (xy, ends) = assemble_rings(rings);
    feature.xy = xy;
    feature.ends = ends;
    Some(feature)
}

/// Score and filter one ring; endpoints always survive.
fn simplify_ring(ring: &[f64], sq_tol: f64) -> Vec<f64> {
    let n = ring.len() / 2;
    if n <= 2 {
        return ring.to_vec();
    }

    let mut importance = vec![0.0f64; n];
    importance[0] = f64::INFINITY;
    importance[n - 1] = f64::INFINITY;
    score_range(ring, &mut importance, 0, n - 1, sq_tol);

    let mut out = Vec::with_capacity(ring.len());
    for (i, &score) in importance.iter().enumerate() {
        if score > sq_tol {
            out.push(ring[i * 2]);
            out.push(ring[i * 2 + 1]);
        }
    }
    out
}

/// Recursively assign the maximum baseline distance to the chosen split
/// point of `[first, last]`.
///
/// Ties prefer the index nearest the range midpoint, keeping the recursion
/// balanced on flat stretches. Ranges whose maximum stays at or under the
/// tolerance are left unscored; their interior cannot survive the filter.
fn score_range(ring: &[f64], importance: &mut [f64], first: usize, last: usize, sq_tol: f64) {
    if last <= first + 1 {
        return;
    }

    let mid = (first + last) / 2;
    let (ax, ay) = (ring[first * 2], ring[first * 2 + 1]);
    let (bx, by) = (ring[last * 2], ring[last * 2 + 1]);

    let mut max_sq = sq_tol;
    let mut best: Option<usize> = None;
    let mut best_to_mid = usize::MAX;

    for i in first + 1..last {
        let d = sq_seg_dist(ring[i * 2], ring[i * 2 + 1], ax, ay, bx, by);
        let to_mid = i.abs_diff(mid);
        if d > max_sq || (best.is_some() && d == max_sq && to_mid < best_to_mid) {
            max_sq = d;
            best = Some(i);
            best_to_mid = to_mid;
        }
    }

    if let Some(index) = best {
        importance[index] = max_sq;
        score_range(ring, importance, first, index, sq_tol);
        score_range(ring, importance, index, last, sq_tol);
    }
}

/// Squared distance from `(px, py)` to segment `(ax, ay) -> (bx, by)`.
///
/// The closest-point parameter clamps to `[0, 1]`; a degenerate baseline
/// degrades to the distance to its start.
fn sq_seg_dist(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let mut x = ax;
    let mut y = ay;
    let dx = bx - ax;
    let dy = by - ay;

    if dx != 0.0 || dy != 0.0 {
        let t = ((px - ax) * dx + (py - ay) * dy) / (dx * dx + dy * dy);
        if t > 1.0 {
            x = bx;
            y = by;
        } else if t > 0.0 {
            x += dx * t;
            y += dy * t;
        }
    }

    let dx = px - x;
    let dy = py - y;
    dx * dx + dy * dy
}
