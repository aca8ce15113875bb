//! Geometry clipping to the buffered tile rectangle.
//!
//! Sutherland-Hodgman against an axis-aligned box, run as two stripe passes:
//! every segment is clipped against the X slab, and the survivors against the
//! Y slab. Lines split into multiple output lines where they leave the box;
//! polygon rings accumulate into a single re-closed ring per input ring.
//!
//! The buffer zone around the nominal tile edges prevents visual seams when
//! adjacent tiles render side by side; features spanning tile boundaries are
//! duplicated into every tile whose buffered rectangle they touch.

use crate::feature::{assemble_rings, remap_parts, ring_ranges, RawFeature};
use crate::header::GeometryType;
use crate::tile::Bbox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

/// Clip a feature to `clip` in Mercator unit space.
///
/// Returns `None` when nothing of the feature survives. Features entirely
/// inside the box pass through untouched.
pub fn clip_feature(feature: RawFeature, clip: &Bbox) -> Option<RawFeature> {
    let bbox = Bbox::of_coords(&feature.xy);
    if !bbox.intersects(clip) {
        return None;
    }
    if clip.contains(&bbox) {
        return Some(feature);
    }

    match feature.geometry_type {
        GeometryType::Point | GeometryType::MultiPoint | GeometryType::Unknown => {
            clip_points(feature, clip)
        }
        GeometryType::LineString | GeometryType::MultiLineString => clip_lines(feature, clip),
        GeometryType::Polygon | GeometryType::MultiPolygon => clip_polygons(feature, clip),
    }
}

fn clip_points(mut feature: RawFeature, clip: &Bbox) -> Option<RawFeature> {
    let mut xy = Vec::with_capacity(feature.xy.len());
    for pair in feature.xy.chunks_exact(2) {
        let (x, y) = (pair[0], pair[1]);
        if x >= clip.min_x && x <= clip.max_x && y >= clip.min_y && y <= clip.max_y {
            xy.push(x);
            xy.push(y);
        }
    }
    if xy.is_empty() {
        return None;
    }
    feature.xy = xy;
    feature.ends = None;
    feature.parts = None;
    Some(feature)
}

fn clip_lines(mut feature: RawFeature, clip: &Bbox) -> Option<RawFeature> {
    let ranges = ring_ranges(feature.ends.as_deref(), feature.pair_count());
    let mut lines: Vec<Vec<f64>> = Vec::new();

    for (start, end) in ranges {
        let part = &feature.xy[start * 2..end * 2];
        for x_piece in clip_line_axis(part, clip.min_x, clip.max_x, Axis::X) {
            for piece in clip_line_axis(&x_piece, clip.min_y, clip.max_y, Axis::Y) {
                if piece.len() >= 4 {
                    lines.push(piece);
                }
            }
        }
    }

    if lines.is_empty() {
        return None;
    }
    let (xy, ends) = assemble_rings(lines);
    feature.xy = xy;
    feature.ends = ends;
    feature.parts = None;
    Some(feature)
}

fn clip_polygons(mut feature: RawFeature, clip: &Bbox) -> Option<RawFeature> {
    let ranges = ring_ranges(feature.ends.as_deref(), feature.pair_count());
    let ring_count = ranges.len();
    let mut rings: Vec<Vec<f64>> = Vec::new();
    let mut survived: Vec<Option<usize>> = vec![None; ring_count];

    for (i, (start, end)) in ranges.into_iter().enumerate() {
        let ring = &feature.xy[start * 2..end * 2];
        // Re-close between the passes: the Y pass needs the wrap segment the
        // X pass opened, or corner vertices vanish
        let mut x_pass = clip_ring_axis(ring, clip.min_x, clip.max_x, Axis::X);
        close_ring(&mut x_pass);
        let mut clipped = clip_ring_axis(&x_pass, clip.min_y, clip.max_y, Axis::Y);
        close_ring(&mut clipped);
        // Fewer than three distinct vertices plus the closing one cannot
        // enclose area
        if clipped.len() >= 8 {
            survived[i] = Some(rings.len());
            rings.push(clipped);
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

#[inline]
fn axis_of(x: f64, y: f64, axis: Axis) -> f64 {
    match axis {
        Axis::X => x,
        Axis::Y => y,
    }
}

/// Point where segment `a -> b` crosses the axis constant `k`.
///
/// Finite by construction: only called when the segment straddles `k`, so
/// the axis delta is nonzero.
#[inline]
fn intersect(ax: f64, ay: f64, bx: f64, by: f64, k: f64, axis: Axis) -> (f64, f64) {
    match axis {
        Axis::X => {
            let t = (k - ax) / (bx - ax);
            (k, ay + (by - ay) * t)
        }
        Axis::Y => {
            let t = (k - ay) / (by - ay);
            (ax + (bx - ax) * t, k)
        }
    }
}

/// Clip an open line against the slab `[k1, k2]`, splitting at exits.
fn clip_line_axis(line: &[f64], k1: f64, k2: f64, axis: Axis) -> Vec<Vec<f64>> {
    let mut pieces: Vec<Vec<f64>> = Vec::new();
    let mut current: Vec<f64> = Vec::new();
    let n = line.len() / 2;
    if n == 0 {
        return pieces;
    }

    let mut close = |piece: &mut Vec<f64>| {
        if piece.len() >= 4 {
            pieces.push(std::mem::take(piece));
        } else {
            piece.clear();
        }
    };

    for i in 0..n - 1 {
        let (ax, ay) = (line[i * 2], line[i * 2 + 1]);
        let (bx, by) = (line[i * 2 + 2], line[i * 2 + 3]);
        let a = axis_of(ax, ay, axis);
        let b = axis_of(bx, by, axis);

        if a < k1 {
            if b > k2 {
                // Crosses the whole slab going up
                let (x1, y1) = intersect(ax, ay, bx, by, k1, axis);
                let (x2, y2) = intersect(ax, ay, bx, by, k2, axis);
                current.extend_from_slice(&[x1, y1, x2, y2]);
                close(&mut current);
            } else if b >= k1 {
                // Enters from below
                let (x, y) = intersect(ax, ay, bx, by, k1, axis);
                current.push(x);
                current.push(y);
            }
        } else if a > k2 {
            if b < k1 {
                // Crosses the whole slab going down
                let (x2, y2) = intersect(ax, ay, bx, by, k2, axis);
                let (x1, y1) = intersect(ax, ay, bx, by, k1, axis);
                current.extend_from_slice(&[x2, y2, x1, y1]);
                close(&mut current);
            } else if b <= k2 {
                // Enters from above
                let (x, y) = intersect(ax, ay, bx, by, k2, axis);
                current.push(x);
                current.push(y);
            }
        } else {
            current.push(ax);
            current.push(ay);
            if b < k1 {
                let (x, y) = intersect(ax, ay, bx, by, k1, axis);
                current.push(x);
                current.push(y);
                close(&mut current);
            } else if b > k2 {
                let (x, y) = intersect(ax, ay, bx, by, k2, axis);
                current.push(x);
                current.push(y);
                close(&mut current);
            }
        }
    }

    // Trailing endpoint, if it stayed inside
    let (lx, ly) = (line[(n - 1) * 2], line[(n - 1) * 2 + 1]);
    let l = axis_of(lx, ly, axis);
    if l >= k1 && l <= k2 {
        current.push(lx);
        current.push(ly);
    }
    close(&mut current);

    pieces
}

/// Clip a ring against the slab `[k1, k2]`, accumulating one output ring.
fn clip_ring_axis(ring: &[f64], k1: f64, k2: f64, axis: Axis) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::with_capacity(ring.len());
    let n = ring.len() / 2;
    if n == 0 {
        return out;
    }

    for i in 0..n - 1 {
        let (ax, ay) = (ring[i * 2], ring[i * 2 + 1]);
        let (bx, by) = (ring[i * 2 + 2], ring[i * 2 + 3]);
        let a = axis_of(ax, ay, axis);
        let b = axis_of(bx, by, axis);

        if a < k1 {
            if b > k2 {
                let (x1, y1) = intersect(ax, ay, bx, by, k1, axis);
                let (x2, y2) = intersect(ax, ay, bx, by, k2, axis);
                out.extend_from_slice(&[x1, y1, x2, y2]);
            } else if b >= k1 {
                let (x, y) = intersect(ax, ay, bx, by, k1, axis);
                out.push(x);
                out.push(y);
            }
        } else if a > k2 {
            if b < k1 {
                let (x2, y2) = intersect(ax, ay, bx, by, k2, axis);
                let (x1, y1) = intersect(ax, ay, bx, by, k1, axis);
                out.extend_from_slice(&[x2, y2, x1, y1]);
            } else if b <= k2 {
                let (x, y) = intersect(ax, ay, bx, by, k2, axis);
                out.push(x);
                out.push(y);
            }
        } else {
            out.push(ax);
            out.push(ay);
            if b < k1 {
                let (x, y) = intersect(ax, ay, bx, by, k1, axis);
                out.push(x);
                out.push(y);
            } else if b > k2 {
                let (x, y) = intersect(ax, ay, bx, by, k2, axis);
                out.push(x);
                out.push(y);
            }
        }
    }

    let (lx, ly) = (ring[(n - 1) * 2], ring[(n - 1) * 2 + 1]);
    let l = axis_of(lx, ly, axis);
    if l >= k1 && l <= k2 {
        out.push(lx);
        out.push(ly);
    }

    out
}

/// Append the first vertex when the ring does not end where it started.
fn close_ring(ring: &mut Vec<f64>) {
    if ring.len() >= 4 {
        let n = ring.len();
        if ring[0] != ring[n - 2] || ring[1] != ring[n - 1] {
            let (x, y) = (ring[0], ring[1]);
            ring.push(x);
            ring.push(y);
        }
    }
}
