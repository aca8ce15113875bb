//! Tile coordinate math and derived-bounds caches.
//!
//! Three coordinate spaces flow through the pipeline: WGS84 degrees (index
//! queries), Mercator unit space with both axes in `[0, 1]` and y=0 at the
//! north edge (clipping and simplification), and integer tile coordinates
//! (MVT encoding). This module holds the conversions between them plus the
//! per-tile bounding boxes, cached because every request for the same tile
//! derives the same values.

use std::f64::consts::PI;

use dashmap::DashMap;

/// Tile coordinates: x, y, and zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoord {
    /// Create a new tile coordinate
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Single-integer id, unique across all zoom levels up to 29.
    pub fn id(&self) -> u64 {
        ((1u64 << self.z) * self.y as u64 + self.x as u64) * 32 + self.z as u64
    }

    /// Geographic bounds of this tile in WGS84 degrees.
    pub fn wgs84_bounds(&self) -> Bbox {
        let n = (1u64 << self.z) as f64;
        let lng_min = self.x as f64 / n * 360.0 - 180.0;
        let lng_max = (self.x as f64 + 1.0) / n * 360.0 - 180.0;

        // Inverse Mercator for the north/south edges
        let lat = |y: f64| {
            let y_rad = PI * (1.0 - 2.0 * y / n);
            y_rad.sinh().atan().to_degrees()
        };
        let lat_max = lat(self.y as f64);
        let lat_min = lat(self.y as f64 + 1.0);

        Bbox::new(lng_min, lat_min, lng_max, lat_max)
    }

    /// Clip rectangle of this tile in Mercator unit space, widened by
    /// `buffer` tile-pixels of an `extent`-pixel tile on every side.
    pub fn clip_bounds(&self, buffer: u32, extent: u32) -> Bbox {
        let n = (1u64 << self.z) as f64;
        let margin = buffer as f64 / extent as f64;
        Bbox::new(
            (self.x as f64 - margin) / n,
            (self.y as f64 - margin) / n,
            (self.x as f64 + 1.0 + margin) / n,
            (self.y as f64 + 1.0 + margin) / n,
        )
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bbox {
    /// Create a new bounding box
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Create an empty/invalid bounding box
    pub fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    /// Check if this is a valid bounding box
    pub fn is_valid(&self) -> bool {
        self.min_x <= self.max_x && self.min_y <= self.max_y
    }

    /// Expand this bounding box to include another
    pub fn expand(&mut self, other: &Self) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// Expand this bounding box to include a point
    pub fn expand_point(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Whether this box and `other` share any point (boundary inclusive).
    pub fn intersects(&self, other: &Self) -> bool {
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    /// Whether `other` lies entirely inside this box.
    pub fn contains(&self, other: &Self) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// Bounding box of a flat `[x0,y0,x1,y1,...]` coordinate array.
    pub fn of_coords(xy: &[f64]) -> Self {
        let mut bbox = Self::empty();
        for pair in xy.chunks_exact(2) {
            bbox.expand_point(pair[0], pair[1]);
        }
        bbox
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Project longitude to Mercator unit x in `[0, 1]`.
#[inline]
pub fn project_x(lng: f64) -> f64 {
    lng / 360.0 + 0.5
}

/// Project latitude to Mercator unit y in `[0, 1]`, y=0 at the north edge.
///
/// Latitudes past the Mercator limits clamp to the edges.
#[inline]
pub fn project_y(lat: f64) -> f64 {
    let sin = (lat * PI / 180.0).sin();
    let y = 0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * PI);
    y.clamp(0.0, 1.0)
}

/// Project a flat WGS84 coordinate array to Mercator unit space, in place.
///
/// The array must not alias the source record bytes; the feature decoder
/// always hands out owned buffers for this reason.
pub fn project_in_place(xy: &mut [f64]) {
    for pair in xy.chunks_exact_mut(2) {
        pair[0] = project_x(pair[0]);
        pair[1] = project_y(pair[1]);
    }
}

/// Shared caches for per-tile derived bounding boxes.
///
/// Both maps are append-only: entries are immutable once inserted, and
/// concurrent callers racing to insert the same key compute identical
/// values, so duplicate initializations are harmless.
#[derive(Debug, Default)]
pub struct BoundsCache {
    wgs84: DashMap<u64, Bbox>,
    clip: DashMap<(u64, u32, u32), Bbox>,
}

impl BoundsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// WGS84 bounds of `coord`, computed once per tile.
    pub fn wgs84(&self, coord: TileCoord) -> Bbox {
        *self
            .wgs84
            .entry(coord.id())
            .or_insert_with(|| coord.wgs84_bounds())
    }

    /// Mercator clip bounds of `coord` for a given buffer and extent.
    pub fn clip(&self, coord: TileCoord, buffer: u32, extent: u32) -> Bbox {
        *self
            .clip
            .entry((coord.id(), buffer, extent))
            .or_insert_with(|| coord.clip_bounds(buffer, extent))
    }
}
