//! MVT (Mapbox Vector Tile) geometry and layer encoding.
//!
//! The final CPU stages of the pipeline: scale Mercator-unit coordinates to
//! the integer tile grid, fix polygon winding, pack geometries into the MVT
//! command stream, and assemble features into layers with deduplicated
//! key/value tables. Key pieces:
//!
//! - **Zigzag encoding**: signed deltas as small unsigned integers
//! - **Command encoding**: `(command_id | (count << 3))` packed commands
//! - **Winding correction**: clockwise exteriors in y-down tile space
//! - **Layer building**: key/value interning with canonical dedup keys
//!
//! Reference: <https://github.com/mapbox/vector-tile-spec>

use std::collections::HashMap;

use crate::feature::{ring_ranges, PropValue, RawFeature};
use crate::header::GeometryType;
use crate::tile::TileCoord;

/// Default tile extent (4096 as per MVT spec)
pub const DEFAULT_EXTENT: u32 = 4096;

/// MVT command IDs
const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

// ============================================================================
// Zigzag and Command Encoding
// ============================================================================

/// Encode a signed integer using zigzag encoding.
///
/// Maps signed to unsigned so small magnitudes stay small:
/// 0 → 0, -1 → 1, 1 → 2, -2 → 3, ...
#[inline]
pub fn zigzag_encode(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Decode a zigzag-encoded unsigned integer back to signed.
#[inline]
pub fn zigzag_decode(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// Pack a command with a repeat count: `(command_id & 0x7) | (count << 3)`.
#[inline]
pub fn command_encode(command_id: u32, count: u32) -> u32 {
    (command_id & 0x7) | (count << 3)
}

/// Unpack a command into (command_id, count).
#[inline]
pub fn command_decode(command: u32) -> (u32, u32) {
    (command & 0x7, command >> 3)
}

// ============================================================================
// Geometry Type Mapping
// ============================================================================

/// MVT geometry types; multis collapse onto their base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvtGeomType {
    Point = 1,
    LineString = 2,
    Polygon = 3,
}

impl MvtGeomType {
    pub fn from_geometry(geometry_type: GeometryType) -> Self {
        match geometry_type {
            GeometryType::Point | GeometryType::MultiPoint | GeometryType::Unknown => {
                MvtGeomType::Point
            }
            GeometryType::LineString | GeometryType::MultiLineString => MvtGeomType::LineString,
            GeometryType::Polygon | GeometryType::MultiPolygon => MvtGeomType::Polygon,
        }
    }
}

// ============================================================================
// Coordinate Transformation
// ============================================================================

/// Scale Mercator-unit coordinates to integer tile coordinates.
///
/// Produces a fresh array; buffer-margin coordinates may be negative or
/// exceed the extent.
pub fn transform_coords(xy: &[f64], coord: TileCoord, extent: u32) -> Vec<i32> {
    let scale = (1u64 << coord.z) as f64;
    let extent = extent as f64;
    let tx = coord.x as f64;
    let ty = coord.y as f64;

    let mut out = Vec::with_capacity(xy.len());
    for pair in xy.chunks_exact(2) {
        out.push((extent * (pair[0] * scale - tx)).round() as i32);
        out.push((extent * (pair[1] * scale - ty)).round() as i32);
    }
    out
}

// ============================================================================
// Winding Correction
// ============================================================================

/// Signed shoelace sum (surveyor's formula) of a ring; positive means
/// clockwise in y-down tile coordinates, which MVT requires of exteriors.
fn shoelace(coords: &[i32], start: usize, end: usize) -> i64 {
    let n = end - start;
    if n < 3 {
        return 0;
    }
    let mut sum = 0i64;
    for i in start + 1..end {
        let (x0, y0) = (coords[(i - 1) * 2] as i64, coords[(i - 1) * 2 + 1] as i64);
        let (x1, y1) = (coords[i * 2] as i64, coords[i * 2 + 1] as i64);
        sum += x0 * y1 - x1 * y0;
    }
    // Wrap segment; contributes nothing when the ring is explicitly closed
    let (xl, yl) = (coords[(end - 1) * 2] as i64, coords[(end - 1) * 2 + 1] as i64);
    let (xf, yf) = (coords[start * 2] as i64, coords[start * 2 + 1] as i64);
    sum + (xl * yf - xf * yl)
}

fn reverse_ring(coords: &mut [i32], start: usize, end: usize) {
    let n = end - start;
    for k in 0..n / 2 {
        let a = (start + k) * 2;
        let b = (start + n - 1 - k) * 2;
        coords.swap(a, b);
        coords.swap(a + 1, b + 1);
    }
}

/// Fix ring orientation for MVT: exterior rings clockwise, holes
/// counter-clockwise, in y-down tile coordinates.
///
/// Exterior rings are ring 0 for simple polygons, or the `parts`-listed
/// rings for MultiPolygons carrying several polygons.
pub fn correct_winding(
    coords: &mut [i32],
    ends: Option<&[u32]>,
    parts: Option<&[usize]>,
    geometry_type: GeometryType,
) {
    if !geometry_type.is_polygonal() {
        return;
    }

    let ranges = ring_ranges(ends, coords.len() / 2);
    for (ring_idx, (start, end)) in ranges.iter().enumerate() {
        let is_exterior = match parts {
            Some(parts) => parts.contains(&ring_idx),
            None => ring_idx == 0,
        };
        let sum = shoelace(coords, *start, *end);
        if sum == 0 {
            continue;
        }
        let is_cw = sum > 0;
        if is_cw != is_exterior {
            reverse_ring(coords, *start, *end);
        }
    }
}

// ============================================================================
// Command Stream Encoding
// ============================================================================

/// Pack tile-integer coordinates into the MVT command stream.
///
/// The delta cursor starts at (0, 0) and persists across all rings and
/// parts of one feature.
pub fn encode_geometry(coords: &[i32], ends: Option<&[u32]>, geom_type: MvtGeomType) -> Vec<u32> {
    let pair_count = coords.len() / 2;
    let mut geometry = Vec::with_capacity(coords.len() + 4);
    let mut cursor_x = 0i32;
    let mut cursor_y = 0i32;

    let push_delta = |geometry: &mut Vec<u32>, cx: &mut i32, cy: &mut i32, i: usize| {
        let (x, y) = (coords[i * 2], coords[i * 2 + 1]);
        geometry.push(zigzag_encode(x - *cx));
        geometry.push(zigzag_encode(y - *cy));
        *cx = x;
        *cy = y;
    };

    match geom_type {
        MvtGeomType::Point => {
            if pair_count == 0 {
                return geometry;
            }
            geometry.push(command_encode(CMD_MOVE_TO, pair_count as u32));
            for i in 0..pair_count {
                push_delta(&mut geometry, &mut cursor_x, &mut cursor_y, i);
            }
        }
        MvtGeomType::LineString => {
            for (start, end) in ring_ranges(ends, pair_count) {
                let n = end - start;
                if n < 2 {
                    continue;
                }
                geometry.push(command_encode(CMD_MOVE_TO, 1));
                push_delta(&mut geometry, &mut cursor_x, &mut cursor_y, start);
                geometry.push(command_encode(CMD_LINE_TO, (n - 1) as u32));
                for i in start + 1..end {
                    push_delta(&mut geometry, &mut cursor_x, &mut cursor_y, i);
                }
            }
        }
        MvtGeomType::Polygon => {
            for (start, end) in ring_ranges(ends, pair_count) {
                let n = end - start;
                if n < 2 {
                    continue;
                }
                // The closing vertex is implied by ClosePath
                let closed = coords[start * 2] == coords[(end - 1) * 2]
                    && coords[start * 2 + 1] == coords[(end - 1) * 2 + 1];
                let effective = if closed { n - 1 } else { n };
                if effective < 3 {
                    continue;
                }
                geometry.push(command_encode(CMD_MOVE_TO, 1));
                push_delta(&mut geometry, &mut cursor_x, &mut cursor_y, start);
                geometry.push(command_encode(CMD_LINE_TO, (effective - 1) as u32));
                for i in start + 1..start + effective {
                    push_delta(&mut geometry, &mut cursor_x, &mut cursor_y, i);
                }
                geometry.push(command_encode(CMD_CLOSE_PATH, 1));
            }
        }
    }

    geometry
}

// ============================================================================
// Values, Features and Layers
// ============================================================================

/// A property value as MVT encodes it.
#[derive(Debug, Clone, PartialEq)]
pub enum MvtValue {
    String(String),
    Double(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

impl MvtValue {
    /// Canonical `<tag>:<value>` form used for value interning.
    ///
    /// The textual form is locale-independent; a numeric value and a string
    /// with the same digits land in distinct slots via the tag prefix.
    pub fn dedup_key(&self) -> String {
        match self {
            MvtValue::String(s) => format!("s:{}", s),
            MvtValue::Double(d) => format!("d:{}", d),
            MvtValue::Int(i) => format!("i:{}", i),
            MvtValue::UInt(u) => format!("u:{}", u),
            MvtValue::Bool(b) => format!("b:{}", b),
        }
    }
}

/// Map a decoded property to its MVT value, or `None` for values MVT does
/// not carry (binary blobs, nulls).
///
/// Integer-valued doubles collapse onto the integer variants so that e.g. a
/// Double column holding 1.0 shares a slot with a ULong holding 1.
pub fn classify_value(value: &PropValue) -> Option<MvtValue> {
    match value {
        PropValue::String(s) => Some(MvtValue::String(s.clone())),
        PropValue::Bool(b) => Some(MvtValue::Bool(*b)),
        PropValue::Int(i) => Some(MvtValue::Int(*i)),
        PropValue::UInt(u) => Some(MvtValue::UInt(*u)),
        PropValue::Double(d) => {
            if d.fract() == 0.0 && d.abs() < (1u64 << 63) as f64 {
                if *d >= 0.0 {
                    Some(MvtValue::UInt(*d as u64))
                } else {
                    Some(MvtValue::Int(*d as i64))
                }
            } else {
                Some(MvtValue::Double(*d))
            }
        }
        PropValue::Bytes(_) | PropValue::Null => None,
    }
}

/// One encoded feature of a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MvtFeature {
    pub id: Option<u64>,
    pub geom_type: MvtGeomType,
    pub geometry: Vec<u32>,
    /// `[key_idx, value_idx, ...]` pairs into the layer tables
    pub tags: Vec<u32>,
}

/// One named layer of a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct MvtLayer {
    pub name: String,
    pub extent: u32,
    pub features: Vec<MvtFeature>,
    pub keys: Vec<String>,
    pub values: Vec<MvtValue>,
}

impl MvtLayer {
    /// A well-formed layer with no features; still serialized, so clients
    /// see the layer exists.
    pub fn empty(name: impl Into<String>, extent: u32) -> Self {
        Self {
            name: name.into(),
            extent,
            features: Vec::new(),
            keys: Vec::new(),
            values: Vec::new(),
        }
    }
}

/// Builder interning keys and values while features accumulate.
pub struct LayerBuilder {
    name: String,
    extent: u32,
    features: Vec<MvtFeature>,
    keys: Vec<String>,
    key_index: HashMap<String, u32>,
    values: Vec<MvtValue>,
    value_index: HashMap<String, u32>,
}

impl LayerBuilder {
    /// Create a new layer builder with the given name.
    pub fn new(name: impl Into<String>, extent: u32) -> Self {
        Self {
            name: name.into(),
            extent,
            features: Vec::new(),
            keys: Vec::new(),
            key_index: HashMap::new(),
            values: Vec::new(),
            value_index: HashMap::new(),
        }
    }

    fn intern_key(&mut self, key: &str) -> u32 {
        if let Some(&idx) = self.key_index.get(key) {
            return idx;
        }
        let idx = self.keys.len() as u32;
        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), idx);
        idx
    }

    fn intern_value(&mut self, value: MvtValue) -> u32 {
        let dedup_key = value.dedup_key();
        if let Some(&idx) = self.value_index.get(&dedup_key) {
            return idx;
        }
        let idx = self.values.len() as u32;
        self.values.push(value);
        self.value_index.insert(dedup_key, idx);
        idx
    }

    /// Add a pipelined feature with its encoded command stream.
    ///
    /// Features whose command stream came out empty are dropped.
    pub fn add_feature(&mut self, raw: &RawFeature, geom_type: MvtGeomType, geometry: Vec<u32>) {
        if geometry.is_empty() {
            return;
        }

        let mut tags = Vec::with_capacity(raw.properties.len() * 2);
        for (key, value) in &raw.properties {
            let Some(mvt_value) = classify_value(value) else {
                continue;
            };
            let key_idx = self.intern_key(key);
            let value_idx = self.intern_value(mvt_value);
            tags.push(key_idx);
            tags.push(value_idx);
        }

        self.features.push(MvtFeature {
            id: raw.id,
            geom_type,
            geometry,
            tags,
        });
    }

    /// Build the layer.
    pub fn build(self) -> MvtLayer {
        MvtLayer {
            name: self.name,
            extent: self.extent,
            features: self.features,
            keys: self.keys,
            values: self.values,
        }
    }
}
