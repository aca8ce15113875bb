//! FlatGeobuf feature decoding.
//!
//! The feature section of an FGB file is a stream of `[u32 LE size]`-prefixed
//! FlatBuffer records. Each record carries a geometry table (flat coordinate
//! array plus ring ends, or nested sub-geometry parts) and a packed property
//! stream keyed by column index. Decoding produces [`RawFeature`]s: owned
//! flat coordinate arrays the geometry pipeline mutates in place, plus a
//! typed property map.
//!
//! Malformed individual records are skipped, and malformed property tails are
//! truncated, without failing the surrounding request; degraded output beats
//! refusing a whole tile for one bad row.

use crate::flatbuf::FlatBuffer;
use crate::header::{Column, ColumnType, GeometryType, Header};
use crate::Result;

/// Nested sub-geometry recursion bound; deeper parts decode as nothing.
pub const MAX_PART_DEPTH: usize = 4;

// Feature FlatBuffer field slots
const FEATURE_GEOMETRY: usize = 0;
const FEATURE_PROPERTIES: usize = 1;

// Geometry FlatBuffer field slots
const GEOMETRY_ENDS: usize = 0;
const GEOMETRY_XY: usize = 1;
const GEOMETRY_TYPE: usize = 6;
const GEOMETRY_PARTS: usize = 7;

/// A decoded property value.
///
/// `Bytes` and `Null` never reach the MVT encoding; the layer builder
/// filters them.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    String(String),
    Int(i64),
    UInt(u64),
    Double(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Null,
}

/// A feature decoded from FGB, before the geometry pipeline runs.
///
/// Coordinates are a flat interleaved `[x0,y0,x1,y1,...]` array. `ends`
/// holds cumulative coordinate-pair counts marking ring/part boundaries;
/// `parts` holds indices into `ends` marking exterior-ring starts and is
/// only set for MultiPolygons with several polygons.
///
/// The projection stage mutates `xy` in place, so a `RawFeature` must not be
/// reused across tile requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    pub geometry_type: GeometryType,
    pub xy: Vec<f64>,
    pub ends: Option<Vec<u32>>,
    pub parts: Option<Vec<usize>>,
    pub properties: Vec<(String, PropValue)>,
    pub id: Option<u64>,
}

impl RawFeature {
    /// Number of coordinate pairs.
    pub fn pair_count(&self) -> usize {
        self.xy.len() / 2
    }
}

/// Ring/part boundaries as `[start, end)` pair-index ranges.
///
/// With no `ends`, the whole array is one ring.
pub fn ring_ranges(ends: Option<&[u32]>, pair_count: usize) -> Vec<(usize, usize)> {
    match ends {
        None => vec![(0, pair_count)],
        Some(ends) => {
            let mut ranges = Vec::with_capacity(ends.len());
            let mut start = 0usize;
            for &end in ends {
                let end = (end as usize).min(pair_count);
                if end > start {
                    ranges.push((start, end));
                }
                start = end;
            }
            ranges
        }
    }
}

/// Flatten rings back into one coordinate array with cumulative ends.
///
/// `ends` is `None` when a single ring remains, matching the decoder's
/// single-ring representation.
pub fn assemble_rings(rings: Vec<Vec<f64>>) -> (Vec<f64>, Option<Vec<u32>>) {
    if rings.len() == 1 {
        let mut rings = rings;
        return (rings.pop().unwrap(), None);
    }
    let mut xy = Vec::with_capacity(rings.iter().map(Vec::len).sum());
    let mut ends = Vec::with_capacity(rings.len());
    for ring in rings {
        xy.extend_from_slice(&ring);
        ends.push((xy.len() / 2) as u32);
    }
    (xy, Some(ends))
}

/// Remap exterior-ring indices after rings were dropped.
///
/// `survived[i]` is the new position of original ring `i`, if any. Each
/// original exterior entry maps to the first surviving ring of its
/// sub-polygon; sub-polygons that lost every ring disappear. Fewer than two
/// remaining entries collapse to `None` (a single polygon needs no `parts`).
pub fn remap_parts(
    parts: &[usize],
    ring_count: usize,
    survived: &[Option<usize>],
) -> Option<Vec<usize>> {
    let mut remapped = Vec::with_capacity(parts.len());
    for (i, &start) in parts.iter().enumerate() {
        let span_end = parts.get(i + 1).copied().unwrap_or(ring_count);
        if let Some(new_idx) = (start..span_end).find_map(|r| survived.get(r).copied().flatten())
        {
            remapped.push(new_idx);
        }
    }
    if remapped.len() >= 2 {
        Some(remapped)
    } else {
        None
    }
}

struct DecodedGeometry {
    geometry_type: GeometryType,
    xy: Vec<f64>,
    ends: Option<Vec<u32>>,
    parts: Option<Vec<usize>>,
}

/// Streaming decoder over concatenated feature records.
///
/// Feature ids are 1-based decode-order ordinals, stable across the chunks
/// of one request.
pub struct FeatureDecoder<'h> {
    header: &'h Header,
    next_id: u64,
}

impl<'h> FeatureDecoder<'h> {
    pub fn new(header: &'h Header) -> Self {
        Self { header, next_id: 1 }
    }

    /// Decode every complete feature record in `bytes`.
    ///
    /// Iteration stops on buffer exhaustion, a zero size prefix, a record
    /// extending past the buffer (the tail of an over-fetched range), or
    /// once `max_features` in total have been decoded across calls.
    pub fn decode(&mut self, bytes: &[u8], max_features: Option<u64>) -> Vec<RawFeature> {
        let mut features = Vec::new();
        let mut pos = 0usize;

        loop {
            if max_features.is_some_and(|max| self.next_id > max) {
                break;
            }
            if pos + 4 > bytes.len() {
                break;
            }
            let size = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            if size == 0 {
                break;
            }
            pos += 4;
            if pos + size > bytes.len() {
                // Over-read past the last requested feature
                break;
            }

            match self.decode_one(&bytes[pos..pos + size]) {
                Ok(Some(feature)) => features.push(feature),
                Ok(None) => {}
                Err(e) => log::debug!("skipping malformed feature record: {}", e),
            }
            pos += size;
        }

        features
    }

    fn decode_one(&mut self, record: &[u8]) -> Result<Option<RawFeature>> {
        let fb = FlatBuffer::new(record);
        let table = fb.root_table()?;

        let Some(geom_table) = fb.field_table(table, FEATURE_GEOMETRY)? else {
            return Ok(None);
        };
        let Some(geometry) =
            decode_geometry(&fb, geom_table, self.header.geometry_type, 0)?
        else {
            return Ok(None);
        };

        let properties = match fb.field_vector(table, FEATURE_PROPERTIES)? {
            Some(vec_pos) => {
                let len = fb.vector_len(vec_pos)?;
                let data = fb.read_bytes(FlatBuffer::vector_start(vec_pos), len)?;
                decode_properties(data, &self.header.columns)
            }
            None => Vec::new(),
        };

        let id = self.next_id;
        self.next_id += 1;

        Ok(Some(RawFeature {
            geometry_type: geometry.geometry_type,
            xy: geometry.xy,
            ends: geometry.ends,
            parts: geometry.parts,
            properties,
            id: Some(id),
        }))
    }
}

/// Decode one geometry table into flat coordinates.
///
/// Returns `None` for empty geometries and for parts nested beyond
/// [`MAX_PART_DEPTH`].
fn decode_geometry(
    fb: &FlatBuffer,
    table: usize,
    parent_type: GeometryType,
    depth: usize,
) -> Result<Option<DecodedGeometry>> {
    let geometry_type = match fb.field_u8(table, GEOMETRY_TYPE, 0)? {
        0 => parent_type,
        v => GeometryType::from_u8(v),
    };

    // Flat encoding: coordinates directly on this table
    if let Some(xy_pos) = fb.field_vector(table, GEOMETRY_XY)? {
        let xy = fb.read_f64_vector(xy_pos)?;
        if !xy.is_empty() {
            let ends = match fb.field_vector(table, GEOMETRY_ENDS)? {
                Some(ends_pos) => {
                    let ends = fb.read_u32_vector(ends_pos)?;
                    if ends.is_empty() {
                        None
                    } else {
                        Some(ends)
                    }
                }
                None => None,
            };
            return Ok(Some(DecodedGeometry {
                geometry_type,
                xy,
                ends,
                parts: None,
            }));
        }
    }

    // Nested encoding: concatenate sub-geometry parts
    let Some(parts_pos) = fb.field_vector(table, GEOMETRY_PARTS)? else {
        return Ok(None);
    };
    if depth >= MAX_PART_DEPTH {
        return Ok(None);
    }

    let part_count = fb.vector_len(parts_pos)?;
    let start = FlatBuffer::vector_start(parts_pos);
    let mut xy: Vec<f64> = Vec::new();
    let mut ends: Vec<u32> = Vec::new();
    let mut part_starts: Vec<usize> = Vec::new();

    for i in 0..part_count {
        let part_table = fb.indirect(start + i * 4)?;
        let Some(part) = decode_geometry(fb, part_table, geometry_type, depth + 1)? else {
            continue;
        };

        let pair_base = (xy.len() / 2) as u32;
        part_starts.push(ends.len());
        match part.ends {
            Some(part_ends) => ends.extend(part_ends.iter().map(|e| e + pair_base)),
            None => ends.push(pair_base + (part.xy.len() / 2) as u32),
        }
        xy.extend_from_slice(&part.xy);
    }

    if xy.is_empty() {
        return Ok(None);
    }

    let parts = if geometry_type == GeometryType::MultiPolygon && part_starts.len() >= 2 {
        Some(part_starts)
    } else {
        None
    };

    Ok(Some(DecodedGeometry {
        geometry_type,
        xy,
        ends: Some(ends),
        parts,
    }))
}

/// Decode the packed `[u16 column index][value bytes]` property stream.
///
/// A column index past the schema, an unknown column type or a truncated
/// value terminates parsing; whatever decoded before that is kept.
pub fn decode_properties(data: &[u8], columns: &[Column]) -> Vec<(String, PropValue)> {
    let mut props = Vec::new();
    let mut pos = 0usize;

    macro_rules! take {
        ($n:expr) => {{
            if pos + $n > data.len() {
                break;
            }
            let bytes = &data[pos..pos + $n];
            pos += $n;
            bytes
        }};
    }

    loop {
        if pos + 2 > data.len() {
            break;
        }
        let idx = u16::from_le_bytes(data[pos..pos + 2].try_into().unwrap()) as usize;
        pos += 2;
        let Some(column) = columns.get(idx) else {
            break;
        };
        let Some(col_type) = column.col_type else {
            // Unknown column type: the value length is undecodable, so the
            // rest of the stream is lost with it
            props.push((column.name.clone(), PropValue::Null));
            break;
        };

        let value = match col_type {
            ColumnType::Bool => PropValue::Bool(take!(1)[0] != 0),
            ColumnType::Byte => PropValue::Int(take!(1)[0] as i8 as i64),
            ColumnType::UByte => PropValue::UInt(take!(1)[0] as u64),
            ColumnType::Short => {
                PropValue::Int(i16::from_le_bytes(take!(2).try_into().unwrap()) as i64)
            }
            ColumnType::UShort => {
                PropValue::UInt(u16::from_le_bytes(take!(2).try_into().unwrap()) as u64)
            }
            ColumnType::Int => {
                PropValue::Int(i32::from_le_bytes(take!(4).try_into().unwrap()) as i64)
            }
            ColumnType::UInt => {
                PropValue::UInt(u32::from_le_bytes(take!(4).try_into().unwrap()) as u64)
            }
            ColumnType::Float => {
                PropValue::Double(f32::from_le_bytes(take!(4).try_into().unwrap()) as f64)
            }
            ColumnType::Long => {
                PropValue::Int(i64::from_le_bytes(take!(8).try_into().unwrap()))
            }
            ColumnType::ULong => {
                PropValue::UInt(u64::from_le_bytes(take!(8).try_into().unwrap()))
            }
            ColumnType::Double => {
                PropValue::Double(f64::from_le_bytes(take!(8).try_into().unwrap()))
            }
            ColumnType::String | ColumnType::Json | ColumnType::DateTime => {
                let len = u32::from_le_bytes(take!(4).try_into().unwrap()) as usize;
                let bytes = take!(len);
                PropValue::String(String::from_utf8_lossy(bytes).into_owned())
            }
            ColumnType::Binary => {
                let len = u32::from_le_bytes(take!(4).try_into().unwrap()) as usize;
                PropValue::Bytes(take!(len).to_vec())
            }
        };
        props.push((column.name.clone(), value));
    }

    props
}
