//! FlatGeobuf header parsing.
//!
//! A FlatGeobuf file opens with `[8-byte magic][u32 LE header size][header
//! FlatBuffer]`, followed by the packed R-tree index and the length-prefixed
//! feature records. This module validates the prologue, decodes the header
//! table and computes the derived index/feature byte offsets the rest of the
//! pipeline navigates by.

use crate::flatbuf::FlatBuffer;
use crate::index;
use crate::tile::Bbox;
use crate::{Error, Result};

/// FlatGeobuf magic bytes; the final byte is the patch version and is
/// accepted as any value.
pub const MAGIC_BYTES: [u8; 8] = [b'f', b'g', b'b', 3, b'f', b'g', b'b', 0];

/// Bytes of `[magic][u32 header size]` preceding the header FlatBuffer.
pub const PROLOGUE_LEN: usize = 12;

/// Geometry types carried by FlatGeobuf headers and feature records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryType {
    Unknown,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeometryType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => GeometryType::Point,
            2 => GeometryType::LineString,
            3 => GeometryType::Polygon,
            4 => GeometryType::MultiPoint,
            5 => GeometryType::MultiLineString,
            6 => GeometryType::MultiPolygon,
            _ => GeometryType::Unknown,
        }
    }

    /// Whether coordinates form closed rings.
    pub fn is_polygonal(&self) -> bool {
        matches!(self, GeometryType::Polygon | GeometryType::MultiPolygon)
    }
}

/// Property column types defined by the FlatGeobuf schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Byte,
    UByte,
    Bool,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    String,
    Json,
    DateTime,
    Binary,
}

impl ColumnType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => ColumnType::Byte,
            1 => ColumnType::UByte,
            2 => ColumnType::Bool,
            3 => ColumnType::Short,
            4 => ColumnType::UShort,
            5 => ColumnType::Int,
            6 => ColumnType::UInt,
            7 => ColumnType::Long,
            8 => ColumnType::ULong,
            9 => ColumnType::Float,
            10 => ColumnType::Double,
            11 => ColumnType::String,
            12 => ColumnType::Json,
            13 => ColumnType::DateTime,
            14 => ColumnType::Binary,
            _ => return None,
        })
    }
}

/// One property column of the dataset schema.
///
/// `col_type` is `None` when the file carries a type code this implementation
/// does not know; values of such columns decode as null.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub col_type: Option<ColumnType>,
    pub nullable: bool,
}

/// Parsed FlatGeobuf header with derived byte offsets.
#[derive(Debug, Clone)]
pub struct Header {
    pub name: Option<String>,
    pub envelope: Option<Bbox>,
    pub geometry_type: GeometryType,
    pub columns: Vec<Column>,
    pub features_count: u64,
    /// Packed R-tree fan-out; 0 means the file has no spatial index.
    pub index_node_size: u16,
    /// Total size of `[magic][u32][header FlatBuffer]` in bytes.
    pub header_size: usize,
    /// Absolute byte offset of the spatial index section.
    pub index_offset: u64,
    /// Byte size of the spatial index section (0 when absent).
    pub index_size: u64,
    /// Absolute byte offset of the first feature record.
    pub features_offset: u64,
}

// Header FlatBuffer field slots
const HEADER_NAME: usize = 0;
const HEADER_ENVELOPE: usize = 1;
const HEADER_GEOMETRY_TYPE: usize = 2;
const HEADER_COLUMNS: usize = 7;
const HEADER_FEATURES_COUNT: usize = 8;
const HEADER_INDEX_NODE_SIZE: usize = 9;

// Column FlatBuffer field slots
const COLUMN_NAME: usize = 0;
const COLUMN_TYPE: usize = 1;
const COLUMN_NULLABLE: usize = 14;

fn check_magic(bytes: &[u8]) -> Result<()> {
    // Only the first 7 bytes are significant; the 8th is the patch version.
    if bytes[..7] != MAGIC_BYTES[..7] {
        return Err(Error::InvalidMagic);
    }
    Ok(())
}

/// Total header size `[magic][u32][FlatBuffer]` from the first file bytes.
///
/// Reads only the 12-byte prologue, letting the orchestrator do a two-phase
/// initial read: fetch 12 bytes, learn the full size, fetch the rest.
pub fn header_byte_size(first_bytes: &[u8]) -> Result<usize> {
    if first_bytes.len() < PROLOGUE_LEN {
        return Err(Error::ShortRead {
            wanted: PROLOGUE_LEN,
            got: first_bytes.len(),
        });
    }
    check_magic(first_bytes)?;
    let fb_size = u32::from_le_bytes(first_bytes[8..12].try_into().unwrap()) as usize;
    Ok(PROLOGUE_LEN + fb_size)
}

/// Parse the header section of a FlatGeobuf file.
///
/// `bytes` must cover at least the full header (`header_byte_size` bytes);
/// trailing bytes are ignored.
pub fn parse_header(bytes: &[u8]) -> Result<Header> {
    let header_size = header_byte_size(bytes)?;
    if bytes.len() < header_size {
        return Err(Error::ShortRead {
            wanted: header_size,
            got: bytes.len(),
        });
    }

    let fb = FlatBuffer::new(&bytes[PROLOGUE_LEN..header_size]);
    let table = fb.root_table()?;

    let name = fb.field_string(table, HEADER_NAME)?;
    let envelope = match fb.field_vector(table, HEADER_ENVELOPE)? {
        Some(vec_pos) => {
            let env = fb.read_f64_vector(vec_pos)?;
            if env.len() == 4 {
                Some(Bbox::new(env[0], env[1], env[2], env[3]))
            } else {
                None
            }
        }
        None => None,
    };
    let geometry_type = GeometryType::from_u8(fb.field_u8(table, HEADER_GEOMETRY_TYPE, 0)?);
    let features_count = fb.field_u64(table, HEADER_FEATURES_COUNT, 0)?;
    let index_node_size = fb.field_u16(table, HEADER_INDEX_NODE_SIZE, 16)?;

    let mut columns = Vec::new();
    if let Some(vec_pos) = fb.field_vector(table, HEADER_COLUMNS)? {
        let len = fb.vector_len(vec_pos)?;
        let start = FlatBuffer::vector_start(vec_pos);
        for i in 0..len {
            let col_table = fb.indirect(start + i * 4)?;
            let name = fb
                .field_string(col_table, COLUMN_NAME)?
                .ok_or_else(|| Error::MalformedFlatBuffer("column without a name".into()))?;
            let col_type = ColumnType::from_u8(fb.field_u8(col_table, COLUMN_TYPE, 0)?);
            let nullable = fb.field_bool(col_table, COLUMN_NULLABLE, true)?;
            columns.push(Column {
                name,
                col_type,
                nullable,
            });
        }
    }

    let index_offset = header_size as u64;
    let index_size = if index_node_size == 0 || features_count == 0 {
        0
    } else {
        index::packed_index_size(features_count, index_node_size)
    };

    Ok(Header {
        name,
        envelope,
        geometry_type,
        columns,
        features_count,
        index_node_size,
        header_size,
        index_offset,
        index_size,
        features_offset: index_offset + index_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_patch_byte_accepted() {
        let mut bytes = MAGIC_BYTES.to_vec();
        bytes[7] = 0xAB; // any patch version is valid
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(header_byte_size(&bytes).unwrap(), 12);
    }

    #[test]
    fn test_magic_mismatch_rejected() {
        let mut bytes = MAGIC_BYTES.to_vec();
        bytes[0] = b'x';
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            header_byte_size(&bytes),
            Err(Error::InvalidMagic)
        ));
    }

    #[test]
    fn test_prologue_short_read() {
        let bytes = [b'f', b'g', b'b'];
        assert!(matches!(
            header_byte_size(&bytes),
            Err(Error::ShortRead { wanted: 12, got: 3 })
        ));
    }

    #[test]
    fn test_header_size_from_prologue() {
        let mut bytes = MAGIC_BYTES.to_vec();
        bytes.extend_from_slice(&100u32.to_le_bytes());
        assert_eq!(header_byte_size(&bytes).unwrap(), 112);
    }

    #[test]
    fn test_parse_header_truncated_flatbuffer() {
        let mut bytes = MAGIC_BYTES.to_vec();
        bytes.extend_from_slice(&100u32.to_le_bytes());
        // Promises 100 FlatBuffer bytes, delivers none
        assert!(matches!(
            parse_header(&bytes),
            Err(Error::ShortRead { .. })
        ));
    }

    #[test]
    fn test_geometry_type_mapping() {
        assert_eq!(GeometryType::from_u8(0), GeometryType::Unknown);
        assert_eq!(GeometryType::from_u8(1), GeometryType::Point);
        assert_eq!(GeometryType::from_u8(6), GeometryType::MultiPolygon);
        assert_eq!(GeometryType::from_u8(99), GeometryType::Unknown);
        assert!(GeometryType::Polygon.is_polygonal());
        assert!(!GeometryType::LineString.is_polygonal());
    }

    #[test]
    fn test_column_type_mapping_total() {
        for v in 0..=14u8 {
            assert!(ColumnType::from_u8(v).is_some(), "type {} must map", v);
        }
        assert_eq!(ColumnType::from_u8(15), None);
        assert_eq!(ColumnType::from_u8(0), Some(ColumnType::Byte));
        assert_eq!(ColumnType::from_u8(14), Some(ColumnType::Binary));
    }
}
