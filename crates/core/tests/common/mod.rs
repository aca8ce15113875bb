//! Shared test support: builds small but wire-valid FlatGeobuf files.
//!
//! The library deliberately has no FGB writing surface, so the tests carry
//! their own minimal FlatBuffers table writer (two-pass: measure, then emit
//! with children laid out after their parent) plus a packed-index builder
//! mirroring the reader's level-bound math. Enough of the format for
//! fixtures; nothing more.

// Each integration test binary compiles its own copy; not all of them use
// every helper.
#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use fgb_tiles_core::header::{ColumnType, GeometryType, MAGIC_BYTES};
use fgb_tiles_core::index::{level_bounds, NODE_BYTES};
use fgb_tiles_core::tile::Bbox;

// ----------------------------------------------------------------------
// Minimal FlatBuffers writer
// ----------------------------------------------------------------------

/// A field value of a table under construction.
pub enum Val {
    U8(u8),
    U16(u16),
    U64(u64),
    VecF64(Vec<f64>),
    VecU32(Vec<u32>),
    VecU8(Vec<u8>),
    Str(String),
    Table(Tbl),
    VecTable(Vec<Tbl>),
}

impl Val {
    fn inline_size(&self) -> usize {
        match self {
            Val::U8(_) => 1,
            Val::U16(_) => 2,
            Val::U64(_) => 8,
            _ => 4, // reference
        }
    }

    fn child_size(&self) -> usize {
        match self {
            Val::U8(_) | Val::U16(_) | Val::U64(_) => 0,
            Val::VecF64(v) => 4 + v.len() * 8,
            Val::VecU32(v) => 4 + v.len() * 4,
            Val::VecU8(v) => 4 + v.len(),
            Val::Str(s) => 4 + s.len() + 1, // NUL-terminated
            Val::Table(t) => t.total_size(),
            Val::VecTable(ts) => {
                4 + ts.len() * 4 + ts.iter().map(Tbl::total_size).sum::<usize>()
            }
        }
    }
}

/// A FlatBuffers table under construction; fields sorted by slot index.
#[derive(Default)]
pub struct Tbl {
    fields: Vec<(u16, Val)>,
}

impl Tbl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, idx: u16, val: Val) -> Self {
        self.fields.push((idx, val));
        self.fields.sort_by_key(|(i, _)| *i);
        self
    }

    fn vtable_size(&self) -> usize {
        let slots = self.fields.last().map(|(i, _)| *i as usize + 1).unwrap_or(0);
        4 + slots * 2
    }

    fn table_size(&self) -> usize {
        4 + self.fields.iter().map(|(_, v)| v.inline_size()).sum::<usize>()
    }

    fn total_size(&self) -> usize {
        self.vtable_size()
            + self.table_size()
            + self.fields.iter().map(|(_, v)| v.child_size()).sum::<usize>()
    }

    /// Append `[vtable][table][children]`, returning the table position.
    fn emit(&self, out: &mut Vec<u8>) -> usize {
        let vt_size = self.vtable_size();
        let table_size = self.table_size();

        // vtable
        out.extend_from_slice(&(vt_size as u16).to_le_bytes());
        out.extend_from_slice(&(table_size as u16).to_le_bytes());
        let slots = self.fields.last().map(|(i, _)| *i as usize + 1).unwrap_or(0);
        let mut inline_off = 4usize;
        for slot in 0..slots {
            match self.fields.iter().find(|(i, _)| *i as usize == slot) {
                Some((_, val)) => {
                    out.extend_from_slice(&(inline_off as u16).to_le_bytes());
                    inline_off += val.inline_size();
                }
                None => out.extend_from_slice(&0u16.to_le_bytes()),
            }
        }

        // table
        let table_pos = out.len();
        out.extend_from_slice(&(vt_size as i32).to_le_bytes());

        let mut child_pos = table_pos + table_size;
        let mut child_positions = Vec::new();
        for (_, val) in &self.fields {
            child_positions.push(child_pos);
            child_pos += val.child_size();
        }

        let mut slot_pos = table_pos + 4;
        for ((_, val), &child) in self.fields.iter().zip(&child_positions) {
            match val {
                Val::U8(v) => out.push(*v),
                Val::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
                Val::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
                // A table reference targets the table position, which sits
                // past the child's own vtable
                Val::Table(t) => out.extend_from_slice(
                    &((child + t.vtable_size() - slot_pos) as u32).to_le_bytes(),
                ),
                _ => out.extend_from_slice(&((child - slot_pos) as u32).to_le_bytes()),
            }
            slot_pos += val.inline_size();
        }

        // children
        for (_, val) in &self.fields {
            match val {
                Val::U8(_) | Val::U16(_) | Val::U64(_) => {}
                Val::VecF64(v) => {
                    out.extend_from_slice(&(v.len() as u32).to_le_bytes());
                    for x in v {
                        out.extend_from_slice(&x.to_le_bytes());
                    }
                }
                Val::VecU32(v) => {
                    out.extend_from_slice(&(v.len() as u32).to_le_bytes());
                    for x in v {
                        out.extend_from_slice(&x.to_le_bytes());
                    }
                }
                Val::VecU8(v) => {
                    out.extend_from_slice(&(v.len() as u32).to_le_bytes());
                    out.extend_from_slice(v);
                }
                Val::Str(s) => {
                    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    out.extend_from_slice(s.as_bytes());
                    out.push(0);
                }
                Val::Table(t) => {
                    t.emit(out);
                }
                Val::VecTable(ts) => {
                    let vec_pos = out.len();
                    out.extend_from_slice(&(ts.len() as u32).to_le_bytes());
                    // offset slots first, tables after
                    let mut tbl_pos = vec_pos + 4 + ts.len() * 4;
                    for (i, t) in ts.iter().enumerate() {
                        let slot = vec_pos + 4 + i * 4;
                        let target = tbl_pos + t.vtable_size();
                        out.extend_from_slice(&((target - slot) as u32).to_le_bytes());
                        tbl_pos += t.total_size();
                    }
                    for t in ts {
                        t.emit(out);
                    }
                }
            }
        }

        table_pos
    }

    /// Serialize as a standalone FlatBuffer with the root offset prefix.
    pub fn finish(&self) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        let table_pos = self.emit(&mut out);
        out[0..4].copy_from_slice(&(table_pos as u32).to_le_bytes());
        out
    }
}

// ----------------------------------------------------------------------
// Property stream encoding
// ----------------------------------------------------------------------

/// Property values the fixtures need; encoded per the FGB column layout.
pub enum PropVal {
    Str(&'static str),
    ULong(u64),
    Long(i64),
    Double(f64),
    Bool(bool),
    Int(i32),
}

impl PropVal {
    pub fn column_type(&self) -> ColumnType {
        match self {
            PropVal::Str(_) => ColumnType::String,
            PropVal::ULong(_) => ColumnType::ULong,
            PropVal::Long(_) => ColumnType::Long,
            PropVal::Double(_) => ColumnType::Double,
            PropVal::Bool(_) => ColumnType::Bool,
            PropVal::Int(_) => ColumnType::Int,
        }
    }
}

/// Encode `[u16 column index][value]` pairs.
pub fn encode_props(props: &[(u16, PropVal)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (idx, val) in props {
        out.extend_from_slice(&idx.to_le_bytes());
        match val {
            PropVal::Str(s) => {
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            PropVal::ULong(v) => out.extend_from_slice(&v.to_le_bytes()),
            PropVal::Long(v) => out.extend_from_slice(&v.to_le_bytes()),
            PropVal::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            PropVal::Bool(v) => out.push(*v as u8),
            PropVal::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
        }
    }
    out
}

// ----------------------------------------------------------------------
// FlatGeobuf assembly
// ----------------------------------------------------------------------

/// One feature of a fixture file.
pub struct FeatureSpec {
    pub xy: Vec<f64>,
    pub ends: Option<Vec<u32>>,
    pub properties: Vec<u8>,
}

impl FeatureSpec {
    pub fn point(x: f64, y: f64) -> Self {
        Self {
            xy: vec![x, y],
            ends: None,
            properties: Vec::new(),
        }
    }

    pub fn with_props(mut self, props: &[(u16, PropVal)]) -> Self {
        self.properties = encode_props(props);
        self
    }
}

/// A whole fixture file.
pub struct FgbSpec {
    pub name: &'static str,
    pub geometry_type: GeometryType,
    pub columns: Vec<(&'static str, ColumnType)>,
    pub features: Vec<FeatureSpec>,
    pub node_size: u16,
    pub envelope: Option<Bbox>,
}

impl FgbSpec {
    pub fn points(name: &'static str, features: Vec<FeatureSpec>) -> Self {
        Self {
            name,
            geometry_type: GeometryType::Point,
            columns: Vec::new(),
            features,
            node_size: 16,
            envelope: None,
        }
    }
}

fn feature_record(spec: &FeatureSpec) -> Vec<u8> {
    let mut geometry = Tbl::new().field(1, Val::VecF64(spec.xy.clone()));
    if let Some(ends) = &spec.ends {
        geometry = geometry.field(0, Val::VecU32(ends.clone()));
    }

    let mut feature = Tbl::new().field(0, Val::Table(geometry));
    if !spec.properties.is_empty() {
        feature = feature.field(1, Val::VecU8(spec.properties.clone()));
    }
    feature.finish()
}

/// Pack an R-tree over `(bbox, relative feature offset)` items already in
/// file order.
pub fn build_packed_index(items: &[(Bbox, u64)], node_size: u16) -> Vec<u8> {
    let bounds = level_bounds(items.len() as u64, node_size);
    let total = bounds[0].1;
    let mut nodes: Vec<(Bbox, u64)> = vec![(Bbox::empty(), 0); total as usize];

    for (i, item) in items.iter().enumerate() {
        nodes[(bounds[0].0 + i as u64) as usize] = *item;
    }
    for level in 1..bounds.len() {
        let (child_start, child_end) = bounds[level - 1];
        let fanout = node_size.max(2) as u64;
        let mut child = child_start;
        let mut parent = bounds[level].0;
        while child < child_end {
            let first_child = child;
            let mut bbox = Bbox::empty();
            while child < child_end && child < first_child + fanout {
                bbox.expand(&nodes[child as usize].0);
                child += 1;
            }
            nodes[parent as usize] = (bbox, first_child);
            parent += 1;
        }
    }

    let mut out = Vec::with_capacity((total * NODE_BYTES) as usize);
    for (bbox, offset) in nodes {
        out.extend_from_slice(&bbox.min_x.to_le_bytes());
        out.extend_from_slice(&bbox.min_y.to_le_bytes());
        out.extend_from_slice(&bbox.max_x.to_le_bytes());
        out.extend_from_slice(&bbox.max_y.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out
}

/// Serialize a complete FlatGeobuf file.
pub fn build_fgb(spec: &FgbSpec) -> Vec<u8> {
    // Feature section, tracking per-feature offsets and bboxes for the index
    let mut feature_bytes = Vec::new();
    let mut items = Vec::new();
    for feature in &spec.features {
        items.push((Bbox::of_coords(&feature.xy), feature_bytes.len() as u64));
        let record = feature_record(feature);
        feature_bytes.extend_from_slice(&(record.len() as u32).to_le_bytes());
        feature_bytes.extend_from_slice(&record);
    }

    // Header FlatBuffer
    let columns: Vec<Tbl> = spec
        .columns
        .iter()
        .map(|(name, col_type)| {
            Tbl::new()
                .field(0, Val::Str(name.to_string()))
                .field(1, Val::U8(*col_type as u8))
                .field(14, Val::U8(1)) // nullable
        })
        .collect();

    let mut header = Tbl::new()
        .field(0, Val::Str(spec.name.to_string()))
        .field(2, Val::U8(spec.geometry_type as u8))
        .field(8, Val::U64(spec.features.len() as u64))
        .field(9, Val::U16(spec.node_size));
    if let Some(envelope) = &spec.envelope {
        header = header.field(
            1,
            Val::VecF64(vec![
                envelope.min_x,
                envelope.min_y,
                envelope.max_x,
                envelope.max_y,
            ]),
        );
    }
    if !columns.is_empty() {
        header = header.field(7, Val::VecTable(columns));
    }
    let header_fb = header.finish();

    let index = build_packed_index(&items, spec.node_size);

    // [magic][u32 header size][header][index][features]
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC_BYTES);
    out.extend_from_slice(&(header_fb.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_fb);
    out.extend_from_slice(&index);
    out.extend_from_slice(&feature_bytes);
    out
}

/// Write a fixture file into a per-run temp directory; returns the directory.
pub fn write_fixture(dir_name: &str, file_name: &str, bytes: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join("fgb-tiles-test").join(dir_name);
    fs::create_dir_all(&dir).expect("create fixture dir");
    fs::write(dir.join(file_name), bytes).expect("write fixture");
    dir
}
