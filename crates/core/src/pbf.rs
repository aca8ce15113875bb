//! Protocol Buffers serialization of MVT tiles.
//!
//! A small hand-rolled writer rather than a generated encoder: tile payloads
//! are a single message shape, and writing layers straight into one growing
//! buffer avoids materializing an intermediate message tree. Nested messages
//! reserve a fixed 5-byte length placeholder which is back-patched once the
//! body size is known; shorter length varints shift the body down in place.
//!
//! The generated prost types stay on the decoding side (`pipeline::decode_tile`)
//! as an independent check of what this writer produces.

use crate::mvt::{MvtLayer, MvtValue};

const WIRE_VARINT: u32 = 0;
const WIRE_I64: u32 = 1;
const WIRE_LEN: u32 = 2;
const WIRE_I32: u32 = 5;

// Tile message fields
const TILE_LAYER: u32 = 3;

// Layer message fields
const LAYER_VERSION: u32 = 15;
const LAYER_NAME: u32 = 1;
const LAYER_FEATURES: u32 = 2;
const LAYER_KEYS: u32 = 3;
const LAYER_VALUES: u32 = 4;
const LAYER_EXTENT: u32 = 5;

// Feature message fields
const FEATURE_ID: u32 = 1;
const FEATURE_TAGS: u32 = 2;
const FEATURE_TYPE: u32 = 3;
const FEATURE_GEOMETRY: u32 = 4;

// Value message fields
const VALUE_STRING: u32 = 1;
const VALUE_DOUBLE: u32 = 3;
const VALUE_UINT: u32 = 5;
const VALUE_SINT: u32 = 6;
const VALUE_BOOL: u32 = 7;

/// Length placeholder reserved for each nested message.
const LEN_PLACEHOLDER: usize = 5;

/// Growable protobuf output buffer.
#[derive(Debug, Default)]
pub struct PbfWriter {
    buf: Vec<u8>,
    /// Placeholder positions of open nested messages
    stack: Vec<usize>,
}

impl PbfWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish writing and take the payload.
    ///
    /// Panics when a nested message was left open; that is a bug in the
    /// encoder, not a data condition.
    pub fn into_bytes(self) -> Vec<u8> {
        assert!(self.stack.is_empty(), "unmatched begin_message");
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of bytes `v` takes as a varint.
    fn varint_size(mut v: u64) -> usize {
        let mut size = 1;
        while v >= 0x80 {
            v >>= 7;
            size += 1;
        }
        size
    }

    /// Base-128 little-endian varint. Negative 64-bit values sign-extend to
    /// ten bytes.
    pub fn write_varint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.push((v as u8 & 0x7F) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    /// Zigzag-then-varint for signed values.
    pub fn write_svarint(&mut self, v: i64) {
        self.write_varint(((v << 1) ^ (v >> 63)) as u64);
    }

    pub fn write_double(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_float(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_tag(&mut self, field: u32, wire: u32) {
        self.write_varint(((field << 3) | wire) as u64);
    }

    pub fn write_varint_field(&mut self, field: u32, v: u64) {
        self.write_tag(field, WIRE_VARINT);
        self.write_varint(v);
    }

    pub fn write_svarint_field(&mut self, field: u32, v: i64) {
        self.write_tag(field, WIRE_VARINT);
        self.write_svarint(v);
    }

    pub fn write_double_field(&mut self, field: u32, v: f64) {
        self.write_tag(field, WIRE_I64);
        self.write_double(v);
    }

    pub fn write_float_field(&mut self, field: u32, v: f32) {
        self.write_tag(field, WIRE_I32);
        self.write_float(v);
    }

    pub fn write_string_field(&mut self, field: u32, s: &str) {
        self.write_tag(field, WIRE_LEN);
        self.write_varint(s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Packed repeated varints; omitted entirely when empty.
    pub fn write_packed_varint(&mut self, field: u32, values: &[u32]) {
        if values.is_empty() {
            return;
        }
        let byte_len: usize = values.iter().map(|&v| Self::varint_size(v as u64)).sum();
        self.write_tag(field, WIRE_LEN);
        self.write_varint(byte_len as u64);
        for &v in values {
            self.write_varint(v as u64);
        }
    }

    /// Open a nested message, reserving the length placeholder.
    pub fn begin_message(&mut self, field: u32) {
        self.write_tag(field, WIRE_LEN);
        self.stack.push(self.buf.len());
        self.buf.extend_from_slice(&[0; LEN_PLACEHOLDER]);
    }

    /// Close the innermost nested message and back-patch its length.
    pub fn end_message(&mut self) {
        let pos = self.stack.pop().expect("end_message without begin_message");
        let body_len = self.buf.len() - pos - LEN_PLACEHOLDER;
        let varint_len = Self::varint_size(body_len as u64);

        let mut v = body_len as u64;
        for i in 0..varint_len {
            let mut byte = (v as u8) & 0x7F;
            v >>= 7;
            if i + 1 < varint_len {
                byte |= 0x80;
            }
            self.buf[pos + i] = byte;
        }

        if varint_len < LEN_PLACEHOLDER {
            // Shift the body over the unused placeholder bytes
            let shift = LEN_PLACEHOLDER - varint_len;
            self.buf.copy_within(pos + LEN_PLACEHOLDER.., pos + varint_len);
            self.buf.truncate(self.buf.len() - shift);
        }
    }
}

/// Serialize layers into one MVT tile payload.
///
/// Layers appear in caller order; no layers produce a zero-length payload,
/// which is itself a valid (empty) `Tile` message.
pub fn encode_tile(layers: &[MvtLayer]) -> Vec<u8> {
    let mut w = PbfWriter::new();

    for layer in layers {
        w.begin_message(TILE_LAYER);
        w.write_varint_field(LAYER_VERSION, 2);
        w.write_string_field(LAYER_NAME, &layer.name);
        w.write_varint_field(LAYER_EXTENT, layer.extent as u64);

        for feature in &layer.features {
            w.begin_message(LAYER_FEATURES);
            if let Some(id) = feature.id {
                w.write_varint_field(FEATURE_ID, id);
            }
            w.write_packed_varint(FEATURE_TAGS, &feature.tags);
            w.write_varint_field(FEATURE_TYPE, feature.geom_type as u64);
            w.write_packed_varint(FEATURE_GEOMETRY, &feature.geometry);
            w.end_message();
        }

        for key in &layer.keys {
            w.write_string_field(LAYER_KEYS, key);
        }
        for value in &layer.values {
            w.begin_message(LAYER_VALUES);
            match value {
                MvtValue::String(s) => w.write_string_field(VALUE_STRING, s),
                MvtValue::Double(d) => w.write_double_field(VALUE_DOUBLE, *d),
                MvtValue::UInt(u) => w.write_varint_field(VALUE_UINT, *u),
                MvtValue::Int(i) => w.write_svarint_field(VALUE_SINT, *i),
                MvtValue::Bool(b) => w.write_varint_field(VALUE_BOOL, *b as u64),
            }
            w.end_message();
        }

        w.end_message();
    }

    w.into_bytes()
}
