//! Core library for serving Mapbox Vector Tiles straight from FlatGeobuf.
//!
//! This library materializes MVT tiles on demand from cloud-optimized
//! FlatGeobuf datasets, with no pre-tiled intermediate storage. A single
//! request, given tile coordinates `(z, x, y)` and one or more FGB sources,
//! returns a protobuf payload with the features that intersect the tile.
//!
//! The pipeline per source: read and cache the FGB header, query the packed
//! Hilbert R-tree for matching byte ranges, fetch and decode the features,
//! then project, clip, simplify, transform, wind and command-encode each
//! geometry before serializing one layer per source into a single tile.
//!
//! # Examples
//!
//! ```no_run
//! use fgb_tiles_core::pipeline::{process_tile, Source};
//! use fgb_tiles_core::reader::FileReader;
//! use fgb_tiles_core::tile::{BoundsCache, TileCoord};
//! use fgb_tiles_core::TileOptions;
//!
//! # async fn render() -> fgb_tiles_core::Result<Vec<u8>> {
//! let reader = FileReader::new("./data");
//! let sources = vec![Source::new("cities.fgb")];
//! let bounds = BoundsCache::new();
//!
//! let mvt = process_tile(
//!     &reader,
//!     &sources,
//!     TileCoord::new(17, 10, 5),
//!     &TileOptions::default(),
//!     None,
//!     &bounds,
//! )
//! .await?;
//! # Ok(mvt)
//! # }
//! ```

use thiserror::Error;

pub mod clip;
pub mod feature;
pub mod flatbuf;
pub mod header;
pub mod index;
pub mod mvt;
pub mod pbf;
pub mod pipeline;
pub mod reader;
pub mod simplify;
pub mod tile;

// Include the protobuf-generated code. The generated `Tile` is the
// independent MVT decoder used by `pipeline::decode_tile` and the tests;
// production encoding goes through the hand-rolled writer in `pbf`.
pub mod vector_tile {
    include!(concat!(env!("OUT_DIR"), "/vector_tile.rs"));
}

/// Errors that can occur while materializing a tile
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid FlatGeobuf magic bytes")]
    InvalidMagic,

    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },

    #[error("malformed FlatBuffer: {0}")]
    MalformedFlatBuffer(String),

    #[error("malformed spatial index: {0}")]
    MalformedIndex(String),

    #[error("failed to decode MVT tile: {0}")]
    MvtDecode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Options controlling tile materialization.
///
/// Resolution order for every option is: per-source override (see
/// [`pipeline::SourceOptions`]), then the tile-level value carried here,
/// then the built-in default.
#[derive(Debug, Clone, PartialEq)]
pub struct TileOptions {
    /// Integer tile grid per axis (default: 4096 as per MVT spec)
    pub extent: u32,
    /// Extra tile-pixels of overshoot included in the clip rectangle
    pub buffer: u32,
    /// Simplification tolerance in tile-pixel units; `0.0` disables
    pub tolerance: f64,
    /// Minimum zoom level served; requests below skip all I/O
    pub min_zoom: u8,
    /// Maximum zoom level served; requests above skip all I/O
    pub max_zoom: u8,
}

impl Default for TileOptions {
    fn default() -> Self {
        Self {
            extent: 4096,
            buffer: 64,
            tolerance: 3.0,
            min_zoom: 0,
            max_zoom: 24,
        }
    }
}

impl TileOptions {
    /// Set the tile extent.
    pub fn with_extent(mut self, extent: u32) -> Self {
        self.extent = extent;
        self
    }

    /// Set the clip buffer in tile pixels.
    pub fn with_buffer(mut self, buffer: u32) -> Self {
        self.buffer = buffer;
        self
    }

    /// Set the simplification tolerance in tile pixels.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the served zoom range (inclusive).
    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_options_defaults() {
        let opts = TileOptions::default();
        assert_eq!(opts.extent, 4096);
        assert_eq!(opts.buffer, 64);
        assert_eq!(opts.tolerance, 3.0);
        assert_eq!(opts.min_zoom, 0);
        assert_eq!(opts.max_zoom, 24);
    }

    #[test]
    fn test_tile_options_builder() {
        let opts = TileOptions::default()
            .with_extent(512)
            .with_buffer(16)
            .with_tolerance(0.0)
            .with_zoom_range(2, 14);

        assert_eq!(opts.extent, 512);
        assert_eq!(opts.buffer, 16);
        assert_eq!(opts.tolerance, 0.0);
        assert_eq!(opts.min_zoom, 2);
        assert_eq!(opts.max_zoom, 14);
    }
}
