//! Tile orchestration - wires header parsing, index queries, feature
//! decoding, the geometry pipeline and PBF encoding into one tile request.
//!
//! Per source: read (or recall from cache) the FGB header and index bytes,
//! query the packed R-tree with the tile's WGS84 bounds, fetch the matching
//! byte ranges, decode features and push each one through
//! project -> clip -> simplify -> transform -> wind -> command-encode.
//! Sources of one tile run concurrently; their layers land in the payload in
//! source order. All CPU stages run without suspension - the only awaits are
//! the reader calls.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::try_join_all;
use prost::Message;

use crate::clip::clip_feature;
use crate::feature::{FeatureDecoder, RawFeature};
use crate::header::{header_byte_size, parse_header, Header, PROLOGUE_LEN};
use crate::index;
use crate::mvt::{
    correct_winding, encode_geometry, transform_coords, LayerBuilder, MvtGeomType, MvtLayer,
};
use crate::pbf;
use crate::reader::RangeReader;
use crate::simplify::{simplify_feature, sq_tolerance};
use crate::tile::{project_in_place, Bbox, BoundsCache, TileCoord};
use crate::vector_tile;
use crate::{Error, Result, TileOptions};

/// Per-source overrides of the tile-level [`TileOptions`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceOptions {
    pub extent: Option<u32>,
    pub buffer: Option<u32>,
    pub tolerance: Option<f64>,
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
}

impl SourceOptions {
    /// Fill the gaps from tile-level defaults.
    pub fn resolve(&self, defaults: &TileOptions) -> TileOptions {
        TileOptions {
            extent: self.extent.unwrap_or(defaults.extent),
            buffer: self.buffer.unwrap_or(defaults.buffer),
            tolerance: self.tolerance.unwrap_or(defaults.tolerance),
            min_zoom: self.min_zoom.unwrap_or(defaults.min_zoom),
            max_zoom: self.max_zoom.unwrap_or(defaults.max_zoom),
        }
    }

    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = Some(min_zoom);
        self.max_zoom = Some(max_zoom);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }
}

/// One FGB dataset contributing a layer to requested tiles.
#[derive(Debug, Clone)]
pub struct Source {
    /// Resource path handed to the byte-range reader
    pub path: String,
    /// Layer name; defaults to the path's file stem
    pub layer: Option<String>,
    pub options: SourceOptions,
}

impl Source {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            layer: None,
            options: SourceOptions::default(),
        }
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.layer = Some(layer.into());
        self
    }

    pub fn with_options(mut self, options: SourceOptions) -> Self {
        self.options = options;
        self
    }

    /// The layer name this source writes into the tile.
    pub fn layer_name(&self) -> String {
        if let Some(layer) = &self.layer {
            return layer.clone();
        }
        Path::new(&self.path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.clone())
    }
}

/// Parsed header plus raw index bytes; immutable once fetched.
#[derive(Debug)]
pub struct HeaderEntry {
    pub header: Header,
    pub index: Vec<u8>,
}

/// Shared append-only cache of header entries, keyed by source path.
///
/// Concurrent callers may race to fetch the same header; both insertions
/// carry identical data, so last-write-wins is harmless. Callers wanting
/// single-flight behavior can layer an in-flight future map on top.
#[derive(Debug, Default)]
pub struct HeaderCache {
    entries: DashMap<String, Arc<HeaderEntry>>,
}

impl HeaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Arc<HeaderEntry>> {
        self.entries.get(path).map(|e| e.value().clone())
    }

    pub fn insert(&self, path: &str, entry: Arc<HeaderEntry>) {
        self.entries.insert(path.to_string(), entry);
    }
}

/// Fetch and parse a source's header and index section.
///
/// Up to three reads: the 12-byte prologue, the full header once its size
/// is known, and the index section when the file carries one.
pub async fn fetch_header<R: RangeReader>(reader: &R, path: &str) -> Result<HeaderEntry> {
    let first = reader.read(path, 0, PROLOGUE_LEN as u64).await?;
    let header_size = header_byte_size(&first)?;
    let header_bytes = if first.len() >= header_size {
        first
    } else {
        reader.read(path, 0, header_size as u64).await?
    };
    let header = parse_header(&header_bytes)?;

    let index = if header.index_size > 0 {
        let bytes = reader
            .read(path, header.index_offset, header.index_size)
            .await?;
        if (bytes.len() as u64) < header.index_size {
            return Err(Error::ShortRead {
                wanted: header.index_size as usize,
                got: bytes.len(),
            });
        }
        bytes
    } else {
        Vec::new()
    };

    Ok(HeaderEntry { header, index })
}

/// Run one feature through the CPU stages; `None` when it drops out.
fn build_feature(
    mut feature: RawFeature,
    coord: TileCoord,
    clip_bbox: &Bbox,
    options: &TileOptions,
) -> Option<(RawFeature, MvtGeomType, Vec<u32>)> {
    project_in_place(&mut feature.xy);
    let feature = clip_feature(feature, clip_bbox)?;
    let feature = if options.tolerance > 0.0 {
        simplify_feature(
            feature,
            sq_tolerance(options.tolerance, coord.z, options.extent),
        )?
    } else {
        feature
    };

    let mut coords = transform_coords(&feature.xy, coord, options.extent);
    correct_winding(
        &mut coords,
        feature.ends.as_deref(),
        feature.parts.as_deref(),
        feature.geometry_type,
    );
    let geom_type = MvtGeomType::from_geometry(feature.geometry_type);
    let commands = encode_geometry(&coords, feature.ends.as_deref(), geom_type);
    if commands.is_empty() {
        return None;
    }
    Some((feature, geom_type, commands))
}

/// Materialize one source's layer for one tile.
///
/// Returns a well-formed empty layer when the zoom range excludes the
/// request, the source has no index or features, or nothing matches the
/// query - zero feature I/O in all of those cases.
pub async fn process_source<R: RangeReader>(
    reader: &R,
    source: &Source,
    coord: TileCoord,
    query: &Bbox,
    clip_bbox: &Bbox,
    options: &TileOptions,
    cache: Option<&HeaderCache>,
) -> Result<MvtLayer> {
    let layer_name = source.layer_name();
    if coord.z < options.min_zoom || coord.z > options.max_zoom {
        return Ok(MvtLayer::empty(layer_name, options.extent));
    }

    let entry = match cache.and_then(|c| c.get(&source.path)) {
        Some(entry) => entry,
        None => {
            let entry = Arc::new(fetch_header(reader, &source.path).await?);
            if let Some(cache) = cache {
                cache.insert(&source.path, entry.clone());
            }
            entry
        }
    };

    let header = &entry.header;
    if header.index_node_size == 0 || header.features_count == 0 {
        return Ok(MvtLayer::empty(layer_name, options.extent));
    }

    let ranges = index::search(
        &entry.index,
        query,
        header.features_count,
        header.index_node_size,
        header.features_offset,
    )?;
    if ranges.is_empty() {
        return Ok(MvtLayer::empty(layer_name, options.extent));
    }
    log::debug!(
        "{}: {} byte ranges for tile z{}/{}/{}",
        source.path,
        ranges.len(),
        coord.z,
        coord.x,
        coord.y
    );

    let chunks = reader.read_ranges(&source.path, &ranges).await?;

    let mut decoder = FeatureDecoder::new(header);
    let mut builder = LayerBuilder::new(layer_name, options.extent);
    for chunk in &chunks {
        for feature in decoder.decode(chunk, Some(header.features_count)) {
            if let Some((feature, geom_type, commands)) =
                build_feature(feature, coord, clip_bbox, options)
            {
                builder.add_feature(&feature, geom_type, commands);
            }
        }
    }

    Ok(builder.build())
}

/// Materialize a complete tile from several sources over one reader.
///
/// Sources run concurrently; the payload carries their layers in source
/// order. The first source error fails the whole request - no partial
/// tiles.
pub async fn process_tile<R: RangeReader>(
    reader: &R,
    sources: &[Source],
    coord: TileCoord,
    defaults: &TileOptions,
    header_cache: Option<&HeaderCache>,
    bounds: &BoundsCache,
) -> Result<Vec<u8>> {
    let query = bounds.wgs84(coord);

    let layers = try_join_all(sources.iter().map(|source| {
        let options = source.options.resolve(defaults);
        let clip_bbox = bounds.clip(coord, options.buffer, options.extent);
        async move {
            process_source(
                reader,
                source,
                coord,
                &query,
                &clip_bbox,
                &options,
                header_cache,
            )
            .await
        }
    }))
    .await?;

    Ok(pbf::encode_tile(&layers))
}

/// Sources served by one reader, for multi-reader tiles.
#[derive(Debug, Clone, Copy)]
pub struct SourceGroup<'a, R: RangeReader> {
    pub reader: &'a R,
    pub sources: &'a [Source],
}

/// Materialize a tile across several reader groups.
///
/// Layer order is source order within each group, groups in input order.
pub async fn process_multi_tile<R: RangeReader>(
    groups: &[SourceGroup<'_, R>],
    coord: TileCoord,
    defaults: &TileOptions,
    header_cache: Option<&HeaderCache>,
    bounds: &BoundsCache,
) -> Result<Vec<u8>> {
    let query = bounds.wgs84(coord);

    let layers = try_join_all(groups.iter().flat_map(|group| {
        group.sources.iter().map(move |source| {
            let options = source.options.resolve(defaults);
            let clip_bbox = bounds.clip(coord, options.buffer, options.extent);
            let reader = group.reader;
            async move {
                process_source(
                    reader,
                    source,
                    coord,
                    &query,
                    &clip_bbox,
                    &options,
                    header_cache,
                )
                .await
            }
        })
    }))
    .await?;

    Ok(pbf::encode_tile(&layers))
}

/// Decode an MVT tile from bytes (for testing).
pub fn decode_tile(data: &[u8]) -> Result<vector_tile::Tile> {
    vector_tile::Tile::decode(data).map_err(|e| Error::MvtDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ByteRange;

    /// Reader that fails the test when touched; proves zero-I/O paths.
    struct UnreachableReader;

    impl RangeReader for UnreachableReader {
        async fn read(&self, path: &str, _offset: u64, _length: u64) -> Result<Vec<u8>> {
            panic!("unexpected read of {}", path);
        }

        async fn read_ranges(&self, path: &str, _ranges: &[ByteRange]) -> Result<Vec<Vec<u8>>> {
            panic!("unexpected multi-range read of {}", path);
        }
    }

    #[test]
    fn test_source_layer_name_from_stem() {
        assert_eq!(Source::new("data/cities.fgb").layer_name(), "cities");
        assert_eq!(Source::new("roads.fgb").layer_name(), "roads");
        assert_eq!(
            Source::new("x.fgb").with_layer("custom").layer_name(),
            "custom"
        );
    }

    #[test]
    fn test_source_options_resolution_order() {
        let defaults = TileOptions::default().with_extent(512).with_buffer(8);
        let overrides = SourceOptions {
            extent: Some(256),
            ..Default::default()
        };

        let resolved = overrides.resolve(&defaults);
        // Per-source wins over tile-level
        assert_eq!(resolved.extent, 256);
        // Tile-level wins over built-in
        assert_eq!(resolved.buffer, 8);
        // Built-in fills the rest
        assert_eq!(resolved.tolerance, 3.0);
        assert_eq!(resolved.max_zoom, 24);
    }

    #[tokio::test]
    async fn test_out_of_zoom_range_skips_io() {
        let source = Source::new("cities.fgb");
        let options = TileOptions::default().with_zoom_range(4, 10);
        let coord = TileCoord::new(0, 0, 2);
        let bbox = coord.wgs84_bounds();
        let clip = coord.clip_bounds(64, 4096);

        let layer = process_source(
            &UnreachableReader,
            &source,
            coord,
            &bbox,
            &clip,
            &options,
            None,
        )
        .await
        .unwrap();

        assert_eq!(layer.name, "cities");
        assert_eq!(layer.extent, 4096);
        assert!(layer.features.is_empty());
    }

    #[tokio::test]
    async fn test_cached_header_without_index_skips_feature_io() {
        let cache = HeaderCache::new();
        cache.insert(
            "empty.fgb",
            Arc::new(HeaderEntry {
                header: Header {
                    name: None,
                    envelope: None,
                    geometry_type: crate::header::GeometryType::Point,
                    columns: vec![],
                    features_count: 0,
                    index_node_size: 16,
                    header_size: 12,
                    index_offset: 12,
                    index_size: 0,
                    features_offset: 12,
                },
                index: Vec::new(),
            }),
        );

        let source = Source::new("empty.fgb");
        let options = TileOptions::default();
        let coord = TileCoord::new(0, 0, 0);
        let bbox = coord.wgs84_bounds();
        let clip = coord.clip_bounds(64, 4096);

        let layer = process_source(
            &UnreachableReader,
            &source,
            coord,
            &bbox,
            &clip,
            &options,
            Some(&cache),
        )
        .await
        .unwrap();

        assert!(layer.features.is_empty());
    }

    #[test]
    fn test_decode_tile_rejects_garbage() {
        assert!(matches!(
            decode_tile(&[0xFF, 0xFF, 0xFF]),
            Err(Error::MvtDecode(_))
        ));
    }

    #[test]
    fn test_decode_tile_empty_payload() {
        let tile = decode_tile(&[]).unwrap();
        assert!(tile.layers.is_empty());
    }
}
