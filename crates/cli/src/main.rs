//! CLI for fgb-tiles - cut a single MVT tile from FlatGeobuf files
//!
//! This is a thin wrapper around the fgb-tiles-core library.

use anyhow::{Context, Result};
use clap::Parser;
use fgb_tiles_core::pipeline::{process_tile, Source};
use fgb_tiles_core::reader::FileReader;
use fgb_tiles_core::tile::{BoundsCache, TileCoord};
use fgb_tiles_core::TileOptions;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "fgb-tiles",
    about = "Cut one Mapbox Vector Tile from FlatGeobuf files",
    version
)]
struct Args {
    /// Input FlatGeobuf files; each becomes one layer named by its file stem
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Zoom level
    #[arg(short, long)]
    z: u8,

    /// Tile column
    #[arg(short, long)]
    x: u32,

    /// Tile row (y=0 at the north edge)
    #[arg(short, long)]
    y: u32,

    /// Output file; defaults to <z>-<x>-<y>.mvt
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Tile extent in integer grid units
    #[arg(long, default_value = "4096")]
    extent: u32,

    /// Clip buffer in tile pixels
    #[arg(long, default_value = "64")]
    buffer: u32,

    /// Simplification tolerance in tile pixels (0 disables)
    #[arg(long, default_value = "3")]
    tolerance: f64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    anyhow::ensure!(args.z <= 29, "zoom {} out of range (0-29)", args.z);
    let side = 1u64 << args.z;
    anyhow::ensure!(
        (args.x as u64) < side && (args.y as u64) < side,
        "tile ({}, {}) out of range for zoom {}",
        args.x,
        args.y,
        args.z
    );

    let sources: Vec<Source> = args
        .inputs
        .iter()
        .map(|path| Source::new(path.to_string_lossy().into_owned()))
        .collect();

    let options = TileOptions::default()
        .with_extent(args.extent)
        .with_buffer(args.buffer)
        .with_tolerance(args.tolerance);

    let reader = FileReader::new(".");
    let bounds = BoundsCache::new();
    let coord = TileCoord::new(args.x, args.y, args.z);

    let payload = process_tile(&reader, &sources, coord, &options, None, &bounds)
        .await
        .context("Failed to materialize tile")?;

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("{}-{}-{}.mvt", args.z, args.x, args.y)));
    std::fs::write(&output, &payload)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "✓ Wrote tile z{}/{}/{} ({} bytes, {} layers) to {}",
        args.z,
        args.x,
        args.y,
        payload.len(),
        sources.len(),
        output.display()
    );

    Ok(())
}
