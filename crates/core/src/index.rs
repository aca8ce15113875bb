//! Packed Hilbert R-tree queries over the FlatGeobuf index section.
//!
//! The index is a static R-tree serialized as a flat array of 40-byte nodes
//! (`[4 x f64 bbox][u64 offset]`), root level first, leaves last. Features
//! were Hilbert-sorted before the tree was packed, so ascending leaf index
//! equals ascending file position. A query walks the tree with an explicit
//! stack, collects matching leaves and converts them into absolute byte
//! ranges, merged so that near-adjacent features are fetched in one request -
//! fewer round trips dominate throughput on remote storage.

use crate::tile::Bbox;
use crate::{Error, Result};

/// Serialized size of one R-tree node.
pub const NODE_BYTES: u64 = 40;

/// Ranges closer than this many bytes are fetched as one request.
pub const DEFAULT_MERGE_GAP: u64 = 512;

/// Conservative length bound for the final matching feature, whose true size
/// cannot be derived from a successor node. Over-fetch is tolerated by the
/// reader.
pub const DEFAULT_TAIL_CAP: u64 = 1 << 20;

/// An absolute byte range to fetch from the underlying resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Per-level node index ranges `[start, end)`, leaves at level 0.
///
/// Levels are built bottom-up: each level holds `ceil(previous / node_size)`
/// nodes until a single root remains. Nodes are laid out root-first, so the
/// root level starts at index 0 and the leaf level ends at the total count.
pub fn level_bounds(num_items: u64, node_size: u16) -> Vec<(u64, u64)> {
    assert!(num_items > 0, "an empty index has no levels");
    let node_size = node_size.max(2) as u64;

    let mut level_num_nodes = vec![num_items];
    let mut n = num_items;
    loop {
        n = n.div_ceil(node_size);
        level_num_nodes.push(n);
        if n == 1 {
            break;
        }
    }

    let total: u64 = level_num_nodes.iter().sum();
    let mut bounds = Vec::with_capacity(level_num_nodes.len());
    let mut end = total;
    for count in &level_num_nodes {
        bounds.push((end - count, end));
        end -= count;
    }
    bounds
}

/// Byte size of the packed index for `num_items` features.
pub fn packed_index_size(num_items: u64, node_size: u16) -> u64 {
    let bounds = level_bounds(num_items, node_size);
    let total_nodes = bounds[0].1;
    total_nodes * NODE_BYTES
}

fn node_bbox(index: &[u8], node: u64) -> Bbox {
    let base = (node * NODE_BYTES) as usize;
    let f = |i: usize| {
        f64::from_le_bytes(index[base + i * 8..base + (i + 1) * 8].try_into().unwrap())
    };
    Bbox::new(f(0), f(1), f(2), f(3))
}

fn node_offset(index: &[u8], node: u64) -> u64 {
    let base = (node * NODE_BYTES) as usize + 32;
    u64::from_le_bytes(index[base..base + 8].try_into().unwrap())
}

/// Query the packed index and return sorted, merged byte ranges to fetch.
///
/// `features_offset` is the absolute position of the feature section; leaf
/// nodes store offsets relative to it.
pub fn search(
    index: &[u8],
    query: &Bbox,
    num_items: u64,
    node_size: u16,
    features_offset: u64,
) -> Result<Vec<ByteRange>> {
    search_with(
        index,
        query,
        num_items,
        node_size,
        features_offset,
        DEFAULT_MERGE_GAP,
        DEFAULT_TAIL_CAP,
    )
}

/// `search` with explicit merge-gap and tail-cap tuning parameters.
#[allow(clippy::too_many_arguments)]
pub fn search_with(
    index: &[u8],
    query: &Bbox,
    num_items: u64,
    node_size: u16,
    features_offset: u64,
    merge_gap: u64,
    tail_cap: u64,
) -> Result<Vec<ByteRange>> {
    if num_items == 0 {
        return Ok(Vec::new());
    }

    let bounds = level_bounds(num_items, node_size);
    let total_nodes = bounds[0].1;
    if (index.len() as u64) < total_nodes * NODE_BYTES {
        return Err(Error::MalformedIndex(format!(
            "index buffer holds {} bytes, {} nodes need {}",
            index.len(),
            total_nodes,
            total_nodes * NODE_BYTES
        )));
    }

    let node_size = node_size.max(2) as u64;
    let root_level = bounds.len() - 1;
    let leaf_end = bounds[0].1;

    // Depth-first traversal with an explicit stack; fan-out makes recursion
    // depth data-dependent.
    let mut stack: Vec<(u64, usize)> = (bounds[root_level].0..bounds[root_level].1)
        .map(|idx| (idx, root_level))
        .collect();
    let mut hits: Vec<u64> = Vec::new();

    while let Some((idx, level)) = stack.pop() {
        if (idx + 1) * NODE_BYTES > index.len() as u64 {
            break;
        }
        if !node_bbox(index, idx).intersects(query) {
            continue;
        }
        if level == 0 {
            hits.push(idx);
        } else {
            let first_child = node_offset(index, idx);
            let child_end = (first_child + node_size).min(bounds[level - 1].1);
            for child in first_child..child_end {
                stack.push((child, level - 1));
            }
        }
    }

    hits.sort_unstable();

    // Convert leaves to byte ranges; each feature's length is the distance
    // to its successor in the leaf level, the last one gets the tail cap.
    let mut ranges = Vec::with_capacity(hits.len());
    let mut prev_offset: Option<u64> = None;
    for &leaf in &hits {
        let offset = node_offset(index, leaf);
        if prev_offset.is_some_and(|p| offset <= p) {
            return Err(Error::MalformedIndex(format!(
                "leaf feature offset {} does not increase monotonically",
                offset
            )));
        }
        prev_offset = Some(offset);

        let length = if leaf + 1 < leaf_end {
            let next = node_offset(index, leaf + 1);
            if next <= offset {
                return Err(Error::MalformedIndex(format!(
                    "successor feature offset {} not past {}",
                    next, offset
                )));
            }
            next - offset
        } else {
            tail_cap
        };
        ranges.push(ByteRange::new(features_offset + offset, length));
    }

    Ok(merge_ranges(ranges, merge_gap))
}

/// Merge sorted ranges whose gap is at most `gap` bytes.
pub fn merge_ranges(ranges: Vec<ByteRange>, gap: u64) -> Vec<ByteRange> {
    let mut merged: Vec<ByteRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(prev) if range.offset <= prev.end() + gap => {
                prev.length = range.end().max(prev.end()) - prev.offset;
            }
            _ => merged.push(range),
        }
    }
    merged
}
