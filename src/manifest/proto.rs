// Content-addressed block-processing engine.

//! The binary wire form of a [Manifest]: a pooled, deduplicated block list
//! plus a directory tree of files, each referencing pool entries by
//! contiguous range rather than listing every block id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Manifest, ManifestBlock, ManifestFile};
use crate::block::BlockHash;
use crate::errors::{Error, Result};

/// One entry in the pooled block list: `{hash, size}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireBlock {
    pub hash: BlockHash,
    pub size: u64,
}

/// A contiguous run of pool ids: pool entries `start_id, start_id+1, ...,
/// start_id+size-1` (1-based pool ids).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WireRange {
    pub start_id: u64,
    pub size: u64,
}

/// A node in the file-index tree: a leaf carries `blocks` and no
/// `children`; an interior directory node carries `children` and no
/// `blocks`. Both present, or both empty, is a decode error.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WireItem {
    pub blocks: Vec<WireRange>,
    pub children: BTreeMap<String, WireItem>,
}

/// The full on-wire manifest: the pool plus the root directory's children.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireManifest {
    pub blocks: Vec<WireBlock>,
    pub items: BTreeMap<String, WireItem>,
}

/// Serialize a [WireManifest] to its binary encoding.
pub fn encode(manifest: &WireManifest) -> Result<Vec<u8>> {
    bincode::serialize(manifest).map_err(Error::Encoding)
}

/// Deserialize a [WireManifest] from its binary encoding.
pub fn decode(bytes: &[u8]) -> Result<WireManifest> {
    bincode::deserialize(bytes).map_err(Error::Encoding)
}

/// Build the pooled, tree-shaped wire form of a manifest.
///
/// Fails with [Error::EmptyPath] if a file's path is empty, or
/// [Error::InvalidPath] if it has a leading `/` or an empty interior
/// component (e.g. `"a//b.txt"`).
pub fn to_proto(manifest: &Manifest) -> Result<WireManifest> {
    let mut pool_index: std::collections::HashMap<BlockHash, u64> = std::collections::HashMap::new();
    let mut pool: Vec<WireBlock> = Vec::new();

    let mut root = WireItem::default();
    for file in manifest.files() {
        let mut ranges: Vec<WireRange> = Vec::new();
        for block in &file.blocks {
            let pool_id = *pool_index.entry(block.hash).or_insert_with(|| {
                pool.push(WireBlock {
                    hash: block.hash,
                    size: block.size,
                });
                pool.len() as u64
            });
            extend_or_push_range(&mut ranges, pool_id);
        }
        insert_leaf(&mut root, &file.path, ranges)?;
    }

    Ok(WireManifest {
        blocks: pool,
        items: root.children,
    })
}

fn extend_or_push_range(ranges: &mut Vec<WireRange>, pool_id: u64) {
    if let Some(last) = ranges.last_mut() {
        if last.start_id + last.size == pool_id {
            last.size += 1;
            return;
        }
    }
    ranges.push(WireRange {
        start_id: pool_id,
        size: 1,
    });
}

fn insert_leaf(root: &mut WireItem, path: &str, blocks: Vec<WireRange>) -> Result<()> {
    if path.is_empty() {
        return Err(Error::EmptyPath {
            path: path.to_string(),
        });
    }
    if path.starts_with('/') {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "leading '/'",
        });
    }
    let components: Vec<&str> = path.split('/').collect();
    if components.iter().any(|c| c.is_empty()) {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            reason: "empty path component",
        });
    }
    let mut node = root;
    let (leaf_name, dirs) = components.split_last().expect("path has at least one component");
    for component in dirs {
        node = node
            .children
            .entry(component.to_string())
            .or_insert_with(WireItem::default);
    }
    node.children.insert(
        leaf_name.to_string(),
        WireItem {
            blocks,
            children: BTreeMap::new(),
        },
    );
    Ok(())
}

/// Rebuild a [Manifest] from its wire form.
///
/// Fails with [Error::InvalidBlockRange] if any range references pool
/// entries outside `1..=pool.len()`, and with [Error::MalformedManifestItem]
/// if a tree item has both or neither of `blocks`/`children` populated.
pub fn from_proto(wire: &WireManifest) -> Result<Manifest> {
    let pool: Vec<ManifestBlock> = wire
        .blocks
        .iter()
        .map(|b| ManifestBlock {
            hash: b.hash,
            size: b.size,
        })
        .collect();

    let mut files = std::collections::BTreeMap::new();
    for (name, item) in &wire.items {
        walk(item, name.clone(), &pool, &mut files)?;
    }
    Ok(Manifest { files })
}

fn walk(
    item: &WireItem,
    path: String,
    pool: &[ManifestBlock],
    files: &mut std::collections::BTreeMap<String, ManifestFile>,
) -> Result<()> {
    let has_blocks = !item.blocks.is_empty();
    let has_children = !item.children.is_empty();
    if has_blocks && has_children {
        return Err(Error::MalformedManifestItem {
            path,
            reason: "item has both blocks and children",
        });
    }
    if has_blocks {
        let mut blocks = Vec::new();
        for range in &item.blocks {
            if range.start_id < 1 || range.start_id + range.size - 1 > pool.len() as u64 {
                return Err(Error::InvalidBlockRange {
                    start_id: range.start_id,
                    size: range.size,
                    pool_len: pool.len(),
                });
            }
            for offset in 0..range.size {
                let pool_id = range.start_id + offset;
                blocks.push(pool[(pool_id - 1) as usize]);
            }
        }
        files.insert(path.clone(), ManifestFile { path, blocks });
        return Ok(());
    }
    if !has_children {
        return Err(Error::MalformedManifestItem {
            path,
            reason: "item has neither blocks nor children",
        });
    }
    for (name, child) in &item.children {
        let child_path = format!("{path}/{name}");
        walk(child, child_path, pool, files)?;
    }
    Ok(())
}
