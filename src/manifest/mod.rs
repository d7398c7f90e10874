// Content-addressed block-processing engine.

//! The build manifest: a tree of files, each an ordered sequence of
//! referenced blocks, plus the mutex-protected builder used to assemble one
//! while a pipeline is running.

pub mod proto;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crc::{Crc, CRC_64_ECMA_182};
use serde::{Deserialize, Serialize};

use crate::block::BlockHash;
use crate::errors::{Error, Result};

/// The CRC-64 variant used by [Manifest::digest]: ECMA-182, the variant
/// commonly just called "CRC-64/ECMA".
static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// The canonical identity and length of a block referenced by a manifest.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ManifestBlock {
    pub hash: BlockHash,
    pub size: u64,
}

/// A path plus its ordered sequence of blocks.
///
/// Reconstructing the file means concatenating the block bodies in this
/// order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    pub blocks: Vec<ManifestBlock>,
}

impl ManifestFile {
    fn digest(&self) -> u64 {
        let mut digest = CRC64.digest();
        digest.update(self.path.as_bytes());
        for block in &self.blocks {
            digest.update(block.hash.as_bytes());
        }
        digest.finalize()
    }
}

/// An immutable, built description of a build: every file's path mapped to
/// its ordered block sequence.
#[derive(Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct Manifest {
    files: BTreeMap<String, ManifestFile>,
}

impl Manifest {
    pub fn files(&self) -> impl Iterator<Item = &ManifestFile> {
        self.files.values()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestFile> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// A 64-bit digest of the whole manifest: the XOR of every file's
    /// digest, so it does not depend on file iteration order, but does
    /// depend on the order of blocks within each file.
    pub fn digest(&self) -> u64 {
        self.files.values().fold(0u64, |acc, f| acc ^ f.digest())
    }
}

/// Accumulates files and their blocks from concurrent pipeline sinks.
///
/// `add_file` is idempotent: calling it twice with the same path returns the
/// same underlying [FileBuilder]. Both this type and [FileBuilder] use a
/// single coarse mutex; the contract is only that concurrent callers are
/// safe and that `build()` sees a consistent snapshot once all producers
/// have finished.
#[derive(Default)]
pub struct ManifestBuilder {
    files: Mutex<HashMap<String, Arc<FileBuilder>>>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        ManifestBuilder::default()
    }

    pub fn add_file(&self, path: impl Into<String>) -> Arc<FileBuilder> {
        let path = path.into();
        let mut files = self.files.lock().expect("manifest builder mutex poisoned");
        files
            .entry(path.clone())
            .or_insert_with(|| Arc::new(FileBuilder::new(path)))
            .clone()
    }

    /// Build every file's blocks and assemble the final [Manifest].
    ///
    /// Call only after every producer that might still call `add_file` or
    /// `add_block` has finished.
    pub fn build(&self) -> Result<Manifest> {
        let files = self.files.lock().expect("manifest builder mutex poisoned");
        let mut built = BTreeMap::new();
        for (path, builder) in files.iter() {
            built.insert(path.clone(), builder.build()?);
        }
        Ok(Manifest { files: built })
    }
}

/// Accumulates the blocks of one file, keyed by block id, until `build` is
/// called.
#[derive(Default)]
pub struct FileBuilder {
    path: String,
    blocks: Mutex<HashMap<u64, ManifestBlock>>,
}

impl FileBuilder {
    fn new(path: String) -> Self {
        FileBuilder {
            path,
            blocks: Mutex::default(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Record the block for `block_id`. Fails with [Error::DuplicateBlockId]
    /// if this file already has a block recorded under that id.
    pub fn add_block(&self, block_id: u64, block: ManifestBlock) -> Result<()> {
        let mut blocks = self.blocks.lock().expect("file builder mutex poisoned");
        if blocks.contains_key(&block_id) {
            return Err(Error::DuplicateBlockId {
                path: self.path.clone(),
                block_id,
            });
        }
        blocks.insert(block_id, block);
        Ok(())
    }

    /// Gather the recorded blocks in ascending `block_id` order, starting
    /// from 0, failing with [Error::MissingBlocks] if there is a gap before
    /// every recorded block has been consumed.
    pub fn build(&self) -> Result<ManifestFile> {
        let blocks = self.blocks.lock().expect("file builder mutex poisoned");
        let mut ordered = Vec::with_capacity(blocks.len());
        let mut next_id = 0u64;
        while let Some(block) = blocks.get(&next_id) {
            ordered.push(*block);
            next_id += 1;
        }
        if ordered.len() != blocks.len() {
            return Err(Error::MissingBlocks {
                path: self.path.clone(),
                have: ordered.len(),
            });
        }
        Ok(ManifestFile {
            path: self.path.clone(),
            blocks: ordered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(byte: u8) -> ManifestBlock {
        ManifestBlock {
            hash: crate::block::hash(&[byte]),
            size: 1,
        }
    }

    #[test]
    fn add_file_is_idempotent() {
        let builder = ManifestBuilder::new();
        let a = builder.add_file("x.bin");
        let b = builder.add_file("x.bin");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn build_orders_blocks_by_id() {
        let fb = FileBuilder::new("x.bin".to_string());
        fb.add_block(1, block(2)).unwrap();
        fb.add_block(0, block(1)).unwrap();
        let file = fb.build().unwrap();
        assert_eq!(file.blocks[0].size, 1);
        assert_eq!(file.blocks.len(), 2);
    }

    #[test]
    fn duplicate_block_id_is_an_error() {
        let fb = FileBuilder::new("x.bin".to_string());
        fb.add_block(0, block(1)).unwrap();
        let err = fb.add_block(0, block(2)).unwrap_err();
        assert!(matches!(err, Error::DuplicateBlockId { .. }));
    }

    #[test]
    fn gap_before_exhausting_entries_is_missing_blocks() {
        let fb = FileBuilder::new("x.bin".to_string());
        fb.add_block(0, block(1)).unwrap();
        fb.add_block(2, block(2)).unwrap();
        let err = fb.build().unwrap_err();
        assert!(matches!(err, Error::MissingBlocks { have: 1, .. }));
    }

    #[test]
    fn manifest_digest_is_order_sensitive_within_a_file() {
        let mb1 = ManifestBuilder::new();
        let f1 = mb1.add_file("a.bin");
        f1.add_block(0, block(1)).unwrap();
        f1.add_block(1, block(2)).unwrap();
        let m1 = mb1.build().unwrap();

        let mb2 = ManifestBuilder::new();
        let f2 = mb2.add_file("a.bin");
        f2.add_block(0, block(2)).unwrap();
        f2.add_block(1, block(1)).unwrap();
        let m2 = mb2.build().unwrap();

        assert_ne!(m1.digest(), m2.digest());
    }

    #[test]
    fn manifest_digest_is_order_independent_across_files() {
        let mb1 = ManifestBuilder::new();
        mb1.add_file("a.bin").add_block(0, block(1)).unwrap();
        mb1.add_file("b.bin").add_block(0, block(2)).unwrap();
        let m1 = mb1.build().unwrap();

        let mb2 = ManifestBuilder::new();
        mb2.add_file("b.bin").add_block(0, block(2)).unwrap();
        mb2.add_file("a.bin").add_block(0, block(1)).unwrap();
        let m2 = mb2.build().unwrap();

        assert_eq!(m1.digest(), m2.digest());
    }
}
