// Content-addressed block-processing engine.

//! The processor stages that can be wired into a [super::Pipeline]: hash,
//! validate, dedup, compress/decompress, fetch over HTTP, and the two
//! sinks that actually persist data.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::block::{Block, BlockHash, FileBlockData};
use crate::compress;
use crate::errors::{Error, Result};
use crate::manifest::{ManifestBlock, ManifestBuilder};
use crate::store::Store;

/// A single pipeline stage: takes ownership of a carrier and either passes
/// it on (`Ok(Some(_))`), filters it out of the stream (`Ok(None)`), or
/// fails the carrier (`Err(_)`) without affecting any other carrier in
/// flight.
#[async_trait]
pub trait BlockProcessor: Send + Sync {
    async fn process(&self, carrier: FileBlockData) -> Result<Option<FileBlockData>>;
}

fn hash_of(carrier: &FileBlockData) -> Result<BlockHash> {
    match carrier.hash() {
        Some(h) => Ok(*h),
        None => carrier.compute_hash(),
    }
}

/// Computes and stores the carrier's hash if it does not already have one.
#[derive(Default)]
pub struct HashProcessor;

#[async_trait]
impl BlockProcessor for HashProcessor {
    async fn process(&self, mut carrier: FileBlockData) -> Result<Option<FileBlockData>> {
        if carrier.hash().is_none() {
            let hash = carrier.compute_hash()?;
            carrier.update_hash(hash);
        }
        Ok(Some(carrier))
    }
}

/// Recomputes the carrier's hash and fails if it no longer matches the
/// stored one.
#[derive(Default)]
pub struct ValidateProcessor;

#[async_trait]
impl BlockProcessor for ValidateProcessor {
    async fn process(&self, carrier: FileBlockData) -> Result<Option<FileBlockData>> {
        let expected = carrier.hash().copied().ok_or_else(|| Error::NoDataToHash {
            path: carrier.path().to_string(),
            block_id: carrier.block_id(),
        })?;
        let actual = carrier.compute_hash()?;
        if actual != expected {
            return Err(Error::HashMismatch { expected, actual });
        }
        Ok(Some(carrier))
    }
}

/// What [DedupProcessor] does the second time it sees a given hash.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum DedupAction {
    /// Silently filter the carrier out of the stream. This is the contract
    /// this crate implements by default.
    #[default]
    Drop,
    /// Fail the carrier instead of dropping it.
    Error,
}

/// Filters out carriers whose hash has already been seen by this process.
///
/// Holds a mutex-protected set of every hash seen so far; per the
/// concurrency model, this is intentionally a single coarse lock rather
/// than a sharded map.
pub struct DedupProcessor {
    seen: Mutex<HashSet<BlockHash>>,
    on_duplicate: DedupAction,
}

impl DedupProcessor {
    pub fn new(on_duplicate: DedupAction) -> Self {
        DedupProcessor {
            seen: Mutex::new(HashSet::new()),
            on_duplicate,
        }
    }
}

impl Default for DedupProcessor {
    fn default() -> Self {
        DedupProcessor::new(DedupAction::default())
    }
}

#[async_trait]
impl BlockProcessor for DedupProcessor {
    async fn process(&self, carrier: FileBlockData) -> Result<Option<FileBlockData>> {
        let hash = hash_of(&carrier)?;
        let first_sighting = {
            let mut seen = self.seen.lock().expect("dedup processor mutex poisoned");
            seen.insert(hash)
        };
        if first_sighting {
            return Ok(Some(carrier));
        }
        match self.on_duplicate {
            DedupAction::Drop => Ok(None),
            DedupAction::Error => Err(Error::DuplicateBlockId {
                path: carrier.path().to_string(),
                block_id: carrier.block_id(),
            }),
        }
    }
}

/// Zlib-compresses the carrier's body in place.
pub struct ZlibCompressProcessor {
    level: u32,
}

impl ZlibCompressProcessor {
    pub fn new(level: u32) -> Self {
        ZlibCompressProcessor { level }
    }
}

#[async_trait]
impl BlockProcessor for ZlibCompressProcessor {
    async fn process(&self, mut carrier: FileBlockData) -> Result<Option<FileBlockData>> {
        let data = carrier
            .data()
            .ok_or_else(|| Error::NoDataToHash {
                path: carrier.path().to_string(),
                block_id: carrier.block_id(),
            })?
            .as_slice();
        let compressed = compress::compress(data, self.level)?;
        carrier.set_block(Block::new(compressed));
        Ok(Some(carrier))
    }
}

/// Zlib-decompresses the carrier's body in place.
#[derive(Default)]
pub struct ZlibDecompressProcessor;

#[async_trait]
impl BlockProcessor for ZlibDecompressProcessor {
    async fn process(&self, mut carrier: FileBlockData) -> Result<Option<FileBlockData>> {
        let data = carrier
            .data()
            .ok_or_else(|| Error::NoDataToHash {
                path: carrier.path().to_string(),
                block_id: carrier.block_id(),
            })?
            .as_slice();
        let decompressed = compress::decompress(data)?;
        carrier.set_block(Block::new(decompressed));
        Ok(Some(carrier))
    }
}

/// Fetches the carrier's body over HTTP from `prefix + base64(hash)`,
/// replacing any body already present.
pub struct HttpFetchProcessor {
    client: reqwest::Client,
    prefix: String,
}

impl HttpFetchProcessor {
    pub fn new(prefix: impl Into<String>) -> Self {
        HttpFetchProcessor {
            client: reqwest::Client::new(),
            prefix: prefix.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, prefix: impl Into<String>) -> Self {
        HttpFetchProcessor {
            client,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl BlockProcessor for HttpFetchProcessor {
    async fn process(&self, mut carrier: FileBlockData) -> Result<Option<FileBlockData>> {
        let hash = carrier.hash().copied().ok_or_else(|| Error::NoHashForFetch {
            path: carrier.path().to_string(),
            block_id: carrier.block_id(),
        })?;
        let url = format!("{}{hash}", self.prefix);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                code: response.status().as_u16(),
                hash,
            });
        }
        let body = response.bytes().await?;
        carrier.set_block(Block::new(body));
        Ok(Some(carrier))
    }
}

/// Writes the carrier's body into the block store, keyed by its hash.
///
/// Only persists bodies; the liveness markers that tie a body to a build
/// are written once, after the pipeline finishes, by
/// [crate::store::WriteTransaction::put_build] on the completed manifest.
/// Each carrier opens and commits its own short write transaction rather
/// than sharing one across the whole pipeline run, since the store
/// serializes writers internally; see [crate::store::Store].
pub struct StoreSink {
    store: Arc<Store>,
}

impl StoreSink {
    pub fn new(store: Arc<Store>) -> Self {
        StoreSink { store }
    }
}

#[async_trait]
impl BlockProcessor for StoreSink {
    async fn process(&self, carrier: FileBlockData) -> Result<Option<FileBlockData>> {
        let hash = hash_of(&carrier)?;
        let body = carrier
            .data()
            .map(|b| b.as_slice().to_vec())
            .unwrap_or_default();
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let txn = store.begin_write()?;
            txn.put_block_body_if_absent(&hash, &body)?;
            txn.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        Ok(Some(carrier))
    }
}

/// Accumulates `(path, block_id, (hash, size))` into a [ManifestBuilder].
pub struct ManifestBuilderSink {
    builder: Arc<ManifestBuilder>,
}

impl ManifestBuilderSink {
    pub fn new(builder: Arc<ManifestBuilder>) -> Self {
        ManifestBuilderSink { builder }
    }
}

#[async_trait]
impl BlockProcessor for ManifestBuilderSink {
    async fn process(&self, carrier: FileBlockData) -> Result<Option<FileBlockData>> {
        let hash = hash_of(&carrier)?;
        let file_builder = self.builder.add_file(carrier.path());
        file_builder.add_block(
            carrier.block_id(),
            ManifestBlock {
                hash,
                size: carrier.size(),
            },
        )?;
        Ok(Some(carrier))
    }
}
