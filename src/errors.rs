// Content-addressed block-processing engine.

//! The crate-wide error type.
//!
//! Every fallible operation in this crate returns [Result], whose error
//! variant is this enum. Foreign errors (I/O, storage) are folded in with
//! `#[from]` so call sites can use `?` without an intermediate `.map_err`.

use std::path::PathBuf;

use thiserror::Error;

use crate::block::BlockHash;
use crate::buildid::BuildId;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// A processor tried to hash or validate a carrier with no block data.
    #[error("no data to hash for {path:?} block {block_id}")]
    NoDataToHash { path: String, block_id: u64 },

    /// `HTTPFetchProcessor` ran on a carrier that has no hash set.
    #[error("no hash to fetch for {path:?} block {block_id}")]
    NoHashForFetch { path: String, block_id: u64 },

    /// A `BlockHash` was constructed from a slice of the wrong length.
    #[error("invalid hash size: expected {expected} bytes, got {actual}")]
    InvalidHashSize { expected: usize, actual: usize },

    /// `ValidateProcessor` found that the recomputed hash does not match.
    #[error("hash mismatch: expected {expected}, actual {actual}")]
    HashMismatch {
        expected: BlockHash,
        actual: BlockHash,
    },

    /// `FileBuilder::add_block` was called twice for the same block id.
    #[error("duplicate block id {block_id} for file {path:?}")]
    DuplicateBlockId { path: String, block_id: u64 },

    /// `FileBuilder::build` found a gap in the recorded block ids.
    #[error("missing blocks for file {path:?}: have {have}, expected contiguous from 0")]
    MissingBlocks { path: String, have: usize },

    /// A manifest path had an empty component.
    #[error("empty path component in {path:?}")]
    EmptyPath { path: String },

    /// A manifest path was otherwise invalid (e.g. a leading `/`).
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Decoding a wire manifest found a block range outside the pool.
    #[error("invalid block range: start={start_id} size={size} pool_len={pool_len}")]
    InvalidBlockRange {
        start_id: u64,
        size: u64,
        pool_len: usize,
    },

    /// A manifest tree item on decode had both blocks and children, or
    /// neither.
    #[error("malformed manifest item at {path:?}: {reason}")]
    MalformedManifestItem { path: String, reason: &'static str },

    /// `HTTPFetchProcessor` received a non-2xx response.
    #[error("http status {code} fetching block {hash}")]
    HttpStatus { code: u16, hash: BlockHash },

    /// Any filesystem or network I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any error from the underlying HTTP client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Any error from the underlying key-value store.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A build was requested that does not exist in the `builds` table.
    #[error("no such build: {0:?}")]
    NoSuchBuild(BuildId),

    /// A ZIP archive could not be read.
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A manifest could not be (de)serialized to its binary wire form.
    #[error("manifest encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),

    /// The pipeline, or a source, observed a cancellation signal before
    /// completing its work.
    #[error("cancelled")]
    Cancelled,

    /// A path outside the archive root was referenced (directory source).
    #[error("path {0:?} escapes the source root")]
    PathEscapesRoot(PathBuf),
}

/// Errors from the `redb`-backed key-value store, folded into one small
/// enum so callers of [Error::Storage] don't need to depend on `redb`'s
/// own error types directly.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
}
