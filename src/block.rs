// Content-addressed block-processing engine.

//! Fixed-size blocks of file data, their hashes, and the carrier object
//! ([FileBlockData]) that flows through the processing pipeline.

use std::cmp::Ordering;
use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::errors::{Error, Result};

/// Size in bytes of a SHA-512 digest.
pub const HASH_SIZE_BYTES: usize = 64;

/// Hash a byte slice with SHA-512.
///
/// This is the one place the hash algorithm is named; every other part of
/// the crate goes through [BlockHash].
pub fn hash(bytes: &[u8]) -> BlockHash {
    let mut hasher = Sha512::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut bin = [0u8; HASH_SIZE_BYTES];
    bin.copy_from_slice(&digest);
    BlockHash(bin)
}

/// The hash of a block of body data: a 64-byte SHA-512 digest.
///
/// Displayed as URL-safe, unpadded base-64 (86 characters). Ordered
/// lexicographically by the underlying bytes, which also gives it a stable
/// total order suitable for use as a key-value store key prefix.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BlockHash(#[serde(with = "serde_bytes_array")] [u8; HASH_SIZE_BYTES]);

impl BlockHash {
    /// Build a `BlockHash` from exactly 64 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<BlockHash> {
        if bytes.len() != HASH_SIZE_BYTES {
            return Err(Error::InvalidHashSize {
                expected: HASH_SIZE_BYTES,
                actual: bytes.len(),
            });
        }
        let mut bin = [0u8; HASH_SIZE_BYTES];
        bin.copy_from_slice(bytes);
        Ok(BlockHash(bin))
    }

    /// Borrow the raw hash bytes, e.g. to build a store key prefix.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE_BYTES] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({self})")
    }
}

impl Ord for BlockHash {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for BlockHash {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Serde helper: keeps the wire encoding a flat 64-byte string rather than a
/// 64-element sequence.
mod serde_bytes_array {
    use serde::de::Error;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error> {
        serde_bytes::serialize(bytes.as_slice(), serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 64], D::Error> {
        let vec: Vec<u8> = serde_bytes::deserialize(deserializer)?;
        vec.try_into()
            .map_err(|v: Vec<u8>| D::Error::custom(format!("expected 64 bytes, got {}", v.len())))
    }
}

/// An owned, immutable buffer of block bytes.
///
/// `Block` is cheap to clone: the backing storage is a reference-counted
/// [Bytes] buffer, so cloning does not copy the underlying data.
#[derive(Clone, Eq, PartialEq)]
pub struct Block {
    data: Bytes,
}

impl Block {
    pub fn new(data: impl Into<Bytes>) -> Block {
        Block { data: data.into() }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// The hash of this block's contents.
    pub fn hash(&self) -> BlockHash {
        hash(&self.data)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block").field("len", &self.len()).finish()
    }
}

/// The unit of flow through the block-processing pipeline.
///
/// A `FileBlockData` names one block of one file by its index and byte
/// offset within that file, and carries the block's hash once computed and
/// its body while the body is in flight. The body may be dropped once a
/// sink has durably persisted it; the hash, once set, is retained for the
/// rest of the carrier's life.
#[derive(Clone, Debug)]
pub struct FileBlockData {
    /// Path of the file this block belongs to, POSIX `/`-delimited,
    /// normalized, with no leading `/`.
    path: String,
    /// Zero-based index of this block within the file.
    block_id: u64,
    /// Byte offset of this block within the file; equal to the sum of the
    /// sizes of all prior blocks of the same file.
    offset: u64,
    /// Byte length of this block.
    size: u64,
    hash: Option<BlockHash>,
    data: Option<Block>,
}

impl FileBlockData {
    /// Build a carrier from raw bytes, computing its size from the slice.
    pub fn from_bytes(path: impl Into<String>, block_id: u64, offset: u64, bytes: Bytes) -> Self {
        let block = Block::new(bytes);
        FileBlockData {
            path: path.into(),
            block_id,
            offset,
            size: block.len() as u64,
            hash: None,
            data: Some(block),
        }
    }

    /// Build a carrier from a pre-built [Block].
    pub fn from_block(path: impl Into<String>, block_id: u64, offset: u64, block: Block) -> Self {
        FileBlockData {
            path: path.into(),
            block_id,
            offset,
            size: block.len() as u64,
            hash: None,
            data: Some(block),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn block_id(&self) -> u64 {
        self.block_id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn hash(&self) -> Option<&BlockHash> {
        self.hash.as_ref()
    }

    pub fn data(&self) -> Option<&Block> {
        self.data.as_ref()
    }

    pub fn take_data(&mut self) -> Option<Block> {
        self.data.take()
    }

    /// Replace the block body, recomputing the recorded size. The stored
    /// hash, if any, is left untouched: callers that replace the body (for
    /// example a decompress processor) are responsible for clearing or
    /// recomputing the hash if its meaning changes.
    pub fn set_block(&mut self, block: Block) {
        self.size = block.len() as u64;
        self.data = Some(block);
    }

    /// Hash the current block body.
    ///
    /// Fails with [Error::NoDataToHash] if no body is present.
    pub fn compute_hash(&self) -> Result<BlockHash> {
        self.data
            .as_ref()
            .map(|b| b.hash())
            .ok_or_else(|| Error::NoDataToHash {
                path: self.path.clone(),
                block_id: self.block_id,
            })
    }

    /// Store a hash value onto this carrier.
    pub fn update_hash(&mut self, hash: BlockHash) {
        self.hash = Some(hash);
    }
}

impl fmt::Display for FileBlockData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hash_str = self
            .hash
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{} {} {} {} {}",
            hash_str, self.path, self.block_id, self.offset, self.size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_pure_and_matches_sha512() {
        let data = b"hello, block";
        let h1 = hash(data);
        let h2 = hash(data);
        assert_eq!(h1, h2);

        let mut hasher = Sha512::new();
        hasher.update(data);
        let expected = hasher.finalize();
        assert_eq!(h1.as_bytes().as_slice(), expected.as_slice());
    }

    #[test]
    fn display_is_86_char_url_safe_base64() {
        let h = hash(b"some bytes");
        let s = h.to_string();
        assert_eq!(s.len(), 86);
        assert!(!s.contains('+'));
        assert!(!s.contains('/'));
        assert!(!s.contains('='));
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        let err = BlockHash::from_bytes(&[0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidHashSize {
                expected: 64,
                actual: 10
            }
        ));
    }

    #[test]
    fn from_bytes_round_trips() {
        let h = hash(b"round trip");
        let h2 = BlockHash::from_bytes(h.as_bytes()).unwrap();
        assert_eq!(h, h2);
    }

    #[test]
    fn ordering_is_byte_lexicographic() {
        let a = BlockHash::from_bytes(&[0u8; 64]).unwrap();
        let mut hi = [0u8; 64];
        hi[0] = 1;
        let b = BlockHash::from_bytes(&hi).unwrap();
        assert!(a < b);
    }

    #[test]
    fn compute_hash_fails_without_data() {
        let mut fbd = FileBlockData::from_bytes("a.bin", 0, 0, Bytes::from_static(b"x"));
        fbd.take_data();
        let err = fbd.compute_hash().unwrap_err();
        assert!(matches!(err, Error::NoDataToHash { .. }));
    }

    #[test]
    fn display_form() {
        let mut fbd = FileBlockData::from_bytes("a/b.bin", 3, 12, Bytes::from_static(b"xyz"));
        let h = fbd.compute_hash().unwrap();
        fbd.update_hash(h);
        let text = fbd.to_string();
        assert!(text.ends_with(" a/b.bin 3 12 3"));
    }
}
