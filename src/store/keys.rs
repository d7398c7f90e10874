// Content-addressed block-processing engine.

//! Key encodings for the `blocks` liveness table.
//!
//! A liveness marker key is `hash (64B) || build_id (16B)`, 80 bytes total.
//! Keeping the hash as the key's prefix is what makes "is this block
//! referenced by anything" a single bounded range scan rather than a
//! maintained counter.

use crate::block::{BlockHash, HASH_SIZE_BYTES};
use crate::buildid::{BuildId, BUILD_ID_ENCODED_LEN};

pub const MARKER_KEY_LEN: usize = HASH_SIZE_BYTES + BUILD_ID_ENCODED_LEN;

/// Encode the full `hash || build_id` marker key.
pub fn marker_key(hash: &BlockHash, build_id: &BuildId) -> [u8; MARKER_KEY_LEN] {
    let mut out = [0u8; MARKER_KEY_LEN];
    out[..HASH_SIZE_BYTES].copy_from_slice(hash.as_bytes());
    out[HASH_SIZE_BYTES..].copy_from_slice(&build_id.to_bytes());
    out
}

/// The inclusive lower bound of the range of marker keys for `hash`: the
/// hash followed by 16 zero bytes.
pub fn marker_prefix_start(hash: &BlockHash) -> [u8; MARKER_KEY_LEN] {
    let mut out = [0u8; MARKER_KEY_LEN];
    out[..HASH_SIZE_BYTES].copy_from_slice(hash.as_bytes());
    out
}

/// The exclusive upper bound of the range of marker keys for `hash`: the
/// hash followed by 16 `0xff` bytes, one past the last possible build id.
pub fn marker_prefix_end(hash: &BlockHash) -> [u8; MARKER_KEY_LEN] {
    let mut out = [0xffu8; MARKER_KEY_LEN];
    out[..HASH_SIZE_BYTES].copy_from_slice(hash.as_bytes());
    out
}
