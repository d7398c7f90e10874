// Content-addressed block-processing engine.

//! Reference-counting garbage collection.
//!
//! Reclamation happens synchronously inside [super::WriteTransaction::delete_build];
//! this module only adds the on-demand variant for hashes whose liveness
//! might need rechecking outside of a delete (for example after restoring
//! a database from backup).

use crate::block::BlockHash;
use crate::errors::Result;

use super::WriteTransaction;

/// Re-check `hash`'s liveness and delete its body if nothing references it.
///
/// Runs inside the given write transaction so the check-then-delete is
/// atomic with respect to any concurrent `put_build` of the same hash.
pub fn sweep_one(txn: &WriteTransaction, hash: &BlockHash) -> Result<bool> {
    if txn.is_block_live(hash)? {
        return Ok(false);
    }
    txn.delete_block_body_if_present(hash)
}

/// Sweep a batch of hashes, returning how many bodies were actually
/// reclaimed.
pub fn sweep_many(txn: &WriteTransaction, hashes: &[BlockHash]) -> Result<usize> {
    let mut reclaimed = 0;
    for hash in hashes {
        if sweep_one(txn, hash)? {
            reclaimed += 1;
        }
    }
    Ok(reclaimed)
}
