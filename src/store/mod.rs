// Content-addressed block-processing engine.

//! A typed wrapper over an embedded, ordered, transactional key-value
//! store, maintaining the invariant that a block body is kept iff some
//! build still references it.
//!
//! Three logical tables live in one `redb` database: `builds` (manifest
//! bytes keyed by [BuildId]), `blocks` (liveness markers keyed by
//! `hash || build_id`), and `block_bodies` (block bytes keyed by hash).

pub mod gc;
mod keys;

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, trace};

use crate::buildid::BuildId;
use crate::errors::{Error, Result, StorageError};
use crate::manifest::proto::{self, WireManifest};

const BUILDS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("builds");
const BLOCKS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("blocks");
const BLOCK_BODIES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("block_bodies");

/// A handle to the on-disk database. Cheaply cloneable; `redb::Database`
/// serializes writers internally and allows many concurrent readers.
pub struct Store {
    db: Database,
}

impl Store {
    /// Open (creating if absent) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Store> {
        let db = Database::create(path).map_err(|e| Error::Storage(StorageError::Database(e)))?;
        // Ensure every table exists even before the first write.
        let txn = db
            .begin_write()
            .map_err(|e| Error::Storage(StorageError::Transaction(e)))?;
        {
            txn.open_table(BUILDS_TABLE)
                .map_err(|e| Error::Storage(StorageError::Table(e)))?;
            txn.open_table(BLOCKS_TABLE)
                .map_err(|e| Error::Storage(StorageError::Table(e)))?;
            txn.open_table(BLOCK_BODIES_TABLE)
                .map_err(|e| Error::Storage(StorageError::Table(e)))?;
        }
        txn.commit()
            .map_err(|e| Error::Storage(StorageError::Commit(e)))?;
        Ok(Store { db })
    }

    pub fn begin_read(&self) -> Result<ReadTransaction> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| Error::Storage(StorageError::Transaction(e)))?;
        Ok(ReadTransaction { txn })
    }

    pub fn begin_write(&self) -> Result<WriteTransaction> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| Error::Storage(StorageError::Transaction(e)))?;
        Ok(WriteTransaction { txn })
    }
}

/// A read-only snapshot of the database. All values returned are copied out
/// of the transaction's memory-mapped pages; none of them borrow from
/// `self`, so the transaction may be dropped as soon as the caller is done.
pub struct ReadTransaction {
    txn: redb::ReadTransaction,
}

impl ReadTransaction {
    pub fn get_build(&self, id: BuildId) -> Result<Option<WireManifest>> {
        let table = self
            .txn
            .open_table(BUILDS_TABLE)
            .map_err(|e| Error::Storage(StorageError::Table(e)))?;
        let key = id.to_bytes();
        let Some(guard) = table
            .get(key.as_slice())
            .map_err(|e| Error::Storage(StorageError::Storage(e)))?
        else {
            return Ok(None);
        };
        Ok(Some(proto::decode(guard.value())?))
    }

    pub fn get_block_body(&self, hash: &crate::block::BlockHash) -> Result<Option<Vec<u8>>> {
        let table = self
            .txn
            .open_table(BLOCK_BODIES_TABLE)
            .map_err(|e| Error::Storage(StorageError::Table(e)))?;
        let Some(guard) = table
            .get(hash.as_bytes().as_slice())
            .map_err(|e| Error::Storage(StorageError::Storage(e)))?
        else {
            return Ok(None);
        };
        Ok(Some(guard.value().to_vec()))
    }

    /// True iff at least one build still references `hash`.
    pub fn is_block_live(&self, hash: &crate::block::BlockHash) -> Result<bool> {
        let table = self
            .txn
            .open_table(BLOCKS_TABLE)
            .map_err(|e| Error::Storage(StorageError::Table(e)))?;
        let start = keys::marker_prefix_start(hash);
        let end = keys::marker_prefix_end(hash);
        let mut range = table
            .range(start.as_slice()..=end.as_slice())
            .map_err(|e| Error::Storage(StorageError::Storage(e)))?;
        Ok(range.next().is_some())
    }
}

/// A single-writer transaction. `put_build`/`delete_build` are the only
/// mutating entry points; both must be followed by [WriteTransaction::commit]
/// to take effect.
pub struct WriteTransaction {
    txn: redb::WriteTransaction,
}

impl WriteTransaction {
    /// Store `manifest` under `id`, and mark every pooled block as
    /// referenced by `id`. Idempotent: re-running with the same id
    /// overwrites the manifest and re-creates the same markers.
    pub fn put_build(&self, id: BuildId, manifest: &WireManifest) -> Result<()> {
        let encoded_len = bincode::serialized_size(manifest)
            .map_err(Error::Encoding)? as usize;
        {
            let mut table = self
                .txn
                .open_table(BUILDS_TABLE)
                .map_err(|e| Error::Storage(StorageError::Table(e)))?;
            let mut guard = table
                .insert_reserve(id.to_bytes().as_slice(), encoded_len as u32)
                .map_err(|e| Error::Storage(StorageError::Storage(e)))?;
            bincode::serialize_into(guard.as_mut(), manifest).map_err(Error::Encoding)?;
        }
        {
            let mut table = self
                .txn
                .open_table(BLOCKS_TABLE)
                .map_err(|e| Error::Storage(StorageError::Table(e)))?;
            for block in &manifest.blocks {
                let key = keys::marker_key(&block.hash, &id);
                table
                    .insert(key.as_slice(), &[][..])
                    .map_err(|e| Error::Storage(StorageError::Storage(e)))?;
            }
        }
        trace!(%id, n_blocks = manifest.blocks.len(), "put build");
        Ok(())
    }

    /// Store a block body if one is not already present for `hash`.
    pub fn put_block_body_if_absent(
        &self,
        hash: &crate::block::BlockHash,
        body: &[u8],
    ) -> Result<bool> {
        let mut table = self
            .txn
            .open_table(BLOCK_BODIES_TABLE)
            .map_err(|e| Error::Storage(StorageError::Table(e)))?;
        if table
            .get(hash.as_bytes().as_slice())
            .map_err(|e| Error::Storage(StorageError::Storage(e)))?
            .is_some()
        {
            return Ok(false);
        }
        table
            .insert(hash.as_bytes().as_slice(), body)
            .map_err(|e| Error::Storage(StorageError::Storage(e)))?;
        Ok(true)
    }

    /// Delete `hash`'s body if one is present, regardless of liveness.
    /// Callers are responsible for checking liveness first; see
    /// [crate::store::gc::sweep_one].
    pub fn delete_block_body_if_present(&self, hash: &crate::block::BlockHash) -> Result<bool> {
        let mut table = self
            .txn
            .open_table(BLOCK_BODIES_TABLE)
            .map_err(|e| Error::Storage(StorageError::Table(e)))?;
        let existed = table
            .get(hash.as_bytes().as_slice())
            .map_err(|e| Error::Storage(StorageError::Storage(e)))?
            .is_some();
        if existed {
            table
                .remove(hash.as_bytes().as_slice())
                .map_err(|e| Error::Storage(StorageError::Storage(e)))?;
        }
        Ok(existed)
    }

    /// True iff at least one marker remains for `hash`.
    pub fn is_block_live(&self, hash: &crate::block::BlockHash) -> Result<bool> {
        let table = self
            .txn
            .open_table(BLOCKS_TABLE)
            .map_err(|e| Error::Storage(StorageError::Table(e)))?;
        let start = keys::marker_prefix_start(hash);
        let end = keys::marker_prefix_end(hash);
        let mut range = table
            .range(start.as_slice()..=end.as_slice())
            .map_err(|e| Error::Storage(StorageError::Storage(e)))?;
        Ok(range.next().is_some())
    }

    /// Remove `id`'s manifest and every marker it held, then reclaim any
    /// block body that no longer has a remaining marker.
    ///
    /// The liveness check and the body delete happen inside this same
    /// transaction, so a concurrent `put_build` of the same hash that
    /// commits first (and thus is visible to us, since `redb` serializes
    /// writers) is never lost: if its marker is visible at commit time the
    /// body is kept.
    pub fn delete_build(&self, id: BuildId) -> Result<Option<crate::manifest::Manifest>> {
        let wire = {
            let table = self
                .txn
                .open_table(BUILDS_TABLE)
                .map_err(|e| Error::Storage(StorageError::Table(e)))?;
            let Some(guard) = table
                .get(id.to_bytes().as_slice())
                .map_err(|e| Error::Storage(StorageError::Storage(e)))?
            else {
                return Ok(None);
            };
            proto::decode(guard.value())?
        };

        {
            let mut table = self
                .txn
                .open_table(BLOCKS_TABLE)
                .map_err(|e| Error::Storage(StorageError::Table(e)))?;
            for block in &wire.blocks {
                let key = keys::marker_key(&block.hash, &id);
                table
                    .remove(key.as_slice())
                    .map_err(|e| Error::Storage(StorageError::Storage(e)))?;
            }
        }
        {
            let mut table = self
                .txn
                .open_table(BUILDS_TABLE)
                .map_err(|e| Error::Storage(StorageError::Table(e)))?;
            table
                .remove(id.to_bytes().as_slice())
                .map_err(|e| Error::Storage(StorageError::Storage(e)))?;
        }

        for block in &wire.blocks {
            if !self.is_block_live(&block.hash)? {
                let mut bodies = self
                    .txn
                    .open_table(BLOCK_BODIES_TABLE)
                    .map_err(|e| Error::Storage(StorageError::Table(e)))?;
                bodies
                    .remove(block.hash.as_bytes().as_slice())
                    .map_err(|e| Error::Storage(StorageError::Storage(e)))?;
            }
        }

        debug!(%id, "deleted build and swept orphaned block bodies");
        proto::from_proto(&wire).map(Some)
    }

    pub fn commit(self) -> Result<()> {
        self.txn
            .commit()
            .map_err(|e| Error::Storage(StorageError::Commit(e)))
    }
}
