// Content-addressed block-processing engine.

//! Track counters of the number of blocks, bytes, and files processed.
//!
//! Processors and sinks report through the shared [Counters] table handed
//! to a [crate::pipeline::Pipeline] at construction time.

#![warn(missing_docs)]

use std::fmt::{self, Debug};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;

use itertools::Itertools;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{EnumCount, EnumIter};

/// Counters of events or bytes observed while running a pipeline.
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumCount, EnumIter)]
pub enum Counter {
    /// Number of files seen by a source.
    Files,
    /// Total bytes in files seen by a source.
    FileBytes,
    /// Number of blocks produced by a source.
    Blocks,
    /// Total bytes across blocks produced by a source.
    BlockBytes,
    /// Number of blocks hashed.
    BlocksHashed,
    /// Number of blocks that failed validation.
    BlocksInvalid,
    /// Number of blocks dropped as duplicates by a dedup processor.
    BlocksDeduplicated,
    /// Total bytes in blocks dropped as duplicates.
    DeduplicatedBytes,
    /// Number of blocks compressed.
    BlocksCompressed,
    /// Total uncompressed bytes across compressed blocks.
    CompressUncompressedBytes,
    /// Total compressed bytes across compressed blocks.
    CompressCompressedBytes,
    /// Number of blocks decompressed.
    BlocksDecompressed,
    /// Number of blocks fetched over HTTP.
    BlocksFetched,
    /// Number of blocks written to the store.
    BlocksStored,
    /// Number of blocks already present in the store at write time.
    BlocksAlreadyPresent,
    /// Number of blocks added to a manifest being built.
    ManifestBlocksAdded,
    /// Number of errors observed by any stage.
    Errors,
    /// Number of carriers dropped because the pipeline was cancelled.
    Cancelled,
}

/// Counter values, identified by a [Counter].
#[derive(Default)]
pub struct Counters {
    counters: [AtomicUsize; Counter::COUNT],
}

impl Counters {
    /// Increase the value for a given counter by an amount.
    pub fn count(&self, counter: Counter, increment: usize) {
        self.counters[counter as usize].fetch_add(increment, Relaxed);
    }

    /// Set the absolute value of a counter.
    pub fn set(&self, counter: Counter, value: usize) {
        self.counters[counter as usize].store(value, Relaxed);
    }

    /// Get the current value of a counter.
    pub fn get(&self, counter: Counter) -> usize {
        self.counters[counter as usize].load(Relaxed)
    }

    /// Return an iterator over counter, value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Counter, usize)> {
        Counter::iter()
            .map(move |c| (c, self.counters[c as usize].load(Relaxed)))
            .collect_vec()
            .into_iter()
    }
}

impl Debug for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Counters");
        for i in Counter::iter() {
            s.field(
                &format!("{:?}", i),
                &self.counters[i as usize].load(Relaxed),
            );
        }
        s.finish()
    }
}
