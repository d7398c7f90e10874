// Content-addressed block-processing engine.

//! Sources turn some external byte stream — a directory tree, a zip
//! archive, an in-memory vector, or a single reader — into a producer task
//! that emits [FileBlockData] on a bounded channel.
//!
//! Every source runs as a dedicated producer task so the pipeline's
//! back-pressure model (a bounded channel per edge) starts right at the
//! origin of the data, not just between processor stages.

mod archive;
mod directory;
mod in_memory;
mod reader;

pub use archive::ArchiveSource;
pub use directory::DirectoryWalkSource;
pub use in_memory::InMemorySource;
pub use reader::ReaderSource;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::block::FileBlockData;
use crate::errors::Result;

/// Default number of not-yet-consumed blocks a source will buffer ahead of
/// its slowest reader.
pub const DEFAULT_SOURCE_BUFFER: usize = 64;

/// A factory that spawns a producer task emitting a stream of
/// [FileBlockData] on a bounded channel.
///
/// `spawn` takes ownership of the source and returns immediately; the
/// actual work happens on a background task. The returned receiver yields
/// `Ok(carrier)` for each block in turn and is closed, after at most one
/// `Err`, once the source has nothing more to emit. A source must close its
/// sending half exactly once — dropping the `Sender` when its task returns
/// satisfies that automatically.
pub trait BlockSource: Send + 'static {
    /// Spawn the producer task and return its output channel.
    ///
    /// `chunk_size` bounds the byte length of every emitted block except
    /// possibly the last block of each file. `cancel` lets the pipeline ask
    /// the source to stop emitting after the block currently in flight.
    fn spawn(
        self,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<FileBlockData>>;
}

/// Normalize a filesystem-style relative path to the pipeline's canonical
/// form: `/`-delimited, no leading slash, platform separators rewritten.
pub(crate) fn normalize_relative_path(path: &std::path::Path) -> String {
    let mut parts = Vec::new();
    for component in path.components() {
        if let std::path::Component::Normal(part) = component {
            parts.push(part.to_string_lossy().into_owned());
        }
    }
    parts.join("/")
}

/// Split a byte buffer into `chunk_size`-sized pieces, the last possibly
/// shorter; used by every source that reads a whole file before chunking.
pub(crate) fn chunk_bytes(bytes: bytes::Bytes, chunk_size: usize) -> Vec<bytes::Bytes> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(bytes.len() / chunk_size + 1);
    let mut rest = bytes;
    while !rest.is_empty() {
        let take = chunk_size.min(rest.len());
        out.push(rest.split_to(take));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn normalizes_separators_and_strips_leading_slash() {
        assert_eq!(normalize_relative_path(Path::new("sub/x.bin")), "sub/x.bin");
    }

    #[test]
    fn chunk_bytes_splits_with_short_last_chunk() {
        let data = bytes::Bytes::from(vec![0u8; 10]);
        let chunks = chunk_bytes(data, 4);
        assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![4, 4, 2]);
    }

    #[test]
    fn chunk_bytes_of_empty_input_is_empty() {
        assert!(chunk_bytes(bytes::Bytes::new(), 4).is_empty());
    }
}
