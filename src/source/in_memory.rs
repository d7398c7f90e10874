// Content-addressed block-processing engine.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::block::FileBlockData;
use crate::errors::Result;

use super::{BlockSource, DEFAULT_SOURCE_BUFFER};

/// A source that replays a fixed, already-built list of carriers, in order.
///
/// Mostly useful for tests and for feeding a pipeline with blocks produced
/// by some earlier, out-of-band step.
pub struct InMemorySource {
    blocks: Vec<FileBlockData>,
}

impl InMemorySource {
    pub fn new(blocks: Vec<FileBlockData>) -> Self {
        InMemorySource { blocks }
    }
}

impl BlockSource for InMemorySource {
    fn spawn(
        self,
        _chunk_size: usize,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<FileBlockData>> {
        let (tx, rx) = mpsc::channel(DEFAULT_SOURCE_BUFFER.max(1));
        tokio::spawn(async move {
            trace!(n = self.blocks.len(), "in-memory source starting");
            for block in self.blocks {
                if cancel.is_cancelled() {
                    break;
                }
                if tx.send(Ok(block)).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}
