// Content-addressed block-processing engine.

use std::io::{self, Read};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::block::FileBlockData;
use crate::errors::{Error, Result};

use super::{BlockSource, DEFAULT_SOURCE_BUFFER};

/// A source that chunks a single blocking [Read] into fixed-size blocks
/// under one logical file path.
///
/// The reader is consumed on a blocking task, since a generic `Read` may
/// block the executor.
pub struct ReaderSource<R> {
    reader: R,
    base: String,
}

impl<R> ReaderSource<R>
where
    R: Read + Send + 'static,
{
    pub fn new(reader: R, base: impl Into<String>) -> Self {
        ReaderSource {
            reader,
            base: base.into(),
        }
    }
}

/// Fill `buf` by repeated reads, stopping early only at EOF.
///
/// A short fill is not an error: it is how both a clean EOF and an
/// "unexpected EOF" midway through a chunk are represented to the caller,
/// which treats either as the end of the stream after emitting whatever was
/// read.
pub(super) fn fill_as_much_as_possible<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl<R> BlockSource for ReaderSource<R>
where
    R: Read + Send + 'static,
{
    fn spawn(
        mut self,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<FileBlockData>> {
        let (tx, rx) = mpsc::channel(DEFAULT_SOURCE_BUFFER.max(1));
        tokio::task::spawn_blocking(move || {
            let mut block_id: u64 = 0;
            let mut offset: u64 = 0;
            let mut buf = vec![0u8; chunk_size.max(1)];
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match fill_as_much_as_possible(&mut self.reader, &mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let carrier = FileBlockData::from_bytes(
                            self.base.clone(),
                            block_id,
                            offset,
                            Bytes::copy_from_slice(&buf[..n]),
                        );
                        trace!(block_id, offset, n, "reader source emitted block");
                        if tx.blocking_send(Ok(carrier)).is_err() {
                            return;
                        }
                        offset += n as u64;
                        block_id += 1;
                        if n < buf.len() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "reader source I/O error");
                        let _ = tx.blocking_send(Err(Error::Io(e)));
                        return;
                    }
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn chunks_a_reader_with_short_final_block() {
        let data = vec![0u8; 10];
        let mut rx = ReaderSource::new(Cursor::new(data), "f.bin").spawn(4, CancellationToken::new());
        let mut sizes = Vec::new();
        while let Some(item) = rx.recv().await {
            sizes.push(item.unwrap().size());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn empty_reader_emits_nothing() {
        let mut rx = ReaderSource::new(Cursor::new(Vec::<u8>::new()), "f.bin")
            .spawn(4, CancellationToken::new());
        assert!(rx.recv().await.is_none());
    }
}
