// Content-addressed block-processing engine.

use std::io::{Read, Seek};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use zip::ZipArchive;

use crate::block::FileBlockData;
use crate::errors::{Error, Result};

use super::reader::fill_as_much_as_possible;
use super::{normalize_relative_path, BlockSource, DEFAULT_SOURCE_BUFFER};

/// A source that iterates the entries of a ZIP archive, in archive order,
/// skipping directory entries and emitting the rest as chunked blocks.
pub struct ArchiveSource<R> {
    archive: ZipArchive<R>,
}

impl<R> ArchiveSource<R>
where
    R: Read + Seek,
{
    pub fn new(archive: ZipArchive<R>) -> Self {
        ArchiveSource { archive }
    }
}

impl<R> BlockSource for ArchiveSource<R>
where
    R: Read + Seek + Send + 'static,
{
    fn spawn(
        mut self,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<FileBlockData>> {
        let (tx, rx) = mpsc::channel(DEFAULT_SOURCE_BUFFER.max(1));
        tokio::task::spawn_blocking(move || {
            for index in 0..self.archive.len() {
                if cancel.is_cancelled() {
                    return;
                }
                let mut entry = match self.archive.by_index(index) {
                    Ok(e) => e,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(Error::Zip(e)));
                        return;
                    }
                };
                if entry.is_dir() || entry.name().ends_with('/') {
                    continue;
                }
                let logical_path = normalize_relative_path(std::path::Path::new(entry.name()));
                trace!(path = %logical_path, "archive source reading entry");
                let mut block_id: u64 = 0;
                let mut offset: u64 = 0;
                let mut buf = vec![0u8; chunk_size.max(1)];
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    match fill_as_much_as_possible(&mut entry, &mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let carrier = FileBlockData::from_bytes(
                                logical_path.clone(),
                                block_id,
                                offset,
                                Bytes::copy_from_slice(&buf[..n]),
                            );
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
                            warn!(path = %logical_path, error = %e, "archive source I/O error");
                            let _ = tx.blocking_send(Err(Error::Io(e)));
                            return;
                        }
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
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_test_zip() -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut buf);
            let options = SimpleFileOptions::default();
            writer.add_directory("sub/", options).unwrap();
            writer.start_file("sub/x.bin", options).unwrap();
            writer.write_all(&[1u8, 2, 3, 4, 5]).unwrap();
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[tokio::test]
    async fn skips_directory_entries_and_chunks_files() {
        let bytes = build_test_zip();
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut rx = ArchiveSource::new(archive).spawn(4, CancellationToken::new());
        let mut sizes = Vec::new();
        let mut path = String::new();
        while let Some(item) = rx.recv().await {
            let item = item.unwrap();
            path = item.path().to_string();
            sizes.push(item.size());
        }
        assert_eq!(path, "sub/x.bin");
        assert_eq!(sizes, vec![4, 1]);
    }
}
