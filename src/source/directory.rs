// Content-addressed block-processing engine.

use std::fs;
use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use walkdir::WalkDir;

use crate::block::FileBlockData;
use crate::errors::{Error, Result};

use super::reader::fill_as_much_as_possible;
use super::{normalize_relative_path, BlockSource, DEFAULT_SOURCE_BUFFER};

/// A source that walks a directory tree and emits the blocks of every
/// regular file under it, with paths relative to the walked root.
///
/// Directories and symlinks that resolve to a directory are skipped; other
/// entries are opened and chunked like a plain file.
pub struct DirectoryWalkSource {
    root: PathBuf,
}

impl DirectoryWalkSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryWalkSource { root: root.into() }
    }
}

fn is_directory_like(path: &std::path::Path) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

impl BlockSource for DirectoryWalkSource {
    fn spawn(
        self,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<FileBlockData>> {
        let (tx, rx) = mpsc::channel(DEFAULT_SOURCE_BUFFER.max(1));
        tokio::task::spawn_blocking(move || {
            for entry in WalkDir::new(&self.root).into_iter() {
                if cancel.is_cancelled() {
                    return;
                }
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        let io_err: io::Error = e.into();
                        let _ = tx.blocking_send(Err(Error::Io(io_err)));
                        return;
                    }
                };
                let path = entry.path();
                if entry.file_type().is_dir() {
                    continue;
                }
                if entry.file_type().is_symlink() && is_directory_like(path) {
                    continue;
                }
                let relative = match path.strip_prefix(&self.root) {
                    Ok(r) => r,
                    Err(_) => continue,
                };
                let logical_path = normalize_relative_path(relative);
                let file = match fs::File::open(path) {
                    Ok(f) => f,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(Error::Io(e)));
                        return;
                    }
                };
                trace!(path = %logical_path, "directory source opened file");
                if !emit_file_blocks(&tx, file, &logical_path, chunk_size, &cancel) {
                    return;
                }
            }
        });
        rx
    }
}

fn emit_file_blocks(
    tx: &mpsc::Sender<Result<FileBlockData>>,
    mut file: fs::File,
    logical_path: &str,
    chunk_size: usize,
    cancel: &CancellationToken,
) -> bool {
    let mut block_id: u64 = 0;
    let mut offset: u64 = 0;
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        match fill_as_much_as_possible(&mut file, &mut buf) {
            Ok(0) => return true,
            Ok(n) => {
                let carrier = FileBlockData::from_bytes(
                    logical_path.to_string(),
                    block_id,
                    offset,
                    Bytes::copy_from_slice(&buf[..n]),
                );
                if tx.blocking_send(Ok(carrier)).is_err() {
                    return false;
                }
                offset += n as u64;
                block_id += 1;
                if n < buf.len() {
                    return true;
                }
            }
            Err(e) => {
                warn!(path = logical_path, error = %e, "directory source I/O error");
                let _ = tx.blocking_send(Err(Error::Io(e)));
                return false;
            }
        }
    }
}
