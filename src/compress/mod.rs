// Content-addressed block-processing engine.

//! Zlib (de)compression used by the compress/decompress pipeline stages.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Compress `data` at the given zlib level and return the compressed bytes.
///
/// `level` is clamped into zlib's valid range (0-9) rather than rejected,
/// matching [flate2::Compression::new]'s own behavior.
pub fn compress(data: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress a zlib-compressed buffer in full.
pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
