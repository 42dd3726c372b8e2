use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use crate::ZlibError;

/// Size of the DEFLATE sliding window: the dictionary a checkpoint must
/// capture for back-references across its boundary.
pub const WINDOW_SIZE: usize = 32 * 1024;

/// Builds the checkpoint window blob from the builder's rotating output
/// buffer.
///
/// `buf` is the full 32 KiB buffer and `written` the current write
/// position in it: bytes at `written..` survive from the previous fill and
/// are chronologically the oldest, bytes at `..written` the newest. The
/// rotated concatenation is the most recent 32 KiB of decompressed output,
/// compressed at maximum ratio for storage.
pub fn make_window(buf: &[u8], written: usize) -> Result<Vec<u8>, ZlibError> {
    assert_eq!(buf.len(), WINDOW_SIZE);
    assert!(written <= WINDOW_SIZE);
    let mut window = Vec::with_capacity(WINDOW_SIZE);
    window.extend_from_slice(&buf[written..]);
    window.extend_from_slice(&buf[..written]);
    compress_window(&window)
}

/// Compresses a 32 KiB window at maximum ratio.
pub fn compress_window(window: &[u8]) -> Result<Vec<u8>, ZlibError> {
    assert_eq!(window.len(), WINDOW_SIZE);
    let mut enc = ZlibEncoder::new(Vec::with_capacity(WINDOW_SIZE / 8), Compression::best());
    enc.write_all(window)
        .and_then(|()| enc.finish())
        .map_err(|e| ZlibError::Compress(e.to_string()))
}

/// Inverse of [`compress_window`]. Any result other than exactly 32 KiB is
/// a corruption error.
pub fn decompress_window(blob: &[u8]) -> Result<Vec<u8>, ZlibError> {
    let mut window = Vec::with_capacity(WINDOW_SIZE);
    // The extra byte bounds the allocation while still detecting oversize.
    ZlibDecoder::new(blob)
        .take(WINDOW_SIZE as u64 + 1)
        .read_to_end(&mut window)
        .map_err(|e| ZlibError::Data(e.to_string()))?;
    if window.len() != WINDOW_SIZE {
        return Err(ZlibError::WindowSize {
            got: window.len(),
            expected: WINDOW_SIZE,
        });
    }
    Ok(window)
}
