//! Zlib helpers for block-compressed matrix bodies.

use std::io::{Read, Write};

use crate::{Error, Result};

/// Compress data with zlib at the given level (0–9).
pub fn zlib_compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| Error::Corrupt(format!("compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::Corrupt(format!("compression failed: {e}")))
}

/// Decompress a zlib stream.
pub fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;

    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| Error::Corrupt(format!("decompression failed: {e}")))?;
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_roundtrip() {
        let original = b"sparse matrix block payload for compression tests";
        let compressed = zlib_compress(original, 6).unwrap();
        let decompressed = zlib_decompress(&compressed).unwrap();
        assert_eq!(original.to_vec(), decompressed);
    }

    #[test]
    fn zlib_decompress_garbage() {
        let result = zlib_decompress(b"definitely not a zlib stream");
        assert!(result.is_err());
    }

    #[test]
    fn zlib_empty_payload() {
        let compressed = zlib_compress(b"", 6).unwrap();
        assert_eq!(zlib_decompress(&compressed).unwrap(), Vec::<u8>::new());
    }
}
