//! Random-access byte reads and little-endian decoding.
//!
//! [`RandomAccessFile`] serves byte ranges out of a regular file and is safe
//! to share between threads; [`FileCursor`] and [`ByteCursor`] decode
//! fundamental little-endian types and NUL-terminated strings sequentially,
//! from the file and from an in-memory buffer respectively.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::{Error, Result};

/// Read size used by [`FileCursor`] when refilling its internal buffer.
const CURSOR_CHUNK: usize = 64 * 1024;

/// A random-access reader over a regular file.
///
/// All reads are positioned, so multiple threads can pull byte ranges from
/// the same handle concurrently; the internal mutex only serializes the
/// seek+read pair.
#[derive(Debug)]
pub struct RandomAccessFile {
    path: PathBuf,
    file: Mutex<File>,
    len: u64,
}

impl RandomAccessFile {
    /// Open a file for positioned reads.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| io_err(&path, e))?;
        let len = file.metadata().map_err(|e| io_err(&path, e))?.len();
        Ok(Self {
            path,
            file: Mutex::new(file),
            len,
        })
    }

    /// Path this reader was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total file size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Fails with [`Error::Corrupt`] when the range extends past the end of
    /// the file and with [`Error::Io`] on underlying errors.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset + len as u64 > self.len {
            return Err(Error::Corrupt(format!(
                "{}: short read ({} bytes at offset {}, file is {} bytes)",
                self.path.display(),
                len,
                offset,
                self.len
            )));
        }
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| io_err(&self.path, e))?;
        file.read_exact(&mut buf)
            .map_err(|e| io_err(&self.path, e))?;
        Ok(buf)
    }

    /// Sequential little-endian cursor starting at `offset`.
    pub fn stream_at(&self, offset: u64) -> FileCursor<'_> {
        FileCursor {
            src: self,
            offset,
            buf: Vec::new(),
            pos: 0,
        }
    }
}

fn io_err(path: &Path, e: io::Error) -> Error {
    Error::Io(io::Error::new(
        e.kind(),
        format!("{}: {}", path.display(), e),
    ))
}

macro_rules! cursor_readers {
    () => {
        /// Read a single byte.
        pub fn read_u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Read a little-endian `i16`.
        pub fn read_i16(&mut self) -> Result<i16> {
            let b = self.take(2)?;
            Ok(i16::from_le_bytes([b[0], b[1]]))
        }

        /// Read a little-endian `i32`.
        pub fn read_i32(&mut self) -> Result<i32> {
            let b = self.take(4)?;
            Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }

        /// Read a little-endian `i64`.
        pub fn read_i64(&mut self) -> Result<i64> {
            let b = self.take(8)?;
            Ok(i64::from_le_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ]))
        }

        /// Read a little-endian `f32`.
        pub fn read_f32(&mut self) -> Result<f32> {
            let b = self.take(4)?;
            Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }

        /// Read a little-endian `f64`.
        pub fn read_f64(&mut self) -> Result<f64> {
            let b = self.take(8)?;
            Ok(f64::from_le_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ]))
        }

        /// Read a NUL-terminated string.
        pub fn read_cstr(&mut self) -> Result<String> {
            let mut bytes = Vec::new();
            loop {
                let b = self.read_u8()?;
                if b == 0 {
                    break;
                }
                bytes.push(b);
            }
            String::from_utf8(bytes)
                .map_err(|_| Error::Corrupt("invalid UTF-8 in string field".into()))
        }
    };
}

/// Sequential little-endian decoder over a [`RandomAccessFile`].
///
/// Maintains an internal buffer refilled in chunks, so callers can walk a
/// region of unknown length (headers, footers) without knowing its size up
/// front.
pub struct FileCursor<'a> {
    src: &'a RandomAccessFile,
    /// File offset of the next unfetched byte.
    offset: u64,
    buf: Vec<u8>,
    pos: usize,
}

impl FileCursor<'_> {
    /// File offset of the next byte this cursor will decode.
    pub fn position(&self) -> u64 {
        self.offset - (self.buf.len() - self.pos) as u64
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        while self.buf.len() - self.pos < n {
            if self.pos > 0 {
                self.buf.drain(..self.pos);
                self.pos = 0;
            }
            let available = self.src.len().saturating_sub(self.offset);
            if available == 0 {
                return Err(Error::Corrupt(format!(
                    "{}: short read at offset {}",
                    self.src.path().display(),
                    self.position(),
                )));
            }
            let want = CURSOR_CHUNK.max(n).min(available as usize);
            let chunk = self.src.read_at(self.offset, want)?;
            self.offset += chunk.len() as u64;
            self.buf.extend_from_slice(&chunk);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    cursor_readers!();
}

/// Sequential little-endian decoder over an in-memory buffer, used for
/// decompressed block payloads.
pub struct ByteCursor {
    buf: Vec<u8>,
    pos: usize,
}

impl ByteCursor {
    /// Wrap a byte buffer.
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    /// Offset of the next byte to decode.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left in the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Corrupt(format!(
                "short read at offset {} ({} bytes wanted, {} available)",
                self.pos,
                n,
                self.buf.len() - self.pos
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    cursor_readers!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_file(data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn read_at_ranges() {
        let file = write_test_file(b"0123456789");
        let raf = RandomAccessFile::open(file.path()).unwrap();
        assert_eq!(raf.len(), 10);
        assert_eq!(raf.read_at(0, 4).unwrap(), b"0123");
        assert_eq!(raf.read_at(6, 4).unwrap(), b"6789");
        assert!(raf.read_at(8, 4).is_err());
    }

    #[test]
    fn byte_cursor_primitives() {
        let mut data = Vec::new();
        data.extend_from_slice(&42i32.to_le_bytes());
        data.extend_from_slice(&(-7i64).to_le_bytes());
        data.extend_from_slice(&1.5f32.to_le_bytes());
        data.extend_from_slice(b"hg38\0");
        data.push(0xAB);

        let mut cur = ByteCursor::new(data);
        assert_eq!(cur.read_i32().unwrap(), 42);
        assert_eq!(cur.read_i64().unwrap(), -7);
        assert_eq!(cur.read_f32().unwrap(), 1.5);
        assert_eq!(cur.read_cstr().unwrap(), "hg38");
        assert_eq!(cur.read_u8().unwrap(), 0xAB);
        assert_eq!(cur.remaining(), 0);
        assert!(cur.read_u8().is_err());
    }

    #[test]
    fn file_cursor_walks_across_refills() {
        // Larger than one refill chunk to exercise the drain+extend path.
        let n = 100_000u32;
        let mut data = Vec::with_capacity(n as usize * 4);
        for i in 0..n {
            data.extend_from_slice(&(i as i32).to_le_bytes());
        }
        let file = write_test_file(&data);
        let raf = RandomAccessFile::open(file.path()).unwrap();

        let mut cur = raf.stream_at(0);
        for i in 0..n {
            assert_eq!(cur.read_i32().unwrap(), i as i32);
        }
        assert!(cur.read_u8().is_err());
    }

    #[test]
    fn file_cursor_from_offset() {
        let file = write_test_file(b"skipme\x07\x00\x00\x00");
        let raf = RandomAccessFile::open(file.path()).unwrap();
        let mut cur = raf.stream_at(6);
        assert_eq!(cur.read_i32().unwrap(), 7);
    }

    #[test]
    fn file_cursor_position_tracks_consumption() {
        let file = write_test_file(&[1u8; 64]);
        let raf = RandomAccessFile::open(file.path()).unwrap();
        let mut cur = raf.stream_at(8);
        assert_eq!(cur.position(), 8);
        cur.read_i32().unwrap();
        assert_eq!(cur.position(), 12);
    }
}
