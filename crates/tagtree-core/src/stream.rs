//! Decompressing byte source with a small lookahead buffer.
//!
//! Three sources are supported:
//! - a whole gzip file (standalone `level.dat`-style files)
//! - one zlib entry inside a region file, behind a 5-byte prefix
//! - an in-memory zlib block
//!
//! The compression itself is delegated to `flate2`; this module only turns
//! its output into the sequential big-endian reads the decoder needs, and
//! the encoder's big-endian writes into any [`Write`] sink.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Take, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use flate2::read::{GzDecoder, ZlibDecoder};
use tagtree_common::{NbtError, NbtResult};
use tracing::debug;

/// Size of the decompressed lookahead buffer.
pub const SZ_CHUNK: usize = 4096;

/// Compression method byte for zlib in a region entry prefix.
pub const COMPRESSION_ZLIB: u8 = 2;

/// Length of the region entry prefix (u32 length + u8 method).
pub const REGION_PREFIX_LEN: usize = 5;

/// Where the compressed bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Whole gzip file
    Gzip,
    /// Zlib entry at an offset inside a region file
    RegionEntry,
    /// Zlib block held in memory
    Deflated,
}

/// Sequential reader over a decompressed stream.
pub struct TagReader<R> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
    consumed: u64,
    mode: StreamMode,
}

impl<R> std::fmt::Debug for TagReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagReader")
            .field("mode", &self.mode)
            .field("consumed", &self.consumed)
            .field("buffered", &(self.filled - self.pos))
            .finish_non_exhaustive()
    }
}

impl TagReader<GzDecoder<BufReader<File>>> {
    /// Opens a gzip-compressed file.
    pub fn open_gzip<P: AsRef<Path>>(path: P) -> NbtResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| NbtError::StreamOpen(format!("{}: {e}", path.display())))?;
        debug!("Opened gzip stream {}", path.display());
        Self::primed(GzDecoder::new(BufReader::new(file)), StreamMode::Gzip)
    }
}

impl<S: Read + Seek> TagReader<ZlibDecoder<Take<S>>> {
    /// Opens the region entry starting at byte `offset` of `source`.
    ///
    /// The entry starts with a big-endian `u32` length (counting the method
    /// byte) and a compression method byte that must be
    /// [`COMPRESSION_ZLIB`].
    pub fn open_region_entry(mut source: S, offset: u64) -> NbtResult<Self> {
        let open_err = |e: std::io::Error| NbtError::StreamOpen(format!("region entry at {offset}: {e}"));
        source.seek(SeekFrom::Start(offset)).map_err(open_err)?;

        let mut prefix = [0u8; REGION_PREFIX_LEN];
        source.read_exact(&mut prefix).map_err(open_err)?;
        let length = BigEndian::read_u32(&prefix[..4]);
        let method = prefix[4];

        if method != COMPRESSION_ZLIB {
            return Err(NbtError::StreamOpen(format!(
                "unsupported compression method {method} at {offset}"
            )));
        }
        if length <= 1 {
            return Err(NbtError::StreamOpen(format!("empty region entry at {offset}")));
        }

        debug!("Opened region entry at {offset} ({length} bytes)");
        let limited = source.take(u64::from(length - 1));
        Self::primed(ZlibDecoder::new(limited), StreamMode::RegionEntry)
    }
}

impl<'a> TagReader<ZlibDecoder<&'a [u8]>> {
    /// Opens a zlib block held in memory.
    pub fn open_deflated(bytes: &'a [u8]) -> NbtResult<Self> {
        Self::primed(ZlibDecoder::new(bytes), StreamMode::Deflated)
    }
}

impl<R: Read> TagReader<R> {
    /// Wraps an already-decompressed (or otherwise prepared) reader.
    pub fn new(inner: R, mode: StreamMode) -> Self {
        Self {
            inner,
            buf: vec![0; SZ_CHUNK].into_boxed_slice(),
            pos: 0,
            filled: 0,
            consumed: 0,
            mode,
        }
    }

    /// Builds a reader and pulls the first block so a bad header fails at open time.
    fn primed(inner: R, mode: StreamMode) -> NbtResult<Self> {
        let mut reader = Self::new(inner, mode);
        reader
            .refill()
            .map_err(|e| NbtError::StreamOpen(e.to_string()))?;
        Ok(reader)
    }

    /// Source kind of this reader.
    #[must_use]
    pub const fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Decompressed bytes handed out so far.
    #[must_use]
    pub const fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Refills the lookahead buffer. A read of zero bytes means the stream ended.
    fn refill(&mut self) -> NbtResult<()> {
        loop {
            match self.inner.read(&mut self.buf) {
                Ok(0) => {
                    return Err(NbtError::StreamTruncated(format!(
                        "unexpected end of stream after {} bytes",
                        self.consumed
                    )))
                },
                Ok(n) => {
                    self.pos = 0;
                    self.filled = n;
                    return Ok(());
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NbtError::from_read(&e)),
            }
        }
    }

    /// Fills `dst` completely or fails.
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> NbtResult<()> {
        let mut done = 0;
        while done < dst.len() {
            if self.pos == self.filled {
                self.refill()?;
            }
            let n = (self.filled - self.pos).min(dst.len() - done);
            dst[done..done + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            done += n;
        }
        self.consumed += dst.len() as u64;
        Ok(())
    }

    /// Discards `n` bytes.
    pub fn skip(&mut self, mut n: usize) -> NbtResult<()> {
        while n > 0 {
            if self.pos == self.filled {
                self.refill()?;
            }
            let step = (self.filled - self.pos).min(n);
            self.pos += step;
            self.consumed += step as u64;
            n -= step;
        }
        Ok(())
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> NbtResult<u8> {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b)?;
        Ok(b[0])
    }

    /// Reads a big-endian `u16`.
    pub fn read_u16(&mut self) -> NbtResult<u16> {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b)?;
        Ok(BigEndian::read_u16(&b))
    }

    /// Reads a big-endian `u32`.
    pub fn read_u32(&mut self) -> NbtResult<u32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(BigEndian::read_u32(&b))
    }
}

/// Big-endian byte sink counting what it has written.
#[derive(Debug)]
pub struct TagWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> TagWriter<W> {
    /// Wraps a sink.
    pub const fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Returns the wrapped sink.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Writes raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> NbtResult<()> {
        self.inner
            .write_all(bytes)
            .map_err(|e| NbtError::from_write(&e))?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) -> NbtResult<()> {
        self.inner
            .write_u8(value)
            .map_err(|e| NbtError::from_write(&e))?;
        self.written += 1;
        Ok(())
    }

    /// Writes a big-endian `u16`.
    pub fn write_u16(&mut self, value: u16) -> NbtResult<()> {
        self.inner
            .write_u16::<BigEndian>(value)
            .map_err(|e| NbtError::from_write(&e))?;
        self.written += 2;
        Ok(())
    }

    /// Writes a big-endian `u32`.
    pub fn write_u32(&mut self, value: u32) -> NbtResult<()> {
        self.inner
            .write_u32::<BigEndian>(value)
            .map_err(|e| NbtError::from_write(&e))?;
        self.written += 4;
        Ok(())
    }

    /// Writes a big-endian `u64`.
    pub fn write_u64(&mut self, value: u64) -> NbtResult<()> {
        self.inner
            .write_u64::<BigEndian>(value)
            .map_err(|e| NbtError::from_write(&e))?;
        self.written += 8;
        Ok(())
    }
}
