//! Error types for tagtree.
//!
//! Only faults are errors. A lookup that finds nothing is reported as
//! `None` by the query and mutation APIs, never through [`NbtError`].

use thiserror::Error;

/// Top-level error type for tree parsing, encoding and mutation.
#[derive(Debug, Error)]
pub enum NbtError {
    /// The byte source could not be opened (bad path, unsupported compression marker)
    #[error("Failed to open stream: {0}")]
    StreamOpen(String),

    /// The stream ended in the middle of a node
    #[error("Stream truncated: {0}")]
    StreamTruncated(String),

    /// The stream holds bytes that do not form a valid tree
    #[error("Stream corrupt: {0}")]
    StreamCorrupt(String),

    /// Growing the arena failed
    #[error("Out of memory: arena growth to {requested} bytes failed")]
    OutOfMemory {
        /// Total capacity that was requested
        requested: usize,
    },

    /// The byte sink rejected a write
    #[error("Write failed: {0}")]
    Write(String),

    /// A compressed chunk does not fit in a region entry
    #[error("Chunk too large: {sectors} sectors")]
    ChunkTooLarge {
        /// Number of 4 KiB sectors the chunk would need
        sectors: usize,
    },

    /// A dotted path is malformed (empty component)
    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    /// A name or string does not fit the wire format's 16-bit length
    #[error("Value too long: {what} of {len} bytes (max 65535)")]
    TooLong {
        /// What was being written
        what: String,
        /// Its length in bytes
        len: usize,
    },

    /// A list string item holds a NUL, which separates items in the arena
    #[error("Invalid list string: {0:?}")]
    InvalidString(String),

    /// A builder was finished with containers still open, or closed them out of order
    #[error("Unbalanced builder: {0}")]
    Unbalanced(String),

    /// IO errors outside of stream decoding
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NbtError {
    /// Classifies an IO error raised while pulling bytes out of a decoder.
    ///
    /// An early EOF means the tree was cut short; anything else is reported
    /// by the decompressor and means the compressed data is damaged.
    #[must_use]
    pub fn from_read(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::StreamTruncated(err.to_string()),
            _ => Self::StreamCorrupt(err.to_string()),
        }
    }

    /// Wraps an IO error raised by a byte sink.
    #[must_use]
    pub fn from_write(err: &std::io::Error) -> Self {
        Self::Write(err.to_string())
    }

    /// Returns true if the error was raised while decoding a stream.
    #[must_use]
    pub const fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            Self::StreamOpen(_) | Self::StreamTruncated(_) | Self::StreamCorrupt(_)
        )
    }
}

/// Result type alias for tree operations.
pub type NbtResult<T> = Result<T, NbtError>;

/// Converts a name or string length to its 16-bit wire prefix.
pub fn wire_len(what: &str, len: usize) -> NbtResult<u16> {
    u16::try_from(len).map_err(|_| NbtError::TooLong {
        what: what.to_string(),
        len,
    })
}
