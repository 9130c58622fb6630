//! Error types shared by the reader and writer.

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

/// Failure modes of the streaming ZIP engine.
///
/// Parsing and writing are strict-fail: none of these are recovered
/// internally. Once an operation has returned an error, the archive
/// stream it came from is unusable.
#[derive(Debug, Error)]
pub enum ZipError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// The upstream byte source ended in the middle of a ZIP structure.
    #[error("unexpected end of stream")]
    UnexpectedEnd,

    /// The four bytes where a local file header was expected matched
    /// neither a local file header nor a central directory file header.
    #[error("bad signature {0:#010x}")]
    BadSignature(u32),

    #[error("version needed to extract ({0}) is too new")]
    UnsupportedVersion(u16),

    /// Encryption (bits 0 and 6), data descriptors (bit 3), or patch
    /// entries (bit 5) in the general purpose flag.
    #[error("unsupported general purpose flags {0:#06x}")]
    UnsupportedFlags(u16),

    #[error("unknown compression method {0}")]
    UnknownCompressionMethod(u16),

    #[error("invalid extra field: {0}")]
    InvalidExtraField(&'static str),

    /// Second call to `stream()` or `drain()` on the same entry body.
    #[error("entry body already streamed or drained")]
    BodyAlreadyUsed,

    /// The consumer asked for the next entry without streaming or
    /// draining the previous entry's body.
    #[error("previous entry body was neither streamed nor drained")]
    BodyNotConsumed,

    /// A declared entry size did not match the bytes actually piped.
    #[error("byte count mismatch: declared {expected}, saw {actual}")]
    ByteCountMismatch { expected: u64, actual: u64 },

    /// Entry names must fit the 16-bit length field of the local file
    /// header.
    #[error("filename of {0} bytes does not fit in a ZIP header")]
    FilenameTooLong(usize),

    /// The cancellation token tripped, or an operation was issued on an
    /// already-canceled stream.
    #[error("operation aborted")]
    Aborted,
}
