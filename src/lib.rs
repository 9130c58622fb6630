//! # zipstream
//!
//! Streaming ZIP archive encoding and decoding over forward-only byte
//! streams, with no random access and minimal buffering.
//!
//! This library targets two situations the classic central-directory
//! readers cannot handle: parsing an archive while it is still arriving
//! from a network connection or pipe, and producing an archive straight
//! into a sink as its entries are generated.
//!
//! ## Features
//!
//! - Parse archives as a lazy sequence of entries, one local file
//!   header at a time
//! - Write archives entry by entry to any async sink, optionally
//!   without a central directory
//! - ZIP64 throughout: archives and entries beyond 4 GiB work in both
//!   directions
//! - STORED (uncompressed) and DEFLATE compression methods
//! - UNIX-seconds extended timestamps (modify/access/create)
//! - Cooperative cancellation through a [`CancellationToken`]
//!
//! ## Example
//!
//! ```no_run
//! use zipstream::{WriteBody, WriteEntry, ZipEntry, ZipStreamReader, ZipStreamWriter};
//!
//! #[tokio::main]
//! async fn main() -> zipstream::ZipResult<()> {
//!     // Write an archive into memory...
//!     let mut writer = ZipStreamWriter::new(std::io::Cursor::new(Vec::new()));
//!     writer
//!         .write_entry(WriteEntry::file(
//!             "greeting.txt",
//!             WriteBody::stored(&b"hello"[..], 0x3610a686),
//!         ))
//!         .await?;
//!     let archive = writer.finish().await?.into_inner();
//!
//!     // ...and read it back as a stream.
//!     let mut reader = ZipStreamReader::from_reader(std::io::Cursor::new(archive));
//!     while let Some(entry) = reader.next_entry().await? {
//!         if let ZipEntry::File(mut file) = entry {
//!             println!("{}: {:?}", file.name.clone(), file.read_to_end().await?);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod io;
pub mod zip;

pub use error::{ZipError, ZipResult};
pub use io::{ByteSource, ChunkSource, ExactCount, ExactStream, PartialReader, SubStream};
pub use zip::{
    BodyReader, CompressionMethod, DirectoryEntry, ExtendedTimestamps, FileEntry, WriteBody,
    WriteEntry, WriteOptions, ZipEntry, ZipStreamReader, ZipStreamWriter,
};

// Re-export the cancellation primitive so callers don't need their own
// tokio-util dependency.
pub use tokio_util::sync::CancellationToken;
