//! Streaming ZIP archive writing.
//!
//! Entries are written in the order they arrive, each as a local file
//! header followed by its body; nothing is buffered beyond the entry
//! currently being piped. ZIP64 is always enabled: the 32-bit header
//! fields carry sentinels and the real sizes travel in the extra field,
//! so sizes never constrain the archive. The writer never compresses:
//! callers hand over either raw bytes or pre-deflated bytes together
//! with the sizes and CRC-32.

use log::{debug, trace};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::extra::{encode_extra_fields, ExtendedTimestamps};
use super::structures::{
    CentralFileHeader, EndOfCentralDirectory, LocalFileHeader, Zip64EndOfCentralDirectory,
    Zip64EocdLocator, ZIP64_SIZE_SENTINEL, ZIP64_VERSION,
};
use crate::error::{ZipError, ZipResult};
use crate::io::{ChunkSource, ExactStream};

/// The body of a file entry to be written.
///
/// Sizes are declared up front and enforced while the body is piped; a
/// mismatch fails the write with [`ZipError::ByteCountMismatch`] instead
/// of corrupting the archive.
pub enum WriteBody {
    /// Uncompressed content, stored as-is (method 0).
    Stored {
        size: u64,
        crc32: u32,
        data: Box<dyn ChunkSource>,
    },
    /// Content already run through raw DEFLATE (method 8). `crc32` and
    /// `original_size` describe the uncompressed content.
    Deflated {
        original_size: u64,
        compressed_size: u64,
        crc32: u32,
        data: Box<dyn ChunkSource>,
    },
}

impl WriteBody {
    /// Store an in-memory buffer; the size is taken from its length.
    pub fn stored(data: impl Into<bytes::Bytes>, crc32: u32) -> Self {
        let data = data.into();
        WriteBody::Stored {
            size: data.len() as u64,
            crc32,
            data: Box::new(std::collections::VecDeque::from([data])),
        }
    }

    /// Write an in-memory pre-deflated buffer; the compressed size is
    /// taken from its length.
    pub fn deflated(data: impl Into<bytes::Bytes>, original_size: u64, crc32: u32) -> Self {
        let data = data.into();
        WriteBody::Deflated {
            original_size,
            compressed_size: data.len() as u64,
            crc32,
            data: Box::new(std::collections::VecDeque::from([data])),
        }
    }
}

/// One entry to be written to the archive.
pub enum WriteEntry {
    File {
        name: String,
        timestamps: Option<ExtendedTimestamps>,
        body: WriteBody,
    },
    /// Directory names must end with `/` by ZIP convention; this is the
    /// caller's responsibility.
    Directory {
        name: String,
        timestamps: Option<ExtendedTimestamps>,
    },
}

impl WriteEntry {
    pub fn file(name: impl Into<String>, body: WriteBody) -> Self {
        WriteEntry::File {
            name: name.into(),
            timestamps: None,
            body,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        WriteEntry::Directory {
            name: name.into(),
            timestamps: None,
        }
    }

    pub fn with_timestamps(mut self, ts: ExtendedTimestamps) -> Self {
        match &mut self {
            WriteEntry::File { timestamps, .. } | WriteEntry::Directory { timestamps, .. } => {
                *timestamps = Some(ts)
            }
        }
        self
    }
}

/// Options for [`ZipStreamWriter`].
#[derive(Default)]
pub struct WriteOptions {
    /// Emit only local file headers and bodies. The result is still
    /// decodable by the streaming reader, but not by random-access
    /// decoders that start from the central directory.
    pub omit_central_directory: bool,
    /// Abort signal, checked before every write.
    pub cancel: Option<CancellationToken>,
}

/// Streaming ZIP writer over any [`AsyncWrite`] sink.
///
/// ```no_run
/// use zipstream::{WriteBody, WriteEntry, ZipStreamWriter};
///
/// # async fn example(sink: impl tokio::io::AsyncWrite + Unpin) -> zipstream::ZipResult<()> {
/// let mut writer = ZipStreamWriter::new(sink);
/// writer
///     .write_entry(WriteEntry::file("hello.txt", WriteBody::stored(&b"hi"[..], 0x9e83486d)))
///     .await?;
/// writer.finish().await?;
/// # Ok(())
/// # }
/// ```
pub struct ZipStreamWriter<W> {
    sink: W,
    cancel: CancellationToken,
    omit_central_directory: bool,
    /// Bytes written so far; the next entry's local-header offset.
    offset: u64,
    /// Deferred central-directory records, rendered at finish time.
    central: Vec<CentralRecord>,
    entries_written: u64,
}

struct CentralRecord {
    name: String,
    timestamps: Option<ExtendedTimestamps>,
    method: u16,
    crc32: u32,
    original_size: u64,
    compressed_size: u64,
    header_offset: u64,
}

impl CentralRecord {
    fn to_bytes(&self) -> Vec<u8> {
        let extra = encode_extra_fields(
            self.original_size,
            self.compressed_size,
            Some(self.header_offset),
            self.timestamps.as_ref(),
        );
        let header = CentralFileHeader {
            method: self.method,
            crc32: self.crc32,
            name_len: self.name.len() as u16,
            extra_len: extra.len() as u16,
        };
        let mut buf = header.to_bytes();
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(&extra);
        buf
    }
}

impl<W: AsyncWrite + Unpin> ZipStreamWriter<W> {
    pub fn new(sink: W) -> Self {
        Self::with_options(sink, WriteOptions::default())
    }

    pub fn with_options(sink: W, options: WriteOptions) -> Self {
        ZipStreamWriter {
            sink,
            cancel: options.cancel.unwrap_or_default(),
            omit_central_directory: options.omit_central_directory,
            offset: 0,
            central: Vec::new(),
            entries_written: 0,
        }
    }

    /// Write one entry: its local file header, then its body piped
    /// through a byte-count assertion.
    pub async fn write_entry(&mut self, entry: WriteEntry) -> ZipResult<()> {
        match entry {
            WriteEntry::Directory { name, timestamps } => {
                debug!("writing directory {name:?}");
                self.begin_entry(name, timestamps, 0, 0, 0, 0).await?;
            }
            WriteEntry::File {
                name,
                timestamps,
                body,
            } => match body {
                WriteBody::Stored { size, crc32, data } => {
                    debug!("writing {name:?}, {size} bytes stored");
                    self.begin_entry(name, timestamps, 0, crc32, size, size)
                        .await?;
                    self.pipe_body(data, size).await?;
                }
                WriteBody::Deflated {
                    original_size,
                    compressed_size,
                    crc32,
                    data,
                } => {
                    debug!("writing {name:?}, {original_size} bytes deflated to {compressed_size}");
                    self.begin_entry(name, timestamps, 8, crc32, original_size, compressed_size)
                        .await?;
                    self.pipe_body(data, compressed_size).await?;
                }
            },
        }
        self.entries_written += 1;
        Ok(())
    }

    /// Write the trailing records (unless the central directory was
    /// omitted), flush, and hand the sink back.
    pub async fn finish(mut self) -> ZipResult<W> {
        if self.omit_central_directory {
            self.check_cancel()?;
        } else {
            let cd_offset = self.offset;
            let central = std::mem::take(&mut self.central);
            for record in &central {
                self.write_all(&record.to_bytes()).await?;
            }
            let cd_size = self.offset - cd_offset;
            let eocd64_offset = self.offset;
            trace!(
                "central directory: {} entries, {cd_size} bytes at offset {cd_offset}",
                self.entries_written
            );

            self.write_all(
                &Zip64EndOfCentralDirectory {
                    total_entries: self.entries_written,
                    cd_size,
                    cd_offset,
                }
                .to_bytes(),
            )
            .await?;
            self.write_all(&Zip64EocdLocator { eocd64_offset }.to_bytes())
                .await?;
            self.write_all(&EndOfCentralDirectory.to_bytes()).await?;
        }

        self.sink.shutdown().await?;
        Ok(self.sink)
    }

    async fn begin_entry(
        &mut self,
        name: String,
        timestamps: Option<ExtendedTimestamps>,
        method: u16,
        crc32: u32,
        original_size: u64,
        compressed_size: u64,
    ) -> ZipResult<()> {
        let name_len =
            u16::try_from(name.len()).map_err(|_| ZipError::FilenameTooLong(name.len()))?;

        // Real sizes go in the extra field only; the header always
        // carries the ZIP64 sentinels.
        let extra = encode_extra_fields(original_size, compressed_size, None, timestamps.as_ref());
        let header = LocalFileHeader {
            version_needed: ZIP64_VERSION,
            flags: 0,
            method,
            crc32,
            compressed_size: ZIP64_SIZE_SENTINEL,
            uncompressed_size: ZIP64_SIZE_SENTINEL,
            name_len,
            extra_len: extra.len() as u16,
        };

        let header_offset = self.offset;
        self.write_all(&header.to_bytes()).await?;
        self.write_all(name.as_bytes()).await?;
        self.write_all(&extra).await?;

        if !self.omit_central_directory {
            self.central.push(CentralRecord {
                name,
                timestamps,
                method,
                crc32,
                original_size,
                compressed_size,
                header_offset,
            });
        }
        Ok(())
    }

    async fn pipe_body(&mut self, data: Box<dyn ChunkSource>, declared: u64) -> ZipResult<()> {
        let mut data = ExactStream::new(data, declared);
        while let Some(chunk) = data.next_chunk().await? {
            self.write_all(&chunk).await?;
        }
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> ZipResult<()> {
        self.check_cancel()?;
        self.sink.write_all(bytes).await?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    fn check_cancel(&self) -> ZipResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ZipError::Aborted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    async fn collect<F>(build: F) -> Vec<u8>
    where
        F: std::future::Future<Output = ZipResult<Cursor<Vec<u8>>>>,
    {
        build.await.unwrap().into_inner()
    }

    #[tokio::test]
    async fn too_long_names_are_refused() {
        let mut writer = ZipStreamWriter::new(Cursor::new(Vec::new()));
        let name = "x".repeat(1 << 16);
        match writer
            .write_entry(WriteEntry::file(name, WriteBody::stored(&b""[..], 0)))
            .await
        {
            Err(ZipError::FilenameTooLong(len)) => assert_eq!(len, 1 << 16),
            other => panic!("expected FilenameTooLong, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn declared_size_is_enforced() {
        let mut writer = ZipStreamWriter::new(Cursor::new(Vec::new()));
        let body = WriteBody::Stored {
            size: 10,
            crc32: 0,
            data: Box::new(std::collections::VecDeque::from([bytes::Bytes::from_static(
                b"short",
            )])),
        };
        match writer.write_entry(WriteEntry::file("a.txt", body)).await {
            Err(ZipError::ByteCountMismatch {
                expected: 10,
                actual: 5,
            }) => {}
            other => panic!("expected ByteCountMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn omitting_the_central_directory_leaves_only_entries() {
        let archive = collect(async {
            let mut writer = ZipStreamWriter::with_options(
                Cursor::new(Vec::new()),
                WriteOptions {
                    omit_central_directory: true,
                    cancel: None,
                },
            );
            writer
                .write_entry(WriteEntry::file("a.txt", WriteBody::stored(&b"alpha"[..], 0)))
                .await?;
            writer.finish().await
        })
        .await;

        let cdfh = [0x50, 0x4b, 0x01, 0x02];
        assert!(!archive.windows(4).any(|w| w == &cdfh[..]));
        // Local header, name, zip64 extra, body.
        assert_eq!(archive.len(), 30 + 5 + 20 + 5);
    }

    #[tokio::test]
    async fn trailing_records_follow_the_central_directory() {
        let archive = collect(async {
            let mut writer = ZipStreamWriter::new(Cursor::new(Vec::new()));
            writer
                .write_entry(WriteEntry::file("a.txt", WriteBody::stored(&b"alpha"[..], 0)))
                .await?;
            writer.finish().await
        })
        .await;

        let local_len = 30 + 5 + 20 + 5;
        let central_len = 46 + 5 + 28;
        assert_eq!(archive.len(), local_len + central_len + 56 + 20 + 22);

        // Central directory directly after the body.
        assert_eq!(&archive[local_len..local_len + 4], &[0x50, 0x4b, 0x01, 0x02]);

        // ZIP64 EOCD carries the central directory's offset and size.
        let eocd64 = &archive[local_len + central_len..];
        assert_eq!(&eocd64[..4], &[0x50, 0x4b, 0x06, 0x06]);
        assert_eq!(
            u64::from_le_bytes(eocd64[40..48].try_into().unwrap()),
            central_len as u64
        );
        assert_eq!(
            u64::from_le_bytes(eocd64[48..56].try_into().unwrap()),
            local_len as u64
        );

        // The locator points at the ZIP64 EOCD.
        let locator = &eocd64[56..];
        assert_eq!(&locator[..4], &[0x50, 0x4b, 0x06, 0x07]);
        assert_eq!(
            u64::from_le_bytes(locator[8..16].try_into().unwrap()),
            (local_len + central_len) as u64
        );

        // Plain EOCD last, sentinel-filled.
        let eocd = &locator[20..];
        assert_eq!(&eocd[..4], &[0x50, 0x4b, 0x05, 0x06]);
        assert_eq!(&eocd[8..10], &[0xff, 0xff]);
    }

    #[tokio::test]
    async fn tripped_token_stops_the_writer() {
        let token = CancellationToken::new();
        let mut writer = ZipStreamWriter::with_options(
            Cursor::new(Vec::new()),
            WriteOptions {
                omit_central_directory: false,
                cancel: Some(token.clone()),
            },
        );
        token.cancel();

        match writer
            .write_entry(WriteEntry::file("a.txt", WriteBody::stored(&b"x"[..], 0)))
            .await
        {
            Err(ZipError::Aborted) => {}
            other => panic!("expected Aborted, got {other:?}"),
        }
    }
}
