//! Streaming ZIP archive parsing.
//!
//! The reader walks local file headers in archive order, yielding one
//! entry at a time. Because the source cannot seek, each entry's body
//! must be fully streamed or drained before the next entry can be
//! parsed; the reader enforces this and fails with
//! [`ZipError::BodyNotConsumed`] when a consumer skips ahead.

use bytes::Bytes;
use log::{debug, trace};
use tokio_util::sync::CancellationToken;

use super::extra::{parse_extra_fields, ExtendedTimestamps};
use super::inflate::DeflateRawInflater;
use super::structures::{
    CompressionMethod, LocalFileHeader, CENTRAL_DIRECTORY_HEADER_SIGNATURE,
    LOCAL_FILE_HEADER_SIGNATURE, ZIP64_VERSION,
};
use crate::error::{ZipError, ZipResult};
use crate::io::{ByteSource, ChunkSource, ExactCount, PartialReader, SubStream};
use tokio::io::AsyncRead;

/// General purpose flag bits the reader refuses: encryption (bits 0 and
/// 6), data descriptors (bit 3), patch data (bit 5).
const UNSUPPORTED_FLAGS: u16 = (1 << 0) | (1 << 3) | (1 << 5) | (1 << 6);

/// Streaming ZIP reader over a forward-only byte source.
///
/// ```no_run
/// use zipstream::{ZipEntry, ZipStreamReader};
///
/// # async fn example(source: impl tokio::io::AsyncRead + Send + Unpin + 'static) -> zipstream::ZipResult<()> {
/// let mut reader = ZipStreamReader::from_reader(source);
/// while let Some(entry) = reader.next_entry().await? {
///     match entry {
///         ZipEntry::File(mut file) => {
///             println!("{}: {} bytes", file.name, file.original_size);
///             file.drain().await?;
///         }
///         ZipEntry::Directory(dir) => println!("{}/", dir.name),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct ZipStreamReader {
    core: ReaderCore,
    /// A file entry has been yielded whose body discipline has not yet
    /// been checked.
    awaiting_body: bool,
    state: State,
}

struct ReaderCore {
    partial: PartialReader,
    cancel: CancellationToken,
    /// Whether the outstanding entry's body was streamed or drained.
    body_taken: bool,
}

enum State {
    Parsing,
    Finished,
    Failed,
}

/// Fields of one parsed local header, before the body handle is built.
struct ParsedEntry {
    name: String,
    timestamps: Option<ExtendedTimestamps>,
    original_size: u64,
    compressed_size: u64,
    crc32: u32,
    method: u16,
    is_directory: bool,
}

impl ZipStreamReader {
    /// Parse an archive from an upstream byte source. Construction is
    /// lazy; nothing is read until the first entry is requested.
    pub fn new(source: ByteSource) -> Self {
        Self::from_partial(PartialReader::from_source(source))
    }

    pub fn from_chunks<S: ChunkSource + 'static>(source: S) -> Self {
        Self::new(ByteSource::from_chunks(source))
    }

    pub fn from_reader<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        Self::new(ByteSource::from_reader(reader))
    }

    /// Parse an archive from an existing partial reader, picking up at
    /// its current position.
    pub fn from_partial(partial: PartialReader) -> Self {
        ZipStreamReader {
            core: ReaderCore {
                partial,
                cancel: CancellationToken::new(),
                body_taken: false,
            },
            awaiting_body: false,
            state: State::Parsing,
        }
    }

    /// Wire an abort signal into the parse loop. Once the token trips,
    /// every operation fails with [`ZipError::Aborted`], including one
    /// that would otherwise have observed a clean end of archive, so a
    /// truncated source is never mistaken for a complete one.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.core.cancel = token;
        self
    }

    /// Parse the next entry.
    ///
    /// `Ok(None)` is the clean end of the archive: either the central
    /// directory was reached or the source ended on an entry boundary.
    /// The previous entry's body must have been streamed or drained
    /// before this is called again.
    pub async fn next_entry(&mut self) -> ZipResult<Option<ZipEntry<'_>>> {
        match self.state {
            State::Parsing => {}
            State::Finished => return Ok(None),
            State::Failed => return Err(ZipError::Aborted),
        }

        let parsed = match self.parse_header().await {
            Ok(parsed) => parsed,
            Err(err) => {
                self.state = State::Failed;
                self.core.partial.cancel();
                return Err(err);
            }
        };

        let Some(entry) = parsed else {
            self.state = State::Finished;
            // Success releases the upstream handle too.
            self.core.partial.cancel();
            if self.core.cancel.is_cancelled() {
                self.state = State::Failed;
                return Err(ZipError::Aborted);
            }
            return Ok(None);
        };

        if entry.is_directory {
            return Ok(Some(ZipEntry::Directory(DirectoryEntry {
                name: entry.name,
                timestamps: entry.timestamps,
            })));
        }

        self.awaiting_body = true;
        self.core.body_taken = false;
        Ok(Some(ZipEntry::File(FileEntry {
            name: entry.name,
            timestamps: entry.timestamps,
            original_size: entry.original_size,
            compressed_size: entry.compressed_size,
            crc32: entry.crc32,
            method: CompressionMethod::from_u16(entry.method),
            body: EntryBody {
                core: &mut self.core,
                compressed_size: entry.compressed_size,
                original_size: entry.original_size,
                crc32: entry.crc32,
                method: entry.method,
                used: false,
            },
        })))
    }

    async fn parse_header(&mut self) -> ZipResult<Option<ParsedEntry>> {
        if self.core.cancel.is_cancelled() {
            return Err(ZipError::Aborted);
        }
        if self.awaiting_body {
            if !self.core.body_taken {
                return Err(ZipError::BodyNotConsumed);
            }
            // Anything a partially-read body left behind is skipped by
            // the partial reader before the next read below.
            self.awaiting_body = false;
        }

        let block = self.core.partial.read_amount(LocalFileHeader::SIZE).await?;
        if block.is_empty() {
            trace!("source ended on an entry boundary");
            return Ok(None);
        }
        if block.len() < LocalFileHeader::SIZE {
            return Err(ZipError::UnexpectedEnd);
        }

        let signature = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        match signature {
            LOCAL_FILE_HEADER_SIGNATURE => {}
            CENTRAL_DIRECTORY_HEADER_SIGNATURE => {
                trace!("central directory reached");
                return Ok(None);
            }
            other => return Err(ZipError::BadSignature(other)),
        }

        let header = LocalFileHeader::from_bytes(&block[4..])?;
        if header.version_needed > ZIP64_VERSION {
            return Err(ZipError::UnsupportedVersion(header.version_needed));
        }
        if header.flags & UNSUPPORTED_FLAGS != 0 {
            return Err(ZipError::UnsupportedFlags(header.flags));
        }

        let name_bytes = self
            .core
            .partial
            .read_amount_strict(header.name_len as usize)
            .await?;
        let name = String::from_utf8_lossy(&name_bytes).into_owned();

        let extra_bytes = self
            .core
            .partial
            .read_amount_strict(header.extra_len as usize)
            .await?;
        let extra = parse_extra_fields(&extra_bytes)?;

        // ZIP64 sizes take precedence over the 32-bit header fields.
        let (original_size, compressed_size) = match extra.zip64 {
            Some(zip64) => (zip64.original_size, zip64.compressed_size),
            None => (
                header.uncompressed_size as u64,
                header.compressed_size as u64,
            ),
        };

        let is_directory = name.ends_with('/');
        if is_directory {
            // Directory bodies are normally empty; drain whatever was
            // declared so the loop stays aligned.
            self.core.partial.skip_amount(compressed_size).await?;
        }

        debug!(
            "entry {:?}: method {}, {} bytes on the wire",
            name, header.method, compressed_size
        );

        Ok(Some(ParsedEntry {
            name,
            timestamps: extra.timestamps,
            original_size,
            compressed_size,
            crc32: header.crc32,
            method: header.method,
            is_directory,
        }))
    }
}

/// One archive entry, in archive order.
pub enum ZipEntry<'a> {
    File(FileEntry<'a>),
    Directory(DirectoryEntry),
}

/// A directory entry; its name ends with `/` and it carries no body.
pub struct DirectoryEntry {
    pub name: String,
    pub timestamps: Option<ExtendedTimestamps>,
}

/// A file entry and its body handle.
///
/// Exactly one of [`stream`] or [`drain`] must be called before the
/// reader's next entry is requested; a second call on either fails with
/// [`ZipError::BodyAlreadyUsed`].
///
/// [`stream`]: FileEntry::stream
/// [`drain`]: FileEntry::drain
pub struct FileEntry<'a> {
    pub name: String,
    pub timestamps: Option<ExtendedTimestamps>,
    /// Uncompressed byte count.
    pub original_size: u64,
    /// On-the-wire byte count.
    pub compressed_size: u64,
    /// CRC-32 of the uncompressed content, as declared by the header.
    pub crc32: u32,
    pub method: CompressionMethod,
    body: EntryBody<'a>,
}

impl FileEntry<'_> {
    /// Open the decoded body as a pull-driven byte stream.
    pub async fn stream(&mut self) -> ZipResult<BodyReader<'_>> {
        self.body.stream().await
    }

    /// Discard the body without decoding it, advancing the parse.
    pub async fn drain(&mut self) -> ZipResult<()> {
        self.body.drain().await
    }

    /// Stream the whole decoded body into memory.
    pub async fn read_to_end(&mut self) -> ZipResult<Vec<u8>> {
        let mut body = self.stream().await?;
        let mut out = Vec::new();
        while let Some(chunk) = body.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

struct EntryBody<'a> {
    core: &'a mut ReaderCore,
    compressed_size: u64,
    original_size: u64,
    crc32: u32,
    method: u16,
    used: bool,
}

impl EntryBody<'_> {
    async fn stream(&mut self) -> ZipResult<BodyReader<'_>> {
        if self.used {
            return Err(ZipError::BodyAlreadyUsed);
        }
        let inflater = match CompressionMethod::from_u16(self.method) {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflate => {
                Some(DeflateRawInflater::new(self.crc32, self.original_size))
            }
            CompressionMethod::Unknown(method) => {
                return Err(ZipError::UnknownCompressionMethod(method))
            }
        };
        self.used = true;
        self.core.body_taken = true;

        let cancel = self.core.cancel.clone();
        let count = ExactCount::new(self.compressed_size);
        let sub = self.core.partial.stream_amount(self.compressed_size).await?;
        Ok(BodyReader {
            sub,
            cancel,
            count,
            inflater,
            finished: false,
        })
    }

    async fn drain(&mut self) -> ZipResult<()> {
        if self.used {
            return Err(ZipError::BodyAlreadyUsed);
        }
        self.used = true;
        self.core.body_taken = true;
        if let Err(err) = self.core.partial.skip_amount(self.compressed_size).await {
            self.core.partial.cancel();
            return Err(err);
        }
        Ok(())
    }
}

/// Pull-driven stream of one entry's decoded body.
///
/// Dropping it mid-body is equivalent to canceling: the unread
/// compressed bytes are skipped before the reader's next entry, so the
/// parse stays aligned.
pub struct BodyReader<'a> {
    sub: SubStream<'a>,
    cancel: CancellationToken,
    count: ExactCount,
    inflater: Option<DeflateRawInflater>,
    finished: bool,
}

impl BodyReader<'_> {
    /// Pull the next decoded chunk; `None` when the body is complete.
    ///
    /// A source that ends before the declared compressed size fails
    /// with [`ZipError::ByteCountMismatch`].
    pub async fn next_chunk(&mut self) -> ZipResult<Option<Bytes>> {
        match self.next_chunk_inner().await {
            Ok(chunk) => Ok(chunk),
            Err(err) => {
                // The body is unrecoverable; take the whole parse down
                // with it rather than resuming mid-entry.
                self.finished = true;
                self.sub.fail();
                Err(err)
            }
        }
    }

    async fn next_chunk_inner(&mut self) -> ZipResult<Option<Bytes>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if self.cancel.is_cancelled() {
                return Err(ZipError::Aborted);
            }
            match self.sub.next_chunk().await? {
                Some(chunk) => {
                    self.count.push(chunk.len())?;
                    let decoded = match &mut self.inflater {
                        Some(inflater) => inflater.push(&chunk)?,
                        None => chunk,
                    };
                    if !decoded.is_empty() {
                        return Ok(Some(decoded));
                    }
                    // Deflate may need more input before producing any
                    // output; keep pulling.
                }
                None => {
                    self.finished = true;
                    self.count.finish()?;
                    let tail = match &mut self.inflater {
                        Some(inflater) => inflater.finish()?,
                        None => Bytes::new(),
                    };
                    return Ok(if tail.is_empty() { None } else { Some(tail) });
                }
            }
        }
    }

    /// Stop reading and skip the rest of the body now, so the reader can
    /// move on to the next entry.
    pub async fn cancel(&mut self) -> ZipResult<()> {
        self.finished = true;
        self.sub.cancel().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use std::collections::VecDeque;

    fn stored_entry(name: &str, flags: u16, method: u16, data: &[u8]) -> Vec<u8> {
        let header = LocalFileHeader {
            version_needed: 20,
            flags,
            method,
            crc32: 0,
            compressed_size: data.len() as u32,
            uncompressed_size: data.len() as u32,
            name_len: name.len() as u16,
            extra_len: 0,
        };
        let mut buf = header.to_bytes();
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(data);
        buf
    }

    fn reader_over(bytes: Vec<u8>) -> ZipStreamReader {
        ZipStreamReader::from_chunks(VecDeque::from([Bytes::from(bytes)]))
    }

    fn central_directory_start() -> Vec<u8> {
        let mut buf = CENTRAL_DIRECTORY_HEADER_SIGNATURE.to_le_bytes().to_vec();
        buf.resize(LocalFileHeader::SIZE, 0);
        buf
    }

    #[tokio::test]
    async fn parses_entries_and_stops_at_central_directory() {
        let mut archive = stored_entry("a.txt", 0, 0, b"alpha");
        archive.extend_from_slice(&stored_entry("b.txt", 0, 0, b"beta"));
        archive.extend_from_slice(&central_directory_start());

        let mut reader = reader_over(archive);

        let Some(ZipEntry::File(mut file)) = reader.next_entry().await.unwrap() else {
            panic!("expected a file entry");
        };
        assert_eq!(file.name, "a.txt");
        assert_eq!(file.original_size, 5);
        assert_eq!(file.read_to_end().await.unwrap(), b"alpha");
        drop(file);

        let Some(ZipEntry::File(mut file)) = reader.next_entry().await.unwrap() else {
            panic!("expected a file entry");
        };
        assert_eq!(file.read_to_end().await.unwrap(), b"beta");
        drop(file);

        assert!(reader.next_entry().await.unwrap().is_none());
        // The reader stays finished.
        assert!(reader.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn data_descriptor_flag_is_refused() {
        let archive = stored_entry("streamed.bin", 1 << 3, 0, b"");
        let mut reader = reader_over(archive);

        match reader.next_entry().await {
            Err(ZipError::UnsupportedFlags(flags)) => assert_eq!(flags, 1 << 3),
            other => panic!("expected UnsupportedFlags, got {other:?}", other = other.err()),
        }
    }

    #[tokio::test]
    async fn encrypted_entries_are_refused() {
        let archive = stored_entry("secret.bin", 1, 0, b"");
        let mut reader = reader_over(archive);
        assert!(matches!(
            reader.next_entry().await,
            Err(ZipError::UnsupportedFlags(_))
        ));
    }

    #[tokio::test]
    async fn garbage_signature_is_refused() {
        let mut reader = reader_over(vec![0x42; 64]);
        assert!(matches!(
            reader.next_entry().await,
            Err(ZipError::BadSignature(_))
        ));
    }

    #[tokio::test]
    async fn too_new_version_is_refused() {
        let mut archive = stored_entry("future.bin", 0, 0, b"");
        archive[4] = 46; // version needed
        let mut reader = reader_over(archive);
        assert!(matches!(
            reader.next_entry().await,
            Err(ZipError::UnsupportedVersion(46))
        ));
    }

    #[tokio::test]
    async fn short_header_is_unexpected_end() {
        let archive = stored_entry("a.txt", 0, 0, b"alpha");
        let mut reader = reader_over(archive[..20].to_vec());
        assert!(matches!(
            reader.next_entry().await,
            Err(ZipError::UnexpectedEnd)
        ));
    }

    #[tokio::test]
    async fn unconsumed_body_fails_the_next_entry() {
        let mut archive = stored_entry("a.txt", 0, 0, b"alpha");
        archive.extend_from_slice(&stored_entry("b.txt", 0, 0, b"beta"));
        let mut reader = reader_over(archive);

        let entry = reader.next_entry().await.unwrap();
        drop(entry); // neither streamed nor drained

        assert!(matches!(
            reader.next_entry().await,
            Err(ZipError::BodyNotConsumed)
        ));
    }

    #[tokio::test]
    async fn body_can_only_be_used_once() {
        let archive = stored_entry("a.txt", 0, 0, b"alpha");
        let mut reader = reader_over(archive);

        let Some(ZipEntry::File(mut file)) = reader.next_entry().await.unwrap() else {
            panic!("expected a file entry");
        };
        file.drain().await.unwrap();
        assert!(matches!(file.stream().await, Err(ZipError::BodyAlreadyUsed)));
        assert!(matches!(file.drain().await, Err(ZipError::BodyAlreadyUsed)));
    }

    #[tokio::test]
    async fn partially_read_body_is_skipped_before_the_next_entry() {
        let mut archive = stored_entry("a.txt", 0, 0, &[7u8; 4096]);
        archive.extend_from_slice(&stored_entry("b.txt", 0, 0, b"beta"));
        // Small upstream chunks, so one pull leaves most of the body
        // undelivered.
        let chunks: VecDeque<Bytes> = archive
            .chunks(64)
            .map(Bytes::copy_from_slice)
            .collect();
        let mut reader = ZipStreamReader::from_chunks(chunks);

        let Some(ZipEntry::File(mut file)) = reader.next_entry().await.unwrap() else {
            panic!("expected a file entry");
        };
        let mut body = file.stream().await.unwrap();
        let _ = body.next_chunk().await.unwrap();
        drop(body);
        drop(file);

        let Some(ZipEntry::File(mut file)) = reader.next_entry().await.unwrap() else {
            panic!("expected a file entry");
        };
        assert_eq!(file.name, "b.txt");
        assert_eq!(file.read_to_end().await.unwrap(), b"beta");
    }

    #[tokio::test]
    async fn truncated_body_fails_the_pipe() {
        let archive = stored_entry("a.txt", 0, 0, b"alpha");
        let mut reader = reader_over(archive[..archive.len() - 2].to_vec());

        let Some(ZipEntry::File(mut file)) = reader.next_entry().await.unwrap() else {
            panic!("expected a file entry");
        };
        match file.read_to_end().await {
            Err(ZipError::ByteCountMismatch {
                expected: 5,
                actual: 3,
            }) => {}
            other => panic!("expected ByteCountMismatch, got {other:?}", other = other.err()),
        }
    }

    #[tokio::test]
    async fn unknown_method_fails_only_the_stream() {
        let archive = stored_entry("odd.bin", 0, 3, b"xx");
        let mut reader = reader_over(archive);

        let Some(ZipEntry::File(mut file)) = reader.next_entry().await.unwrap() else {
            panic!("expected a file entry");
        };
        assert!(matches!(
            file.stream().await,
            Err(ZipError::UnknownCompressionMethod(3))
        ));
        // The body can still be drained to move past the entry.
        file.drain().await.unwrap();
        drop(file);
        assert!(reader.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tripped_token_fails_even_a_clean_end() {
        let token = CancellationToken::new();
        let mut reader = reader_over(Vec::new()).with_cancel(token.clone());
        token.cancel();

        assert!(matches!(reader.next_entry().await, Err(ZipError::Aborted)));
    }

    #[tokio::test]
    async fn directory_entries_carry_no_body() {
        let mut archive = stored_entry("nested/", 0, 0, b"");
        archive.extend_from_slice(&central_directory_start());
        let mut reader = reader_over(archive);

        let Some(ZipEntry::Directory(dir)) = reader.next_entry().await.unwrap() else {
            panic!("expected a directory entry");
        };
        assert_eq!(dir.name, "nested/");
        assert!(reader.next_entry().await.unwrap().is_none());
    }
}
