//! Byte-precise reading over an unseekable, chunk-granular source.
//!
//! Upstream sources deliver bytes at whatever granularity they like;
//! ZIP structures need to be read at exact byte counts. [`PartialReader`]
//! bridges the two with four primitives: read up to N, read exactly N,
//! skip N, and hand the next N bytes out as a sub-stream. Chunk
//! boundaries never have to line up with the structures being parsed.

use bytes::{Bytes, BytesMut};
use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{ByteSource, ChunkSource};
use crate::error::{ZipError, ZipResult};

/// Scratch size for draining bytes through a caller-buffer source.
const SKIP_SCRATCH_SIZE: usize = 2048;

/// Upper bound on a single caller-buffer read, so a large `max` does not
/// translate into a large allocation.
const BYOB_READ_CAP: usize = 64 * 1024;

/// Byte-precise reader over an unseekable source.
///
/// Two variants share one contract. The chunked variant pulls
/// arbitrary-length chunks and retains at most one leftover slice when a
/// chunk overshoots a bounded request; the slice is a view into the
/// upstream buffer, not a copy. The BYOB variant reads into fresh
/// bounded buffers, so a leftover can never arise.
///
/// All operations take `&mut self`: at most one can be outstanding at a
/// time, and a [`SubStream`] holds the reader until it is finished.
pub struct PartialReader {
    variant: Variant,
    /// Remainder of a dropped sub-stream, skipped before the next
    /// operation so the reader is positioned past it.
    pending_skip: u64,
}

enum Variant {
    Chunked {
        source: Box<dyn ChunkSource>,
        leftover: Option<Bytes>,
    },
    Byob {
        reader: Box<dyn AsyncRead + Send + Unpin>,
    },
    /// Canceled; the upstream handle has been released.
    Closed,
}

impl PartialReader {
    /// Wrap an upstream source, picking the BYOB variant when the source
    /// can fill caller-supplied buffers. No I/O happens until the first
    /// read.
    pub fn from_source(source: ByteSource) -> Self {
        let variant = match source {
            ByteSource::Chunks(source) => Variant::Chunked {
                source,
                leftover: None,
            },
            ByteSource::Reader(reader) => Variant::Byob { reader },
        };
        PartialReader {
            variant,
            pending_skip: 0,
        }
    }

    pub fn from_chunks<S: ChunkSource + 'static>(source: S) -> Self {
        Self::from_source(ByteSource::from_chunks(source))
    }

    pub fn from_reader<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        Self::from_source(ByteSource::from_reader(reader))
    }

    /// Deliver the next available bytes, capped at `max` (which must be
    /// nonzero). Never returns an empty slice: `None` is the end of the
    /// source.
    pub async fn limited_read(&mut self, max: usize) -> ZipResult<Option<Bytes>> {
        self.settle().await?;
        self.limited_read_raw(max).await
    }

    async fn limited_read_raw(&mut self, max: usize) -> ZipResult<Option<Bytes>> {
        debug_assert!(max > 0);
        match &mut self.variant {
            Variant::Chunked { source, leftover } => {
                if let Some(mut held) = leftover.take() {
                    if held.len() > max {
                        let out = held.split_to(max);
                        *leftover = Some(held);
                        return Ok(Some(out));
                    }
                    return Ok(Some(held));
                }
                loop {
                    match source.next_chunk().await? {
                        None => return Ok(None),
                        Some(chunk) if chunk.is_empty() => continue,
                        Some(mut chunk) => {
                            if chunk.len() > max {
                                let out = chunk.split_to(max);
                                *leftover = Some(chunk);
                                return Ok(Some(out));
                            }
                            return Ok(Some(chunk));
                        }
                    }
                }
            }
            Variant::Byob { reader } => {
                let mut buf = vec![0u8; max.min(BYOB_READ_CAP)];
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    Ok(None)
                } else {
                    buf.truncate(n);
                    Ok(Some(Bytes::from(buf)))
                }
            }
            Variant::Closed => Err(ZipError::Aborted),
        }
    }

    /// Read up to `n` bytes, looping over [`limited_read`] until `n` is
    /// filled or the source ends. A short result means the source ended.
    ///
    /// When the first read already satisfies `n`, its slice is returned
    /// as-is; the accumulation buffer only exists on the slow path.
    ///
    /// [`limited_read`]: PartialReader::limited_read
    pub async fn read_amount(&mut self, n: usize) -> ZipResult<Bytes> {
        self.settle().await?;
        if n == 0 {
            return Ok(Bytes::new());
        }
        let first = match self.limited_read_raw(n).await? {
            None => return Ok(Bytes::new()),
            Some(chunk) => chunk,
        };
        if first.len() == n {
            return Ok(first);
        }
        let mut buf = BytesMut::with_capacity(n);
        buf.extend_from_slice(&first);
        while buf.len() < n {
            match self.limited_read_raw(n - buf.len()).await? {
                None => break,
                Some(chunk) => buf.extend_from_slice(&chunk),
            }
        }
        Ok(buf.freeze())
    }

    /// As [`read_amount`], but a short result is an error.
    ///
    /// [`read_amount`]: PartialReader::read_amount
    pub async fn read_amount_strict(&mut self, n: usize) -> ZipResult<Bytes> {
        let bytes = self.read_amount(n).await?;
        if bytes.len() < n {
            return Err(ZipError::UnexpectedEnd);
        }
        Ok(bytes)
    }

    /// Read and discard up to `n` bytes; stops early if the source ends.
    /// Returns the number of bytes actually skipped.
    pub async fn skip_amount(&mut self, n: u64) -> ZipResult<u64> {
        self.settle().await?;
        self.skip_raw(n).await
    }

    async fn skip_raw(&mut self, n: u64) -> ZipResult<u64> {
        let mut left = n;
        if let Variant::Byob { reader } = &mut self.variant {
            // One recycled scratch buffer bounds the memory of an
            // arbitrarily large skip.
            let mut scratch = [0u8; SKIP_SCRATCH_SIZE];
            while left > 0 {
                let want = left.min(SKIP_SCRATCH_SIZE as u64) as usize;
                let got = reader.read(&mut scratch[..want]).await?;
                if got == 0 {
                    break;
                }
                left -= got as u64;
            }
            return Ok(n - left);
        }
        while left > 0 {
            let max = left.min(usize::MAX as u64) as usize;
            match self.limited_read_raw(max).await? {
                None => break,
                Some(chunk) => left -= chunk.len() as u64,
            }
        }
        Ok(n - left)
    }

    /// Hand out the next `n` bytes as a pull-driven sub-stream.
    ///
    /// The sub-stream borrows this reader exclusively; no other
    /// operation can be issued until it has been consumed, canceled, or
    /// dropped. Whatever it did not deliver is skipped before the
    /// reader's next operation, so the reader always resumes exactly `n`
    /// bytes past where the sub-stream began (or at the source's end).
    pub async fn stream_amount(&mut self, n: u64) -> ZipResult<SubStream<'_>> {
        self.settle().await?;
        Ok(SubStream {
            reader: self,
            remaining: n,
        })
    }

    /// Release the upstream source. Any in-flight leftover is discarded
    /// and every future operation fails with [`ZipError::Aborted`].
    pub fn cancel(&mut self) {
        self.pending_skip = 0;
        // Dropping the old variant releases the upstream handle.
        self.variant = Variant::Closed;
    }

    async fn settle(&mut self) -> ZipResult<()> {
        if self.pending_skip > 0 {
            let n = self.pending_skip;
            self.pending_skip = 0;
            trace!("skipping {n} bytes left behind by a sub-stream");
            self.skip_raw(n).await?;
        }
        Ok(())
    }
}

/// A pull-driven view of exactly the next `n` bytes of a
/// [`PartialReader`], created by [`PartialReader::stream_amount`].
pub struct SubStream<'a> {
    reader: &'a mut PartialReader,
    remaining: u64,
}

impl SubStream<'_> {
    /// Bytes of the sub-stream not yet handed out.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Pull the next chunk. `None` once the sub-stream's bytes have all
    /// been delivered, or earlier if the source ends short.
    pub async fn next_chunk(&mut self) -> ZipResult<Option<Bytes>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let max = self.remaining.min(usize::MAX as u64) as usize;
        match self.reader.limited_read_raw(max).await? {
            None => {
                self.remaining = 0;
                Ok(None)
            }
            Some(chunk) => {
                self.remaining -= chunk.len() as u64;
                Ok(Some(chunk))
            }
        }
    }

    /// Abandon the sub-stream, skipping its undelivered remainder now so
    /// the parent reader is repositioned past it.
    pub async fn cancel(&mut self) -> ZipResult<()> {
        let n = self.remaining;
        self.remaining = 0;
        self.reader.skip_raw(n).await?;
        Ok(())
    }

    /// Tear the parent reader down; the remainder is unrecoverable.
    /// Used when a body pipeline fails mid-stream.
    pub(crate) fn fail(&mut self) {
        self.remaining = 0;
        self.reader.cancel();
    }
}

impl Drop for SubStream<'_> {
    fn drop(&mut self) {
        self.reader.pending_skip += self.remaining;
    }
}
