//! Pass-through assertion that a byte stream carries exactly N bytes.
//!
//! Reader and writer pipelines both declare entry sizes up front; this
//! guard makes a wrong declaration fail loudly instead of silently
//! under- or over-filling the archive.

use async_trait::async_trait;
use bytes::Bytes;

use super::ChunkSource;
use crate::error::{ZipError, ZipResult};

/// Running byte count checked against a declared total.
#[derive(Debug)]
pub struct ExactCount {
    expected: u64,
    seen: u64,
}

impl ExactCount {
    pub fn new(expected: u64) -> Self {
        ExactCount { expected, seen: 0 }
    }

    /// Account for `len` more bytes. Fails as soon as the running total
    /// would exceed the declared size.
    pub fn push(&mut self, len: usize) -> ZipResult<()> {
        let seen = self.seen + len as u64;
        if seen > self.expected {
            return Err(ZipError::ByteCountMismatch {
                expected: self.expected,
                actual: seen,
            });
        }
        self.seen = seen;
        Ok(())
    }

    /// Check the total at end of input. Fails when fewer bytes than
    /// declared were seen.
    pub fn finish(&self) -> ZipResult<()> {
        if self.seen != self.expected {
            return Err(ZipError::ByteCountMismatch {
                expected: self.expected,
                actual: self.seen,
            });
        }
        Ok(())
    }
}

/// A [`ChunkSource`] that passes its inner source through unchanged
/// while asserting the total byte count.
pub struct ExactStream<S> {
    inner: S,
    count: ExactCount,
}

impl<S> ExactStream<S> {
    pub fn new(inner: S, expected: u64) -> Self {
        ExactStream {
            inner,
            count: ExactCount::new(expected),
        }
    }
}

#[async_trait]
impl<S: ChunkSource> ChunkSource for ExactStream<S> {
    async fn next_chunk(&mut self) -> ZipResult<Option<Bytes>> {
        match self.inner.next_chunk().await? {
            Some(chunk) => {
                self.count.push(chunk.len())?;
                Ok(Some(chunk))
            }
            None => {
                self.count.finish()?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;

    fn nine_bytes() -> VecDeque<Bytes> {
        [&[1u8, 2, 3][..], &[4, 5, 6], &[7, 8, 9]]
            .iter()
            .map(|c| Bytes::copy_from_slice(c))
            .collect()
    }

    async fn drain<S: ChunkSource>(mut stream: S) -> ZipResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn matching_size_passes_through() {
        let out = drain(ExactStream::new(nine_bytes(), 9)).await.unwrap();
        assert_eq!(out, &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn short_stream_fails_on_end() {
        match drain(ExactStream::new(nine_bytes(), 10)).await {
            Err(ZipError::ByteCountMismatch {
                expected: 10,
                actual: 9,
            }) => {}
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn long_stream_fails_on_the_excess_byte() {
        let mut stream = ExactStream::new(nine_bytes(), 8);
        assert!(stream.next_chunk().await.is_ok());
        assert!(stream.next_chunk().await.is_ok());
        match stream.next_chunk().await {
            Err(ZipError::ByteCountMismatch {
                expected: 8,
                actual: 9,
            }) => {}
            other => panic!("expected mismatch, got {other:?}"),
        }
    }
}
