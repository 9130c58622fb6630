mod exact;
mod partial;

pub use exact::{ExactCount, ExactStream};
pub use partial::{PartialReader, SubStream};

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::ZipResult;

/// Trait for pull-based, chunk-granular byte sources.
///
/// Chunk lengths are arbitrary and caller-uncontrollable; they need not
/// align with any ZIP structure. [`PartialReader`] turns a source like
/// this into byte-precise reads.
#[async_trait]
pub trait ChunkSource: Send {
    /// Pull the next chunk. `Ok(None)` means the source has ended.
    async fn next_chunk(&mut self) -> ZipResult<Option<Bytes>>;
}

#[async_trait]
impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    async fn next_chunk(&mut self) -> ZipResult<Option<Bytes>> {
        (**self).next_chunk().await
    }
}

#[async_trait]
impl ChunkSource for VecDeque<Bytes> {
    async fn next_chunk(&mut self) -> ZipResult<Option<Bytes>> {
        Ok(self.pop_front())
    }
}

#[async_trait]
impl ChunkSource for tokio::sync::mpsc::Receiver<Bytes> {
    async fn next_chunk(&mut self) -> ZipResult<Option<Bytes>> {
        Ok(self.recv().await)
    }
}

/// An upstream byte source in either of the two flavors the
/// [`PartialReader`] knows how to drive.
///
/// An [`AsyncRead`] source fills caller-supplied buffers, so the partial
/// reader can bound every read precisely and never retains leftover
/// bytes. A [`ChunkSource`] hands back chunks of whatever size it likes,
/// and the overflow past a bounded request is kept as a leftover slice.
pub enum ByteSource {
    Chunks(Box<dyn ChunkSource>),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl ByteSource {
    pub fn from_chunks<S: ChunkSource + 'static>(source: S) -> Self {
        ByteSource::Chunks(Box::new(source))
    }

    pub fn from_reader<R: AsyncRead + Send + Unpin + 'static>(reader: R) -> Self {
        ByteSource::Reader(Box::new(reader))
    }
}
