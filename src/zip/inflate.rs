//! Raw-DEFLATE adaptation for a gzip decompressor.
//!
//! ZIP stores method-8 bodies as raw DEFLATE with no framing, while the
//! decompressor invoked here speaks gzip. The adapter synthesizes the
//! ten gzip header bytes ahead of the body and the eight trailer bytes
//! (CRC-32, then uncompressed size mod 2^32, both little-endian) after
//! it, so the gzip decoder consumes the body unchanged. CRC and size
//! come from the local file header; nothing is computed here.

use std::io::Write;

use bytes::Bytes;
use flate2::write::GzDecoder;

use crate::error::ZipResult;

/// Fixed gzip member header: magic, method 8 (deflate), no flags, zero
/// mtime, no extra flags, unknown OS.
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 0xff];

fn gzip_trailer(crc32: u32, original_size: u64) -> [u8; 8] {
    let mut trailer = [0u8; 8];
    trailer[..4].copy_from_slice(&crc32.to_le_bytes());
    trailer[4..].copy_from_slice(&(original_size as u32).to_le_bytes());
    trailer
}

/// Streaming inflater for one raw-DEFLATE entry body.
///
/// Push compressed chunks in, take decoded bytes out; [`finish`] feeds
/// the synthesized trailer, at which point the decoder checks the CRC
/// and size against what it inflated.
///
/// [`finish`]: DeflateRawInflater::finish
pub struct DeflateRawInflater {
    decoder: GzDecoder<Vec<u8>>,
    trailer: [u8; 8],
    header_fed: bool,
}

impl DeflateRawInflater {
    pub fn new(crc32: u32, original_size: u64) -> Self {
        DeflateRawInflater {
            decoder: GzDecoder::new(Vec::new()),
            trailer: gzip_trailer(crc32, original_size),
            header_fed: false,
        }
    }

    /// Feed compressed bytes; returns whatever decoded bytes became
    /// available, possibly none.
    pub fn push(&mut self, chunk: &[u8]) -> ZipResult<Bytes> {
        self.feed_header()?;
        self.decoder.write_all(chunk)?;
        Ok(self.take_output())
    }

    /// End of the compressed body: feed the trailer and flush out the
    /// final decoded bytes.
    pub fn finish(&mut self) -> ZipResult<Bytes> {
        self.feed_header()?;
        let trailer = self.trailer;
        self.decoder.write_all(&trailer)?;
        self.decoder.try_finish()?;
        Ok(self.take_output())
    }

    fn feed_header(&mut self) -> ZipResult<()> {
        if !self.header_fed {
            self.decoder.write_all(&GZIP_HEADER)?;
            self.header_fed = true;
        }
        Ok(())
    }

    fn take_output(&mut self) -> Bytes {
        Bytes::from(std::mem::take(self.decoder.get_mut()))
    }
}
