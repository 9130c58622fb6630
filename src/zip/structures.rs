//! Fixed-layout ZIP wire structures.
//!
//! Everything here is little-endian and bit-exact per the PKWARE
//! APPNOTE. The reader only ever decodes local file headers (a streaming
//! parse never sees the trailing records from the front); the writer
//! encodes local headers, central directory headers, and the ZIP64
//! end-of-central-directory tail.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{ZipError, ZipResult};

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
pub const CENTRAL_DIRECTORY_HEADER_SIGNATURE: u32 = 0x0201_4b50;
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
pub const ZIP64_EOCD_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;

/// 32-bit size/offset fields carry this value when the real one lives in
/// the ZIP64 extra field.
pub const ZIP64_SIZE_SENTINEL: u32 = 0xffff_ffff;

/// 16-bit entry counts carry this value when the real one lives in the
/// ZIP64 end of central directory.
pub const ZIP64_COUNT_SENTINEL: u16 = 0xffff;

/// ZIP specification 4.5, the revision that introduced ZIP64. Written
/// archives always declare it, and the reader refuses anything newer.
pub const ZIP64_VERSION: u16 = 45;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// Local File Header (LFH) - 30 bytes
///
/// On write, both size fields always hold the ZIP64 sentinel and the
/// real sizes go in the extra field; the MS-DOS timestamp stays zero
/// because real times travel in the extended-timestamp extra.
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_len: u16,
    pub extra_len: u16,
}

impl LocalFileHeader {
    pub const SIZE: usize = 30;

    /// Parse the 26 bytes that follow an already-verified signature.
    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::SIZE - 4 {
            return Err(ZipError::UnexpectedEnd);
        }

        let mut cursor = Cursor::new(data);
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let method = cursor.read_u16::<LittleEndian>()?;
        let _last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let _last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()?;
        let extra_len = cursor.read_u16::<LittleEndian>()?;

        Ok(Self {
            version_needed,
            flags,
            method,
            crc32,
            compressed_size,
            uncompressed_size,
            name_len,
            extra_len,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        buf.extend_from_slice(&self.version_needed.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.method.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // MS-DOS time
        buf.extend_from_slice(&0u16.to_le_bytes()); // MS-DOS date
        buf.extend_from_slice(&self.crc32.to_le_bytes());
        buf.extend_from_slice(&self.compressed_size.to_le_bytes());
        buf.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        buf.extend_from_slice(&self.name_len.to_le_bytes());
        buf.extend_from_slice(&self.extra_len.to_le_bytes());
        buf
    }
}

/// Central Directory File Header (CDFH) - 46 bytes, write side only.
///
/// Sizes and the local-header offset are sentinel-filled; the ZIP64
/// extra field carries the real values.
pub struct CentralFileHeader {
    pub method: u16,
    pub crc32: u32,
    pub name_len: u16,
    pub extra_len: u16,
}

impl CentralFileHeader {
    pub const SIZE: usize = 46;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&CENTRAL_DIRECTORY_HEADER_SIGNATURE.to_le_bytes());
        buf.extend_from_slice(&ZIP64_VERSION.to_le_bytes()); // version made by
        buf.extend_from_slice(&ZIP64_VERSION.to_le_bytes()); // version needed
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&self.method.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // MS-DOS time
        buf.extend_from_slice(&0u16.to_le_bytes()); // MS-DOS date
        buf.extend_from_slice(&self.crc32.to_le_bytes());
        buf.extend_from_slice(&ZIP64_SIZE_SENTINEL.to_le_bytes());
        buf.extend_from_slice(&ZIP64_SIZE_SENTINEL.to_le_bytes());
        buf.extend_from_slice(&self.name_len.to_le_bytes());
        buf.extend_from_slice(&self.extra_len.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // comment length
        buf.extend_from_slice(&0u16.to_le_bytes()); // disk number start
        buf.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
        buf.extend_from_slice(&0u32.to_le_bytes()); // external attributes
        buf.extend_from_slice(&ZIP64_SIZE_SENTINEL.to_le_bytes()); // LFH offset
        buf
    }
}

/// ZIP64 End of Central Directory - 56 bytes, write side only.
pub struct Zip64EndOfCentralDirectory {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub const SIZE: usize = 56;

    /// "Size of this record" counts everything after its own field, so a
    /// fixed-layout record is `SIZE` minus the signature and the field
    /// itself.
    const RECORD_SIZE: u64 = (Self::SIZE - 12) as u64;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&ZIP64_EOCD_SIGNATURE.to_le_bytes());
        buf.extend_from_slice(&Self::RECORD_SIZE.to_le_bytes());
        buf.extend_from_slice(&ZIP64_VERSION.to_le_bytes()); // version made by
        buf.extend_from_slice(&ZIP64_VERSION.to_le_bytes()); // version needed
        buf.extend_from_slice(&0u32.to_le_bytes()); // this disk
        buf.extend_from_slice(&0u32.to_le_bytes()); // disk with central directory
        buf.extend_from_slice(&self.total_entries.to_le_bytes()); // entries on this disk
        buf.extend_from_slice(&self.total_entries.to_le_bytes()); // entries total
        buf.extend_from_slice(&self.cd_size.to_le_bytes());
        buf.extend_from_slice(&self.cd_offset.to_le_bytes());
        buf
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes, write side only.
pub struct Zip64EocdLocator {
    pub eocd64_offset: u64,
}

impl Zip64EocdLocator {
    pub const SIZE: usize = 20;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&ZIP64_EOCD_LOCATOR_SIGNATURE.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // disk with the ZIP64 EOCD
        buf.extend_from_slice(&self.eocd64_offset.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes()); // total disks
        buf
    }
}

/// End of Central Directory (EOCD) - 22 bytes, write side only.
///
/// Counts and sizes are sentinel-filled unconditionally; readers are
/// expected to follow the ZIP64 locator that precedes this record.
pub struct EndOfCentralDirectory;

impl EndOfCentralDirectory {
    pub const SIZE: usize = 22;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // this disk
        buf.extend_from_slice(&0u16.to_le_bytes()); // disk with central directory
        buf.extend_from_slice(&ZIP64_COUNT_SENTINEL.to_le_bytes()); // entries on this disk
        buf.extend_from_slice(&ZIP64_COUNT_SENTINEL.to_le_bytes()); // entries total
        buf.extend_from_slice(&ZIP64_SIZE_SENTINEL.to_le_bytes()); // central directory size
        buf.extend_from_slice(&ZIP64_SIZE_SENTINEL.to_le_bytes()); // central directory offset
        buf.extend_from_slice(&0u16.to_le_bytes()); // comment length
        buf
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_header_round_trip() {
        let header = LocalFileHeader {
            version_needed: ZIP64_VERSION,
            flags: 0,
            method: 8,
            crc32: 0xdead_beef,
            compressed_size: ZIP64_SIZE_SENTINEL,
            uncompressed_size: ZIP64_SIZE_SENTINEL,
            name_len: 11,
            extra_len: 20,
        };

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), LocalFileHeader::SIZE);
        assert_eq!(
            u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            LOCAL_FILE_HEADER_SIGNATURE
        );

        let parsed = LocalFileHeader::from_bytes(&bytes[4..]).unwrap();
        assert_eq!(parsed.version_needed, ZIP64_VERSION);
        assert_eq!(parsed.method, 8);
        assert_eq!(parsed.crc32, 0xdead_beef);
        assert_eq!(parsed.compressed_size, ZIP64_SIZE_SENTINEL);
        assert_eq!(parsed.name_len, 11);
        assert_eq!(parsed.extra_len, 20);
    }

    #[test]
    fn trailing_records_have_fixed_sizes() {
        let eocd64 = Zip64EndOfCentralDirectory {
            total_entries: 3,
            cd_size: 210,
            cd_offset: 4096,
        };
        let bytes = eocd64.to_bytes();
        assert_eq!(bytes.len(), Zip64EndOfCentralDirectory::SIZE);
        // The record-size field counts everything after itself: 44.
        assert_eq!(u64::from_le_bytes(bytes[4..12].try_into().unwrap()), 44);

        let locator = Zip64EocdLocator { eocd64_offset: 4306 };
        let bytes = locator.to_bytes();
        assert_eq!(bytes.len(), Zip64EocdLocator::SIZE);
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 1);

        let bytes = EndOfCentralDirectory.to_bytes();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE);
        assert_eq!(
            u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
            ZIP64_COUNT_SENTINEL
        );
    }
}
