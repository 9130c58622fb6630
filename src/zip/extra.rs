//! Extra-field records: ZIP64 sizes and extended timestamps.
//!
//! The extra-field area of a ZIP header is a run of TLV records: 16-bit
//! tag, 16-bit length, `length` payload bytes, all little-endian. Two
//! tags are understood here; everything else is skipped.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{ZipError, ZipResult};

/// ZIP64 extended information (sizes and the local-header offset).
pub const ZIP64_EXTRA_TAG: u16 = 0x0001;

/// Info-ZIP extended timestamp (UNIX seconds).
pub const EXTENDED_TIMESTAMP_TAG: u16 = 0x5455;

const MODIFY_FLAG: u8 = 0x1;
const ACCESS_FLAG: u8 = 0x2;
const CREATE_FLAG: u8 = 0x4;

/// Absolute UNIX-seconds timestamps carried by the 0x5455 record.
///
/// The wire format is a signed 32-bit count of seconds, so values
/// outside roughly 1901-2038 are truncated on emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendedTimestamps {
    pub modified: Option<i64>,
    pub accessed: Option<i64>,
    pub created: Option<i64>,
}

impl ExtendedTimestamps {
    pub fn is_empty(&self) -> bool {
        self.modified.is_none() && self.accessed.is_none() && self.created.is_none()
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut flags = 0u8;
        let mut values = Vec::with_capacity(12);
        for (flag, value) in [
            (MODIFY_FLAG, self.modified),
            (ACCESS_FLAG, self.accessed),
            (CREATE_FLAG, self.created),
        ] {
            if let Some(seconds) = value {
                flags |= flag;
                values.extend_from_slice(&(seconds as i32).to_le_bytes());
            }
        }

        let mut buf = Vec::with_capacity(4 + 1 + values.len());
        buf.extend_from_slice(&EXTENDED_TIMESTAMP_TAG.to_le_bytes());
        buf.extend_from_slice(&(1 + values.len() as u16).to_le_bytes());
        buf.push(flags);
        buf.extend_from_slice(&values);
        buf
    }
}

/// ZIP64 extended-information record.
#[derive(Debug, Clone, Copy)]
pub struct Zip64Extra {
    pub original_size: u64,
    pub compressed_size: u64,
    /// Offset of the local file header; carried in central directory
    /// records only, which makes the record 24 bytes instead of 16.
    pub header_offset: Option<u64>,
}

impl Zip64Extra {
    fn to_bytes(self) -> Vec<u8> {
        let len: u16 = if self.header_offset.is_some() { 24 } else { 16 };
        let mut buf = Vec::with_capacity(4 + len as usize);
        buf.extend_from_slice(&ZIP64_EXTRA_TAG.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.original_size.to_le_bytes());
        buf.extend_from_slice(&self.compressed_size.to_le_bytes());
        if let Some(offset) = self.header_offset {
            buf.extend_from_slice(&offset.to_le_bytes());
        }
        buf
    }
}

/// Recognized records decoded out of one extra-field area.
#[derive(Debug, Default)]
pub struct ExtraFields {
    pub zip64: Option<Zip64Extra>,
    pub timestamps: Option<ExtendedTimestamps>,
}

/// Decode an extra-field area.
///
/// Iterates records until fewer than four bytes remain (trailing
/// padding shorter than a tag and length is ignored). Unknown tags are
/// skipped. A record whose declared length would overrun the area is an
/// error.
pub fn parse_extra_fields(data: &[u8]) -> ZipResult<ExtraFields> {
    let mut fields = ExtraFields::default();
    let mut pos = 0usize;

    while data.len() - pos >= 4 {
        let tag = u16::from_le_bytes([data[pos], data[pos + 1]]);
        let len = u16::from_le_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 4;
        if len > data.len() - pos {
            return Err(ZipError::InvalidExtraField(
                "record length overruns the extra field",
            ));
        }
        let payload = &data[pos..pos + len];
        pos += len;

        match tag {
            ZIP64_EXTRA_TAG => fields.zip64 = Some(parse_zip64(payload)?),
            EXTENDED_TIMESTAMP_TAG => fields.timestamps = Some(parse_timestamps(payload)?),
            _ => {}
        }
    }

    Ok(fields)
}

/// Encode the extra-field area for one entry: the ZIP64 record first
/// (always present), then the extended timestamps if any are set.
/// Passing a `header_offset` selects the central-directory form.
pub fn encode_extra_fields(
    original_size: u64,
    compressed_size: u64,
    header_offset: Option<u64>,
    timestamps: Option<&ExtendedTimestamps>,
) -> Vec<u8> {
    let mut buf = Zip64Extra {
        original_size,
        compressed_size,
        header_offset,
    }
    .to_bytes();
    if let Some(ts) = timestamps {
        if !ts.is_empty() {
            buf.extend_from_slice(&ts.to_bytes());
        }
    }
    buf
}

fn parse_zip64(payload: &[u8]) -> ZipResult<Zip64Extra> {
    if payload.len() < 16 {
        return Err(ZipError::InvalidExtraField("zip64 record is too short"));
    }
    let mut cursor = Cursor::new(payload);
    let original_size = cursor.read_u64::<LittleEndian>()?;
    let compressed_size = cursor.read_u64::<LittleEndian>()?;
    let header_offset = if payload.len() >= 24 {
        Some(cursor.read_u64::<LittleEndian>()?)
    } else {
        None
    };
    Ok(Zip64Extra {
        original_size,
        compressed_size,
        header_offset,
    })
}

fn parse_timestamps(payload: &[u8]) -> ZipResult<ExtendedTimestamps> {
    let Some((&flags, mut rest)) = payload.split_first() else {
        return Err(ZipError::InvalidExtraField("missing timestamp flags"));
    };

    let mut timestamps = ExtendedTimestamps::default();
    for (flag, slot) in [
        (MODIFY_FLAG, &mut timestamps.modified),
        (ACCESS_FLAG, &mut timestamps.accessed),
        (CREATE_FLAG, &mut timestamps.created),
    ] {
        // Central directory records may declare a flag but omit its
        // value; a flag only yields a timestamp while bytes remain.
        if flags & flag != 0 && rest.len() >= 4 {
            let (value, tail) = rest.split_at(4);
            *slot = Some(i32::from_le_bytes([value[0], value[1], value[2], value[3]]) as i64);
            rest = tail;
        }
    }
    Ok(timestamps)
}
