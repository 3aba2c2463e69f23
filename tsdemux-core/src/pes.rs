//! PES header decoding

use crate::constants::{
    DTS_PREFIX, PES_EXTENSION_FIXED_SIZE, PES_EXTENSION_MARKER, PES_PROLOGUE_SIZE,
    PES_TIMESTAMP_SIZE, PTS_ONLY_PREFIX, PTS_WITH_DTS_PREFIX,
};
use crate::decoder::decode_timestamp;
use crate::error::TsError;
use crate::types::{PesExtension, PesHeader};

#[cfg(feature = "logging")]
use tracing::debug;

/// Decode the PES header starting at `offset` in `bytes`
///
/// Returns the header and the offset of the first payload byte. The 6-byte
/// prologue is always read. The extended header is parsed only when the byte
/// after the prologue starts with the `10` marker bits and the stream id is not
/// one of the ids that never carry it; otherwise the payload starts right after
/// the prologue.
///
/// A timestamp counts as present only when its flag is set, its prefix nibble
/// matches (`0010`/`0011` for the PTS, `0001` for the DTS) and it lies inside
/// the declared header data.
pub fn decode_pes_header(bytes: &[u8], offset: usize) -> Result<(PesHeader, usize), TsError> {
    let prologue_end = offset + PES_PROLOGUE_SIZE;
    if bytes.len() < prologue_end {
        return Err(TsError::IncompleteUnit {
            expected: prologue_end,
            actual: bytes.len(),
        });
    }

    let p = &bytes[offset..];
    let mut header = PesHeader {
        start_code_prefix: u32::from_be_bytes([0, p[0], p[1], p[2]]),
        stream_id: p[3],
        packet_length: u16::from_be_bytes([p[4], p[5]]),
        extension: None,
        pts: None,
        dts: None,
    };

    let has_marker = p
        .get(PES_PROLOGUE_SIZE)
        .map_or(false, |b| b & 0b1100_0000 == PES_EXTENSION_MARKER);
    if !has_marker || !header.allows_extension() {
        return Ok((header, prologue_end));
    }

    let fixed_end = PES_PROLOGUE_SIZE + PES_EXTENSION_FIXED_SIZE;
    if p.len() < fixed_end {
        return Err(TsError::IncompleteUnit {
            expected: offset + fixed_end,
            actual: bytes.len(),
        });
    }

    let b6 = p[6];
    let b7 = p[7];
    let extension = PesExtension {
        scrambling_control: (b6 & 0b0011_0000) >> 4,
        priority: (b6 & 0b0000_1000) != 0,
        data_alignment: (b6 & 0b0000_0100) != 0,
        copyright: (b6 & 0b0000_0010) != 0,
        original: (b6 & 0b0000_0001) != 0,
        pts_dts_flags: (b7 & 0b1100_0000) >> 6,
        escr_flag: (b7 & 0b0010_0000) != 0,
        es_rate_flag: (b7 & 0b0001_0000) != 0,
        dsm_trick_mode_flag: (b7 & 0b0000_1000) != 0,
        additional_copy_info_flag: (b7 & 0b0000_0100) != 0,
        crc_flag: (b7 & 0b0000_0010) != 0,
        extension_flag: (b7 & 0b0000_0001) != 0,
        header_data_length: p[8],
    };

    // Timestamps must sit inside both the declared header data and the buffer
    let data_end = (fixed_end + extension.header_data_length as usize).min(p.len());
    let data = &p[fixed_end..data_end];

    match extension.pts_dts_flags {
        0b10 => {
            header.pts = read_timestamp(data, 0, PTS_ONLY_PREFIX);
        }
        0b11 => {
            header.pts = read_timestamp(data, 0, PTS_WITH_DTS_PREFIX);
            header.dts = read_timestamp(data, PES_TIMESTAMP_SIZE, DTS_PREFIX);
        }
        _ => {}
    }

    #[cfg(feature = "logging")]
    if extension.pts_dts_flags & 0b10 != 0 && header.pts.is_none() {
        debug!(
            "PTS flagged but prefix or length check failed (stream id {:#04x})",
            header.stream_id
        );
    }

    header.extension = Some(extension);
    let next_offset = offset + header.header_len();

    Ok((header, next_offset))
}

fn read_timestamp(data: &[u8], at: usize, prefix: u8) -> Option<u64> {
    let b = data.get(at..at + PES_TIMESTAMP_SIZE)?;
    if b[0] >> 4 != prefix {
        return None;
    }
    Some(decode_timestamp(b))
}
