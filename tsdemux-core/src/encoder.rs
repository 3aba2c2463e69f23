//! Unit and PES encoding
//!
//! The inverse of [`crate::decoder`] and [`crate::pes`]: used to synthesize
//! streams for tests, benchmarks and demos.

use crate::constants::{
    stream_id, AdaptationFlags, FieldControl, CLOCK_BASE_MASK, CLOCK_EXTENSION_MASK,
    CONTINUITY_MODULUS, DTS_PREFIX, MAX_PID, MAX_UNIT_PAYLOAD, PES_START_CODE_PREFIX,
    PES_TIMESTAMP_SIZE, PTS_ONLY_PREFIX, PTS_WITH_DTS_PREFIX, TS_HEADER_SIZE,
    TS_PACKET_SIZE,
};
use crate::error::TsError;
use crate::types::{PesExtension, PesHeader, UnitHeader};
use alloc::vec::Vec;
use bytes::{BufMut, Bytes, BytesMut};

/// Encode the fixed 4-byte unit header
///
/// Layout:
/// 1. Sync byte (0x47)
/// 2. Error / start / priority bits and the top 5 PID bits
/// 3. Low 8 PID bits
/// 4. Scrambling (2 bits), field control (2 bits), continuity counter (4 bits)
pub fn encode_unit_header(header: &UnitHeader) -> [u8; TS_HEADER_SIZE] {
    let pid = header.pid & MAX_PID;
    [
        header.sync_byte,
        (header.transport_error as u8) << 7
            | (header.payload_unit_start as u8) << 6
            | (header.transport_priority as u8) << 5
            | (pid >> 8) as u8,
        (pid & 0xFF) as u8,
        (header.scrambling_control & 0b11) << 6
            | header.field_control.bits() << 4
            | (header.continuity_counter & 0b1111),
    ]
}

/// Encode a PCR/OPCR reading (33-bit base, 6 reserved bits set, 9-bit extension)
pub fn encode_clock(base: u64, extension: u16) -> [u8; 6] {
    let base = base & CLOCK_BASE_MASK;
    let extension = extension & CLOCK_EXTENSION_MASK;
    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        ((base & 1) as u8) << 7 | 0b0111_1110 | (extension >> 8) as u8,
        (extension & 0xFF) as u8,
    ]
}

/// Encode a 33-bit timestamp with its 4-bit prefix and marker bits
pub fn encode_timestamp(prefix: u8, ts: u64) -> [u8; PES_TIMESTAMP_SIZE] {
    let ts = ts & CLOCK_BASE_MASK;
    [
        (prefix & 0b1111) << 4 | ((ts >> 29) as u8 & 0b1110) | 1,
        (ts >> 22) as u8,
        ((ts >> 14) as u8 & 0b1111_1110) | 1,
        (ts >> 7) as u8,
        ((ts << 1) as u8 & 0b1111_1110) | 1,
    ]
}

/// Builder for complete 188-byte units
///
/// Any room the payload leaves is filled with adaptation field stuffing, the
/// way a muxer pads the last unit of a PES packet.
pub struct UnitBuilder {
    header: UnitHeader,
    flags: u8,
    pcr: Option<(u64, u16)>,
    opcr: Option<(u64, u16)>,
    splice_countdown: Option<i8>,
    private_data: Option<Bytes>,
    adaptation_only: bool,
    payload: Bytes,
}

impl UnitBuilder {
    /// Create a new unit builder for `pid`
    pub fn new(pid: u16) -> Self {
        Self {
            header: UnitHeader::new(pid),
            flags: AdaptationFlags::NONE,
            pcr: None,
            opcr: None,
            splice_countdown: None,
            private_data: None,
            adaptation_only: false,
            payload: Bytes::new(),
        }
    }

    /// Set the payload unit start indicator
    pub fn start(mut self) -> Self {
        self.header.payload_unit_start = true;
        self
    }

    /// Set the continuity counter (taken modulo 16)
    pub fn counter(mut self, counter: u8) -> Self {
        self.header.continuity_counter = counter % CONTINUITY_MODULUS;
        self
    }

    /// Set the transport error indicator
    pub fn transport_error(mut self) -> Self {
        self.header.transport_error = true;
        self
    }

    /// Set the transport priority bit
    pub fn priority(mut self) -> Self {
        self.header.transport_priority = true;
        self
    }

    /// Set the 2-bit scrambling control
    pub fn scrambling(mut self, scrambling: u8) -> Self {
        self.header.scrambling_control = scrambling & 0b11;
        self
    }

    /// Set the discontinuity indicator
    pub fn discontinuity(mut self) -> Self {
        self.flags |= AdaptationFlags::DISCONTINUITY;
        self
    }

    /// Set the random access indicator
    pub fn random_access(mut self) -> Self {
        self.flags |= AdaptationFlags::RANDOM_ACCESS;
        self
    }

    /// Attach a PCR reading
    pub fn pcr(mut self, base: u64, extension: u16) -> Self {
        self.pcr = Some((base, extension));
        self
    }

    /// Attach an OPCR reading
    pub fn opcr(mut self, base: u64, extension: u16) -> Self {
        self.opcr = Some((base, extension));
        self
    }

    /// Attach a splice countdown
    pub fn splice_countdown(mut self, countdown: i8) -> Self {
        self.splice_countdown = Some(countdown);
        self
    }

    /// Attach transport private data
    pub fn private_data(mut self, data: &[u8]) -> Self {
        self.private_data = Some(Bytes::copy_from_slice(data));
        self
    }

    /// Emit an adaptation-only unit (no payload)
    pub fn adaptation_only(mut self) -> Self {
        self.adaptation_only = true;
        self
    }

    /// Set the payload (at most 184 bytes, less when adaptation fields are attached)
    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = Bytes::copy_from_slice(payload);
        self
    }

    /// Build and encode the unit
    pub fn build(self) -> Result<[u8; TS_PACKET_SIZE], TsError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_UNIT_PAYLOAD {
            return Err(TsError::PayloadTooLarge(payload_len, MAX_UNIT_PAYLOAD));
        }
        if self.adaptation_only && payload_len > 0 {
            return Err(TsError::PayloadTooLarge(payload_len, 0));
        }

        let mut flags = self.flags;
        if self.pcr.is_some() {
            flags |= AdaptationFlags::PCR;
        }
        if self.opcr.is_some() {
            flags |= AdaptationFlags::OPCR;
        }
        if self.splice_countdown.is_some() {
            flags |= AdaptationFlags::SPLICING_POINT;
        }
        if self.private_data.is_some() {
            flags |= AdaptationFlags::PRIVATE_DATA;
        }
        let has_fields = flags != AdaptationFlags::NONE;

        let mut header = self.header;
        let mut unit = [0xFFu8; TS_PACKET_SIZE];

        if payload_len == MAX_UNIT_PAYLOAD && !has_fields {
            header.field_control = FieldControl::PayloadOnly;
            unit[..TS_HEADER_SIZE].copy_from_slice(&encode_unit_header(&header));
            unit[TS_HEADER_SIZE..].copy_from_slice(&self.payload);
            return Ok(unit);
        }

        // Bytes following the adaptation field length byte
        let Some(af_len) = (MAX_UNIT_PAYLOAD - 1).checked_sub(payload_len) else {
            return Err(TsError::PayloadTooLarge(payload_len, MAX_UNIT_PAYLOAD - 2));
        };

        let mut body = BytesMut::with_capacity(af_len);
        if has_fields || af_len > 0 {
            body.put_u8(flags);
            if let Some((base, ext)) = self.pcr {
                body.put_slice(&encode_clock(base, ext));
            }
            if let Some((base, ext)) = self.opcr {
                body.put_slice(&encode_clock(base, ext));
            }
            if let Some(countdown) = self.splice_countdown {
                body.put_i8(countdown);
            }
            if let Some(data) = &self.private_data {
                body.put_u8(data.len() as u8);
                body.put_slice(data);
            }
        }

        if body.len() > af_len {
            return Err(TsError::PayloadTooLarge(
                payload_len,
                (MAX_UNIT_PAYLOAD - 1).saturating_sub(body.len()),
            ));
        }

        header.field_control = if payload_len == 0 {
            FieldControl::AdaptationOnly
        } else {
            FieldControl::AdaptationAndPayload
        };

        unit[..TS_HEADER_SIZE].copy_from_slice(&encode_unit_header(&header));
        unit[TS_HEADER_SIZE] = af_len as u8;
        let body_start = TS_HEADER_SIZE + 1;
        unit[body_start..body_start + body.len()].copy_from_slice(&body);
        // Stuffing bytes between body and payload keep their 0xFF fill
        unit[body_start + af_len..].copy_from_slice(&self.payload);

        Ok(unit)
    }
}

/// Builder for PES headers
pub struct PesHeaderBuilder {
    stream_id: u8,
    packet_length: u16,
    pts: Option<u64>,
    dts: Option<u64>,
    data_alignment: bool,
    stuffing: u8,
}

impl PesHeaderBuilder {
    /// Create a new builder for `stream_id` with an unbounded length
    pub fn new(stream_id: u8) -> Self {
        Self {
            stream_id,
            packet_length: 0,
            pts: None,
            dts: None,
            data_alignment: false,
            stuffing: 0,
        }
    }

    /// Set the declared packet length
    pub fn packet_length(mut self, length: u16) -> Self {
        self.packet_length = length;
        self
    }

    /// Attach a PTS
    pub fn pts(mut self, pts: u64) -> Self {
        self.pts = Some(pts & CLOCK_BASE_MASK);
        self
    }

    /// Attach a DTS (only encoded together with a PTS)
    pub fn dts(mut self, dts: u64) -> Self {
        self.dts = Some(dts & CLOCK_BASE_MASK);
        self
    }

    /// Set the data alignment indicator
    pub fn data_alignment(mut self) -> Self {
        self.data_alignment = true;
        self
    }

    /// Pad the extended header with `count` stuffing bytes
    ///
    /// The header data length saturates at 255, so large counts are cut short.
    pub fn header_stuffing(mut self, count: u8) -> Self {
        self.stuffing = count;
        self
    }

    /// Build the header struct without encoding
    pub fn build_struct(self) -> PesHeader {
        let (extension, pts, dts) = if stream_id::has_extension(self.stream_id) {
            let (pts_dts_flags, pts, dts, ts_len) = match (self.pts, self.dts) {
                (Some(pts), Some(dts)) => (0b11, Some(pts), Some(dts), 2 * PES_TIMESTAMP_SIZE),
                (Some(pts), None) => (0b10, Some(pts), None, PES_TIMESTAMP_SIZE),
                _ => (0b00, None, None, 0),
            };
            let extension = PesExtension {
                scrambling_control: 0,
                priority: false,
                data_alignment: self.data_alignment,
                copyright: false,
                original: false,
                pts_dts_flags,
                escr_flag: false,
                es_rate_flag: false,
                dsm_trick_mode_flag: false,
                additional_copy_info_flag: false,
                crc_flag: false,
                extension_flag: false,
                header_data_length: (ts_len as u8).saturating_add(self.stuffing),
            };
            (Some(extension), pts, dts)
        } else {
            (None, None, None)
        };

        PesHeader {
            start_code_prefix: PES_START_CODE_PREFIX,
            stream_id: self.stream_id,
            packet_length: self.packet_length,
            extension,
            pts,
            dts,
        }
    }

    /// Build and encode the header
    pub fn build(self) -> Vec<u8> {
        encode_pes_header(&self.build_struct())
    }
}

/// Encode a PES header
///
/// Timestamps are written when both the flag and the value are present; the
/// rest of the declared header data length is filled with 0xFF.
pub fn encode_pes_header(header: &PesHeader) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(header.header_len());

    let prefix = header.start_code_prefix.to_be_bytes();
    buf.put_slice(&prefix[1..]);
    buf.put_u8(header.stream_id);
    buf.put_u16(header.packet_length);

    if let Some(ext) = &header.extension {
        buf.put_u8(
            0b1000_0000
                | (ext.scrambling_control & 0b11) << 4
                | (ext.priority as u8) << 3
                | (ext.data_alignment as u8) << 2
                | (ext.copyright as u8) << 1
                | ext.original as u8,
        );
        buf.put_u8(
            (ext.pts_dts_flags & 0b11) << 6
                | (ext.escr_flag as u8) << 5
                | (ext.es_rate_flag as u8) << 4
                | (ext.dsm_trick_mode_flag as u8) << 3
                | (ext.additional_copy_info_flag as u8) << 2
                | (ext.crc_flag as u8) << 1
                | ext.extension_flag as u8,
        );
        buf.put_u8(ext.header_data_length);

        let data_start = buf.len();
        match (ext.pts_dts_flags, header.pts, header.dts) {
            (0b11, Some(pts), Some(dts)) => {
                buf.put_slice(&encode_timestamp(PTS_WITH_DTS_PREFIX, pts));
                buf.put_slice(&encode_timestamp(DTS_PREFIX, dts));
            }
            (0b10, Some(pts), _) => {
                buf.put_slice(&encode_timestamp(PTS_ONLY_PREFIX, pts));
            }
            _ => {}
        }
        let written = buf.len() - data_start;
        for _ in written..ext.header_data_length as usize {
            buf.put_u8(0xFF);
        }
    }

    buf.to_vec()
}

/// Encode a complete PES packet: header followed by payload
pub fn encode_pes_packet(header: &PesHeader, payload: &[u8]) -> Vec<u8> {
    let mut packet = encode_pes_header(header);
    packet.extend_from_slice(payload);
    packet
}

/// Split an encoded PES packet across units of `pid`
///
/// The first unit carries the start indicator; counters run from `first_counter`
/// modulo 16; the last unit is padded with adaptation field stuffing.
pub fn packetize_pes(
    pid: u16,
    pes: &[u8],
    first_counter: u8,
) -> Result<Vec<[u8; TS_PACKET_SIZE]>, TsError> {
    let mut units = Vec::with_capacity(pes.len() / MAX_UNIT_PAYLOAD + 1);

    for (i, chunk) in pes.chunks(MAX_UNIT_PAYLOAD).enumerate() {
        let counter = ((first_counter as usize + i) % CONTINUITY_MODULUS as usize) as u8;
        let mut builder = UnitBuilder::new(pid).counter(counter).payload(chunk);
        if i == 0 {
            builder = builder.start();
        }
        units.push(builder.build()?);
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SYNC_BYTE;
    use crate::decoder::{decode_adaptation_field, decode_unit, decode_unit_header};

    #[test]
    fn test_encode_header_layout() {
        let mut header = UnitHeader::new(0x0100);
        header.payload_unit_start = true;
        header.continuity_counter = 5;

        assert_eq!(encode_unit_header(&header), [SYNC_BYTE, 0x41, 0x00, 0x15]);
    }

    #[test]
    fn test_full_payload_unit() {
        let payload = [0xAAu8; MAX_UNIT_PAYLOAD];
        let unit = UnitBuilder::new(0x42).payload(&payload).build().unwrap();

        let header = decode_unit_header(&unit).unwrap();
        assert_eq!(header.field_control, FieldControl::PayloadOnly);
        assert_eq!(&unit[4..], &payload[..]);
    }

    #[test]
    fn test_short_payload_is_stuffed() {
        let unit = UnitBuilder::new(0x42).payload(b"tail").build().unwrap();

        let decoded = decode_unit(&unit).unwrap();
        assert_eq!(
            decoded.header.field_control,
            FieldControl::AdaptationAndPayload
        );
        assert_eq!(decoded.adaptation.length, 179);
        assert_eq!(decoded.adaptation.stuffing_len, 178);
        assert_eq!(decoded.payload, b"tail");
    }

    #[test]
    fn test_single_stuffing_byte() {
        // 183 bytes of payload leaves exactly the length byte
        let payload = [0x11u8; MAX_UNIT_PAYLOAD - 1];
        let unit = UnitBuilder::new(0x42).payload(&payload).build().unwrap();

        assert_eq!(unit[4], 0);
        let decoded = decode_unit(&unit).unwrap();
        assert_eq!(decoded.payload, &payload[..]);
    }

    #[test]
    fn test_adaptation_only_unit() {
        let unit = UnitBuilder::new(0x42)
            .adaptation_only()
            .pcr(1234, 56)
            .build()
            .unwrap();

        let header = decode_unit_header(&unit).unwrap();
        assert_eq!(header.field_control, FieldControl::AdaptationOnly);
        let field = decode_adaptation_field(&unit, header.field_control).unwrap();
        assert_eq!(field.length, 183);
        assert_eq!(field.pcr, Some(1234 * 300 + 56));
    }

    #[test]
    fn test_payload_too_large_for_fields() {
        let payload = [0u8; MAX_UNIT_PAYLOAD - 2];
        let result = UnitBuilder::new(0x42).pcr(1, 1).payload(&payload).build();
        assert!(matches!(result, Err(TsError::PayloadTooLarge(182, _))));
    }

    #[test]
    fn test_pes_header_builder() {
        let bytes = PesHeaderBuilder::new(0xE0)
            .packet_length(100)
            .pts(0x1_0000_0001)
            .build();

        assert_eq!(&bytes[..6], &[0x00, 0x00, 0x01, 0xE0, 0x00, 100]);
        assert_eq!(bytes[6] & 0b1100_0000, 0b1000_0000);
        assert_eq!(bytes[7] >> 6, 0b10);
        assert_eq!(bytes[8], 5);
        assert_eq!(bytes[9] >> 4, PTS_ONLY_PREFIX);
        assert_eq!(bytes.len(), 14);
    }

    #[test]
    fn test_pes_header_stuffing_saturates() {
        let header = PesHeaderBuilder::new(0xE0)
            .pts(1)
            .dts(2)
            .header_stuffing(250)
            .build_struct();
        assert_eq!(header.extension.map(|e| e.header_data_length), Some(255));
        assert_eq!(header.header_len(), 9 + 255);

        let bytes = encode_pes_header(&header);
        assert_eq!(bytes.len(), 9 + 255);
        assert!(bytes[19..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_packetize_counts_and_counters() {
        let header = PesHeaderBuilder::new(0xC0).build_struct();
        let pes = encode_pes_packet(&header, &[7u8; 400]);

        let units = packetize_pes(0x88, &pes, 14).unwrap();
        assert_eq!(units.len(), 3);

        let counters: Vec<u8> = units
            .iter()
            .map(|u| decode_unit_header(u).unwrap().continuity_counter)
            .collect();
        assert_eq!(counters, vec![14, 15, 0]);
        assert!(decode_unit_header(&units[0]).unwrap().payload_unit_start);
        assert!(!decode_unit_header(&units[1]).unwrap().payload_unit_start);
    }
}
