//! Transport unit decoding: the fixed header and the adaptation field

use crate::constants::{
    AdaptationFlags, ExtensionFlags, FieldControl, CLOCK_READING_SIZE,
    MAX_ADAPTATION_FIELD_LENGTH, SYNC_BYTE, TS_HEADER_SIZE, TS_PACKET_SIZE,
};
use crate::error::TsError;
use crate::types::{
    combine_clock, AdaptationExtension, AdaptationField, LegalTimeWindow, SeamlessSplice,
    UnitHeader,
};

#[cfg(feature = "logging")]
use tracing::warn;

/// A unit split into its decoded header, adaptation field and payload slice
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedUnit<'a> {
    /// Fixed header
    pub header: UnitHeader,

    /// Adaptation field (`present == false` when the unit has none)
    pub adaptation: AdaptationField,

    /// Payload bytes, empty when the field control carries no payload
    pub payload: &'a [u8],
}

/// Decode the fixed 4-byte unit header
///
/// Only the first 4 bytes are read. Fails with [`TsError::SyncError`] when byte 0
/// is not the sync byte; the caller decides how to resynchronize.
pub fn decode_unit_header(unit: &[u8]) -> Result<UnitHeader, TsError> {
    if unit.len() < TS_HEADER_SIZE {
        return Err(TsError::IncompleteUnit {
            expected: TS_HEADER_SIZE,
            actual: unit.len(),
        });
    }

    if unit[0] != SYNC_BYTE {
        return Err(TsError::SyncError(unit[0]));
    }

    Ok(UnitHeader {
        sync_byte: unit[0],
        transport_error: (unit[1] & 0b1000_0000) != 0,
        payload_unit_start: (unit[1] & 0b0100_0000) != 0,
        transport_priority: (unit[1] & 0b0010_0000) != 0,
        pid: u16::from_be_bytes([unit[1] & 0b0001_1111, unit[2]]),
        scrambling_control: (unit[3] & 0b1100_0000) >> 6,
        field_control: FieldControl::from_bits((unit[3] & 0b0011_0000) >> 4),
        continuity_counter: unit[3] & 0b0000_1111,
    })
}

/// Decode the adaptation field of a full 188-byte unit
///
/// Lenient: sub-fields that do not fit in the declared length stop the parse and
/// mark the field `malformed` with zero stuffing. Use
/// [`decode_adaptation_field_strict`] to turn that condition into an error.
pub fn decode_adaptation_field(
    unit: &[u8],
    field_control: FieldControl,
) -> Result<AdaptationField, TsError> {
    decode_adaptation_field_inner(unit, field_control).map(|(field, _)| field)
}

/// Decode the adaptation field, failing with [`TsError::MalformedAdaptationField`]
/// on any length/flag inconsistency
pub fn decode_adaptation_field_strict(
    unit: &[u8],
    field_control: FieldControl,
) -> Result<AdaptationField, TsError> {
    match decode_adaptation_field_inner(unit, field_control)? {
        (_, Some(err)) => Err(err),
        (field, None) => Ok(field),
    }
}

/// Decode a whole unit: header, adaptation field and payload slice
pub fn decode_unit(unit: &[u8]) -> Result<DecodedUnit<'_>, TsError> {
    if unit.len() != TS_PACKET_SIZE {
        return Err(TsError::IncompleteUnit {
            expected: TS_PACKET_SIZE,
            actual: unit.len(),
        });
    }

    let header = decode_unit_header(unit)?;
    let adaptation = decode_adaptation_field(unit, header.field_control)?;
    let payload = if header.has_payload() {
        &unit[adaptation.payload_offset()..]
    } else {
        &[][..]
    };

    Ok(DecodedUnit {
        header,
        adaptation,
        payload,
    })
}

fn decode_adaptation_field_inner(
    unit: &[u8],
    field_control: FieldControl,
) -> Result<(AdaptationField, Option<TsError>), TsError> {
    if !field_control.has_adaptation_field() {
        return Ok((AdaptationField::absent(), None));
    }

    if unit.len() < TS_PACKET_SIZE {
        return Err(TsError::IncompleteUnit {
            expected: TS_PACKET_SIZE,
            actual: unit.len(),
        });
    }

    let length = unit[TS_HEADER_SIZE];
    let mut field = AdaptationField {
        present: true,
        length,
        ..AdaptationField::absent()
    };

    // A following payload needs at least one byte of the unit
    let max_length = if field_control.has_payload() {
        MAX_ADAPTATION_FIELD_LENGTH - 1
    } else {
        MAX_ADAPTATION_FIELD_LENGTH
    };

    let mut problem = None;
    if length > max_length {
        field.malformed = true;
        problem = Some(TsError::MalformedAdaptationField {
            declared: length as usize,
            consumed: max_length as usize,
        });
    }

    let limit = length.min(max_length) as usize;
    if limit == 0 {
        return Ok((field, problem));
    }

    let start = TS_HEADER_SIZE + 1;
    let body = &unit[start..start + limit];
    field.flags = AdaptationFlags::new(body[0]);

    let mut reader = FieldReader {
        body,
        pos: 1,
        wanted: 0,
    };
    match read_sub_fields(&mut reader, &mut field) {
        Some(()) => {
            field.stuffing_len = body.len() - reader.pos;
        }
        None => {
            // Flagged sub-fields overrun the declared length: clamp stuffing, keep going
            field.malformed = true;
            field.stuffing_len = 0;
            problem = Some(TsError::MalformedAdaptationField {
                declared: length as usize,
                consumed: reader.wanted,
            });
        }
    }

    #[cfg(feature = "logging")]
    if let Some(err) = &problem {
        warn!("{}", err);
    }

    Ok((field, problem))
}

/// Bounded cursor over the adaptation field body
struct FieldReader<'a> {
    body: &'a [u8],
    pos: usize,
    wanted: usize,
}

impl<'a> FieldReader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.pos + n > self.body.len() {
            self.wanted = self.pos + n;
            return None;
        }
        let bytes = &self.body[self.pos..self.pos + n];
        self.pos += n;
        Some(bytes)
    }
}

/// Fixed sub-field order: PCR, OPCR, splice countdown, private data, extension
fn read_sub_fields(reader: &mut FieldReader<'_>, field: &mut AdaptationField) -> Option<()> {
    let flags = field.flags;

    if flags.has_pcr() {
        field.pcr = Some(decode_clock(reader.take(CLOCK_READING_SIZE)?));
    }

    if flags.has_opcr() {
        field.opcr = Some(decode_clock(reader.take(CLOCK_READING_SIZE)?));
    }

    if flags.splicing_point() {
        field.splice_countdown = Some(reader.take(1)?[0] as i8);
    }

    if flags.has_private_data() {
        let len = reader.take(1)?[0] as usize;
        field.private_data = Some(reader.take(len)?.to_vec());
    }

    if flags.has_extension() {
        let len = reader.take(1)?[0];
        let block = reader.take(len as usize)?;
        field.extension = Some(read_extension(len, block)?);
    }

    Some(())
}

fn read_extension(length: u8, block: &[u8]) -> Option<AdaptationExtension> {
    let mut extension = AdaptationExtension {
        length,
        ltw: None,
        piecewise_rate: None,
        seamless_splice: None,
    };

    if block.is_empty() {
        return Some(extension);
    }

    let flags = ExtensionFlags::new(block[0]);
    let mut reader = FieldReader {
        body: block,
        pos: 1,
        wanted: 0,
    };

    if flags.has_ltw() {
        let b = reader.take(2)?;
        extension.ltw = Some(LegalTimeWindow {
            valid: (b[0] & 0b1000_0000) != 0,
            offset: u16::from_be_bytes([b[0] & 0b0111_1111, b[1]]),
        });
    }

    if flags.has_piecewise_rate() {
        let b = reader.take(3)?;
        extension.piecewise_rate =
            Some(((b[0] & 0b0011_1111) as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32);
    }

    if flags.has_seamless_splice() {
        let b = reader.take(5)?;
        extension.seamless_splice = Some(SeamlessSplice {
            splice_type: b[0] >> 4,
            dts_next_au: decode_timestamp(b),
        });
    }

    // Remaining bytes of the block are reserved
    Some(extension)
}

/// Decode a 6-byte PCR/OPCR reading into its extended value
///
/// Layout: 33-bit base, 6 reserved bits, 9-bit extension.
pub fn decode_clock(b: &[u8]) -> u64 {
    let base = (b[0] as u64) << 25
        | (b[1] as u64) << 17
        | (b[2] as u64) << 9
        | (b[3] as u64) << 1
        | (b[4] as u64) >> 7;
    let extension = ((b[4] & 0b0000_0001) as u16) << 8 | b[5] as u16;
    combine_clock(base, extension)
}

/// Decode a 33-bit timestamp spread over five marker-delimited bytes
///
/// The prefix nibble of `b[0]` is not checked here.
pub fn decode_timestamp(b: &[u8]) -> u64 {
    ((b[0] & 0b0000_1110) as u64) << 29
        | (b[1] as u64) << 22
        | ((b[2] & 0b1111_1110) as u64) << 14
        | (b[3] as u64) << 7
        | ((b[4] & 0b1111_1110) as u64) >> 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{encode_clock, encode_unit_header, UnitBuilder};

    #[test]
    fn test_decode_header_fields() {
        let unit = [0x47, 0xE1, 0x23, 0x9A];
        let header = decode_unit_header(&unit).unwrap();

        assert!(header.transport_error);
        assert!(header.payload_unit_start);
        assert!(header.transport_priority);
        assert_eq!(header.pid, 0x0123);
        assert_eq!(header.scrambling_control, 0b10);
        assert_eq!(header.field_control, FieldControl::PayloadOnly);
        assert_eq!(header.continuity_counter, 0xA);
    }

    #[test]
    fn test_decode_header_bad_sync() {
        let result = decode_unit_header(&[0x46, 0x00, 0x00, 0x10]);
        assert_eq!(result, Err(TsError::SyncError(0x46)));
    }

    #[test]
    fn test_decode_header_too_short() {
        let result = decode_unit_header(&[0x47, 0x00]);
        assert!(matches!(result, Err(TsError::IncompleteUnit { .. })));
    }

    #[test]
    fn test_reserved_field_control_is_reported() {
        let header = decode_unit_header(&[0x47, 0x00, 0x44, 0x05]).unwrap();
        assert_eq!(header.field_control, FieldControl::Reserved);
        assert!(!header.has_payload());
        assert_eq!(
            header.validate(),
            Err(TsError::ReservedFieldControl { pid: 0x44 })
        );
    }

    #[test]
    fn test_header_round_trip() {
        let bytes = [0x47, 0x5F, 0xFF, 0xF7];
        let header = decode_unit_header(&bytes).unwrap();
        assert_eq!(encode_unit_header(&header), bytes);
    }

    #[test]
    fn test_decode_pcr() {
        let unit = UnitBuilder::new(0x100)
            .pcr(100, 9)
            .payload(b"abc")
            .build()
            .unwrap();

        let decoded = decode_unit(&unit).unwrap();
        assert_eq!(decoded.adaptation.pcr, Some(30009));
        assert_eq!(decoded.adaptation.opcr, None);
        assert!(!decoded.adaptation.malformed);
        assert_eq!(decoded.payload, b"abc");
    }

    #[test]
    fn test_decode_clock_bit_layout() {
        let base = 0x1_2345_6789u64;
        let ext = 0x1A5u16;
        let bytes = encode_clock(base, ext);
        assert_eq!(decode_clock(&bytes), base * 300 + ext as u64);
    }

    #[test]
    fn test_payload_only_has_no_adaptation_field() {
        let mut unit = [0xFFu8; TS_PACKET_SIZE];
        unit[..4].copy_from_slice(&[0x47, 0x00, 0x10, 0x10]);

        let field = decode_adaptation_field(&unit, FieldControl::PayloadOnly).unwrap();
        assert!(!field.present);
        assert_eq!(field.num_bytes(), 0);
    }

    #[test]
    fn test_zero_length_adaptation_field() {
        let mut unit = [0xFFu8; TS_PACKET_SIZE];
        unit[..5].copy_from_slice(&[0x47, 0x00, 0x10, 0x30, 0x00]);

        let field = decode_adaptation_field(&unit, FieldControl::AdaptationAndPayload).unwrap();
        assert!(field.present);
        assert_eq!(field.length, 0);
        assert_eq!(field.flags.as_u8(), 0);
        assert_eq!(field.num_bytes(), 1);
        assert_eq!(field.stuffing_len, 0);
    }

    #[test]
    fn test_stuffing_is_computed() {
        let mut unit = [0xFFu8; TS_PACKET_SIZE];
        // length 10, flags: PCR + splicing point
        unit[..6].copy_from_slice(&[0x47, 0x00, 0x10, 0x30, 10, 0b0001_0100]);
        unit[6..12].copy_from_slice(&encode_clock(1, 2));
        unit[12] = 0xFE; // splice countdown -2

        let field = decode_adaptation_field(&unit, FieldControl::AdaptationAndPayload).unwrap();
        assert_eq!(field.pcr, Some(302));
        assert_eq!(field.splice_countdown, Some(-2));
        // 10 - flags(1) - pcr(6) - splice(1)
        assert_eq!(field.stuffing_len, 2);
        assert!(!field.malformed);
    }

    #[test]
    fn test_malformed_flags_clamp_stuffing() {
        let mut unit = [0xFFu8; TS_PACKET_SIZE];
        // length 3 but PCR and OPCR flagged
        unit[..6].copy_from_slice(&[0x47, 0x00, 0x10, 0x30, 3, 0b0001_1000]);

        let field = decode_adaptation_field(&unit, FieldControl::AdaptationAndPayload).unwrap();
        assert!(field.malformed);
        assert_eq!(field.stuffing_len, 0);
        assert_eq!(field.pcr, None);
        assert_eq!(field.payload_offset(), 8);

        let strict = decode_adaptation_field_strict(&unit, FieldControl::AdaptationAndPayload);
        assert!(matches!(
            strict,
            Err(TsError::MalformedAdaptationField { declared: 3, .. })
        ));
    }

    #[test]
    fn test_oversized_length_is_clamped() {
        let mut unit = [0x00u8; TS_PACKET_SIZE];
        unit[..5].copy_from_slice(&[0x47, 0x00, 0x10, 0x30, 200]);

        let field = decode_adaptation_field(&unit, FieldControl::AdaptationAndPayload).unwrap();
        assert!(field.malformed);
        assert_eq!(field.payload_offset(), TS_PACKET_SIZE);
    }

    #[test]
    fn test_private_data_and_extension() {
        let mut unit = [0xFFu8; TS_PACKET_SIZE];
        let body: &[u8] = &[
            0b0000_0011, // private data + extension
            2, 0xAB, 0xCD, // private data
            8,           // extension length
            0b1010_0000, // ltw + seamless splice
            0x80 | 0x12, 0x34, // ltw valid, offset 0x1234
            0x31, 0x00, 0x01, 0x00, 0x01, // splice type 3, dts_next_au bits
        ];
        unit[..4].copy_from_slice(&[0x47, 0x00, 0x10, 0x30]);
        unit[4] = body.len() as u8 + 1;
        unit[5..5 + body.len()].copy_from_slice(body);

        let field = decode_adaptation_field(&unit, FieldControl::AdaptationAndPayload).unwrap();
        assert!(!field.malformed);
        assert_eq!(field.private_data.as_deref(), Some(&[0xAB, 0xCD][..]));
        let ext = field.extension.unwrap();
        assert_eq!(ext.length, 8);
        assert_eq!(
            ext.ltw,
            Some(LegalTimeWindow {
                valid: true,
                offset: 0x1234
            })
        );
        assert_eq!(ext.piecewise_rate, None);
        let splice = ext.seamless_splice.unwrap();
        assert_eq!(splice.splice_type, 3);
        assert_eq!(splice.dts_next_au, 0);
        assert_eq!(field.stuffing_len, 1);
    }

    #[test]
    fn test_piecewise_rate_and_seamless_splice() {
        let mut unit = [0xFFu8; TS_PACKET_SIZE];
        let body: &[u8] = &[
            0b0000_0001,        // extension
            9,                  // extension length
            0b0110_0000,        // piecewise rate + seamless splice
            0xC0 | 0x2A, 0xBC, 0xDE, // reserved bits set, rate 0x2ABCDE
            0x59, 0x8D, 0x15, 0xCF, 0x13, // splice type 5, dts_next_au 0x1_2345_6789
        ];
        unit[..4].copy_from_slice(&[0x47, 0x00, 0x10, 0x30]);
        unit[4] = body.len() as u8;
        unit[5..5 + body.len()].copy_from_slice(body);

        let field = decode_adaptation_field(&unit, FieldControl::AdaptationAndPayload).unwrap();
        assert!(!field.malformed);
        assert_eq!(field.stuffing_len, 0);
        let ext = field.extension.unwrap();
        assert_eq!(ext.ltw, None);
        assert_eq!(ext.piecewise_rate, Some(0x2A_BCDE));
        assert_eq!(
            ext.seamless_splice,
            Some(SeamlessSplice {
                splice_type: 5,
                dts_next_au: 0x1_2345_6789
            })
        );
    }

    #[test]
    fn test_extension_overrun_is_malformed() {
        let mut unit = [0xFFu8; TS_PACKET_SIZE];
        // length 3: flags, ext length 1, ext flags claiming LTW without room
        unit[..8].copy_from_slice(&[0x47, 0x00, 0x10, 0x30, 3, 0b0000_0001, 1, 0x80]);

        let field = decode_adaptation_field(&unit, FieldControl::AdaptationAndPayload).unwrap();
        assert!(field.malformed);
        assert_eq!(field.stuffing_len, 0);
    }

    #[test]
    fn test_decode_unit_requires_full_size() {
        let result = decode_unit(&[0x47, 0x00, 0x10, 0x10]);
        assert_eq!(
            result,
            Err(TsError::IncompleteUnit {
                expected: TS_PACKET_SIZE,
                actual: 4
            })
        );
    }
}
