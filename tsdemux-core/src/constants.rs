//! Constants and limits for the transport stream format

use serde::{Deserialize, Serialize};

/// Size of one transport unit in bytes
pub const TS_PACKET_SIZE: usize = 188;

/// Sync byte that opens every transport unit
pub const SYNC_BYTE: u8 = 0x47;

/// Size of the fixed unit header (sync + flags/PID + scrambling/control/counter)
pub const TS_HEADER_SIZE: usize = 4;

/// Largest payload a single unit can carry (no adaptation field)
pub const MAX_UNIT_PAYLOAD: usize = TS_PACKET_SIZE - TS_HEADER_SIZE;

/// Largest value of the adaptation field length byte
/// (adaptation-only unit: everything after the header and the length byte)
pub const MAX_ADAPTATION_FIELD_LENGTH: u8 = (TS_PACKET_SIZE - TS_HEADER_SIZE - 1) as u8;

/// Highest 13-bit PID value
pub const MAX_PID: u16 = 0x1FFF;

/// PID reserved for null (padding) units
pub const NULL_PID: u16 = 0x1FFF;

/// Modulus of the 4-bit continuity counter
pub const CONTINUITY_MODULUS: u8 = 16;

/// Size of one PCR / OPCR reading in the adaptation field
pub const CLOCK_READING_SIZE: usize = 6;

/// Multiplier combining a 33-bit clock base (90 kHz) with its 9-bit extension (27 MHz)
pub const CLOCK_MULTIPLIER: u64 = 300;

/// Mask for 33-bit clock and timestamp values
pub const CLOCK_BASE_MASK: u64 = (1 << 33) - 1;

/// Mask for the 9-bit clock extension
pub const CLOCK_EXTENSION_MASK: u16 = (1 << 9) - 1;

/// PES start code prefix (0x000001)
pub const PES_START_CODE_PREFIX: u32 = 0x00_0001;

/// PES prologue: start code prefix (3) + stream id (1) + packet length (2)
pub const PES_PROLOGUE_SIZE: usize = 6;

/// Fixed part of the PES extended header: two flag bytes + header data length byte
pub const PES_EXTENSION_FIXED_SIZE: usize = 3;

/// Size of an encoded PTS or DTS
pub const PES_TIMESTAMP_SIZE: usize = 5;

/// Top two bits of the first extended header byte
pub const PES_EXTENSION_MARKER: u8 = 0b1000_0000;

/// PTS prefix nibble when only a PTS is present
pub const PTS_ONLY_PREFIX: u8 = 0b0010;

/// PTS prefix nibble when a DTS follows
pub const PTS_WITH_DTS_PREFIX: u8 = 0b0011;

/// DTS prefix nibble
pub const DTS_PREFIX: u8 = 0b0001;

/// Stream ids whose PES packets never carry the extended header
pub mod stream_id {
    /// program_stream_map
    pub const PROGRAM_STREAM_MAP: u8 = 0xBC;
    /// padding_stream
    pub const PADDING_STREAM: u8 = 0xBE;
    /// private_stream_2
    pub const PRIVATE_STREAM_2: u8 = 0xBF;
    /// ECM_stream
    pub const ECM: u8 = 0xF0;
    /// EMM_stream
    pub const EMM: u8 = 0xF1;
    /// DSMCC_stream
    pub const DSMCC: u8 = 0xF2;
    /// ITU-T Rec. H.222.1 type E
    pub const H222_1_TYPE_E: u8 = 0xF8;
    /// program_stream_directory
    pub const PROGRAM_STREAM_DIRECTORY: u8 = 0xFF;

    /// The full exclusion set
    pub const WITHOUT_EXTENSION: [u8; 8] = [
        PROGRAM_STREAM_MAP,
        PADDING_STREAM,
        PRIVATE_STREAM_2,
        ECM,
        EMM,
        DSMCC,
        H222_1_TYPE_E,
        PROGRAM_STREAM_DIRECTORY,
    ];

    /// Check whether a stream id may carry the extended PES header
    pub fn has_extension(id: u8) -> bool {
        !WITHOUT_EXTENSION.contains(&id)
    }
}

/// Adaptation field control (2 bits of header byte 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldControl {
    /// 0b00, reserved by the format
    Reserved,
    /// 0b01, payload only
    PayloadOnly,
    /// 0b10, adaptation field only
    AdaptationOnly,
    /// 0b11, adaptation field followed by payload
    AdaptationAndPayload,
}

impl FieldControl {
    /// Decode from the low two bits of `bits`
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b01 => FieldControl::PayloadOnly,
            0b10 => FieldControl::AdaptationOnly,
            0b11 => FieldControl::AdaptationAndPayload,
            _ => FieldControl::Reserved,
        }
    }

    /// The 2-bit wire value
    pub const fn bits(&self) -> u8 {
        match self {
            FieldControl::Reserved => 0b00,
            FieldControl::PayloadOnly => 0b01,
            FieldControl::AdaptationOnly => 0b10,
            FieldControl::AdaptationAndPayload => 0b11,
        }
    }

    /// Check if an adaptation field follows the header
    pub const fn has_adaptation_field(&self) -> bool {
        matches!(
            self,
            FieldControl::AdaptationOnly | FieldControl::AdaptationAndPayload
        )
    }

    /// Check if the unit carries payload bytes
    pub const fn has_payload(&self) -> bool {
        matches!(
            self,
            FieldControl::PayloadOnly | FieldControl::AdaptationAndPayload
        )
    }
}

/// Adaptation field flags (the byte following the length byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationFlags(u8);

impl AdaptationFlags {
    /// No flags set
    pub const NONE: u8 = 0b0000_0000;

    /// Discontinuity indicator
    pub const DISCONTINUITY: u8 = 0b1000_0000;

    /// Random access indicator
    pub const RANDOM_ACCESS: u8 = 0b0100_0000;

    /// Elementary stream priority indicator
    pub const ES_PRIORITY: u8 = 0b0010_0000;

    /// PCR present
    pub const PCR: u8 = 0b0001_0000;

    /// OPCR present
    pub const OPCR: u8 = 0b0000_1000;

    /// Splice countdown present
    pub const SPLICING_POINT: u8 = 0b0000_0100;

    /// Transport private data present
    pub const PRIVATE_DATA: u8 = 0b0000_0010;

    /// Adaptation field extension present
    pub const EXTENSION: u8 = 0b0000_0001;

    /// Create new flags from raw byte
    pub const fn new(flags: u8) -> Self {
        Self(flags)
    }

    /// Get raw flags byte
    pub const fn as_u8(&self) -> u8 {
        self.0
    }

    /// Discontinuity indicator
    pub const fn discontinuity(&self) -> bool {
        (self.0 & Self::DISCONTINUITY) != 0
    }

    /// Random access indicator
    pub const fn random_access(&self) -> bool {
        (self.0 & Self::RANDOM_ACCESS) != 0
    }

    /// Elementary stream priority indicator
    pub const fn es_priority(&self) -> bool {
        (self.0 & Self::ES_PRIORITY) != 0
    }

    /// Check if a PCR reading follows
    pub const fn has_pcr(&self) -> bool {
        (self.0 & Self::PCR) != 0
    }

    /// Check if an OPCR reading follows
    pub const fn has_opcr(&self) -> bool {
        (self.0 & Self::OPCR) != 0
    }

    /// Check if a splice countdown follows
    pub const fn splicing_point(&self) -> bool {
        (self.0 & Self::SPLICING_POINT) != 0
    }

    /// Check if transport private data follows
    pub const fn has_private_data(&self) -> bool {
        (self.0 & Self::PRIVATE_DATA) != 0
    }

    /// Check if the extension block follows
    pub const fn has_extension(&self) -> bool {
        (self.0 & Self::EXTENSION) != 0
    }
}

impl Default for AdaptationFlags {
    fn default() -> Self {
        Self(Self::NONE)
    }
}

/// Flags of the adaptation field extension block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionFlags(u8);

impl ExtensionFlags {
    /// Legal time window present (2 bytes)
    pub const LTW: u8 = 0b1000_0000;

    /// Piecewise rate present (3 bytes)
    pub const PIECEWISE_RATE: u8 = 0b0100_0000;

    /// Seamless splice present (5 bytes)
    pub const SEAMLESS_SPLICE: u8 = 0b0010_0000;

    /// Create new flags from raw byte
    pub const fn new(flags: u8) -> Self {
        Self(flags)
    }

    /// Get raw flags byte
    pub const fn as_u8(&self) -> u8 {
        self.0
    }

    /// Legal time window present
    pub const fn has_ltw(&self) -> bool {
        (self.0 & Self::LTW) != 0
    }

    /// Piecewise rate present
    pub const fn has_piecewise_rate(&self) -> bool {
        (self.0 & Self::PIECEWISE_RATE) != 0
    }

    /// Seamless splice present
    pub const fn has_seamless_splice(&self) -> bool {
        (self.0 & Self::SEAMLESS_SPLICE) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_control_predicates() {
        assert!(!FieldControl::Reserved.has_payload());
        assert!(!FieldControl::Reserved.has_adaptation_field());
        assert!(FieldControl::PayloadOnly.has_payload());
        assert!(!FieldControl::PayloadOnly.has_adaptation_field());
        assert!(!FieldControl::AdaptationOnly.has_payload());
        assert!(FieldControl::AdaptationOnly.has_adaptation_field());
        assert!(FieldControl::AdaptationAndPayload.has_payload());
        assert!(FieldControl::AdaptationAndPayload.has_adaptation_field());
    }

    #[test]
    fn test_field_control_bits() {
        for bits in 0..4u8 {
            assert_eq!(FieldControl::from_bits(bits).bits(), bits);
        }
    }

    #[test]
    fn test_excluded_stream_ids() {
        assert!(!stream_id::has_extension(0xBE));
        assert!(!stream_id::has_extension(0xF8));
        assert!(stream_id::has_extension(0xE0));
        assert!(stream_id::has_extension(0xC0));
        assert!(stream_id::has_extension(0xBD));
    }
}
