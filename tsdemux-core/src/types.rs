//! Core types for transport units and PES packets

use crate::constants::{
    stream_id, AdaptationFlags, FieldControl, CLOCK_BASE_MASK, CLOCK_EXTENSION_MASK,
    CLOCK_MULTIPLIER, CONTINUITY_MODULUS, MAX_PID, PES_EXTENSION_FIXED_SIZE,
    PES_PROLOGUE_SIZE, PES_START_CODE_PREFIX, SYNC_BYTE, TS_HEADER_SIZE, TS_PACKET_SIZE,
};
use crate::error::TsError;
use alloc::vec::Vec;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Combine a 33-bit clock base with its 9-bit extension into the extended clock value
pub const fn combine_clock(base: u64, extension: u16) -> u64 {
    (base & CLOCK_BASE_MASK) * CLOCK_MULTIPLIER + (extension & CLOCK_EXTENSION_MASK) as u64
}

/// The fixed 4-byte header of a transport unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitHeader {
    /// Sync byte (0x47 for every decoded header)
    pub sync_byte: u8,

    /// Transport error indicator
    pub transport_error: bool,

    /// Payload unit start indicator: a new PES packet begins in this unit
    pub payload_unit_start: bool,

    /// Transport priority
    pub transport_priority: bool,

    /// 13-bit packet identifier
    pub pid: u16,

    /// 2-bit transport scrambling control
    pub scrambling_control: u8,

    /// Adaptation field control
    pub field_control: FieldControl,

    /// 4-bit continuity counter
    pub continuity_counter: u8,
}

impl UnitHeader {
    /// Create a payload-only header for `pid` with all flags cleared
    pub fn new(pid: u16) -> Self {
        Self {
            sync_byte: SYNC_BYTE,
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid,
            scrambling_control: 0,
            field_control: FieldControl::PayloadOnly,
            continuity_counter: 0,
        }
    }

    /// Check that every field fits its wire width and that the field control is not reserved
    pub fn validate(&self) -> Result<(), TsError> {
        if self.sync_byte != SYNC_BYTE {
            return Err(TsError::SyncError(self.sync_byte));
        }

        if self.pid > MAX_PID {
            return Err(TsError::InvalidPid(self.pid));
        }

        if self.field_control == FieldControl::Reserved {
            return Err(TsError::ReservedFieldControl { pid: self.pid });
        }

        Ok(())
    }

    /// Check if an adaptation field follows the header
    pub fn has_adaptation_field(&self) -> bool {
        self.field_control.has_adaptation_field()
    }

    /// Check if the unit carries payload
    pub fn has_payload(&self) -> bool {
        self.field_control.has_payload()
    }

    /// Counter value the next payload-carrying unit of this PID must carry
    pub fn next_counter(&self) -> u8 {
        (self.continuity_counter + 1) % CONTINUITY_MODULUS
    }
}

/// Legal time window sub-block of the adaptation field extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalTimeWindow {
    /// ltw_valid_flag
    pub valid: bool,
    /// 15-bit ltw_offset
    pub offset: u16,
}

/// Seamless splice sub-block of the adaptation field extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeamlessSplice {
    /// 4-bit splice_type
    pub splice_type: u8,
    /// 33-bit DTS_next_AU
    pub dts_next_au: u64,
}

/// Adaptation field extension block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationExtension {
    /// Declared extension length (bytes after the length byte)
    pub length: u8,
    /// Legal time window, when flagged
    pub ltw: Option<LegalTimeWindow>,
    /// 22-bit piecewise rate, when flagged
    pub piecewise_rate: Option<u32>,
    /// Seamless splice, when flagged
    pub seamless_splice: Option<SeamlessSplice>,
}

/// Decoded adaptation field
///
/// Clock readings are only exposed in their extended form (`base * 300 + extension`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationField {
    /// Whether the unit carries an adaptation field at all
    pub present: bool,

    /// Declared length byte (bytes following the length byte)
    pub length: u8,

    /// Flags byte, all clear when `length` is 0
    pub flags: AdaptationFlags,

    /// Extended program clock reference
    pub pcr: Option<u64>,

    /// Extended original program clock reference
    pub opcr: Option<u64>,

    /// Signed splice countdown
    pub splice_countdown: Option<i8>,

    /// Transport private data bytes
    pub private_data: Option<Vec<u8>>,

    /// Extension block
    pub extension: Option<AdaptationExtension>,

    /// Residual stuffing bytes up to the declared length
    pub stuffing_len: usize,

    /// Sub-fields did not fit in the declared length, or the length did not fit in the unit
    pub malformed: bool,
}

impl AdaptationField {
    /// The field of a unit without adaptation field
    pub fn absent() -> Self {
        Self {
            present: false,
            length: 0,
            flags: AdaptationFlags::default(),
            pcr: None,
            opcr: None,
            splice_countdown: None,
            private_data: None,
            extension: None,
            stuffing_len: 0,
            malformed: false,
        }
    }

    /// Bytes the field occupies in the unit, length byte included
    ///
    /// Clamped so that `TS_HEADER_SIZE + num_bytes()` never passes the end of the unit.
    pub fn num_bytes(&self) -> usize {
        if self.present {
            (self.length as usize + 1).min(TS_PACKET_SIZE - TS_HEADER_SIZE)
        } else {
            0
        }
    }

    /// Offset of the first payload byte within the unit
    pub fn payload_offset(&self) -> usize {
        TS_HEADER_SIZE + self.num_bytes()
    }
}

impl Default for AdaptationField {
    fn default() -> Self {
        Self::absent()
    }
}

/// Optional extended PES header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PesExtension {
    /// 2-bit PES scrambling control
    pub scrambling_control: u8,
    /// PES priority
    pub priority: bool,
    /// Data alignment indicator
    pub data_alignment: bool,
    /// Copyright
    pub copyright: bool,
    /// Original or copy
    pub original: bool,
    /// 2-bit PTS/DTS flags
    pub pts_dts_flags: u8,
    /// ESCR flag
    pub escr_flag: bool,
    /// ES rate flag
    pub es_rate_flag: bool,
    /// DSM trick mode flag
    pub dsm_trick_mode_flag: bool,
    /// Additional copy info flag
    pub additional_copy_info_flag: bool,
    /// PES CRC flag
    pub crc_flag: bool,
    /// PES extension flag
    pub extension_flag: bool,
    /// PES header data length (bytes after this field)
    pub header_data_length: u8,
}

/// Decoded PES packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PesHeader {
    /// 24-bit packet start code prefix
    pub start_code_prefix: u32,

    /// Stream identifier
    pub stream_id: u8,

    /// Declared PES packet length, 0 when unbounded
    pub packet_length: u16,

    /// Extended header, when the stream id allows it and the marker bits match
    pub extension: Option<PesExtension>,

    /// Presentation timestamp (33 bits)
    pub pts: Option<u64>,

    /// Decoding timestamp (33 bits)
    pub dts: Option<u64>,
}

impl PesHeader {
    /// Check the start code prefix against 0x000001
    pub fn has_valid_start_code(&self) -> bool {
        self.start_code_prefix == PES_START_CODE_PREFIX
    }

    /// Check whether the stream id may carry an extended header
    pub fn allows_extension(&self) -> bool {
        stream_id::has_extension(self.stream_id)
    }

    /// Declared length 0: the packet ends at the next start indicator
    pub fn is_unbounded(&self) -> bool {
        self.packet_length == 0
    }

    /// Full header length: the prologue plus, when present, the extended header
    pub fn header_len(&self) -> usize {
        match &self.extension {
            Some(ext) => {
                PES_PROLOGUE_SIZE + PES_EXTENSION_FIXED_SIZE + ext.header_data_length as usize
            }
            None => PES_PROLOGUE_SIZE,
        }
    }

    /// Total packet length including the prologue
    pub fn total_len(&self) -> usize {
        self.packet_length as usize + PES_PROLOGUE_SIZE
    }

    /// Payload bytes following the header, `None` when unbounded
    pub fn payload_len(&self) -> Option<usize> {
        if self.is_unbounded() {
            None
        } else {
            Some(self.total_len().saturating_sub(self.header_len()))
        }
    }
}

/// A reassembled PES packet
#[derive(Debug, Clone, PartialEq)]
pub struct PesPacket {
    /// PID the packet was carried on
    pub pid: u16,

    /// Header parsed from the start unit
    pub header: PesHeader,

    /// Payload bytes following the header
    pub payload: Bytes,

    /// False when the packet was finalized short of its declared length or at end of stream
    pub complete: bool,
}

impl PesPacket {
    /// Number of payload bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the packet carries no payload
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
