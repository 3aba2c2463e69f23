//! Error types for transport stream operations

use alloc::string::String;

/// Errors that can occur while parsing units or reassembling PES packets
#[cfg_attr(feature = "std", derive(thiserror::Error))]
#[derive(Debug, Clone, PartialEq)]
pub enum TsError {
    /// First byte of a unit is not the sync byte
    #[cfg_attr(feature = "std", error("Sync byte mismatch: expected 0x47, got {0:#04x}"))]
    SyncError(u8),

    /// Not enough bytes for the structure being decoded
    #[cfg_attr(feature = "std", error("Incomplete unit: expected {expected} bytes, got {actual}"))]
    IncompleteUnit {
        /// The number of bytes expected.
        expected: usize,
        /// The number of bytes actually found.
        actual: usize,
    },

    /// Adaptation field control carries the reserved value 0
    #[cfg_attr(feature = "std", error("Reserved adaptation field control on PID {pid}"))]
    ReservedFieldControl {
        /// PID of the offending unit.
        pid: u16,
    },

    /// Adaptation field sub-fields do not fit in its declared length
    #[cfg_attr(feature = "std", error("Malformed adaptation field: declared {declared} bytes, sub-fields need {consumed}"))]
    MalformedAdaptationField {
        /// Declared length byte.
        declared: usize,
        /// Bytes the flagged sub-fields require.
        consumed: usize,
    },

    /// Unit belongs to a PID nobody tracks
    #[cfg_attr(feature = "std", error("Unexpected channel: PID {0}"))]
    UnexpectedChannel(u16),

    /// Continuity counter did not advance by one
    #[cfg_attr(feature = "std", error("Sequence gap on PID {pid}: expected counter {expected}, got {found}"))]
    SequenceGap {
        /// PID of the channel.
        pid: u16,
        /// Counter value that should have followed.
        expected: u8,
        /// Counter value actually seen.
        found: u8,
    },

    /// Pre-sized buffer received more bytes than it was allocated for
    #[cfg_attr(feature = "std", error("Buffer capacity exceeded on PID {pid}: capacity {capacity}, attempted {attempted}"))]
    BufferCapacityExceeded {
        /// PID of the channel.
        pid: u16,
        /// Allocated capacity.
        capacity: usize,
        /// Size the buffer would have reached.
        attempted: usize,
    },

    /// Byte source ended part way through a unit
    #[cfg_attr(feature = "std", error("Source exhausted {pending} bytes into a unit"))]
    SourceExhausted {
        /// Bytes of the truncated unit that were read.
        pending: usize,
    },

    /// PID outside the 13-bit range
    #[cfg_attr(feature = "std", error("Invalid PID {0:#x}: must fit in 13 bits"))]
    InvalidPid(u16),

    /// PID registered twice
    #[cfg_attr(feature = "std", error("PID {0} is already tracked"))]
    DuplicateChannel(u16),

    /// Payload size exceeds what fits in the target structure
    #[cfg_attr(feature = "std", error("Payload size {0} exceeds maximum {1}"))]
    PayloadTooLarge(usize, usize),

    /// Invalid configuration string
    #[cfg_attr(feature = "std", error("Invalid configuration: {0}"))]
    InvalidConfig(String),

    /// IO error during read/write
    #[cfg_attr(feature = "std", error("IO error: {0}"))]
    Io(String),

    /// Sink rejected a packet
    #[cfg_attr(feature = "std", error("Sink error: {0}"))]
    Sink(String),
}

#[cfg(feature = "std")]
impl From<std::io::Error> for TsError {
    fn from(err: std::io::Error) -> Self {
        TsError::Io(err.to_string())
    }
}

#[cfg(not(feature = "std"))]
impl core::fmt::Display for TsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TsError::SyncError(found) => {
                write!(f, "Sync byte mismatch: expected 0x47, got {:#04x}", found)
            }
            TsError::IncompleteUnit { expected, actual } => write!(
                f,
                "Incomplete unit: expected {} bytes, got {}",
                expected, actual
            ),
            TsError::ReservedFieldControl { pid } => {
                write!(f, "Reserved adaptation field control on PID {}", pid)
            }
            TsError::MalformedAdaptationField { declared, consumed } => write!(
                f,
                "Malformed adaptation field: declared {} bytes, sub-fields need {}",
                declared, consumed
            ),
            TsError::UnexpectedChannel(pid) => write!(f, "Unexpected channel: PID {}", pid),
            TsError::SequenceGap {
                pid,
                expected,
                found,
            } => write!(
                f,
                "Sequence gap on PID {}: expected counter {}, got {}",
                pid, expected, found
            ),
            TsError::BufferCapacityExceeded {
                pid,
                capacity,
                attempted,
            } => write!(
                f,
                "Buffer capacity exceeded on PID {}: capacity {}, attempted {}",
                pid, capacity, attempted
            ),
            TsError::SourceExhausted { pending } => {
                write!(f, "Source exhausted {} bytes into a unit", pending)
            }
            TsError::InvalidPid(pid) => write!(f, "Invalid PID {:#x}: must fit in 13 bits", pid),
            TsError::DuplicateChannel(pid) => write!(f, "PID {} is already tracked", pid),
            TsError::PayloadTooLarge(size, max) => {
                write!(f, "Payload size {} exceeds maximum {}", size, max)
            }
            TsError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            TsError::Io(msg) => write!(f, "IO error: {}", msg),
            TsError::Sink(msg) => write!(f, "Sink error: {}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_messages() {
        assert_eq!(
            TsError::SyncError(0x12).to_string(),
            "Sync byte mismatch: expected 0x47, got 0x12"
        );
        assert_eq!(
            TsError::SourceExhausted { pending: 3 }.to_string(),
            "Source exhausted 3 bytes into a unit"
        );
        assert_eq!(
            TsError::SequenceGap {
                pid: 0x100,
                expected: 3,
                found: 4
            }
            .to_string(),
            "Sequence gap on PID 256: expected counter 3, got 4"
        );
        assert_eq!(
            TsError::UnexpectedChannel(17).to_string(),
            "Unexpected channel: PID 17"
        );
    }
}
