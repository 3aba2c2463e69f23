//! Owned reassembly buffer with an explicit sizing policy

use crate::error::TsError;
use bytes::{Bytes, BytesMut};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// How a channel sizes its reassembly buffer
///
/// Chosen when the channel is registered: it is a property of the stream's
/// framing, not of a particular PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferPolicy {
    /// Allocate the declared payload length up front; never reallocate
    Presized,
    /// Start empty and grow as payload arrives
    #[default]
    Growable,
}

impl FromStr for BufferPolicy {
    type Err = TsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "presized" | "bounded" => Ok(BufferPolicy::Presized),
            "growable" | "unbounded" => Ok(BufferPolicy::Growable),
            other => Err(TsError::InvalidConfig(alloc::format!(
                "unknown buffer policy '{}': expected presized or growable",
                other
            ))),
        }
    }
}

impl fmt::Display for BufferPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferPolicy::Presized => f.write_str("presized"),
            BufferPolicy::Growable => f.write_str("growable"),
        }
    }
}

/// A pre-sized buffer was offered more bytes than it holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityExceeded {
    /// Allocated capacity
    pub capacity: usize,
    /// Length the buffer would have reached
    pub attempted: usize,
}

/// Byte buffer for one in-flight PES packet
///
/// Appended bytes are never lost or reordered across growth. The growable
/// variant at least doubles its allocation whenever it runs out of room, so
/// filling it costs amortized O(total bytes).
#[derive(Debug)]
pub struct ReassemblyBuffer {
    data: BytesMut,
    capacity: Option<usize>,
    reallocations: usize,
}

impl ReassemblyBuffer {
    /// Create an empty buffer that grows on demand
    pub fn growable() -> Self {
        Self {
            data: BytesMut::new(),
            capacity: None,
            reallocations: 0,
        }
    }

    /// Create a buffer holding exactly `capacity` bytes
    pub fn presized(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity: Some(capacity),
            reallocations: 0,
        }
    }

    /// Check if the buffer was pre-sized
    pub fn is_presized(&self) -> bool {
        self.capacity.is_some()
    }

    /// Fixed capacity of a pre-sized buffer
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of bytes appended so far
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing was appended
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if a pre-sized buffer is exactly full
    pub fn is_full(&self) -> bool {
        self.capacity == Some(self.data.len())
    }

    /// Bytes appended so far
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// How many times the backing storage moved
    pub fn reallocations(&self) -> usize {
        self.reallocations
    }

    /// Append `bytes`
    ///
    /// A pre-sized buffer refuses bytes past its capacity and is left unchanged.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), CapacityExceeded> {
        if bytes.is_empty() {
            return Ok(());
        }

        let attempted = self.data.len() + bytes.len();
        if let Some(capacity) = self.capacity {
            if attempted > capacity {
                return Err(CapacityExceeded {
                    capacity,
                    attempted,
                });
            }
        } else if self.data.capacity() - self.data.len() < bytes.len() {
            let additional = bytes.len().max(self.data.capacity());
            self.data.reserve(additional);
        }

        let before = self.data.as_ptr();
        self.data.extend_from_slice(bytes);
        if self.data.as_ptr() != before {
            self.reallocations += 1;
        }

        Ok(())
    }

    /// Hand out the assembled bytes
    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::growable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presized_never_reallocates() {
        let mut buffer = ReassemblyBuffer::presized(184 * 10);
        for i in 0..10u8 {
            buffer.append(&[i; 184]).unwrap();
        }

        assert!(buffer.is_full());
        assert_eq!(buffer.reallocations(), 0);
        assert_eq!(buffer.len(), 1840);
    }

    #[test]
    fn test_presized_rejects_overflow() {
        let mut buffer = ReassemblyBuffer::presized(10);
        buffer.append(&[1; 8]).unwrap();

        let err = buffer.append(&[2; 3]).unwrap_err();
        assert_eq!(
            err,
            CapacityExceeded {
                capacity: 10,
                attempted: 11
            }
        );
        // Rejected bytes leave the buffer untouched
        assert_eq!(buffer.as_slice(), &[1; 8]);
    }

    #[test]
    fn test_growable_keeps_order_across_growth() {
        let mut buffer = ReassemblyBuffer::growable();
        let mut expected = Vec::new();

        for i in 0..200usize {
            let segment: Vec<u8> = (0..(i % 184) + 1).map(|j| (i + j) as u8).collect();
            buffer.append(&segment).unwrap();
            expected.extend_from_slice(&segment);
        }

        assert_eq!(buffer.as_slice(), &expected[..]);
        assert!(buffer.reallocations() > 0);
        assert!(buffer.reallocations() < 50);
        assert_eq!(buffer.into_bytes(), Bytes::from(expected));
    }

    #[test]
    fn test_empty_append_is_noop() {
        let mut buffer = ReassemblyBuffer::presized(0);
        buffer.append(&[]).unwrap();
        assert!(buffer.is_empty());
        assert!(buffer.is_full());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("presized".parse::<BufferPolicy>(), Ok(BufferPolicy::Presized));
        assert_eq!("unbounded".parse::<BufferPolicy>(), Ok(BufferPolicy::Growable));
        assert!("sideways".parse::<BufferPolicy>().is_err());
    }
}
