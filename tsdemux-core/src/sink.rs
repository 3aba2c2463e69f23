//! Destinations for reassembled PES packets

use crate::error::TsError;
use crate::types::{PesHeader, PesPacket};
use alloc::boxed::Box;
use alloc::vec::Vec;

/// Receives the output of one tracked PID
///
/// Only [`on_packet`](PacketSink::on_packet) is required; the remaining hooks
/// report channel diagnostics and default to no-ops.
pub trait PacketSink {
    /// A PES packet was finalized
    fn on_packet(&mut self, pid: u16, packet: &PesPacket) -> Result<(), TsError>;

    /// A new PES packet started
    fn on_started(&mut self, _pid: u16, _header: &PesHeader) {}

    /// Payload was appended to the packet in flight
    fn on_continued(&mut self, _pid: u16, _appended: usize) {}

    /// The continuity counter skipped
    fn on_sequence_gap(&mut self, _pid: u16, _expected: u8, _found: u8) {}

    /// The packet in flight was aborted
    fn on_failed(&mut self, _pid: u16, _error: &TsError) {}
}

/// Collects packets in memory
impl PacketSink for Vec<PesPacket> {
    fn on_packet(&mut self, _pid: u16, packet: &PesPacket) -> Result<(), TsError> {
        self.push(packet.clone());
        Ok(())
    }
}

impl<S: PacketSink + ?Sized> PacketSink for Box<S> {
    fn on_packet(&mut self, pid: u16, packet: &PesPacket) -> Result<(), TsError> {
        (**self).on_packet(pid, packet)
    }

    fn on_started(&mut self, pid: u16, header: &PesHeader) {
        (**self).on_started(pid, header)
    }

    fn on_continued(&mut self, pid: u16, appended: usize) {
        (**self).on_continued(pid, appended)
    }

    fn on_sequence_gap(&mut self, pid: u16, expected: u8, found: u8) {
        (**self).on_sequence_gap(pid, expected, found)
    }

    fn on_failed(&mut self, pid: u16, error: &TsError) {
        (**self).on_failed(pid, error)
    }
}

/// Writes PES payloads back to back into a [`std::io::Write`]
///
/// Keeps simple per-channel totals that callers can report afterwards.
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct WriterSink<W: std::io::Write> {
    writer: W,
    packets: usize,
    bytes: usize,
    incomplete: usize,
    gaps: usize,
    failures: usize,
}

#[cfg(feature = "std")]
impl<W: std::io::Write> WriterSink<W> {
    /// Wrap `writer`
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            packets: 0,
            bytes: 0,
            incomplete: 0,
            gaps: 0,
            failures: 0,
        }
    }

    /// Packets written
    pub fn packets(&self) -> usize {
        self.packets
    }

    /// Payload bytes written
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Packets written with the incomplete flag
    pub fn incomplete(&self) -> usize {
        self.incomplete
    }

    /// Sequence gaps seen
    pub fn gaps(&self) -> usize {
        self.gaps
    }

    /// Packets aborted
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Flush and return the writer
    pub fn into_inner(mut self) -> Result<W, TsError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

#[cfg(feature = "std")]
impl<W: std::io::Write> PacketSink for WriterSink<W> {
    fn on_packet(&mut self, _pid: u16, packet: &PesPacket) -> Result<(), TsError> {
        self.writer
            .write_all(&packet.payload)
            .map_err(|e| TsError::Sink(e.to_string()))?;

        self.packets += 1;
        self.bytes += packet.len();
        if !packet.complete {
            self.incomplete += 1;
        }
        Ok(())
    }

    fn on_sequence_gap(&mut self, _pid: u16, _expected: u8, _found: u8) {
        self.gaps += 1;
    }

    fn on_failed(&mut self, _pid: u16, _error: &TsError) {
        self.failures += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::PesHeaderBuilder;
    use bytes::Bytes;

    fn packet(payload: &'static [u8], complete: bool) -> PesPacket {
        PesPacket {
            pid: 0x44,
            header: PesHeaderBuilder::new(0xE0).build_struct(),
            payload: Bytes::from_static(payload),
            complete,
        }
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<PesPacket> = Vec::new();
        sink.on_packet(0x44, &packet(b"one", true)).unwrap();
        sink.on_packet(0x44, &packet(b"two", false)).unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(&sink[1].payload[..], b"two");
    }

    #[test]
    fn test_boxed_sink_forwards() {
        let mut sink: Box<dyn PacketSink> = Box::new(WriterSink::new(Vec::new()));
        sink.on_packet(0x44, &packet(b"abc", true)).unwrap();
        sink.on_sequence_gap(0x44, 1, 3);
    }

    #[test]
    fn test_writer_sink_counts() {
        let mut sink = WriterSink::new(Vec::new());
        sink.on_packet(0x44, &packet(b"abc", true)).unwrap();
        sink.on_packet(0x44, &packet(b"de", false)).unwrap();
        sink.on_sequence_gap(0x44, 2, 5);
        sink.on_failed(
            0x44,
            &TsError::BufferCapacityExceeded {
                pid: 0x44,
                capacity: 1,
                attempted: 2,
            },
        );

        assert_eq!(sink.packets(), 2);
        assert_eq!(sink.bytes(), 5);
        assert_eq!(sink.incomplete(), 1);
        assert_eq!(sink.gaps(), 1);
        assert_eq!(sink.failures(), 1);
        assert_eq!(sink.into_inner().unwrap(), b"abcde");
    }
}
