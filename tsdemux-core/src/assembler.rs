//! Per-PID PES reassembly
//!
//! A [`PesAssembler`] follows a single PID. Units carrying the payload unit start
//! indicator open a new PES packet (finishing the one in flight); the following
//! units of the PID append their payload until the next start unit or until the
//! stream ends.

use crate::buffer::{BufferPolicy, ReassemblyBuffer};
use crate::constants::{CONTINUITY_MODULUS, TS_PACKET_SIZE};
use crate::error::TsError;
use crate::pes::decode_pes_header;
use crate::types::{AdaptationField, PesHeader, PesPacket, UnitHeader};
use core::iter;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Whether a PES packet is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    /// Waiting for a start unit
    Idle,
    /// Collecting payload of a started packet
    Assembling,
}

/// What a single unit did to its channel
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyEvent {
    /// The unit belongs to another PID; nothing changed
    UnrelatedChannel {
        /// PID of the unit
        pid: u16,
    },

    /// A new PES packet began
    Started {
        /// PID of the channel
        pid: u16,
        /// Header parsed from the start unit
        header: PesHeader,
        /// Payload bytes buffered from the start unit
        appended: usize,
    },

    /// Payload appended (0 bytes for adaptation-only units or while idle)
    Continued {
        /// PID of the channel
        pid: u16,
        /// Payload bytes buffered from this unit
        appended: usize,
    },

    /// The continuity counter skipped; the payload was appended anyway
    SequenceGap {
        /// PID of the channel
        pid: u16,
        /// Counter value that should have followed
        expected: u8,
        /// Counter value found
        found: u8,
        /// Payload bytes buffered from this unit
        appended: usize,
    },

    /// A PES packet was finalized
    Finished(PesPacket),

    /// The packet in flight was aborted
    Failed {
        /// PID of the channel
        pid: u16,
        /// Why it was aborted
        error: TsError,
    },
}

impl AssemblyEvent {
    /// PID the event refers to
    pub fn pid(&self) -> u16 {
        match self {
            AssemblyEvent::UnrelatedChannel { pid }
            | AssemblyEvent::Started { pid, .. }
            | AssemblyEvent::Continued { pid, .. }
            | AssemblyEvent::SequenceGap { pid, .. }
            | AssemblyEvent::Failed { pid, .. } => *pid,
            AssemblyEvent::Finished(packet) => packet.pid,
        }
    }

    /// The condition behind an event that did not go as planned
    ///
    /// Units of another PID map to [`TsError::UnexpectedChannel`], counter
    /// skips to [`TsError::SequenceGap`] and aborts to their cause. The other
    /// events return `None`.
    pub fn diagnostic(&self) -> Option<TsError> {
        match self {
            AssemblyEvent::UnrelatedChannel { pid } => Some(TsError::UnexpectedChannel(*pid)),
            AssemblyEvent::SequenceGap {
                pid,
                expected,
                found,
                ..
            } => Some(TsError::SequenceGap {
                pid: *pid,
                expected: *expected,
                found: *found,
            }),
            AssemblyEvent::Failed { error, .. } => Some(error.clone()),
            AssemblyEvent::Started { .. }
            | AssemblyEvent::Continued { .. }
            | AssemblyEvent::Finished(_) => None,
        }
    }
}

/// Outcome of feeding one unit to an assembler
#[derive(Debug, Clone, PartialEq)]
pub struct Absorbed {
    /// Packet finalized by this unit's start indicator
    pub finished: Option<PesPacket>,

    /// What happened to the unit itself
    pub event: AssemblyEvent,
}

impl Absorbed {
    fn event(event: AssemblyEvent) -> Self {
        Self {
            finished: None,
            event,
        }
    }

    /// Events in emission order: the finished packet first, then the unit's own event
    pub fn events(self) -> impl Iterator<Item = AssemblyEvent> {
        self.finished
            .map(AssemblyEvent::Finished)
            .into_iter()
            .chain(iter::once(self.event))
    }
}

#[derive(Debug)]
struct InFlight {
    header: PesHeader,
    buffer: ReassemblyBuffer,
}

impl InFlight {
    fn into_packet(self, pid: u16, at_next_start: bool) -> PesPacket {
        let complete = match self.header.payload_len() {
            Some(expected) => self.buffer.len() == expected,
            None => at_next_start,
        };

        PesPacket {
            pid,
            header: self.header,
            payload: self.buffer.into_bytes(),
            complete,
        }
    }
}

/// Reassembly state of one tracked PID
#[derive(Debug)]
pub struct PesAssembler {
    pid: u16,
    policy: BufferPolicy,
    last_counter: Option<u8>,
    in_flight: Option<InFlight>,
}

impl PesAssembler {
    /// Create an idle assembler for `pid`
    pub fn new(pid: u16, policy: BufferPolicy) -> Self {
        Self {
            pid,
            policy,
            last_counter: None,
            in_flight: None,
        }
    }

    /// Tracked PID
    pub fn pid(&self) -> u16 {
        self.pid
    }

    /// Buffer policy chosen at registration
    pub fn policy(&self) -> BufferPolicy {
        self.policy
    }

    /// Current state
    pub fn state(&self) -> AssemblyState {
        if self.in_flight.is_some() {
            AssemblyState::Assembling
        } else {
            AssemblyState::Idle
        }
    }

    /// Last counter seen on a payload-carrying unit
    pub fn last_counter(&self) -> Option<u8> {
        self.last_counter
    }

    /// Header of the packet in flight
    pub fn header(&self) -> Option<&PesHeader> {
        self.in_flight.as_ref().map(|f| &f.header)
    }

    /// Bytes buffered for the packet in flight
    pub fn buffered(&self) -> usize {
        self.in_flight.as_ref().map_or(0, |f| f.buffer.len())
    }

    /// Reallocations of the in-flight buffer so far
    pub fn reallocations(&self) -> usize {
        self.in_flight.as_ref().map_or(0, |f| f.buffer.reallocations())
    }

    /// Feed one 188-byte unit with its decoded header and adaptation field
    pub fn absorb(
        &mut self,
        unit: &[u8],
        header: &UnitHeader,
        adaptation: &AdaptationField,
    ) -> Absorbed {
        if header.pid != self.pid {
            return Absorbed::event(AssemblyEvent::UnrelatedChannel { pid: header.pid });
        }

        // Adaptation-only (or reserved) units carry no payload and do not advance the counter
        if !header.has_payload() {
            // A start indicator still closes the packet in flight
            let finished = if header.payload_unit_start {
                self.in_flight
                    .take()
                    .map(|in_flight| in_flight.into_packet(self.pid, false))
            } else {
                None
            };

            #[cfg(feature = "logging")]
            if let Some(packet) = &finished {
                debug!(
                    "PID {}: start unit without payload ends PES packet of {} bytes",
                    self.pid,
                    packet.len()
                );
            }

            return Absorbed {
                finished,
                event: AssemblyEvent::Continued {
                    pid: self.pid,
                    appended: 0,
                },
            };
        }

        let payload_offset = adaptation.payload_offset();
        let payload = unit.get(payload_offset..).unwrap_or(&[]);

        if header.payload_unit_start {
            self.last_counter = Some(header.continuity_counter);
            let finished = self
                .in_flight
                .take()
                .map(|in_flight| in_flight.into_packet(self.pid, true));

            #[cfg(feature = "logging")]
            if let Some(packet) = &finished {
                debug!(
                    "PID {}: finished PES packet of {} bytes (complete: {})",
                    self.pid,
                    packet.len(),
                    packet.complete
                );
            }

            let event = self.start(unit, payload_offset);
            return Absorbed { finished, event };
        }

        let found = header.continuity_counter;
        let gap = match self.last_counter {
            Some(last) => {
                let expected = (last + 1) % CONTINUITY_MODULUS;
                (expected != found).then_some(expected)
            }
            None => None,
        };
        self.last_counter = Some(found);

        let appended = match self.append(payload) {
            Ok(appended) => appended,
            Err(error) => {
                return Absorbed::event(AssemblyEvent::Failed {
                    pid: self.pid,
                    error,
                })
            }
        };

        match gap {
            Some(expected) => {
                #[cfg(feature = "logging")]
                warn!(
                    "PID {}: sequence gap, expected counter {} but found {}",
                    self.pid, expected, found
                );

                Absorbed::event(AssemblyEvent::SequenceGap {
                    pid: self.pid,
                    expected,
                    found,
                    appended,
                })
            }
            None => Absorbed::event(AssemblyEvent::Continued {
                pid: self.pid,
                appended,
            }),
        }
    }

    /// Finalize the packet in flight at end of stream
    ///
    /// Returns `None` when idle or when nothing was buffered. The packet is
    /// marked incomplete unless its declared length was reached exactly.
    pub fn flush(&mut self) -> Option<PesPacket> {
        let in_flight = self.in_flight.take()?;
        if in_flight.buffer.is_empty() {
            return None;
        }

        let packet = in_flight.into_packet(self.pid, false);

        #[cfg(feature = "logging")]
        debug!(
            "PID {}: flushed PES packet of {} bytes (complete: {})",
            self.pid,
            packet.len(),
            packet.complete
        );

        Some(packet)
    }

    /// Drop the packet in flight without emitting it
    pub fn cancel(&mut self) {
        self.in_flight = None;
    }

    fn start(&mut self, unit: &[u8], payload_offset: usize) -> AssemblyEvent {
        let (pes, next_offset) = match decode_pes_header(unit, payload_offset) {
            Ok(parsed) => parsed,
            Err(error) => {
                #[cfg(feature = "logging")]
                warn!("PID {}: PES header unreadable: {}", self.pid, error);

                return AssemblyEvent::Failed {
                    pid: self.pid,
                    error,
                };
            }
        };

        #[cfg(feature = "logging")]
        if !pes.has_valid_start_code() {
            warn!(
                "PID {}: PES start code prefix {:#08x} is not 0x000001",
                self.pid, pes.start_code_prefix
            );
        }

        let buffer = match (self.policy, pes.payload_len()) {
            (BufferPolicy::Presized, Some(len)) => ReassemblyBuffer::presized(len),
            (BufferPolicy::Presized, None) => {
                #[cfg(feature = "logging")]
                warn!(
                    "PID {}: unbounded PES packet, falling back to a growable buffer",
                    self.pid
                );
                ReassemblyBuffer::growable()
            }
            (BufferPolicy::Growable, _) => ReassemblyBuffer::growable(),
        };

        if next_offset > TS_PACKET_SIZE {
            #[cfg(feature = "logging")]
            warn!(
                "PID {}: PES header runs {} bytes past the unit",
                self.pid,
                next_offset - TS_PACKET_SIZE
            );
        }
        let first = unit.get(next_offset.min(unit.len())..).unwrap_or(&[]);

        self.in_flight = Some(InFlight {
            header: pes,
            buffer,
        });

        match self.append(first) {
            Ok(appended) => AssemblyEvent::Started {
                pid: self.pid,
                header: pes,
                appended,
            },
            Err(error) => AssemblyEvent::Failed {
                pid: self.pid,
                error,
            },
        }
    }

    /// Append to the packet in flight; idle channels drop the bytes
    fn append(&mut self, payload: &[u8]) -> Result<usize, TsError> {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return Ok(0);
        };

        if let Err(exceeded) = in_flight.buffer.append(payload) {
            self.in_flight = None;

            #[cfg(feature = "logging")]
            warn!(
                "PID {}: PES packet overflows its {} byte buffer, dropping it",
                self.pid, exceeded.capacity
            );

            return Err(TsError::BufferCapacityExceeded {
                pid: self.pid,
                capacity: exceeded.capacity,
                attempted: exceeded.attempted,
            });
        }

        Ok(payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decode_adaptation_field, decode_unit_header};
    use crate::encoder::{encode_pes_packet, packetize_pes, PesHeaderBuilder, UnitBuilder};

    const PID: u16 = 0x101;

    fn feed(assembler: &mut PesAssembler, unit: &[u8]) -> Absorbed {
        let header = decode_unit_header(unit).unwrap();
        let adaptation = decode_adaptation_field(unit, header.field_control).unwrap();
        assembler.absorb(unit, &header, &adaptation)
    }

    fn continuation(counter: u8, fill: u8) -> [u8; TS_PACKET_SIZE] {
        UnitBuilder::new(PID)
            .counter(counter)
            .payload(&[fill; 184])
            .build()
            .unwrap()
    }

    #[test]
    fn test_single_gap_reported() {
        let mut assembler = PesAssembler::new(PID, BufferPolicy::Growable);
        let pes = PesHeaderBuilder::new(0xE0).build();
        let start = packetize_pes(PID, &pes, 0).unwrap();

        let mut gaps = Vec::new();
        feed(&mut assembler, &start[0]);
        for counter in [1, 2, 4] {
            if let AssemblyEvent::SequenceGap {
                expected, found, ..
            } = feed(&mut assembler, &continuation(counter, 0)).event
            {
                gaps.push((expected, found));
            }
        }

        assert_eq!(gaps, vec![(3, 4)]);
        assert_eq!(
            feed(&mut assembler, &continuation(6, 0)).event.diagnostic(),
            Some(TsError::SequenceGap {
                pid: PID,
                expected: 5,
                found: 6
            })
        );
        // Bytes after the gap are still buffered
        assert_eq!(assembler.buffered(), 4 * 184);
    }

    #[test]
    fn test_counter_wraps_without_gap() {
        let mut assembler = PesAssembler::new(PID, BufferPolicy::Growable);
        let start = packetize_pes(PID, &PesHeaderBuilder::new(0xE0).build(), 14).unwrap();

        feed(&mut assembler, &start[0]);
        for counter in [15, 0, 1] {
            let absorbed = feed(&mut assembler, &continuation(counter, 1));
            assert!(matches!(absorbed.event, AssemblyEvent::Continued { .. }));
        }
    }

    #[test]
    fn test_bounded_packet_length() {
        let payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let header = PesHeaderBuilder::new(0xE0)
            .pts(90_000)
            .packet_length(1000 + 8)
            .build_struct();
        assert_eq!(header.payload_len(), Some(1000));

        let units = packetize_pes(PID, &encode_pes_packet(&header, &payload), 0).unwrap();
        let mut assembler = PesAssembler::new(PID, BufferPolicy::Presized);
        for unit in &units {
            feed(&mut assembler, unit);
        }

        // L + 6 - H bytes buffered, without moving the pre-sized storage
        assert_eq!(assembler.buffered(), 1000);
        assert_eq!(assembler.reallocations(), 0);

        let next = packetize_pes(PID, &PesHeaderBuilder::new(0xE0).build(), units.len() as u8)
            .unwrap();
        let absorbed = feed(&mut assembler, &next[0]);
        let packet = absorbed.finished.unwrap();
        assert!(packet.complete);
        assert_eq!(packet.header.pts, Some(90_000));
        assert_eq!(&packet.payload[..], &payload[..]);
    }

    #[test]
    fn test_unbounded_packet_content() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i * 7) as u8).collect();
        let pes = encode_pes_packet(&PesHeaderBuilder::new(0xE0).build_struct(), &payload);
        let units = packetize_pes(PID, &pes, 3).unwrap();

        let mut assembler = PesAssembler::new(PID, BufferPolicy::Growable);
        for unit in &units {
            assert!(feed(&mut assembler, unit).finished.is_none());
        }

        let packet = assembler.flush().unwrap();
        assert_eq!(&packet.payload[..], &payload[..]);
        assert!(!packet.complete);
        assert_eq!(assembler.state(), AssemblyState::Idle);
    }

    #[test]
    fn test_start_continue_finish_scenario() {
        let pes_header = [0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x00, 0x00];

        let mut first = [0x11u8; TS_PACKET_SIZE];
        first[..4].copy_from_slice(&[0x47, 0x40, 0x00, 0x10]);
        first[4..13].copy_from_slice(&pes_header);

        let mut second = [0x22u8; TS_PACKET_SIZE];
        second[..4].copy_from_slice(&[0x47, 0x00, 0x00, 0x11]);

        let mut third = first;
        third[3] = 0x12;

        let mut assembler = PesAssembler::new(0, BufferPolicy::Growable);

        let absorbed = feed(&mut assembler, &first);
        assert!(absorbed.finished.is_none());
        assert!(matches!(
            absorbed.event,
            AssemblyEvent::Started {
                pid: 0,
                appended: 175,
                ..
            }
        ));

        let absorbed = feed(&mut assembler, &second);
        assert!(absorbed.finished.is_none());
        assert_eq!(
            absorbed.event,
            AssemblyEvent::Continued {
                pid: 0,
                appended: 184
            }
        );

        let events: Vec<_> = feed(&mut assembler, &third).events().collect();
        assert_eq!(events.len(), 2);
        let AssemblyEvent::Finished(packet) = &events[0] else {
            panic!("expected a finished packet first, got {:?}", events[0]);
        };
        assert!(matches!(events[1], AssemblyEvent::Started { .. }));

        let mut expected = first[13..].to_vec();
        expected.extend_from_slice(&second[4..]);
        assert_eq!(&packet.payload[..], &expected[..]);
        assert!(packet.complete);
    }

    #[test]
    fn test_capacity_overflow_fails_packet() {
        let header = PesHeaderBuilder::new(0xC0)
            .pts(1)
            .packet_length(18)
            .build_struct();
        let units = packetize_pes(PID, &encode_pes_packet(&header, &[7; 10]), 0).unwrap();
        assert_eq!(units.len(), 1);

        let mut assembler = PesAssembler::new(PID, BufferPolicy::Presized);
        feed(&mut assembler, &units[0]);
        assert_eq!(assembler.buffered(), 10);

        let absorbed = feed(&mut assembler, &continuation(1, 9));
        assert_eq!(
            absorbed.event,
            AssemblyEvent::Failed {
                pid: PID,
                error: TsError::BufferCapacityExceeded {
                    pid: PID,
                    capacity: 10,
                    attempted: 194
                }
            }
        );
        assert_eq!(assembler.state(), AssemblyState::Idle);

        // Idle channels drop payload until the next start
        let absorbed = feed(&mut assembler, &continuation(2, 9));
        assert_eq!(
            absorbed.event,
            AssemblyEvent::Continued {
                pid: PID,
                appended: 0
            }
        );
        assert!(assembler.flush().is_none());
    }

    #[test]
    fn test_flush_emits_once() {
        let header = PesHeaderBuilder::new(0xE0).packet_length(3 + 3).build_struct();
        let units = packetize_pes(PID, &encode_pes_packet(&header, b"abc"), 0).unwrap();

        let mut assembler = PesAssembler::new(PID, BufferPolicy::Presized);
        feed(&mut assembler, &units[0]);

        let packet = assembler.flush().unwrap();
        assert_eq!(&packet.payload[..], b"abc");
        assert!(packet.complete);
        assert!(assembler.flush().is_none());
    }

    #[test]
    fn test_cancel_discards() {
        let mut assembler = PesAssembler::new(PID, BufferPolicy::Growable);
        let units = packetize_pes(PID, &PesHeaderBuilder::new(0xE0).build(), 0).unwrap();
        feed(&mut assembler, &units[0]);
        feed(&mut assembler, &continuation(1, 5));
        assert_eq!(assembler.state(), AssemblyState::Assembling);

        assembler.cancel();
        assert_eq!(assembler.state(), AssemblyState::Idle);
        assert!(assembler.flush().is_none());
    }

    #[test]
    fn test_unrelated_channel() {
        let mut assembler = PesAssembler::new(PID, BufferPolicy::Growable);
        let unit = UnitBuilder::new(0x200).start().payload(&[0; 20]).build().unwrap();

        let absorbed = feed(&mut assembler, &unit);
        assert_eq!(
            absorbed.event,
            AssemblyEvent::UnrelatedChannel { pid: 0x200 }
        );
        assert_eq!(
            absorbed.event.diagnostic(),
            Some(TsError::UnexpectedChannel(0x200))
        );
        assert_eq!(assembler.state(), AssemblyState::Idle);
        assert_eq!(assembler.last_counter(), None);
    }

    #[test]
    fn test_adaptation_only_keeps_counter() {
        let mut assembler = PesAssembler::new(PID, BufferPolicy::Growable);
        let units = packetize_pes(PID, &PesHeaderBuilder::new(0xE0).build(), 0).unwrap();
        feed(&mut assembler, &units[0]);

        let clock = UnitBuilder::new(PID)
            .counter(0)
            .pcr(1000, 0)
            .adaptation_only()
            .build()
            .unwrap();
        assert_eq!(
            feed(&mut assembler, &clock).event,
            AssemblyEvent::Continued {
                pid: PID,
                appended: 0
            }
        );

        assert!(matches!(
            feed(&mut assembler, &continuation(1, 0)).event,
            AssemblyEvent::Continued { appended: 184, .. }
        ));
    }

    #[test]
    fn test_start_without_payload_closes_packet() {
        let mut assembler = PesAssembler::new(PID, BufferPolicy::Growable);
        let units = packetize_pes(PID, &PesHeaderBuilder::new(0xE0).build(), 0).unwrap();
        feed(&mut assembler, &units[0]);
        feed(&mut assembler, &continuation(1, 9));

        let marker = UnitBuilder::new(PID)
            .start()
            .counter(2)
            .adaptation_only()
            .build()
            .unwrap();
        let absorbed = feed(&mut assembler, &marker);
        let packet = absorbed.finished.unwrap();
        assert_eq!(packet.len(), 184);
        assert!(!packet.complete);
        assert_eq!(
            absorbed.event,
            AssemblyEvent::Continued {
                pid: PID,
                appended: 0
            }
        );
        assert_eq!(assembler.state(), AssemblyState::Idle);

        // Payload of the next packet is not appended to the closed one
        assert!(matches!(
            feed(&mut assembler, &continuation(2, 7)).event,
            AssemblyEvent::Continued { appended: 0, .. }
        ));
        assert!(assembler.flush().is_none());
    }

    #[test]
    fn test_presized_falls_back_when_unbounded() {
        let mut assembler = PesAssembler::new(PID, BufferPolicy::Presized);
        let units = packetize_pes(PID, &PesHeaderBuilder::new(0xE0).build(), 0).unwrap();
        feed(&mut assembler, &units[0]);

        for counter in 1..6 {
            feed(&mut assembler, &continuation(counter, 3));
        }
        assert_eq!(assembler.buffered(), 5 * 184);
    }

    #[test]
    fn test_payload_before_first_start_is_dropped() {
        let mut assembler = PesAssembler::new(PID, BufferPolicy::Growable);
        let absorbed = feed(&mut assembler, &continuation(7, 1));

        assert_eq!(
            absorbed.event,
            AssemblyEvent::Continued {
                pid: PID,
                appended: 0
            }
        );
        assert_eq!(assembler.last_counter(), Some(7));
    }
}
