//! Routing units to per-PID assemblers and their sinks

use crate::assembler::{Absorbed, AssemblyEvent, PesAssembler};
use crate::buffer::BufferPolicy;
use crate::constants::{MAX_PID, TS_PACKET_SIZE};
use crate::decoder::{decode_adaptation_field, decode_unit_header};
use crate::error::TsError;
use crate::scanner::{units, ResyncPolicy};
use crate::sink::PacketSink;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Registration of one PID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// PID to follow
    pub pid: u16,

    /// Buffer sizing for its PES packets
    pub policy: BufferPolicy,
}

impl ChannelConfig {
    /// Follow `pid` with the given policy
    pub fn new(pid: u16, policy: BufferPolicy) -> Self {
        Self { pid, policy }
    }
}

/// Parses `PID[:policy]`, the PID in decimal or `0x` hex
impl FromStr for ChannelConfig {
    type Err = TsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pid_str, policy) = match s.split_once(':') {
            Some((pid, policy)) => (pid, policy.parse()?),
            None => (s, BufferPolicy::default()),
        };

        let pid_str = pid_str.trim();
        let parsed = match pid_str
            .strip_prefix("0x")
            .or_else(|| pid_str.strip_prefix("0X"))
        {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => pid_str.parse::<u16>(),
        };
        let pid = parsed
            .map_err(|_| TsError::InvalidConfig(alloc::format!("invalid PID '{}'", pid_str)))?;

        if pid > MAX_PID {
            return Err(TsError::InvalidPid(pid));
        }

        Ok(Self { pid, policy })
    }
}

impl fmt::Display for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.policy)
    }
}

/// Counters kept while demultiplexing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemuxStats {
    /// Units decoded
    pub units: usize,

    /// Sync losses reported by the source
    pub sync_errors: usize,

    /// Trailing partial units
    pub incomplete_units: usize,

    /// Units with the reserved adaptation field control
    pub reserved_field_control: usize,

    /// Adaptation fields clamped as malformed
    pub malformed_adaptation: usize,

    /// Units flagged by the transport error indicator
    pub transport_errors: usize,

    /// Units of PIDs nobody tracks
    pub untracked_units: usize,

    /// Continuity counter gaps on tracked PIDs
    pub sequence_gaps: usize,

    /// PES packets handed to sinks
    pub packets: usize,

    /// Packets finalized short of their declared length
    pub incomplete_packets: usize,

    /// Packets aborted
    pub failures: usize,
}

struct Channel<S> {
    assembler: PesAssembler,
    sink: S,
}

/// Demultiplexer over a stream of 188-byte units
///
/// Each tracked PID owns a [`PesAssembler`] and a sink; units of other PIDs are
/// counted and dropped.
pub struct Demuxer<S = Box<dyn PacketSink>> {
    channels: HashMap<u16, Channel<S>>,
    stats: DemuxStats,
}

impl<S: PacketSink> Demuxer<S> {
    /// Create a demuxer without tracked PIDs
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            stats: DemuxStats::default(),
        }
    }

    /// Start following `config.pid`, delivering its packets to `sink`
    pub fn track(&mut self, config: ChannelConfig, sink: S) -> Result<(), TsError> {
        if config.pid > MAX_PID {
            return Err(TsError::InvalidPid(config.pid));
        }
        if self.channels.contains_key(&config.pid) {
            return Err(TsError::DuplicateChannel(config.pid));
        }

        #[cfg(feature = "logging")]
        debug!("Tracking PID {} ({} buffer)", config.pid, config.policy);

        self.channels.insert(
            config.pid,
            Channel {
                assembler: PesAssembler::new(config.pid, config.policy),
                sink,
            },
        );
        Ok(())
    }

    /// Check if `pid` is tracked
    pub fn is_tracked(&self, pid: u16) -> bool {
        self.channels.contains_key(&pid)
    }

    /// Tracked PIDs in ascending order
    pub fn tracked_pids(&self) -> Vec<u16> {
        let mut pids: Vec<u16> = self.channels.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Assembler of a tracked PID
    pub fn assembler(&self, pid: u16) -> Option<&PesAssembler> {
        self.channels.get(&pid).map(|c| &c.assembler)
    }

    /// Sink of a tracked PID
    pub fn sink(&self, pid: u16) -> Option<&S> {
        self.channels.get(&pid).map(|c| &c.sink)
    }

    /// Counters so far
    pub fn stats(&self) -> &DemuxStats {
        &self.stats
    }

    /// Decode one unit and feed it to its PID's assembler
    ///
    /// Returns `Ok(None)` for untracked PIDs. A reserved adaptation field control
    /// is returned as an error after being counted; the unit is not absorbed.
    /// Sink failures propagate.
    pub fn process_unit(&mut self, unit: &[u8]) -> Result<Option<Absorbed>, TsError> {
        if unit.len() != TS_PACKET_SIZE {
            self.stats.incomplete_units += 1;
            return Err(TsError::IncompleteUnit {
                expected: TS_PACKET_SIZE,
                actual: unit.len(),
            });
        }

        let header = match decode_unit_header(unit) {
            Ok(header) => header,
            Err(e) => {
                self.stats.sync_errors += 1;
                return Err(e);
            }
        };
        self.stats.units += 1;

        if header.transport_error {
            self.stats.transport_errors += 1;
        }

        if let Err(e) = header.validate() {
            self.stats.reserved_field_control += 1;

            #[cfg(feature = "logging")]
            warn!("Dropping unit: {}", e);

            return Err(e);
        }

        let Some(channel) = self.channels.get_mut(&header.pid) else {
            self.stats.untracked_units += 1;
            return Ok(None);
        };

        let adaptation = decode_adaptation_field(unit, header.field_control)?;
        if adaptation.malformed {
            self.stats.malformed_adaptation += 1;
        }

        let absorbed = channel.assembler.absorb(unit, &header, &adaptation);

        if let Some(packet) = &absorbed.finished {
            dispatch(
                &mut channel.sink,
                &mut self.stats,
                &AssemblyEvent::Finished(packet.clone()),
            )?;
        }
        dispatch(&mut channel.sink, &mut self.stats, &absorbed.event)?;

        Ok(Some(absorbed))
    }

    /// Demultiplex a whole in-memory stream, then flush every channel
    pub fn run_slice(&mut self, data: &[u8], policy: ResyncPolicy) -> Result<DemuxStats, TsError> {
        for item in units(data, policy) {
            match item {
                Ok(unit) => self.absorb_or_skip(unit.bytes)?,
                Err(TsError::SourceExhausted { .. }) => self.stats.incomplete_units += 1,
                Err(_) => self.stats.sync_errors += 1,
            }
        }

        self.finish()?;
        Ok(self.stats.clone())
    }

    /// Demultiplex everything `reader` yields, then flush every channel
    ///
    /// Only read failures and sink failures are returned; damaged units are
    /// counted in the stats.
    #[cfg(feature = "std")]
    pub fn run<R: std::io::Read>(
        &mut self,
        reader: R,
        policy: ResyncPolicy,
    ) -> Result<DemuxStats, TsError> {
        for item in crate::scanner::UnitReader::new(reader, policy) {
            match item {
                Ok(unit) => self.absorb_or_skip(&unit)?,
                Err(TsError::SyncError(_)) => self.stats.sync_errors += 1,
                Err(TsError::SourceExhausted { .. }) => self.stats.incomplete_units += 1,
                Err(e) => return Err(e),
            }
        }

        self.finish()?;
        Ok(self.stats.clone())
    }

    fn absorb_or_skip(&mut self, unit: &[u8]) -> Result<(), TsError> {
        match self.process_unit(unit) {
            Ok(_) => Ok(()),
            Err(e @ TsError::Sink(_)) => Err(e),
            Err(_) => Ok(()),
        }
    }

    /// Flush every channel's packet in flight to its sink
    ///
    /// Calling it again emits nothing.
    pub fn finish(&mut self) -> Result<(), TsError> {
        for pid in self.tracked_pids() {
            let Some(channel) = self.channels.get_mut(&pid) else {
                continue;
            };
            if let Some(packet) = channel.assembler.flush() {
                dispatch(
                    &mut channel.sink,
                    &mut self.stats,
                    &AssemblyEvent::Finished(packet),
                )?;
            }
        }

        #[cfg(feature = "logging")]
        debug!(
            "Demux finished: {} units, {} packets, {} gaps",
            self.stats.units, self.stats.packets, self.stats.sequence_gaps
        );

        Ok(())
    }

    /// Discard every channel's packet in flight
    pub fn cancel(&mut self) {
        for channel in self.channels.values_mut() {
            channel.assembler.cancel();
        }
    }

    /// Consume the demuxer, returning the sinks by ascending PID
    pub fn into_sinks(self) -> Vec<(u16, S)> {
        let mut sinks: Vec<(u16, S)> = self
            .channels
            .into_iter()
            .map(|(pid, channel)| (pid, channel.sink))
            .collect();
        sinks.sort_unstable_by_key(|(pid, _)| *pid);
        sinks
    }
}

impl<S: PacketSink> Default for Demuxer<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch<S: PacketSink>(
    sink: &mut S,
    stats: &mut DemuxStats,
    event: &AssemblyEvent,
) -> Result<(), TsError> {
    match event {
        AssemblyEvent::Finished(packet) => {
            stats.packets += 1;
            if !packet.complete {
                stats.incomplete_packets += 1;
            }
            sink.on_packet(packet.pid, packet)?;
        }
        AssemblyEvent::Started { pid, header, .. } => sink.on_started(*pid, header),
        AssemblyEvent::Continued { pid, appended } => sink.on_continued(*pid, *appended),
        AssemblyEvent::SequenceGap {
            pid,
            expected,
            found,
            appended,
        } => {
            stats.sequence_gaps += 1;
            sink.on_sequence_gap(*pid, *expected, *found);
            sink.on_continued(*pid, *appended);
        }
        AssemblyEvent::Failed { pid, error } => {
            stats.failures += 1;
            sink.on_failed(*pid, error);
        }
        AssemblyEvent::UnrelatedChannel { .. } => {}
    }
    Ok(())
}
