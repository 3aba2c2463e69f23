//! Unit sources: slicing a byte stream into 188-byte units
//!
//! Both sources report a lost sync byte as [`TsError::SyncError`] and then
//! recover according to a [`ResyncPolicy`], so a damaged capture still yields
//! every intact unit.

use crate::constants::{SYNC_BYTE, TS_PACKET_SIZE};
use crate::decoder::decode_unit_header;
use crate::error::TsError;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

#[cfg(feature = "logging")]
use tracing::debug;
#[cfg(all(feature = "std", feature = "logging"))]
use tracing::warn;

/// How to recover after a unit that does not start with the sync byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResyncPolicy {
    /// Search forward for the next sync byte
    #[default]
    SkipByte,
    /// Drop the whole 188-byte unit and try again at the next boundary
    SkipUnit,
}

impl FromStr for ResyncPolicy {
    type Err = TsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "byte" | "skip-byte" => Ok(ResyncPolicy::SkipByte),
            "unit" | "skip-unit" => Ok(ResyncPolicy::SkipUnit),
            other => Err(TsError::InvalidConfig(alloc::format!(
                "unknown resync policy '{}': expected byte or unit",
                other
            ))),
        }
    }
}

impl fmt::Display for ResyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResyncPolicy::SkipByte => f.write_str("byte"),
            ResyncPolicy::SkipUnit => f.write_str("unit"),
        }
    }
}

/// A unit found at a specific offset in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedUnit<'a> {
    /// Byte offset of the sync byte
    pub offset: usize,

    /// The 188 unit bytes
    pub bytes: &'a [u8],
}

/// Zero-copy iterator over the units of a byte slice
///
/// Created by [`units`].
#[derive(Debug, Clone)]
pub struct Units<'a> {
    data: &'a [u8],
    pos: usize,
    policy: ResyncPolicy,
}

/// Iterate over the 188-byte units of `data`
///
/// Yields `Err(SyncError)` once per damaged region and `Err(SourceExhausted)`
/// for a trailing partial unit.
pub fn units(data: &[u8], policy: ResyncPolicy) -> Units<'_> {
    Units {
        data,
        pos: 0,
        policy,
    }
}

impl<'a> Iterator for Units<'a> {
    type Item = Result<LocatedUnit<'a>, TsError>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.data.get(self.pos..).filter(|r| !r.is_empty())?;
        let offset = self.pos;

        if remaining[0] != SYNC_BYTE {
            self.pos = match self.policy {
                ResyncPolicy::SkipByte => find_sync(self.data, offset + 1).unwrap_or(self.data.len()),
                ResyncPolicy::SkipUnit => offset + remaining.len().min(TS_PACKET_SIZE),
            };

            #[cfg(feature = "logging")]
            debug!(
                "Sync lost at offset {}, resuming at {}",
                offset, self.pos
            );

            return Some(Err(TsError::SyncError(remaining[0])));
        }

        if remaining.len() < TS_PACKET_SIZE {
            self.pos = self.data.len();
            return Some(Err(TsError::SourceExhausted {
                pending: remaining.len(),
            }));
        }

        self.pos += TS_PACKET_SIZE;
        Some(Ok(LocatedUnit {
            offset,
            bytes: &remaining[..TS_PACKET_SIZE],
        }))
    }
}

/// Find the next sync byte at or after `from` that starts a plausible unit
///
/// A candidate is accepted when the byte one unit later is also a sync byte,
/// or when that position lies past the end of the data.
fn find_sync(data: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(rel) = memchr::memchr(SYNC_BYTE, data.get(pos..)?) {
        let candidate = pos + rel;
        match data.get(candidate + TS_PACKET_SIZE) {
            Some(&SYNC_BYTE) | None => return Some(candidate),
            Some(_) => pos = candidate + 1,
        }
    }
    None
}

/// Scan statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Total bytes scanned
    pub bytes_scanned: usize,

    /// Number of units found
    pub units_found: usize,

    /// Number of sync losses
    pub sync_errors: usize,

    /// Bytes dropped while resynchronizing
    pub bytes_skipped: usize,

    /// Bytes of a trailing partial unit
    pub trailing_bytes: usize,

    /// Units per PID
    pub pid_counts: BTreeMap<u16, usize>,
}

impl ScanStats {
    /// Share of the scanned bytes that belong to intact units, as a percentage
    pub fn recovery_rate(&self) -> f64 {
        if self.bytes_scanned == 0 {
            0.0
        } else {
            (self.units_found * TS_PACKET_SIZE) as f64 / self.bytes_scanned as f64 * 100.0
        }
    }
}

/// Collect every unit of `data` together with scan statistics
pub fn scan_units_with_stats(
    data: &[u8],
    policy: ResyncPolicy,
) -> (Vec<LocatedUnit<'_>>, ScanStats) {
    let mut stats = ScanStats {
        bytes_scanned: data.len(),
        ..Default::default()
    };
    let mut found = Vec::with_capacity(data.len() / TS_PACKET_SIZE);
    let mut iter = units(data, policy);

    loop {
        let before = iter.pos;
        let Some(item) = iter.next() else {
            break;
        };

        match item {
            Ok(unit) => {
                if let Ok(header) = decode_unit_header(unit.bytes) {
                    *stats.pid_counts.entry(header.pid).or_insert(0) += 1;
                }
                found.push(unit);
            }
            Err(TsError::SourceExhausted { pending }) => {
                stats.trailing_bytes = pending;
            }
            Err(_) => {
                stats.sync_errors += 1;
                stats.bytes_skipped += iter.pos - before;
            }
        }
    }

    stats.units_found = found.len();

    #[cfg(feature = "logging")]
    debug!(
        "Scan complete: {} units, {} sync errors in {} bytes",
        stats.units_found, stats.sync_errors, stats.bytes_scanned
    );

    (found, stats)
}

/// Reads 188-byte units from a [`std::io::Read`]
///
/// The streaming counterpart of [`units`]: sync losses are reported as
/// `Err(SyncError)` and recovered per the [`ResyncPolicy`]. Under
/// [`ResyncPolicy::SkipByte`] the next sync byte is taken as a unit boundary
/// without look-ahead confirmation.
#[cfg(feature = "std")]
pub struct UnitReader<R: std::io::Read> {
    reader: R,
    policy: ResyncPolicy,
    buf: [u8; TS_PACKET_SIZE],
    /// Bytes of `buf` carried over from a resync
    carried: usize,
    position: u64,
    done: bool,
}

#[cfg(feature = "std")]
impl<R: std::io::Read> UnitReader<R> {
    /// Wrap `reader`
    pub fn new(reader: R, policy: ResyncPolicy) -> Self {
        Self {
            reader,
            policy,
            buf: [0u8; TS_PACKET_SIZE],
            carried: 0,
            position: 0,
            done: false,
        }
    }

    /// Stream offset of the next byte to be examined
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Fill `buf[from..]`, returning the number of bytes now held
    fn fill(&mut self, from: usize) -> std::io::Result<usize> {
        let mut filled = from;
        while filled < TS_PACKET_SIZE {
            match self.reader.read(&mut self.buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

#[cfg(feature = "std")]
impl<R: std::io::Read> Iterator for UnitReader<R> {
    type Item = Result<[u8; TS_PACKET_SIZE], TsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let held = match self.fill(self.carried) {
            Ok(held) => held,
            Err(e) => {
                #[cfg(feature = "logging")]
                warn!("Read failed at offset {}: {}", self.position, e);

                self.done = true;
                return Some(Err(e.into()));
            }
        };
        self.carried = 0;

        if held == 0 {
            self.done = true;
            return None;
        }

        if self.buf[0] != SYNC_BYTE {
            let found = self.buf[0];
            let resume = match self.policy {
                ResyncPolicy::SkipByte => memchr::memchr(SYNC_BYTE, &self.buf[1..held])
                    .map_or(held, |rel| rel + 1),
                ResyncPolicy::SkipUnit => held,
            };

            self.buf.copy_within(resume..held, 0);
            self.carried = held - resume;
            self.position += resume as u64;
            return Some(Err(TsError::SyncError(found)));
        }

        if held < TS_PACKET_SIZE {
            self.done = true;
            self.position += held as u64;
            return Some(Err(TsError::SourceExhausted { pending: held }));
        }

        self.position += TS_PACKET_SIZE as u64;
        Some(Ok(self.buf))
    }
}
