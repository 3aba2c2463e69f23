//! # tsdemux Core
//!
//! MPEG transport stream unit parsing and per-PID PES packet reassembly.
//!
//! ## Modules
//!
//! - `constants`: Unit layout constants, stream ids and flag sets
//! - `types`: Decoded structures (UnitHeader, AdaptationField, PesHeader, PesPacket)
//! - `decoder`: Unit header and adaptation field decoding
//! - `pes`: PES header decoding
//! - `encoder`: Unit and PES encoding, used to build streams
//! - `buffer`: Pre-sized and growable reassembly buffers
//! - `assembler`: Per-PID reassembly state machine
//! - `sink`: Destinations for finished packets
//! - `scanner`: Unit sources with resynchronization
//! - `demux`: Routing units to tracked PIDs
//!
//! ## Features
//!
//! - `std` (default): `UnitReader`, `WriterSink` and `std::error::Error` on `TsError`
//! - `logging` (default): diagnostics through `tracing`
//!
//! Every combination builds, including `--no-default-features` and
//! `--no-default-features --features logging` for `no_std` + `alloc` targets.
//!
//! ## Example
//!
//! ```
//! use tsdemux_core::{ChannelConfig, Demuxer, PesPacket, ResyncPolicy};
//! use tsdemux_core::encoder::{encode_pes_packet, packetize_pes, PesHeaderBuilder};
//!
//! let header = PesHeaderBuilder::new(0xE0).pts(90_000).build_struct();
//! let pes = encode_pes_packet(&header, b"access unit");
//! let stream: Vec<u8> = packetize_pes(0x100, &pes, 0)
//!     .unwrap()
//!     .concat();
//!
//! let mut demuxer: Demuxer<Vec<PesPacket>> = Demuxer::new();
//! demuxer.track("0x100".parse::<ChannelConfig>().unwrap(), Vec::new()).unwrap();
//! demuxer.run_slice(&stream, ResyncPolicy::SkipByte).unwrap();
//!
//! let packets = &demuxer.into_sinks()[0].1;
//! assert_eq!(&packets[0].payload[..], b"access unit");
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod assembler;
pub mod buffer;
pub mod constants;
pub mod decoder;
pub mod demux;
pub mod encoder;
pub mod error;
pub mod pes;
pub mod scanner;
pub mod sink;
pub mod types;

// Re-export commonly used types
pub use assembler::{Absorbed, AssemblyEvent, AssemblyState, PesAssembler};
pub use buffer::{BufferPolicy, ReassemblyBuffer};
pub use constants::FieldControl;
pub use demux::{ChannelConfig, DemuxStats, Demuxer};
pub use error::TsError;
pub use scanner::{LocatedUnit, ResyncPolicy, ScanStats};
pub use sink::PacketSink;
pub use types::{AdaptationField, PesHeader, PesPacket, UnitHeader};

#[cfg(feature = "std")]
pub use scanner::UnitReader;
#[cfg(feature = "std")]
pub use sink::WriterSink;

/// Result type alias for tsdemux operations
pub type Result<T> = core::result::Result<T, TsError>;
