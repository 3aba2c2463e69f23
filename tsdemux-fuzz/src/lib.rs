//! Fuzzing entry points for tsdemux-core
//!
//! To use with cargo-fuzz:
//! 1. Install cargo-fuzz: cargo install cargo-fuzz
//! 2. Call these from fuzz targets, e.g. `cargo fuzz run fuzz_demux`

use tsdemux_core::constants::{SYNC_BYTE, TS_PACKET_SIZE};
use tsdemux_core::{BufferPolicy, ChannelConfig, Demuxer, PesPacket, ResyncPolicy};

/// Decode arbitrary bytes as one unit
pub fn fuzz_decode_unit(data: &[u8]) {
    use tsdemux_core::decoder::{decode_adaptation_field_strict, decode_unit};

    // Force the sync byte so the interesting paths are reached
    let mut unit = [0u8; TS_PACKET_SIZE];
    let n = data.len().min(TS_PACKET_SIZE);
    unit[..n].copy_from_slice(&data[..n]);
    unit[0] = SYNC_BYTE;

    // Should never panic
    if let Ok(decoded) = decode_unit(&unit) {
        let _ = decode_adaptation_field_strict(&unit, decoded.header.field_control);
    }
}

/// Decode arbitrary bytes as a PES header at every small offset
pub fn fuzz_pes_header(data: &[u8]) {
    use tsdemux_core::pes::decode_pes_header;

    for offset in 0..data.len().min(8) {
        let _ = decode_pes_header(data, offset);
    }
}

/// Run arbitrary bytes through the demuxer with both buffer policies and resync modes
pub fn fuzz_demux(data: &[u8]) {
    // The first byte picks the tracked PID's low bits
    let pid = data.first().map_or(0x100, |&b| 0x100 | b as u16);

    for (policy, resync) in [
        (BufferPolicy::Presized, ResyncPolicy::SkipByte),
        (BufferPolicy::Growable, ResyncPolicy::SkipUnit),
    ] {
        let mut demuxer: Demuxer<Vec<PesPacket>> = Demuxer::new();
        if demuxer.track(ChannelConfig::new(pid, policy), Vec::new()).is_ok() {
            let _ = demuxer.run_slice(data, resync);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsdemux_core::encoder::{encode_pes_packet, packetize_pes, PesHeaderBuilder};

    #[test]
    fn test_fuzz_decode_empty() {
        fuzz_decode_unit(&[]);
    }

    #[test]
    fn test_fuzz_decode_random() {
        fuzz_decode_unit(&[0x12, 0x34, 0x56, 0x78, 0xFF, 0xFF]);
        fuzz_decode_unit(&[0xFF; 300]);
    }

    #[test]
    fn test_fuzz_pes_header_random() {
        fuzz_pes_header(&[]);
        fuzz_pes_header(&[0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0xC0, 0xFF]);
    }

    #[test]
    fn test_fuzz_demux_random() {
        fuzz_demux(&[]);
        fuzz_demux(&[0x47; 1024]);
    }

    #[test]
    fn test_fuzz_demux_valid_seed() {
        let header = PesHeaderBuilder::new(0xE0).pts(1).packet_length(50).build_struct();
        let units = packetize_pes(0x147, &encode_pes_packet(&header, &[0x47; 42]), 0).unwrap();
        fuzz_demux(&units.concat());
    }
}
