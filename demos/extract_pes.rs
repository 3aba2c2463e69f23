//! Recover PES packets from a damaged stream

use tsdemux_core::encoder::{encode_pes_packet, packetize_pes, PesHeaderBuilder};
use tsdemux_core::scanner::scan_units_with_stats;
use tsdemux_core::{ChannelConfig, Demuxer, PesPacket, ResyncPolicy};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("tsdemux PES Extraction Example\n");

    // Step 1: Three bounded packets on PID 0x44
    let mut units = Vec::new();
    for i in 0..3u8 {
        let payload = vec![b'a' + i; 500];
        let header = PesHeaderBuilder::new(0xE0)
            .pts(i as u64 * 3600)
            .packet_length(508)
            .build_struct();
        units.extend(packetize_pes(0x44, &encode_pes_packet(&header, &payload), i * 3)?);
    }

    // Step 2: Damage it: garbage up front, one unit lost, one sync byte flipped
    let mut stream = b"NOISE".to_vec();
    for (n, unit) in units.iter().enumerate() {
        if n == 4 {
            continue;
        }
        let start = stream.len();
        stream.extend_from_slice(unit);
        if n == 7 {
            stream[start] = 0x00;
        }
    }
    println!("Damaged stream: {} bytes", stream.len());

    let (_, scan) = scan_units_with_stats(&stream, ResyncPolicy::SkipByte);
    println!(
        "Scan: {} units, {} sync errors, {:.1}% recovered",
        scan.units_found,
        scan.sync_errors,
        scan.recovery_rate()
    );

    // Step 3: Reassemble
    let mut demuxer: Demuxer<Vec<PesPacket>> = Demuxer::new();
    demuxer.track("0x44:presized".parse::<ChannelConfig>()?, Vec::new())?;
    let stats = demuxer.run_slice(&stream, ResyncPolicy::SkipByte)?;

    println!(
        "\nDemux: {} packets, {} gaps, {} incomplete",
        stats.packets, stats.sequence_gaps, stats.incomplete_packets
    );
    for (pid, packets) in demuxer.into_sinks() {
        for packet in packets {
            println!(
                "  PID {:#06x}: PTS {:?}, {} bytes, complete: {}",
                pid,
                packet.header.pts,
                packet.len(),
                packet.complete
            );
        }
    }

    Ok(())
}
