//! Build a small transport stream with video, audio and clock units

use tsdemux_core::encoder::{encode_pes_packet, packetize_pes, PesHeaderBuilder, UnitBuilder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("tsdemux Stream Building Example\n");

    let mut output = Vec::new();
    let mut video_cc = 0u8;
    let mut audio_cc = 0u8;

    for i in 0..5u64 {
        // Clock reference on the video PID ahead of each access unit
        let clock = UnitBuilder::new(0x100)
            .counter(video_cc)
            .pcr(i * 3003, 0)
            .random_access()
            .adaptation_only()
            .build()?;
        output.extend_from_slice(&clock);

        let video = format!("video access unit {}", i).repeat(40);
        let header = PesHeaderBuilder::new(0xE0)
            .pts(i * 3003 + 6006)
            .dts(i * 3003 + 3003)
            .data_alignment()
            .build_struct();
        let units = packetize_pes(0x100, &encode_pes_packet(&header, video.as_bytes()), video_cc)?;
        video_cc = ((video_cc as usize + units.len()) % 16) as u8;
        println!("Video PES {}: {} payload bytes in {} units", i, video.len(), units.len());
        for unit in &units {
            output.extend_from_slice(unit);
        }

        let audio = format!("audio frame {}", i).repeat(10);
        let header = PesHeaderBuilder::new(0xC0)
            .pts(i * 3003 + 6006)
            .packet_length((audio.len() + 8) as u16)
            .build_struct();
        let units = packetize_pes(0x101, &encode_pes_packet(&header, audio.as_bytes()), audio_cc)?;
        audio_cc = ((audio_cc as usize + units.len()) % 16) as u8;
        println!("Audio PES {}: {} payload bytes in {} units", i, audio.len(), units.len());
        for unit in &units {
            output.extend_from_slice(unit);
        }
    }

    std::fs::write("example_output.ts", &output)?;

    println!("\nWrote {} bytes ({} units) to example_output.ts", output.len(), output.len() / 188);
    println!("Use 'tsdemux extract --input example_output.ts --track 0x100 --track 0x101:presized --output-dir out' to read it back");

    Ok(())
}
