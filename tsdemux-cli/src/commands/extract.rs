use anyhow::{bail, Context, Result};
use colored::*;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tsdemux_core::{ChannelConfig, DemuxStats, Demuxer, ResyncPolicy, WriterSink};

/// What was written for one PID
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedChannel {
    pub pid: u16,
    pub path: PathBuf,
    pub packets: usize,
    pub bytes: usize,
    pub incomplete: usize,
    pub gaps: usize,
    pub failures: usize,
}

/// Result of an extract run
#[derive(Debug, Clone, Serialize)]
pub struct ExtractSummary {
    pub stats: DemuxStats,
    pub channels: Vec<ExtractedChannel>,
}

/// Output file of `pid` inside `dir`
pub fn output_path(dir: &Path, pid: u16) -> PathBuf {
    dir.join(format!("pid{}.pes", pid))
}

pub fn execute(
    input: &str,
    tracks: &[ChannelConfig],
    output_dir: &str,
    resync: ResyncPolicy,
) -> Result<ExtractSummary> {
    if tracks.is_empty() {
        bail!("At least one --track is required");
    }

    info!("Extracting {} PID(s) from: {}", tracks.len(), input);

    let dir = Path::new(output_dir);
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir))?;

    let mut demuxer: Demuxer<WriterSink<BufWriter<File>>> = Demuxer::new();
    for track in tracks {
        let path = output_path(dir, track.pid);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        demuxer
            .track(*track, WriterSink::new(BufWriter::new(file)))
            .with_context(|| format!("Cannot track PID {}", track.pid))?;
    }

    let reader = super::open_input(input)?;
    let stats = demuxer
        .run(reader, resync)
        .with_context(|| format!("Failed to demultiplex: {}", input))?;

    if stats.sync_errors > 0 {
        warn!("{} sync losses while reading {}", stats.sync_errors, input);
    }

    let mut channels = Vec::new();
    for (pid, sink) in demuxer.into_sinks() {
        let channel = ExtractedChannel {
            pid,
            path: output_path(dir, pid),
            packets: sink.packets(),
            bytes: sink.bytes(),
            incomplete: sink.incomplete(),
            gaps: sink.gaps(),
            failures: sink.failures(),
        };
        sink.into_inner()
            .with_context(|| format!("Failed to flush {}", channel.path.display()))?;
        channels.push(channel);
    }

    println!("\n=== Extraction Results ===");
    println!("Units read:        {}", stats.units);
    println!("Sync errors:       {}", stats.sync_errors);
    println!("Untracked units:   {}", stats.untracked_units);
    println!();
    for channel in &channels {
        let status = if channel.gaps == 0 && channel.failures == 0 && channel.incomplete == 0 {
            "✓".green()
        } else {
            "⚠".yellow()
        };
        println!(
            "{} PID {:#06x}: {} packets, {} bytes, {} gaps, {} failures, {} incomplete -> {}",
            status,
            channel.pid,
            channel.packets,
            channel.bytes,
            channel.gaps,
            channel.failures,
            channel.incomplete,
            channel.path.display()
        );
    }

    Ok(ExtractSummary { stats, channels })
}
