use anyhow::{Context, Result};
use colored::*;
use std::fs;
use tracing::info;
use tsdemux_core::{
    constants::TS_PACKET_SIZE,
    scanner::{scan_units_with_stats, ScanStats},
    ResyncPolicy,
};

pub fn execute(input: &str, resync: ResyncPolicy, output: Option<&str>) -> Result<ScanStats> {
    info!("Scanning file: {} (resync by {})", input, resync);

    let data = super::read_input(input)?;
    info!("File size: {} bytes", data.len());

    let (_, stats) = scan_units_with_stats(&data, resync);

    println!("\n=== Scan Results ===");
    println!("Bytes scanned:     {} bytes", stats.bytes_scanned);
    println!("Units found:       {}", stats.units_found);
    if stats.sync_errors > 0 {
        println!("Sync errors:       {}", stats.sync_errors.to_string().red());
    } else {
        println!("Sync errors:       {}", stats.sync_errors);
    }
    println!("Bytes skipped:     {} bytes", stats.bytes_skipped);
    println!("Trailing bytes:    {} bytes", stats.trailing_bytes);
    println!("Recovery rate:     {:.2}%", stats.recovery_rate());
    println!();

    println!("{:<8} {:>10} {:>14}", "PID", "Units", "Bytes");
    for (pid, count) in &stats.pid_counts {
        println!(
            "{:<8} {:>10} {:>14}",
            format!("{:#06x}", pid),
            count,
            count * TS_PACKET_SIZE
        );
    }

    if let Some(output_path) = output {
        let json = serde_json::to_string_pretty(&stats)
            .with_context(|| "Failed to serialize scan statistics")?;

        fs::write(output_path, json)
            .with_context(|| format!("Failed to write output file: {}", output_path))?;

        info!("Scan statistics written to: {}", output_path);
    }

    Ok(stats)
}
