use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;
use std::io::{self, Write};
use tracing::{info, warn};
use tsdemux_core::{
    constants::FieldControl,
    decoder::{decode_adaptation_field, decode_unit_header},
    scanner::units,
    AdaptationField, AssemblyEvent, ChannelConfig, Demuxer, PesHeader, PesPacket,
    ResyncPolicy, TsError, UnitHeader,
};

/// One decoded unit, as emitted in JSON mode
#[derive(Serialize)]
struct UnitRecord {
    index: usize,
    offset: usize,
    header: UnitHeader,
    #[serde(skip_serializing_if = "Option::is_none")]
    adaptation: Option<AdaptationField>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<EventRecord>,
}

/// JSON-friendly view of an assembly event
#[derive(Serialize)]
struct EventRecord {
    kind: &'static str,
    pid: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<PesHeader>,
    /// PES header length, extended header included
    #[serde(skip_serializing_if = "Option::is_none")]
    header_len: Option<usize>,
    /// Declared PES payload length, absent when unbounded
    #[serde(skip_serializing_if = "Option::is_none")]
    data_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl EventRecord {
    fn new(kind: &'static str, pid: u16) -> Self {
        Self {
            kind,
            pid,
            bytes: None,
            header: None,
            header_len: None,
            data_len: None,
            complete: None,
            detail: None,
        }
    }

    fn with_pes(self, header: &PesHeader) -> Self {
        Self {
            header: Some(*header),
            header_len: Some(header.header_len()),
            data_len: header.payload_len(),
            ..self
        }
    }

    fn from_event(event: &AssemblyEvent) -> Option<Self> {
        let detail = event.diagnostic().map(|e| e.to_string());
        let record = match event {
            AssemblyEvent::UnrelatedChannel { .. } => return None,
            AssemblyEvent::Started {
                pid,
                header,
                appended,
            } => EventRecord {
                bytes: Some(*appended),
                ..Self::new("started", *pid)
            }
            .with_pes(header),
            AssemblyEvent::Continued { pid, appended } => EventRecord {
                bytes: Some(*appended),
                ..Self::new("continued", *pid)
            },
            AssemblyEvent::SequenceGap { pid, appended, .. } => EventRecord {
                bytes: Some(*appended),
                detail,
                ..Self::new("sequence_gap", *pid)
            },
            AssemblyEvent::Finished(packet) => EventRecord {
                bytes: Some(packet.len()),
                complete: Some(packet.complete),
                ..Self::new("finished", packet.pid)
            }
            .with_pes(&packet.header),
            AssemblyEvent::Failed { pid, .. } => EventRecord {
                detail,
                ..Self::new("failed", *pid)
            },
        };
        Some(record)
    }
}

/// Totals of an inspect run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InspectSummary {
    /// Units printed
    pub units: usize,
    /// Sync losses and partial units
    pub damaged: usize,
    /// PES packets finished on tracked PIDs
    pub packets: usize,
}

pub fn execute(
    input: &str,
    tracks: &[ChannelConfig],
    limit: Option<usize>,
    json: bool,
) -> Result<InspectSummary> {
    info!("Inspecting: {}", input);

    let data = super::read_input(input)?;
    info!("Input size: {} bytes", data.len());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    render(&data, tracks, limit, json, &mut out)
}

/// Print one line (or JSON object) per unit of `data` to `out`
pub fn render<W: Write>(
    data: &[u8],
    tracks: &[ChannelConfig],
    limit: Option<usize>,
    json: bool,
    out: &mut W,
) -> Result<InspectSummary> {
    let mut demuxer: Demuxer<Vec<PesPacket>> = Demuxer::new();
    for track in tracks {
        demuxer
            .track(*track, Vec::new())
            .with_context(|| format!("Cannot track PID {}", track.pid))?;
    }

    let mut summary = InspectSummary::default();
    let mut index = 0usize;

    for item in units(data, ResyncPolicy::SkipByte) {
        if limit.is_some_and(|limit| index >= limit) {
            break;
        }

        let unit = match item {
            Ok(unit) => unit,
            Err(e) => {
                warn!("{}", e);
                summary.damaged += 1;
                if !json {
                    writeln!(out, "{} {}", "!".red(), e)?;
                }
                continue;
            }
        };

        let header = decode_unit_header(unit.bytes)?;
        let adaptation = if header.has_adaptation_field() {
            Some(decode_adaptation_field(unit.bytes, header.field_control)?)
        } else {
            None
        };

        let mut events = Vec::new();
        if demuxer.is_tracked(header.pid) {
            match demuxer.process_unit(unit.bytes) {
                Ok(Some(absorbed)) => events.extend(absorbed.events()),
                Ok(None) => {}
                Err(TsError::ReservedFieldControl { .. }) => {}
                Err(e) => return Err(e).context("Demux failed"),
            }
        }

        if json {
            let record = UnitRecord {
                index,
                offset: unit.offset,
                header,
                adaptation,
                events: events.iter().filter_map(EventRecord::from_event).collect(),
            };
            serde_json::to_writer(&mut *out, &record).context("Failed to serialize unit")?;
            writeln!(out)?;
        } else {
            writeln!(
                out,
                "#{:<6} @{:<9} {}{}",
                index,
                unit.offset,
                describe_header(&header),
                adaptation
                    .as_ref()
                    .map(describe_adaptation)
                    .unwrap_or_default()
            )?;
            for event in &events {
                if let Some(line) = describe_event(event) {
                    writeln!(out, "         {}", line)?;
                }
            }
        }

        index += 1;
    }

    // Packets still in flight end with the stream
    demuxer.finish().context("Demux failed")?;

    summary.units = index;
    summary.packets = demuxer.stats().packets;
    if !json {
        writeln!(
            out,
            "\n{} units, {} damaged, {} PES packets",
            summary.units, summary.damaged, summary.packets
        )?;
    }
    Ok(summary)
}

fn describe_header(header: &UnitHeader) -> String {
    let mut flags = String::new();
    if header.payload_unit_start {
        flags.push('S');
    }
    if header.transport_error {
        flags.push('E');
    }
    if header.transport_priority {
        flags.push('P');
    }

    let control = match header.field_control {
        FieldControl::Reserved => "reserved".red().to_string(),
        FieldControl::PayloadOnly => "payload".to_string(),
        FieldControl::AdaptationOnly => "adaptation".to_string(),
        FieldControl::AdaptationAndPayload => "adaptation+payload".to_string(),
    };

    format!(
        "PID {:#06x} cc {:>2} sc {} {:<18} {:<3}",
        header.pid, header.continuity_counter, header.scrambling_control, control, flags
    )
}

fn describe_adaptation(field: &AdaptationField) -> String {
    let mut parts = vec![format!("af {}", field.length)];
    if let Some(pcr) = field.pcr {
        parts.push(format!("PCR {}", pcr));
    }
    if let Some(opcr) = field.opcr {
        parts.push(format!("OPCR {}", opcr));
    }
    if let Some(countdown) = field.splice_countdown {
        parts.push(format!("splice {}", countdown));
    }
    if let Some(data) = &field.private_data {
        parts.push(format!("private {}B", data.len()));
    }
    if let Some(extension) = &field.extension {
        parts.push(format!("ext {}", extension.length));
    }
    if field.flags.discontinuity() {
        parts.push("discontinuity".to_string());
    }
    if field.flags.random_access() {
        parts.push("RAP".to_string());
    }
    if field.stuffing_len > 0 {
        parts.push(format!("stuffing {}", field.stuffing_len));
    }
    if field.malformed {
        parts.push("malformed".red().to_string());
    }
    format!(" [{}]", parts.join(", "))
}

fn describe_pes(header: &PesHeader) -> String {
    let mut text = format!("stream {:#04x} HL {}", header.stream_id, header.header_len());
    match header.payload_len() {
        Some(len) => text.push_str(&format!(" DL {}", len)),
        None => text.push_str(" DL unbounded"),
    }
    if let Some(pts) = header.pts {
        text.push_str(&format!(" PTS {}", pts));
    }
    if let Some(dts) = header.dts {
        text.push_str(&format!(" DTS {}", dts));
    }
    if !header.has_valid_start_code() {
        text.push_str(&format!(" {}", "bad start code".red()));
    }
    text
}

fn describe_event(event: &AssemblyEvent) -> Option<String> {
    let line = match event {
        AssemblyEvent::UnrelatedChannel { .. } | AssemblyEvent::Continued { .. } => return None,
        AssemblyEvent::Started {
            header, appended, ..
        } => format!("{} PES {} (+{} bytes)", "▶".green(), describe_pes(header), appended),
        AssemblyEvent::SequenceGap { .. } => format!(
            "{} {}",
            "⚠".yellow(),
            event.diagnostic().map(|e| e.to_string()).unwrap_or_default()
        ),
        AssemblyEvent::Finished(packet) => format!(
            "{} PES finished: {} bytes{}",
            "■".green(),
            packet.len(),
            if packet.complete { "" } else { " (incomplete)" }
        ),
        AssemblyEvent::Failed { error, .. } => format!("{} {}", "✗".red(), error),
    };
    Some(line)
}
