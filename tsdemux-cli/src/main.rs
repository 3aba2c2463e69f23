use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tsdemux_cli::commands;
use tsdemux_core::{ChannelConfig, ResyncPolicy};

#[derive(Parser)]
#[command(name = "tsdemux")]
#[command(about = "tsdemux - MPEG transport stream inspection and PES extraction", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the decoded header and adaptation field of every unit
    Inspect {
        /// Input file ("-" for stdin)
        #[arg(short, long)]
        input: String,

        /// PID to reassemble, as PID[:presized|:growable]
        #[arg(short, long = "track")]
        tracks: Vec<ChannelConfig>,

        /// Stop after this many units
        #[arg(short, long)]
        limit: Option<usize>,

        /// Emit one JSON object per unit
        #[arg(long)]
        json: bool,
    },

    /// Reassemble PES packets of the tracked PIDs into pid<PID>.pes files
    Extract {
        /// Input file ("-" for stdin)
        #[arg(short, long)]
        input: String,

        /// PID to reassemble, as PID[:presized|:growable]
        #[arg(short, long = "track", required = true)]
        tracks: Vec<ChannelConfig>,

        /// Directory for the extracted payloads
        #[arg(short, long)]
        output_dir: String,

        /// Recovery after a lost sync byte: byte or unit
        #[arg(long, default_value = "byte")]
        resync: ResyncPolicy,
    },

    /// Count units per PID and report damage
    Scan {
        /// Input file ("-" for stdin)
        #[arg(short, long)]
        input: String,

        /// Recovery after a lost sync byte: byte or unit
        #[arg(long, default_value = "byte")]
        resync: ResyncPolicy,

        /// Output JSON file for the statistics
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Execute command
    match cli.command {
        Commands::Inspect {
            input,
            tracks,
            limit,
            json,
        } => commands::inspect::execute(&input, &tracks, limit, json).map(|_| ()),

        Commands::Extract {
            input,
            tracks,
            output_dir,
            resync,
        } => commands::extract::execute(&input, &tracks, &output_dir, resync).map(|_| ()),

        Commands::Scan {
            input,
            resync,
            output,
        } => commands::scan::execute(&input, resync, output.as_deref()).map(|_| ()),
    }
}
