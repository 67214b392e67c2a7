//! recmux CLI - record, remux and inspect MP4 recordings.

mod commands;
mod settings;

use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;

use commands::{CmdCodecs, CmdProbe, CmdRecord, CmdRemux};
use settings::CliSettings;

/// Command-line arguments for the recmux tool.
#[derive(Parser, Debug)]
#[command(name = "recmux")]
#[command(version)]
#[command(about = "Record live media into MP4 files")]
#[command(long_about = "recmux records packet streams into MP4 files, finalizes them and hands\n\
    them to storage.\n\n\
    EXAMPLES:\n    \
    recmux probe input.mp4 --json\n    \
    recmux remux input.mp4 output.mp4 --rotate 90\n    \
    recmux record input.mp4 --id stream1 --output-dir ./recordings\n    \
    recmux --config recmux.json record input.mp4 --storage ./bucket")]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the streams of an MP4 file
    Probe(CmdProbe),
    /// Rewrite an MP4 file
    Remux(CmdRemux),
    /// Record an MP4 file through a recording session
    Record(CmdRecord),
    /// List codecs accepted by the recorder
    Codecs(CmdCodecs),
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("{} logging disabled: {}", style("Warning:").yellow().bold(), e);
    }

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

/// Install the global log subscriber.
fn init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .try_init()
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = match &cli.config {
        Some(path) => CliSettings::load(path)?,
        None => CliSettings::default(),
    };

    match cli.command {
        Command::Probe(cmd) => cmd.run(),
        Command::Remux(cmd) => cmd.run(&settings),
        Command::Record(cmd) => cmd.run(settings),
        Command::Codecs(cmd) => cmd.run(),
    }
}
