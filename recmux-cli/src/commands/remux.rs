//! MP4 rewrite command.

use crate::settings::CliSettings;
use clap::Args;
use console::style;
use recmux::MuxOptions;
use std::path::PathBuf;

/// Rewrite an MP4 file, optionally tagging a display rotation.
#[derive(Args, Debug)]
pub struct CmdRemux {
    /// Source file.
    pub input: PathBuf,

    /// Destination file.
    pub output: PathBuf,

    /// Display rotation in degrees (0, 90, 180, 270).
    #[arg(long)]
    pub rotate: Option<i32>,

    /// Keep the movie header after the media data.
    #[arg(long)]
    pub no_fast_start: bool,

    /// Overwrite the destination if it exists.
    #[arg(short = 'y', long)]
    pub overwrite: bool,
}

impl CmdRemux {
    /// Execute the remux command.
    pub fn run(&self, settings: &CliSettings) -> anyhow::Result<()> {
        if self.input == self.output {
            anyhow::bail!("input and output must differ");
        }
        if self.output.exists() && !self.overwrite {
            anyhow::bail!("{} exists (use -y to overwrite)", self.output.display());
        }

        let options = if self.no_fast_start {
            MuxOptions::new()
        } else {
            settings.muxer.mux_options()
        };
        recmux::remux_file(&self.input, &self.output, self.rotate, &options)?;

        println!(
            "{} {}",
            style("Output saved to:").white(),
            style(self.output.display()).green().bold()
        );
        Ok(())
    }
}
