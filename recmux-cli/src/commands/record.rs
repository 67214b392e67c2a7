//! Record an MP4 source through a recording session.

use crate::settings::CliSettings;
use clap::Args;
use console::style;
use recmux::{LocalStorage, MuxingListener, QueueScheduler, RecordingSession, RemuxTrigger};
use recmux_containers::{Demuxer, Mp4Demuxer};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Replay an MP4 file as a live source and record it.
#[derive(Args, Debug)]
pub struct CmdRecord {
    /// Source file.
    pub input: PathBuf,

    /// Stream identifier, used as the output name (default: input stem).
    #[arg(long)]
    pub id: Option<String>,

    /// Output directory (overrides the config file).
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Storage bucket directory (overrides the config file).
    #[arg(long)]
    pub storage: Option<PathBuf>,

    /// Remux the finished recording.
    #[arg(long)]
    pub remux: bool,

    /// Audio bitstream filter (aac_adtstoasc, null).
    #[arg(long)]
    pub audio_filter: Option<String>,
}

struct PrintListener;

impl MuxingListener for PrintListener {
    fn on_muxing_finished(&self, stream_id: &str, file: &Path, duration_ms: Option<u64>, resolution: Option<u32>) {
        println!("{}", style("Recording complete!").green().bold());
        println!("  {:<12} {}", style("Stream:").white(), stream_id);
        println!("  {:<12} {}", style("File:").white(), style(file.display()).green());
        if let Some(ms) = duration_ms {
            println!("  {:<12} {:.3}s", style("Duration:").white(), ms as f64 / 1000.0);
        }
        if let Some(height) = resolution {
            println!("  {:<12} {}p", style("Resolution:").white(), height);
        }
    }
}

impl CmdRecord {
    /// Execute the record command.
    pub fn run(&self, settings: CliSettings) -> anyhow::Result<()> {
        let mut config = settings.muxer;
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if self.remux {
            config.remux_trigger = RemuxTrigger::Always;
        }
        if self.audio_filter.is_some() {
            config.audio_filter = self.audio_filter.clone();
        }

        let stream_id = match &self.id {
            Some(id) => id.clone(),
            None => self
                .input
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("cannot derive a stream id from {}", self.input.display()))?,
        };

        let scheduler = Arc::new(QueueScheduler::new());
        let mut session = RecordingSession::new(stream_id, config, scheduler.clone())?.with_listener(Arc::new(PrintListener));

        let storage = match (&self.storage, settings.storage) {
            (Some(root), target) => Some(
                LocalStorage::new(root)
                    .with_settings(target.map(|t| t.settings).unwrap_or_default()),
            ),
            (None, Some(target)) => Some(
                LocalStorage::new(target.root)
                    .with_settings(target.settings)
                    .with_delete_local(target.delete_local),
            ),
            (None, None) => None,
        };
        if let Some(storage) = storage {
            session = session.with_storage(Arc::new(storage));
        }

        let mut demuxer = Mp4Demuxer::new();
        demuxer.open(BufReader::new(File::open(&self.input)?))?;
        session.prepare_from(&demuxer)?;

        let mut packets = 0u64;
        while let Some(packet) = demuxer.read_packet()? {
            session.write_packet(&packet);
            packets += 1;
        }
        info!(packets, "source drained");
        session.finalize();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(scheduler.run_pending());
        Ok(())
    }
}
