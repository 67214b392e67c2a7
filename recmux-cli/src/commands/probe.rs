//! MP4 inspection command.

use clap::Args;
use console::style;
use recmux_containers::{probe_duration, Demuxer, Mp4Demuxer, StreamInfo, ROTATE_KEY};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

/// Stream summary for display.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    /// Stream index.
    pub index: usize,
    /// Media type.
    #[serde(rename = "type")]
    pub media_type: String,
    /// Codec name.
    pub codec: String,
    /// Time base.
    pub time_base: String,
    /// Whether the stream carries codec configuration.
    pub configured: bool,
    /// Whether the recorder accepts the codec.
    pub recordable: bool,
    /// Video width.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Video height.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Display rotation in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<i32>,
    /// Audio sample rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    /// Audio channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
}

impl From<&StreamInfo> for StreamSummary {
    fn from(stream: &StreamInfo) -> Self {
        Self {
            index: stream.index,
            media_type: stream.media_type.to_string(),
            codec: stream.codec_id.to_string(),
            time_base: stream.time_base.to_string(),
            configured: stream.extra_data.is_some(),
            recordable: recmux::is_supported(stream.codec_id),
            width: stream.video.map(|v| v.width),
            height: stream.video.map(|v| v.height),
            rotation: stream.metadata.get(ROTATE_KEY).map(|_| stream.rotation()),
            sample_rate: stream.audio.map(|a| a.sample_rate),
            channels: stream.audio.map(|a| a.channels),
        }
    }
}

/// File summary.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    /// File path.
    pub file: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Major brand.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    /// Compatible brands.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compatible_brands: Vec<String>,
    /// Duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Streams.
    pub streams: Vec<StreamSummary>,
}

/// Show the streams of an MP4 file.
#[derive(Args, Debug)]
pub struct CmdProbe {
    /// Path to the MP4 file.
    pub file: PathBuf,

    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,
}

impl CmdProbe {
    /// Execute the probe command.
    pub fn run(&self) -> anyhow::Result<()> {
        if !self.file.exists() {
            anyhow::bail!("File not found: {}", self.file.display());
        }

        let summary = self.summarize()?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_summary(&summary);
        }
        Ok(())
    }

    fn summarize(&self) -> anyhow::Result<FileSummary> {
        let size_bytes = std::fs::metadata(&self.file)?.len();
        let mut demuxer = Mp4Demuxer::new();
        demuxer.open(BufReader::new(File::open(&self.file)?))?;

        Ok(FileSummary {
            file: self.file.display().to_string(),
            size_bytes,
            brand: demuxer
                .major_brand()
                .map(|b| String::from_utf8_lossy(&b).into_owned()),
            compatible_brands: demuxer
                .compatible_brands()
                .iter()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .collect(),
            duration_ms: probe_duration(&self.file),
            streams: demuxer.streams().iter().map(StreamSummary::from).collect(),
        })
    }
}

fn print_summary(summary: &FileSummary) {
    println!();
    println!("{}", style("Recording").cyan().bold());
    println!();
    println!("  {:<12} {}", style("File:").white(), summary.file);
    println!("  {:<12} {} bytes", style("Size:").white(), summary.size_bytes);
    if let Some(brand) = &summary.brand {
        println!("  {:<12} {}", style("Brand:").white(), brand);
    }
    if !summary.compatible_brands.is_empty() {
        println!("  {:<12} {}", style("Compatible:").white(), summary.compatible_brands.join(", "));
    }
    match summary.duration_ms {
        Some(ms) => println!("  {:<12} {:.3}s", style("Duration:").white(), ms as f64 / 1000.0),
        None => println!("  {:<12} {}", style("Duration:").white(), style("unknown").yellow()),
    }

    for stream in &summary.streams {
        println!();
        println!(
            "  {} #{} ({})",
            style("Stream").white(),
            stream.index,
            style(&stream.media_type).yellow()
        );
        let codec = if stream.recordable {
            style(stream.codec.clone()).green()
        } else {
            style(stream.codec.clone()).red()
        };
        println!("    {:<14} {}", style("Codec:").dim(), codec);
        println!("    {:<14} {}", style("Time base:").dim(), stream.time_base);
        if !stream.configured {
            println!("    {:<14} {}", style("Config:").dim(), style("missing").yellow());
        }
        if let (Some(w), Some(h)) = (stream.width, stream.height) {
            println!("    {:<14} {}x{}", style("Resolution:").dim(), w, h);
        }
        if let Some(rotation) = stream.rotation {
            println!("    {:<14} {}°", style("Rotation:").dim(), rotation);
        }
        if let (Some(rate), Some(channels)) = (stream.sample_rate, stream.channels) {
            println!("    {:<14} {} Hz, {} ch", style("Audio:").dim(), rate, channels);
        }
    }
    println!();
}
