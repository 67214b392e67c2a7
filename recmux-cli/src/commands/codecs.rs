//! List recordable codecs command.

use clap::Args;
use console::style;
use recmux_containers::mp4::SampleEntryType;
use recmux_core::format::MediaType;
use serde::Serialize;

/// A codec the recorder accepts.
#[derive(Debug, Clone, Serialize)]
pub struct CodecEntry {
    /// Codec name.
    pub name: String,
    /// Media type.
    #[serde(rename = "type")]
    pub media_type: String,
    /// MP4 sample entry written for the codec.
    pub sample_entry: String,
}

/// List codecs accepted by the recorder.
#[derive(Args, Debug)]
pub struct CmdCodecs {
    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,

    /// Filter by media type (video, audio, subtitle, data).
    #[arg(long)]
    pub filter: Option<String>,
}

impl CmdCodecs {
    /// Execute the codecs command.
    pub fn run(&self) -> anyhow::Result<()> {
        let codecs: Vec<CodecEntry> = recmux::SUPPORTED_CODECS
            .iter()
            .map(|&codec| CodecEntry {
                name: codec.to_string(),
                media_type: codec.media_type().to_string(),
                sample_entry: SampleEntryType::for_codec(codec)
                    .map(|e| String::from_utf8_lossy(&e.to_bytes()).into_owned())
                    .unwrap_or_default(),
            })
            .filter(|c| {
                self.filter
                    .as_ref()
                    .map_or(true, |f| c.media_type.eq_ignore_ascii_case(f))
            })
            .collect();

        if self.json {
            let output = serde_json::json!({ "codecs": codecs });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        println!();
        println!("{}", style("Recordable Codecs").cyan().bold());
        for media_type in [MediaType::Video, MediaType::Audio, MediaType::Subtitle, MediaType::Data] {
            let name = media_type.to_string();
            let group: Vec<_> = codecs.iter().filter(|c| c.media_type == name).collect();
            if group.is_empty() {
                continue;
            }
            println!();
            println!("{}", style(format!("{}:", name)).white().bold());
            for codec in group {
                println!("  {:<14} [{}]", style(&codec.name).yellow(), codec.sample_entry);
            }
        }
        println!();
        Ok(())
    }
}
