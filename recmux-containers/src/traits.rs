//! Container format traits for demuxing and muxing.

use recmux_core::error::Result;
use recmux_core::format::{CodecId, MediaType};
use recmux_core::packet::Packet;
use recmux_core::rational::Rational;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};

/// Metadata key carrying the display rotation in degrees.
pub const ROTATE_KEY: &str = "rotate";

/// Writer options recognized by [`Muxer::write_header`].
///
/// `movflags` containing `faststart` moves the movie header ahead of the
/// media data.
pub type MuxOptions = BTreeMap<String, String>;

/// Stream information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Stream index.
    pub index: usize,
    /// Media type.
    pub media_type: MediaType,
    /// Codec ID.
    pub codec_id: CodecId,
    /// Container-specific codec tag. Re-derived by every writer.
    pub codec_tag: Option<[u8; 4]>,
    /// Time base of the stream's timestamps.
    pub time_base: Rational,
    /// Duration in time base units.
    pub duration: Option<i64>,
    /// Codec-specific extra data.
    pub extra_data: Option<Vec<u8>>,
    /// Video-specific info.
    pub video: Option<VideoStreamInfo>,
    /// Audio-specific info.
    pub audio: Option<AudioStreamInfo>,
    /// Free-form stream tags.
    pub metadata: BTreeMap<String, String>,
}

impl StreamInfo {
    /// Create a stream description with no codec parameters beyond the id.
    pub fn new(index: usize, codec_id: CodecId, time_base: Rational) -> Self {
        Self {
            index,
            media_type: codec_id.media_type(),
            codec_id,
            codec_tag: None,
            time_base,
            duration: None,
            extra_data: None,
            video: None,
            audio: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Create a video stream description.
    pub fn video(index: usize, codec_id: CodecId, time_base: Rational, width: u32, height: u32) -> Self {
        Self {
            video: Some(VideoStreamInfo { width, height }),
            ..Self::new(index, codec_id, time_base)
        }
    }

    /// Create an audio stream description.
    pub fn audio(index: usize, codec_id: CodecId, time_base: Rational, sample_rate: u32, channels: u8) -> Self {
        Self {
            audio: Some(AudioStreamInfo {
                sample_rate,
                channels,
                bits_per_sample: 16,
            }),
            ..Self::new(index, codec_id, time_base)
        }
    }

    /// Attach codec configuration bytes.
    #[must_use]
    pub fn with_extra_data(mut self, extra_data: Vec<u8>) -> Self {
        self.extra_data = Some(extra_data);
        self
    }

    /// Display rotation in degrees, normalized to 0, 90, 180 or 270.
    pub fn rotation(&self) -> i32 {
        self.metadata
            .get(ROTATE_KEY)
            .and_then(|r| r.trim().parse::<i32>().ok())
            .map(|r| r.rem_euclid(360) / 90 * 90)
            .unwrap_or(0)
    }
}

/// Video stream information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Audio stream information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u8,
    /// Bits per sample.
    pub bits_per_sample: u8,
}

/// Demuxer trait for reading container formats.
pub trait Demuxer {
    /// Open a container for reading.
    fn open<R: Read + Seek + Send + 'static>(&mut self, reader: R) -> Result<()>;

    /// Get container format name.
    fn format_name(&self) -> &str;

    /// Get duration in microseconds.
    fn duration(&self) -> Option<i64>;

    /// Get number of streams.
    fn num_streams(&self) -> usize;

    /// Get stream information.
    fn stream_info(&self, index: usize) -> Option<&StreamInfo>;

    /// All streams in container order.
    fn streams(&self) -> Vec<StreamInfo> {
        (0..self.num_streams())
            .filter_map(|i| self.stream_info(i).cloned())
            .collect()
    }

    /// Read the next packet. `None` marks the end of the file.
    fn read_packet(&mut self) -> Result<Option<Packet<'static>>>;

    /// Close the demuxer.
    fn close(&mut self);
}

/// Muxer trait for writing container formats.
///
/// Call order: `create`, `add_stream`*, `write_header`, `write_packet`*,
/// `write_trailer`, `close`.
pub trait Muxer {
    /// Attach the output.
    ///
    /// The output must be readable so the writer can relocate data when
    /// finishing the file.
    fn create<W: Read + Write + Seek + Send + 'static>(&mut self, writer: W) -> Result<()>;

    /// Get container format name.
    fn format_name(&self) -> &str;

    /// Add a stream, returning its output index.
    fn add_stream(&mut self, info: StreamInfo) -> Result<usize>;

    /// Stream parameters as the writer will store them.
    ///
    /// After `write_header` the time base reflects the timescale the writer
    /// adopted; packets must be expressed in it.
    fn stream_info(&self, index: usize) -> Option<&StreamInfo>;

    /// Write the header.
    fn write_header(&mut self, options: &MuxOptions) -> Result<()>;

    /// Write a packet.
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Write the trailer and finalize.
    fn write_trailer(&mut self) -> Result<()>;

    /// Close the muxer, releasing the output.
    fn close(&mut self);
}
