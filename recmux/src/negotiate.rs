//! Stream negotiation: mapping input streams to writer slots.

use crate::codecs;
use crate::config::{MuxerConfig, RemuxTrigger};
use crate::error::Result;
use crate::filter::{create_filter, BitstreamFilter};
use recmux_containers::StreamInfo;
use recmux_core::format::{CodecId, MediaType};
use recmux_core::rational::Rational;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Time base of live video frames, in milliseconds.
pub const LIVE_VIDEO_TIME_BASE: Rational = Rational { num: 1, den: 1000 };

/// An input stream with its writer slot.
pub struct RegisteredStream {
    /// Index used by the packet source.
    pub input_index: usize,
    /// Index in the writer.
    pub output_index: usize,
    /// Media type.
    pub media_type: MediaType,
    /// Time base of incoming timestamps.
    pub input_time_base: Rational,
    /// Time base the writer expects.
    pub output_time_base: Rational,
    /// Filter applied after rescaling.
    pub filter: Option<Box<dyn BitstreamFilter>>,
}

impl fmt::Debug for RegisteredStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredStream")
            .field("input_index", &self.input_index)
            .field("output_index", &self.output_index)
            .field("media_type", &self.media_type)
            .field("input_time_base", &self.input_time_base)
            .field("output_time_base", &self.output_time_base)
            .field("filter", &self.filter.as_ref().map(|f| f.name()))
            .finish()
    }
}

/// Registered streams, looked up by input index.
#[derive(Debug, Default)]
pub struct StreamMap {
    streams: Vec<RegisteredStream>,
    by_input: HashMap<usize, usize>,
}

impl StreamMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream. Returns false if the input index is taken.
    pub fn register(&mut self, stream: RegisteredStream) -> bool {
        if self.by_input.contains_key(&stream.input_index) {
            return false;
        }
        self.by_input.insert(stream.input_index, self.streams.len());
        self.streams.push(stream);
        true
    }

    /// Stream registered for an input index.
    pub fn get(&self, input_index: usize) -> Option<&RegisteredStream> {
        self.by_input.get(&input_index).map(|&i| &self.streams[i])
    }

    /// Mutable stream registered for an input index.
    pub fn get_mut(&mut self, input_index: usize) -> Option<&mut RegisteredStream> {
        self.by_input.get(&input_index).map(|&i| &mut self.streams[i])
    }

    /// Check whether an input index is registered.
    pub fn contains(&self, input_index: usize) -> bool {
        self.by_input.contains_key(&input_index)
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Check if no stream is registered.
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Whether any registered stream is video.
    pub fn has_video(&self) -> bool {
        self.streams.iter().any(|s| s.media_type == MediaType::Video)
    }

    /// Iterate registered streams in output order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredStream> {
        self.streams.iter()
    }

    /// Iterate registered streams mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RegisteredStream> {
        self.streams.iter_mut()
    }

    /// Drop every stream and its filter.
    pub fn clear(&mut self) {
        self.streams.clear();
        self.by_input.clear();
    }
}

/// Output description for one accepted source stream.
pub struct Negotiated {
    /// Parameters handed to the writer.
    pub output: StreamInfo,
    /// Filter for the stream, if configured.
    pub filter: Option<Box<dyn BitstreamFilter>>,
}

/// Whether a source stream can be carried into a recording.
///
/// Unsupported codecs and media types other than audio and video are
/// skipped.
pub fn is_recordable(source: &StreamInfo) -> bool {
    if !codecs::is_supported(source.codec_id) {
        debug!(index = source.index, codec = %source.codec_id, "skipping unsupported codec");
        return false;
    }
    if !matches!(source.media_type, MediaType::Audio | MediaType::Video) {
        debug!(index = source.index, media_type = %source.media_type, "undefined media type, skipping");
        return false;
    }
    true
}

/// Negotiate one stream of a source container.
///
/// Returns `None` for streams that are not recordable.
pub fn negotiate_source_stream(source: &StreamInfo, config: &MuxerConfig) -> Result<Option<Negotiated>> {
    if !is_recordable(source) {
        return Ok(None);
    }

    let (mut output, filter) = match source.media_type {
        MediaType::Audio => match &config.audio_filter {
            Some(name) => {
                let filter = create_filter(name, source, source.time_base)?;
                let mut output = filter.output().clone();
                output.time_base = filter.output_time_base();
                (output, Some(filter))
            }
            None => (source.clone(), None),
        },
        MediaType::Video => match &config.video_filter {
            Some(name) => (source.clone(), Some(create_filter(name, source, source.time_base)?)),
            None => (source.clone(), None),
        },
        MediaType::Subtitle | MediaType::Data => return Ok(None),
    };

    output.codec_tag = None;
    Ok(Some(Negotiated { output, filter }))
}

/// Output description for one stream of a live encoder.
///
/// Live packets arrive ready for the container, so no filter is attached
/// and the encoder parameters are kept as they are.
pub fn live_stream(source: &StreamInfo) -> Option<StreamInfo> {
    if !is_recordable(source) {
        return None;
    }
    let mut output = source.clone();
    output.codec_tag = None;
    Some(output)
}

/// Stream description of a live video track.
pub fn live_video_stream(width: u32, height: u32, codec: CodecId, input_index: usize, extra_data: Option<Vec<u8>>) -> StreamInfo {
    let mut info = StreamInfo::video(input_index, codec, LIVE_VIDEO_TIME_BASE, width, height);
    info.extra_data = extra_data;
    info
}

/// Decide whether the finished file is remuxed.
pub fn remux_required(trigger: RemuxTrigger, outputs: &[&StreamInfo], live_video: bool) -> bool {
    match trigger {
        RemuxTrigger::LiveVideoStream => live_video,
        RemuxTrigger::MissingVideoConfig => outputs
            .iter()
            .any(|s| s.media_type == MediaType::Video && s.extra_data.is_none()),
        RemuxTrigger::Always => true,
        RemuxTrigger::Never => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered(input_index: usize, output_index: usize, media_type: MediaType) -> RegisteredStream {
        RegisteredStream {
            input_index,
            output_index,
            media_type,
            input_time_base: Rational::new(1, 1000),
            output_time_base: Rational::new(1, 90000),
            filter: None,
        }
    }

    #[test]
    fn test_stream_map() {
        let mut map = StreamMap::new();
        assert!(map.register(registered(3, 0, MediaType::Audio)));
        assert!(!map.has_video());
        assert!(map.register(registered(7, 1, MediaType::Video)));
        assert!(!map.register(registered(7, 2, MediaType::Video)));

        assert_eq!(map.len(), 2);
        assert!(map.has_video());
        assert_eq!(map.get(7).unwrap().output_index, 1);
        assert!(map.get(0).is_none());

        map.clear();
        assert!(map.is_empty());
        assert!(!map.contains(3));
    }

    #[test]
    fn test_negotiate_skips() {
        let config = MuxerConfig::default();
        let opus = StreamInfo::audio(0, CodecId::Opus, Rational::new(1, 48000), 48000, 2);
        assert!(negotiate_source_stream(&opus, &config).unwrap().is_none());

        let text = StreamInfo::new(1, CodecId::MovText, Rational::new(1, 1000));
        assert!(negotiate_source_stream(&text, &config).unwrap().is_none());
    }

    #[test]
    fn test_negotiate_clears_codec_tag() {
        let mut video = StreamInfo::video(0, CodecId::H264, Rational::new(1, 90000), 640, 360);
        video.codec_tag = Some(*b"avc3");
        let negotiated = negotiate_source_stream(&video, &MuxerConfig::default())
            .unwrap()
            .unwrap();
        assert!(negotiated.output.codec_tag.is_none());
        assert!(negotiated.filter.is_none());
        assert_eq!(negotiated.output.video, video.video);
    }

    #[test]
    fn test_negotiate_audio_filter() {
        let config = MuxerConfig {
            audio_filter: Some("aac_adtstoasc".into()),
            ..Default::default()
        };
        let aac = StreamInfo::audio(1, CodecId::Aac, Rational::new(1, 44100), 44100, 2);
        let negotiated = negotiate_source_stream(&aac, &config).unwrap().unwrap();
        assert_eq!(negotiated.filter.as_ref().unwrap().name(), "aac_adtstoasc");
        assert_eq!(negotiated.output.time_base, Rational::new(1, 44100));

        // the audio filter does not apply to mp3
        let mp3 = StreamInfo::audio(1, CodecId::Mp3, Rational::new(1, 44100), 44100, 2);
        assert!(negotiate_source_stream(&mp3, &config).is_err());
    }

    #[test]
    fn test_live_stream_ignores_filters() {
        let mut mp3 = StreamInfo::audio(2, CodecId::Mp3, Rational::new(1, 44100), 44100, 2);
        mp3.codec_tag = Some(*b"mp4a");
        let output = live_stream(&mp3).unwrap();
        assert!(output.codec_tag.is_none());
        assert_eq!(output.time_base, mp3.time_base);
        assert_eq!(output.audio, mp3.audio);

        let opus = StreamInfo::audio(0, CodecId::Opus, Rational::new(1, 48000), 48000, 2);
        assert!(live_stream(&opus).is_none());
    }

    #[test]
    fn test_live_video_stream() {
        let info = live_video_stream(1280, 720, CodecId::H264, 4, None);
        assert_eq!(info.index, 4);
        assert_eq!(info.time_base, LIVE_VIDEO_TIME_BASE);
        assert_eq!(info.media_type, MediaType::Video);
    }

    #[test]
    fn test_remux_trigger() {
        let configured = StreamInfo::video(0, CodecId::H264, Rational::new(1, 1000), 2, 2).with_extra_data(vec![1]);
        let bare = StreamInfo::video(0, CodecId::H264, Rational::new(1, 1000), 2, 2);

        assert!(remux_required(RemuxTrigger::LiveVideoStream, &[&configured], true));
        assert!(!remux_required(RemuxTrigger::LiveVideoStream, &[&bare], false));
        assert!(remux_required(RemuxTrigger::MissingVideoConfig, &[&configured, &bare], false));
        assert!(!remux_required(RemuxTrigger::MissingVideoConfig, &[&configured], true));
        assert!(remux_required(RemuxTrigger::Always, &[], false));
        assert!(!remux_required(RemuxTrigger::Never, &[&bare], true));
    }
}
