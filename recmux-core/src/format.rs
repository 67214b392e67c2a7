//! Container, codec and media type identifiers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Container format type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ContainerFormat {
    /// ISO Base Media File Format (MP4).
    Mp4,
}

impl ContainerFormat {
    /// Get the typical file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
        }
    }

    /// Get the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
        }
    }

    /// Try to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp4" | "m4v" | "m4a" => Some(Self::Mp4),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mp4 => write!(f, "MP4"),
        }
    }
}

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Video stream.
    Video,
    /// Audio stream.
    Audio,
    /// Subtitle or timed text stream.
    Subtitle,
    /// Anything else.
    Data,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitle => "subtitle",
            Self::Data => "data",
        };
        f.write_str(name)
    }
}

/// Codec identifier.
///
/// Names follow the usual short codec names (`h264`, `mov_text`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    // Video
    Mpeg4,
    H264,
    Hevc,
    Mpeg2Video,
    Mpeg1Video,
    Mjpeg,
    Png,
    Jpeg2000,
    Vc1,
    Dirac,
    Vp8,
    Vp9,
    Av1,
    Tscc2,
    // Audio
    Aac,
    Mp4Als,
    Mp3,
    Mp2,
    Ac3,
    Eac3,
    Dts,
    Vorbis,
    Qcelp,
    Opus,
    PcmS16le,
    // Subtitle / data
    MovText,
    DvdSubtitle,
    Mpeg4Systems,
    WebVtt,
    /// Codec the engine has no name for.
    Unknown,
}

const CODEC_NAMES: &[(CodecId, &str)] = &[
    (CodecId::Mpeg4, "mpeg4"),
    (CodecId::H264, "h264"),
    (CodecId::Hevc, "hevc"),
    (CodecId::Mpeg2Video, "mpeg2video"),
    (CodecId::Mpeg1Video, "mpeg1video"),
    (CodecId::Mjpeg, "mjpeg"),
    (CodecId::Png, "png"),
    (CodecId::Jpeg2000, "jpeg2000"),
    (CodecId::Vc1, "vc1"),
    (CodecId::Dirac, "dirac"),
    (CodecId::Vp8, "vp8"),
    (CodecId::Vp9, "vp9"),
    (CodecId::Av1, "av1"),
    (CodecId::Tscc2, "tscc2"),
    (CodecId::Aac, "aac"),
    (CodecId::Mp4Als, "mp4als"),
    (CodecId::Mp3, "mp3"),
    (CodecId::Mp2, "mp2"),
    (CodecId::Ac3, "ac3"),
    (CodecId::Eac3, "eac3"),
    (CodecId::Dts, "dts"),
    (CodecId::Vorbis, "vorbis"),
    (CodecId::Qcelp, "qcelp"),
    (CodecId::Opus, "opus"),
    (CodecId::PcmS16le, "pcm_s16le"),
    (CodecId::MovText, "mov_text"),
    (CodecId::DvdSubtitle, "dvd_subtitle"),
    (CodecId::Mpeg4Systems, "mpeg4systems"),
    (CodecId::WebVtt, "webvtt"),
    (CodecId::Unknown, "unknown"),
];

impl CodecId {
    /// Media type this codec carries.
    pub fn media_type(&self) -> MediaType {
        use CodecId::*;
        match self {
            Mpeg4 | H264 | Hevc | Mpeg2Video | Mpeg1Video | Mjpeg | Png | Jpeg2000 | Vc1
            | Dirac | Vp8 | Vp9 | Av1 | Tscc2 => MediaType::Video,
            Aac | Mp4Als | Mp3 | Mp2 | Ac3 | Eac3 | Dts | Vorbis | Qcelp | Opus | PcmS16le => {
                MediaType::Audio
            }
            MovText | DvdSubtitle | WebVtt => MediaType::Subtitle,
            Mpeg4Systems | Unknown => MediaType::Data,
        }
    }

    /// Short codec name.
    pub fn name(&self) -> &'static str {
        CODEC_NAMES
            .iter()
            .find(|(id, _)| id == self)
            .map_or("unknown", |(_, name)| name)
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let lookup = match lower.as_str() {
            "avc" => "h264",
            "h265" => "hevc",
            other => other,
        };
        CODEC_NAMES
            .iter()
            .find(|(_, name)| *name == lookup)
            .map(|(id, _)| *id)
            .ok_or_else(|| crate::Error::unsupported(format!("unknown codec '{s}'")))
    }
}

impl Serialize for CodecId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for CodecId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_media_type() {
        assert_eq!(CodecId::H264.media_type(), MediaType::Video);
        assert_eq!(CodecId::Aac.media_type(), MediaType::Audio);
        assert_eq!(CodecId::MovText.media_type(), MediaType::Subtitle);
        assert_eq!(CodecId::Mpeg4Systems.media_type(), MediaType::Data);
    }

    #[test]
    fn test_codec_names_parse() {
        assert_eq!("h264".parse::<CodecId>().unwrap(), CodecId::H264);
        assert_eq!("H265".parse::<CodecId>().unwrap(), CodecId::Hevc);
        assert_eq!("mov_text".parse::<CodecId>().unwrap(), CodecId::MovText);
        assert!("foo".parse::<CodecId>().is_err());
    }

    #[test]
    fn test_every_codec_has_a_name() {
        for (id, name) in CODEC_NAMES {
            assert_eq!(id.name(), *name);
            assert_eq!(name.parse::<CodecId>().unwrap(), *id);
        }
    }

    #[test]
    fn test_container_extension() {
        assert_eq!(ContainerFormat::Mp4.extension(), "mp4");
        assert_eq!(ContainerFormat::from_extension("M4V"), Some(ContainerFormat::Mp4));
        assert_eq!(ContainerFormat::from_extension("avi"), None);
    }
}
