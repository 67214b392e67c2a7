//! Codecs the MP4 recorder accepts.

use recmux_core::format::CodecId;

/// Codecs that can be stored without re-encoding.
pub static SUPPORTED_CODECS: &[CodecId] = &[
    // video
    CodecId::Mpeg4,
    CodecId::H264,
    CodecId::Hevc,
    CodecId::Mpeg2Video,
    CodecId::Mpeg1Video,
    CodecId::Mjpeg,
    CodecId::Png,
    CodecId::Jpeg2000,
    CodecId::Vc1,
    CodecId::Dirac,
    CodecId::Vp9,
    CodecId::Tscc2,
    // audio
    CodecId::Aac,
    CodecId::Mp4Als,
    CodecId::Mp3,
    CodecId::Mp2,
    CodecId::Ac3,
    CodecId::Eac3,
    CodecId::Dts,
    CodecId::Vorbis,
    CodecId::Qcelp,
    // subtitles and systems
    CodecId::MovText,
    CodecId::DvdSubtitle,
    CodecId::Mpeg4Systems,
];

/// Check whether a codec can be recorded.
pub fn is_supported(codec: CodecId) -> bool {
    SUPPORTED_CODECS.contains(&codec)
}
