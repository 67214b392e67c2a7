//! MP4/ISOBMFF container format implementation.
//!
//! Writes and reads the progressive (non-fragmented) layout used for
//! recorded streams: `ftyp`, `mdat`, `moov`, optionally with `moov` moved
//! ahead of `mdat`.

mod atoms;
mod codec_config;
mod demuxer;
mod muxer;

pub use demuxer::{probe_duration, Mp4Demuxer};
pub use muxer::Mp4Muxer;

use recmux_core::error::{BitstreamError, Error, Result};
use recmux_core::format::CodecId;

/// MP4 brand types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mp4Brand {
    /// ISO Base Media File.
    Isom,
    /// ISO Base Media File version 2.
    Iso2,
    /// AVC file.
    Avc1,
    /// MP4 version 1.
    Mp41,
    /// MP4 version 2.
    Mp42,
    /// Unknown brand.
    Unknown([u8; 4]),
}

impl Mp4Brand {
    /// Parse brand from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        match bytes {
            b"isom" => Mp4Brand::Isom,
            b"iso2" => Mp4Brand::Iso2,
            b"avc1" => Mp4Brand::Avc1,
            b"mp41" => Mp4Brand::Mp41,
            b"mp42" => Mp4Brand::Mp42,
            _ => Mp4Brand::Unknown(*bytes),
        }
    }

    /// Convert to bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        match self {
            Mp4Brand::Isom => *b"isom",
            Mp4Brand::Iso2 => *b"iso2",
            Mp4Brand::Avc1 => *b"avc1",
            Mp4Brand::Mp41 => *b"mp41",
            Mp4Brand::Mp42 => *b"mp42",
            Mp4Brand::Unknown(b) => *b,
        }
    }
}

/// Sample entry type (the `stsd` entry fourcc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEntryType {
    /// AVC/H.264.
    Avc1,
    /// AVC/H.264 (parameter sets in-band).
    Avc3,
    /// HEVC/H.265 (parameter sets in-band).
    Hev1,
    /// HEVC/H.265.
    Hvc1,
    /// MPEG-4 visual family, codec given by the esds object type.
    Mp4v,
    /// MPEG-4 audio family, codec given by the esds object type.
    Mp4a,
    /// MPEG-4 systems and sub-picture streams.
    Mp4s,
    /// VP9.
    Vp09,
    /// Motion JPEG 2000.
    Mjp2,
    /// VC-1.
    Vc1,
    /// Dirac.
    Drac,
    /// TechSmith Screen Codec 2.
    Tsc2,
    /// AC-3.
    Ac3,
    /// E-AC-3.
    Ec3,
    /// 3GPP timed text.
    Tx3g,
    /// Unknown.
    Unknown([u8; 4]),
}

impl SampleEntryType {
    /// Parse from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        match bytes {
            b"avc1" => SampleEntryType::Avc1,
            b"avc3" => SampleEntryType::Avc3,
            b"hev1" => SampleEntryType::Hev1,
            b"hvc1" => SampleEntryType::Hvc1,
            b"mp4v" => SampleEntryType::Mp4v,
            b"mp4a" => SampleEntryType::Mp4a,
            b"mp4s" => SampleEntryType::Mp4s,
            b"vp09" => SampleEntryType::Vp09,
            b"mjp2" => SampleEntryType::Mjp2,
            b"vc-1" => SampleEntryType::Vc1,
            b"drac" => SampleEntryType::Drac,
            b"tsc2" => SampleEntryType::Tsc2,
            b"ac-3" => SampleEntryType::Ac3,
            b"ec-3" => SampleEntryType::Ec3,
            b"tx3g" => SampleEntryType::Tx3g,
            _ => SampleEntryType::Unknown(*bytes),
        }
    }

    /// Convert to bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        match self {
            SampleEntryType::Avc1 => *b"avc1",
            SampleEntryType::Avc3 => *b"avc3",
            SampleEntryType::Hev1 => *b"hev1",
            SampleEntryType::Hvc1 => *b"hvc1",
            SampleEntryType::Mp4v => *b"mp4v",
            SampleEntryType::Mp4a => *b"mp4a",
            SampleEntryType::Mp4s => *b"mp4s",
            SampleEntryType::Vp09 => *b"vp09",
            SampleEntryType::Mjp2 => *b"mjp2",
            SampleEntryType::Vc1 => *b"vc-1",
            SampleEntryType::Drac => *b"drac",
            SampleEntryType::Tsc2 => *b"tsc2",
            SampleEntryType::Ac3 => *b"ac-3",
            SampleEntryType::Ec3 => *b"ec-3",
            SampleEntryType::Tx3g => *b"tx3g",
            SampleEntryType::Unknown(b) => *b,
        }
    }

    /// Entry used to store `codec`, if MP4 can carry it.
    pub fn for_codec(codec: CodecId) -> Option<Self> {
        use CodecId::*;
        let entry = match codec {
            H264 => SampleEntryType::Avc1,
            Hevc => SampleEntryType::Hvc1,
            Mpeg4 | Mpeg2Video | Mpeg1Video | Mjpeg | Png => SampleEntryType::Mp4v,
            Aac | Mp4Als | Mp3 | Mp2 | Dts | Vorbis | Qcelp => SampleEntryType::Mp4a,
            DvdSubtitle | Mpeg4Systems => SampleEntryType::Mp4s,
            Vp9 => SampleEntryType::Vp09,
            Jpeg2000 => SampleEntryType::Mjp2,
            Vc1 => SampleEntryType::Vc1,
            Dirac => SampleEntryType::Drac,
            Tscc2 => SampleEntryType::Tsc2,
            Ac3 => SampleEntryType::Ac3,
            Eac3 => SampleEntryType::Ec3,
            MovText => SampleEntryType::Tx3g,
            Vp8 | Av1 | Opus | PcmS16le | WebVtt | Unknown => return None,
        };
        Some(entry)
    }

    /// Codec implied by the entry alone.
    ///
    /// The MPEG-4 family entries need the esds object type and return `None`.
    pub fn codec_id(&self) -> Option<CodecId> {
        let codec = match self {
            SampleEntryType::Avc1 | SampleEntryType::Avc3 => CodecId::H264,
            SampleEntryType::Hev1 | SampleEntryType::Hvc1 => CodecId::Hevc,
            SampleEntryType::Vp09 => CodecId::Vp9,
            SampleEntryType::Mjp2 => CodecId::Jpeg2000,
            SampleEntryType::Vc1 => CodecId::Vc1,
            SampleEntryType::Drac => CodecId::Dirac,
            SampleEntryType::Tsc2 => CodecId::Tscc2,
            SampleEntryType::Ac3 => CodecId::Ac3,
            SampleEntryType::Ec3 => CodecId::Eac3,
            SampleEntryType::Tx3g => CodecId::MovText,
            SampleEntryType::Mp4v
            | SampleEntryType::Mp4a
            | SampleEntryType::Mp4s
            | SampleEntryType::Unknown(_) => return None,
        };
        Some(codec)
    }

    /// Check if this is a visual sample entry.
    pub fn is_video(&self) -> bool {
        matches!(
            self,
            SampleEntryType::Avc1
                | SampleEntryType::Avc3
                | SampleEntryType::Hev1
                | SampleEntryType::Hvc1
                | SampleEntryType::Mp4v
                | SampleEntryType::Vp09
                | SampleEntryType::Mjp2
                | SampleEntryType::Vc1
                | SampleEntryType::Drac
                | SampleEntryType::Tsc2
        )
    }

    /// Check if this is an audio sample entry.
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            SampleEntryType::Mp4a | SampleEntryType::Ac3 | SampleEntryType::Ec3
        )
    }
}

/// Read a 32-bit big-endian integer.
fn read_u32_be(data: &[u8]) -> Result<u32> {
    if data.len() < 4 {
        return Err(Error::Bitstream(BitstreamError::UnexpectedEnd));
    }
    Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
}

/// Read a 64-bit big-endian integer.
fn read_u64_be(data: &[u8]) -> Result<u64> {
    if data.len() < 8 {
        return Err(Error::Bitstream(BitstreamError::UnexpectedEnd));
    }
    Ok(u64::from_be_bytes([
        data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
    ]))
}

/// Write a 32-bit big-endian integer.
fn write_u32_be(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Write a 64-bit big-endian integer.
fn write_u64_be(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Wrap a payload in a plain box.
fn wrap_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(payload.len() + 8);
    result.extend_from_slice(&write_u32_be((payload.len() + 8) as u32));
    result.extend_from_slice(box_type);
    result.extend_from_slice(payload);
    result
}

/// Wrap a payload in a full box (version and 24-bit flags).
fn wrap_full_box(box_type: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.push(version);
    data.extend_from_slice(&flags.to_be_bytes()[1..]);
    data.extend_from_slice(payload);
    wrap_box(box_type, &data)
}
