//! Bitstream filters applied to packets before they reach the writer.
//!
//! Filters only reshape codec configuration between in-band and
//! out-of-band forms; payloads are never re-encoded.

use crate::error::{MuxError, Result};
use recmux_containers::StreamInfo;
use recmux_core::bitstream::{self, h264, hevc};
use recmux_core::format::CodecId;
use recmux_core::packet::{Packet, SideData, SideDataType};
use recmux_core::rational::Rational;

/// Names accepted by [`create_filter`].
pub const FILTER_NAMES: &[&str] = &["aac_adtstoasc", "extract_extradata", "null"];

/// A packet-to-packets transformation.
pub trait BitstreamFilter: Send {
    /// Filter name.
    fn name(&self) -> &str;

    /// Stream parameters after filtering.
    fn output(&self) -> &StreamInfo;

    /// Time base of emitted packets.
    fn output_time_base(&self) -> Rational;

    /// Filter one packet, emitting zero or more packets.
    fn push(&mut self, packet: Packet<'static>) -> Result<Vec<Packet<'static>>>;
}

/// Check whether a filter name is known.
pub fn is_known_filter(name: &str) -> bool {
    FILTER_NAMES.contains(&name)
}

/// Create a filter for a stream.
pub fn create_filter(name: &str, input: &StreamInfo, time_base: Rational) -> Result<Box<dyn BitstreamFilter>> {
    let mut output = input.clone();
    output.time_base = time_base;

    let filter: Box<dyn BitstreamFilter> = match name {
        "aac_adtstoasc" => {
            if input.codec_id != CodecId::Aac {
                return Err(MuxError::Filter(format!(
                    "aac_adtstoasc needs aac input, got {}",
                    input.codec_id
                )));
            }
            Box::new(AdtsToAsc {
                output,
                time_base,
                config_sent: false,
            })
        }
        "extract_extradata" => {
            if !matches!(input.codec_id, CodecId::H264 | CodecId::Hevc) {
                return Err(MuxError::Filter(format!(
                    "extract_extradata needs h264 or hevc input, got {}",
                    input.codec_id
                )));
            }
            Box::new(ExtractExtradata {
                output,
                time_base,
                last: None,
            })
        }
        "null" => Box::new(NullFilter { output, time_base }),
        other => return Err(MuxError::UnknownFilter(other.to_string())),
    };
    Ok(filter)
}

/// Passthrough filter.
struct NullFilter {
    output: StreamInfo,
    time_base: Rational,
}

impl BitstreamFilter for NullFilter {
    fn name(&self) -> &str {
        "null"
    }

    fn output(&self) -> &StreamInfo {
        &self.output
    }

    fn output_time_base(&self) -> Rational {
        self.time_base
    }

    fn push(&mut self, packet: Packet<'static>) -> Result<Vec<Packet<'static>>> {
        Ok(vec![packet])
    }
}

/// ADTS fixed and variable header fields needed to strip the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AdtsHeader {
    /// Profile (0 = Main, 1 = LC, 2 = SSR, 3 = LTP).
    profile: u8,
    sample_rate_index: u8,
    channel_config: u8,
    protection_absent: bool,
    /// Frame length including the header.
    frame_length: usize,
    /// Raw data blocks in the frame, minus one.
    num_raw_data_blocks: u8,
}

impl AdtsHeader {
    fn has_sync(data: &[u8]) -> bool {
        data.len() >= 2 && data[0] == 0xFF && data[1] & 0xF6 == 0xF0
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 7 {
            return Err(MuxError::Filter("ADTS header too short".into()));
        }
        if !Self::has_sync(data) {
            return Err(MuxError::Filter("invalid ADTS sync word".into()));
        }

        let header = Self {
            protection_absent: data[1] & 1 == 1,
            profile: (data[2] >> 6) & 3,
            sample_rate_index: (data[2] >> 2) & 0xF,
            channel_config: ((data[2] & 1) << 2) | ((data[3] >> 6) & 3),
            frame_length: ((data[3] as usize & 3) << 11) | ((data[4] as usize) << 3) | ((data[5] as usize) >> 5),
            num_raw_data_blocks: data[6] & 3,
        };

        if header.sample_rate_index > 12 {
            return Err(MuxError::Filter(format!(
                "invalid ADTS sample rate index {}",
                header.sample_rate_index
            )));
        }
        if header.frame_length < header.header_size() || header.frame_length > data.len() {
            return Err(MuxError::Filter(format!(
                "ADTS frame length {} does not fit packet of {} bytes",
                header.frame_length,
                data.len()
            )));
        }
        Ok(header)
    }

    fn header_size(&self) -> usize {
        if self.protection_absent {
            7
        } else {
            9
        }
    }

    /// Two-byte AudioSpecificConfig for this frame.
    fn audio_specific_config(&self) -> Vec<u8> {
        let object_type = self.profile + 1;
        vec![
            (object_type << 3) | (self.sample_rate_index >> 1),
            ((self.sample_rate_index & 1) << 7) | (self.channel_config << 3),
        ]
    }
}

/// Strips ADTS headers and moves the configuration out of band.
struct AdtsToAsc {
    output: StreamInfo,
    time_base: Rational,
    config_sent: bool,
}

impl BitstreamFilter for AdtsToAsc {
    fn name(&self) -> &str {
        "aac_adtstoasc"
    }

    fn output(&self) -> &StreamInfo {
        &self.output
    }

    fn output_time_base(&self) -> Rational {
        self.time_base
    }

    fn push(&mut self, mut packet: Packet<'static>) -> Result<Vec<Packet<'static>>> {
        if !AdtsHeader::has_sync(packet.data()) {
            if self.output.extra_data.is_some() {
                return Ok(vec![packet]);
            }
            return Err(MuxError::Filter(
                "packet has no ADTS header and the stream has no configuration".into(),
            ));
        }

        let header = AdtsHeader::parse(packet.data())?;
        if header.num_raw_data_blocks != 0 {
            return Err(MuxError::Filter(
                "multiple raw data blocks per ADTS frame are not supported".into(),
            ));
        }

        let payload = packet.data()[header.header_size()..header.frame_length].to_vec();
        packet.set_data(payload);

        if !self.config_sent {
            let asc = header.audio_specific_config();
            if self.output.extra_data.is_none() {
                self.output.extra_data = Some(asc.clone());
            }
            packet.add_side_data(SideData::new(SideDataType::NewExtradata, asc));
            self.config_sent = true;
        }

        Ok(vec![packet])
    }
}

/// Copies in-band parameter sets into `NewExtradata` side data.
struct ExtractExtradata {
    output: StreamInfo,
    time_base: Rational,
    last: Option<Vec<u8>>,
}

impl ExtractExtradata {
    fn is_parameter_set(&self, nal: &[u8]) -> bool {
        match self.output.codec_id {
            CodecId::Hevc => matches!(
                bitstream::hevc_nal_type(nal),
                Some(hevc::VPS | hevc::SPS | hevc::PPS)
            ),
            _ => matches!(bitstream::h264_nal_type(nal), Some(h264::SPS | h264::PPS)),
        }
    }

    /// Parameter sets of a packet as an Annex-B buffer.
    fn parameter_sets(&self, data: &[u8]) -> Vec<u8> {
        let mut config = Vec::new();
        let mut push = |nal: &[u8]| {
            if self.is_parameter_set(nal) {
                config.extend_from_slice(&[0, 0, 0, 1]);
                config.extend_from_slice(nal);
            }
        };
        if bitstream::is_annex_b(data) {
            bitstream::split_annexb(data).for_each(&mut push);
        } else {
            bitstream::split_length_prefixed(data, 4).for_each(&mut push);
        }
        config
    }
}

impl BitstreamFilter for ExtractExtradata {
    fn name(&self) -> &str {
        "extract_extradata"
    }

    fn output(&self) -> &StreamInfo {
        &self.output
    }

    fn output_time_base(&self) -> Rational {
        self.time_base
    }

    fn push(&mut self, mut packet: Packet<'static>) -> Result<Vec<Packet<'static>>> {
        let config = self.parameter_sets(packet.data());
        if !config.is_empty() && self.last.as_ref() != Some(&config) {
            packet.add_side_data(SideData::new(SideDataType::NewExtradata, config.clone()));
            self.last = Some(config);
        }
        Ok(vec![packet])
    }
}
