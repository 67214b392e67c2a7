//! Codec configuration records: `esds` descriptors and `avcC` synthesis.

use super::{wrap_full_box, write_u32_be};
use recmux_core::bitstream::{self, h264, split_annexb};
use recmux_core::format::{CodecId, MediaType};

const ES_DESCR_TAG: u8 = 0x03;
const DECODER_CONFIG_DESCR_TAG: u8 = 0x04;
const DEC_SPECIFIC_INFO_TAG: u8 = 0x05;
const SL_CONFIG_DESCR_TAG: u8 = 0x06;

/// MPEG-4 audio object type for ALS, signalled through the escape value.
const AOT_ALS: u8 = 36;

/// ISO/IEC 14496-1 objectTypeIndication for a codec.
pub(crate) fn object_type_indication(codec: CodecId) -> Option<u8> {
    let oti = match codec {
        CodecId::Mpeg4Systems => 0x01,
        CodecId::Mpeg4 => 0x20,
        CodecId::Aac | CodecId::Mp4Als => 0x40,
        CodecId::Mpeg2Video => 0x61,
        CodecId::Mp2 => 0x69,
        CodecId::Mpeg1Video => 0x6A,
        CodecId::Mp3 => 0x6B,
        CodecId::Mjpeg => 0x6C,
        CodecId::Png => 0x6D,
        CodecId::Dts => 0xA9,
        CodecId::Vorbis => 0xDD,
        CodecId::DvdSubtitle => 0xE0,
        CodecId::Qcelp => 0xE1,
        _ => return None,
    };
    Some(oti)
}

/// Codec for an objectTypeIndication, using the decoder specific info to
/// tell AAC and ALS apart.
pub(crate) fn codec_from_object_type(oti: u8, dsi: Option<&[u8]>) -> CodecId {
    match oti {
        0x01 => CodecId::Mpeg4Systems,
        0x20 => CodecId::Mpeg4,
        0x40 if dsi.map_or(false, is_als_config) => CodecId::Mp4Als,
        0x40 | 0x66..=0x68 => CodecId::Aac,
        0x60..=0x65 => CodecId::Mpeg2Video,
        0x69 => CodecId::Mp2,
        0x6A => CodecId::Mpeg1Video,
        0x6B => CodecId::Mp3,
        0x6C => CodecId::Mjpeg,
        0x6D => CodecId::Png,
        0xA9 => CodecId::Dts,
        0xDD => CodecId::Vorbis,
        0xE0 => CodecId::DvdSubtitle,
        0xE1 => CodecId::Qcelp,
        _ => CodecId::Unknown,
    }
}

/// An AudioSpecificConfig whose object type escapes to ALS.
fn is_als_config(asc: &[u8]) -> bool {
    if asc.len() < 2 {
        return false;
    }
    let aot = asc[0] >> 3;
    aot == 31 && 32 + (((asc[0] & 0x07) << 3) | (asc[1] >> 5)) == AOT_ALS
}

/// streamType/upStream/reserved byte of the DecoderConfigDescriptor.
fn stream_type_byte(codec: CodecId) -> u8 {
    match codec {
        CodecId::DvdSubtitle => (0x38 << 2) | 1,
        CodecId::Mpeg4Systems => (0x01 << 2) | 1,
        c if c.media_type() == MediaType::Audio => 0x15,
        _ => 0x11,
    }
}

fn push_descriptor(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    let len = payload.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        out.extend_from_slice(&[
            0x80 | ((len >> 21) & 0x7F) as u8,
            0x80 | ((len >> 14) & 0x7F) as u8,
            0x80 | ((len >> 7) & 0x7F) as u8,
            (len & 0x7F) as u8,
        ]);
    }
    out.extend_from_slice(payload);
}

/// Build the `esds` box for an MPEG-4 family stream.
pub(crate) fn build_esds(codec: CodecId, extra: Option<&[u8]>, avg_bitrate: u32) -> Vec<u8> {
    let oti = object_type_indication(codec).unwrap_or(0xFF);

    let mut dec_config = Vec::with_capacity(32);
    dec_config.push(oti);
    dec_config.push(stream_type_byte(codec));
    dec_config.extend_from_slice(&[0, 0, 0]); // buffer size
    dec_config.extend_from_slice(&write_u32_be(avg_bitrate)); // max bitrate
    dec_config.extend_from_slice(&write_u32_be(avg_bitrate)); // avg bitrate
    if let Some(extra) = extra.filter(|e| !e.is_empty()) {
        push_descriptor(&mut dec_config, DEC_SPECIFIC_INFO_TAG, extra);
    }

    let mut es = Vec::with_capacity(dec_config.len() + 16);
    es.extend_from_slice(&[0, 1]); // ES_ID
    es.push(0); // flags
    push_descriptor(&mut es, DECODER_CONFIG_DESCR_TAG, &dec_config);
    push_descriptor(&mut es, SL_CONFIG_DESCR_TAG, &[0x02]);

    let mut payload = Vec::with_capacity(es.len() + 8);
    push_descriptor(&mut payload, ES_DESCR_TAG, &es);
    wrap_full_box(b"esds", 0, 0, &payload)
}

/// Parsed `esds` contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EsdsInfo {
    pub object_type: u8,
    pub decoder_specific_info: Option<Vec<u8>>,
}

fn read_descriptor(data: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, mut rest) = data.split_first()?;
    let mut len = 0usize;
    for _ in 0..4 {
        let (&b, tail) = rest.split_first()?;
        rest = tail;
        len = (len << 7) | (b & 0x7F) as usize;
        if b & 0x80 == 0 {
            break;
        }
    }
    if rest.len() < len {
        return None;
    }
    let (body, tail) = rest.split_at(len);
    Some((tag, body, tail))
}

/// Parse an `esds` payload (after the full box version and flags).
pub(crate) fn parse_esds(data: &[u8]) -> Option<EsdsInfo> {
    let (tag, es, _) = read_descriptor(data)?;
    if tag != ES_DESCR_TAG || es.len() < 3 {
        return None;
    }
    let flags = es[2];
    let mut skip = 3;
    if flags & 0x80 != 0 {
        skip += 2; // dependsOn_ES_ID
    }
    if flags & 0x40 != 0 {
        let url_len = *es.get(skip)? as usize;
        skip += 1 + url_len;
    }
    if flags & 0x20 != 0 {
        skip += 2; // OCR_ES_Id
    }

    let mut rest = es.get(skip..)?;
    while let Some((tag, body, tail)) = read_descriptor(rest) {
        if tag == DECODER_CONFIG_DESCR_TAG && body.len() >= 13 {
            let object_type = body[0];
            let decoder_specific_info = read_descriptor(&body[13..])
                .filter(|(t, _, _)| *t == DEC_SPECIFIC_INFO_TAG)
                .map(|(_, dsi, _)| dsi.to_vec());
            return Some(EsdsInfo {
                object_type,
                decoder_specific_info,
            });
        }
        rest = tail;
    }
    None
}

/// Build an AVCDecoderConfigurationRecord from parameter sets.
pub(crate) fn build_avcc(sps: &[&[u8]], pps: &[&[u8]]) -> Option<Vec<u8>> {
    let first = sps.first().filter(|s| s.len() >= 4)?;

    let mut avcc = Vec::with_capacity(16 + sps.iter().chain(pps).map(|p| p.len() + 2).sum::<usize>());
    avcc.push(1); // configurationVersion
    avcc.push(first[1]); // AVCProfileIndication
    avcc.push(first[2]); // profile_compatibility
    avcc.push(first[3]); // AVCLevelIndication
    avcc.push(0xFC | 3); // lengthSizeMinusOne
    avcc.push(0xE0 | (sps.len().min(31) as u8));
    for s in sps.iter().take(31) {
        avcc.extend_from_slice(&(s.len() as u16).to_be_bytes());
        avcc.extend_from_slice(s);
    }
    avcc.push(pps.len().min(255) as u8);
    for p in pps.iter().take(255) {
        avcc.extend_from_slice(&(p.len() as u16).to_be_bytes());
        avcc.extend_from_slice(p);
    }
    Some(avcc)
}

/// Build an `avcC` record from the SPS/PPS found in an Annex-B buffer.
pub(crate) fn avcc_from_annexb(data: &[u8]) -> Option<Vec<u8>> {
    let mut sps = Vec::new();
    let mut pps = Vec::new();
    for nal in split_annexb(data) {
        match bitstream::h264_nal_type(nal) {
            Some(h264::SPS) => sps.push(nal),
            Some(h264::PPS) => pps.push(nal),
            _ => {}
        }
    }
    build_avcc(&sps, &pps)
}

/// Normalize H.264 configuration bytes into `avcC` form.
///
/// Records already in `avcC` form are returned as-is; Annex-B parameter
/// sets are converted.
pub(crate) fn normalize_avc_config(extra: &[u8]) -> Option<Vec<u8>> {
    if bitstream::is_annex_b(extra) {
        avcc_from_annexb(extra)
    } else if extra.first() == Some(&1) && extra.len() >= 7 {
        Some(extra.to_vec())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: [u8; 6] = [0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02];
    const PPS: [u8; 3] = [0x68, 0xCE, 0x38];

    #[test]
    fn test_esds_round_trip_with_config() {
        let asc = [0x12, 0x10];
        let esds = build_esds(CodecId::Aac, Some(&asc), 128_000);
        assert_eq!(&esds[4..8], b"esds");

        let info = parse_esds(&esds[12..]).unwrap();
        assert_eq!(info.object_type, 0x40);
        assert_eq!(info.decoder_specific_info.as_deref(), Some(&asc[..]));
    }

    #[test]
    fn test_esds_long_descriptor() {
        let extra = vec![0xAB; 300];
        let esds = build_esds(CodecId::Mpeg4, Some(&extra), 0);
        let info = parse_esds(&esds[12..]).unwrap();
        assert_eq!(info.object_type, 0x20);
        assert_eq!(info.decoder_specific_info.unwrap().len(), 300);
    }

    #[test]
    fn test_object_type_mapping() {
        for codec in [CodecId::Mp3, CodecId::Mp2, CodecId::Mpeg2Video, CodecId::Png, CodecId::DvdSubtitle] {
            let oti = object_type_indication(codec).unwrap();
            assert_eq!(codec_from_object_type(oti, None), codec);
        }
        assert_eq!(codec_from_object_type(0x40, Some(&[0x12, 0x10])), CodecId::Aac);
        // escape (31) followed by 4 selects ALS
        assert_eq!(codec_from_object_type(0x40, Some(&[0xF8, 0x80])), CodecId::Mp4Als);
    }

    #[test]
    fn test_avcc_from_annexb() {
        let mut data = vec![0, 0, 0, 1];
        data.extend_from_slice(&SPS);
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(&PPS);
        data.extend_from_slice(&[0, 0, 1, 0x65, 0x88]);

        let avcc = avcc_from_annexb(&data).unwrap();
        assert_eq!(&avcc[..6], &[1, 0x42, 0xC0, 0x1E, 0xFF, 0xE1]);
        assert_eq!(&avcc[6..8], &[0, 6]);
        assert_eq!(&avcc[8..14], &SPS);
        assert_eq!(avcc[14], 1);
        assert_eq!(&avcc[15..17], &[0, 3]);
        assert_eq!(&avcc[17..], &PPS);
    }

    #[test]
    fn test_avcc_requires_sps() {
        assert!(avcc_from_annexb(&[0, 0, 1, 0x65, 0x88]).is_none());
        assert!(normalize_avc_config(&[0x42]).is_none());
    }
}
