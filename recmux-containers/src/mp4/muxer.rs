//! MP4 muxer implementation.

use super::codec_config::{avcc_from_annexb, build_esds, normalize_avc_config};
use super::{wrap_box, wrap_full_box, write_u32_be, write_u64_be, Mp4Brand, SampleEntryType};
use crate::traits::{MuxOptions, Muxer, StreamInfo};
use recmux_core::bitstream;
use recmux_core::error::{ContainerError, Error, Result};
use recmux_core::format::{CodecId, MediaType};
use recmux_core::packet::{Packet, SideDataType};
use recmux_core::rational::{Rational, RoundingMode};
use recmux_core::timestamp::NOPTS;
use std::borrow::Cow;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, info};

/// A chunk is closed after this many samples, or when another track writes.
const MAX_SAMPLES_PER_CHUNK: u32 = 10;

/// Timescale of the movie header and edit lists.
const MOVIE_TIMESCALE: u32 = 1000;

/// Block size used when moving media data behind the movie header.
const RELOCATION_BLOCK_SIZE: usize = 1 << 20;

/// Sample metadata.
#[derive(Debug, Clone)]
struct SampleInfo {
    /// Size in bytes.
    size: u32,
    /// Decode timestamp in the track timescale.
    dts: i64,
    /// Composition time offset.
    cts_offset: i32,
    /// Is keyframe.
    keyframe: bool,
    /// Packet duration, used only for the last sample.
    duration_hint: i64,
}

/// Chunk metadata.
#[derive(Debug, Clone)]
struct ChunkInfo {
    /// Offset in file.
    offset: u64,
    /// Number of samples.
    sample_count: u32,
}

/// Track muxing state.
struct TrackState {
    /// Stream info as stored in the file.
    stream: StreamInfo,
    /// Samples.
    samples: Vec<SampleInfo>,
    /// Chunks.
    chunks: Vec<ChunkInfo>,
    /// Sample durations, resolved when the trailer is written.
    durations: Vec<u32>,
    /// Timescale, chosen when the header is written.
    timescale: u32,
    /// Total payload bytes.
    bytes: u64,
}

impl TrackState {
    fn new(stream: StreamInfo) -> Self {
        Self {
            stream,
            samples: Vec::new(),
            chunks: Vec::new(),
            durations: Vec::new(),
            timescale: 0,
            bytes: 0,
        }
    }

    /// Timescale for a stream, decided once at header time.
    fn select_timescale(stream: &StreamInfo) -> u32 {
        let tb = stream.time_base;
        let den = (tb.num == 1 && tb.den > 0 && tb.den <= u32::MAX as i64).then_some(tb.den as u32);

        match stream.media_type {
            MediaType::Video => den.filter(|&d| d >= 10_000).unwrap_or(90_000),
            MediaType::Audio => stream
                .audio
                .map(|a| a.sample_rate)
                .filter(|&rate| rate > 0)
                .or(den)
                .unwrap_or(48_000),
            MediaType::Subtitle | MediaType::Data => den.unwrap_or(MOVIE_TIMESCALE),
        }
    }

    /// Adopt codec configuration found after the header was written.
    ///
    /// MP4 stores a single sample description, so only the first
    /// configuration is kept.
    fn adopt_config(&mut self, data: &[u8]) {
        if self.stream.extra_data.is_some() || data.is_empty() {
            return;
        }
        let config = match self.stream.codec_id {
            CodecId::H264 => normalize_avc_config(data),
            CodecId::Hevc if !bitstream::is_annex_b(data) && data[0] == 1 => Some(data.to_vec()),
            CodecId::Hevc => None,
            _ => Some(data.to_vec()),
        };
        if config.is_some() {
            debug!(index = self.stream.index, codec = %self.stream.codec_id, "adopted codec configuration");
            self.stream.extra_data = config;
        }
    }

    /// Durations from decode time deltas; the last sample uses its packet
    /// duration, then the previous delta, then one tick.
    fn resolve_durations(&mut self) {
        let clamp = |d: i64| d.clamp(1, u32::MAX as i64) as u32;
        let mut durations: Vec<u32> = self
            .samples
            .windows(2)
            .map(|w| clamp(w[1].dts - w[0].dts))
            .collect();
        if let Some(last) = self.samples.last() {
            let fallback = durations.last().copied().unwrap_or(1);
            durations.push(if last.duration_hint > 0 {
                clamp(last.duration_hint)
            } else {
                fallback
            });
        }
        self.durations = durations;
    }

    fn media_duration(&self) -> u64 {
        self.durations.iter().map(|&d| d as u64).sum()
    }

    /// Convert track time to movie time.
    fn to_movie(&self, value: i64) -> i64 {
        Rational::new(1, self.timescale as i64).rescale_rnd(
            value,
            Rational::new(1, MOVIE_TIMESCALE as i64),
            RoundingMode::NEAR_INF_PASS_MINMAX,
        )
    }

    /// Edit list as `(segment_duration, media_time)` pairs.
    ///
    /// A positive first decode time becomes an empty edit; a negative one
    /// skips into the media.
    fn edit_list(&self) -> Vec<(u64, i64)> {
        let Some(first) = self.samples.first() else {
            return Vec::new();
        };
        let media = self.to_movie(self.media_duration() as i64).max(0);
        let start = first.dts;

        if start > 0 {
            let empty = self.to_movie(start);
            if empty > 0 {
                return vec![(empty as u64, -1), (media as u64, 0)];
            }
        } else if start < 0 {
            let skipped = self.to_movie(-start);
            return vec![((media - skipped).max(0) as u64, -start)];
        }
        Vec::new()
    }

    fn movie_duration(&self) -> u64 {
        let edits = self.edit_list();
        if edits.is_empty() {
            self.to_movie(self.media_duration() as i64).max(0) as u64
        } else {
            edits.iter().map(|&(d, _)| d).sum()
        }
    }

    fn avg_bitrate(&self) -> u32 {
        let duration = self.media_duration();
        if duration == 0 || self.timescale == 0 {
            return 0;
        }
        (self.bytes as u128 * 8 * self.timescale as u128 / duration as u128).min(u32::MAX as u128) as u32
    }
}

/// MP4 muxer.
pub struct Mp4Muxer {
    /// Writer.
    writer: Option<Box<dyn ReadWriteSeek>>,
    /// Tracks.
    tracks: Vec<TrackState>,
    /// mdat start offset.
    mdat_start: u64,
    /// mdat size.
    mdat_size: u64,
    /// Header written.
    header_written: bool,
    /// Trailer written.
    trailer_written: bool,
    /// Track that wrote the most recent sample.
    last_track: Option<usize>,
    /// Move moov ahead of mdat when finishing.
    fast_start: bool,
    /// Major brand.
    major_brand: Mp4Brand,
}

trait ReadWriteSeek: Read + Write + Seek + Send {}
impl<T: Read + Write + Seek + Send> ReadWriteSeek for T {}

fn no_writer() -> Error {
    Error::Container(ContainerError::InvalidState("no writer attached".into()))
}

impl Mp4Muxer {
    /// Create a new MP4 muxer.
    pub fn new() -> Self {
        Self {
            writer: None,
            tracks: Vec::new(),
            mdat_start: 0,
            mdat_size: 0,
            header_written: false,
            trailer_written: false,
            last_track: None,
            fast_start: false,
            major_brand: Mp4Brand::Isom,
        }
    }

    /// Set the major brand.
    pub fn set_brand(&mut self, brand: Mp4Brand) {
        self.major_brand = brand;
    }

    /// Write ftyp atom.
    fn write_ftyp(&mut self) -> Result<()> {
        let mut compatible = vec![Mp4Brand::Isom.to_bytes(), Mp4Brand::Iso2.to_bytes()];
        if self.tracks.iter().any(|t| t.stream.codec_id == CodecId::H264) {
            compatible.push(Mp4Brand::Avc1.to_bytes());
        }
        compatible.push(Mp4Brand::Mp41.to_bytes());

        let mut data = Vec::with_capacity(8 + compatible.len() * 4);
        data.extend_from_slice(&self.major_brand.to_bytes());
        data.extend_from_slice(&write_u32_be(0x200)); // minor version
        for brand in compatible {
            data.extend_from_slice(&brand);
        }

        let writer = self.writer.as_mut().ok_or_else(no_writer)?;
        writer.write_all(&wrap_box(b"ftyp", &data))?;
        Ok(())
    }

    /// Start mdat atom.
    fn start_mdat(&mut self) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(no_writer)?;

        self.mdat_start = writer.stream_position()?;

        // size = 1 means the 64-bit size follows
        writer.write_all(&[0, 0, 0, 1])?;
        writer.write_all(b"mdat")?;
        writer.write_all(&[0u8; 8])?;

        Ok(())
    }

    /// Finish mdat atom.
    fn finish_mdat(&mut self) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(no_writer)?;

        let current = writer.stream_position()?;
        self.mdat_size = current - self.mdat_start;

        writer.seek(SeekFrom::Start(self.mdat_start + 8))?;
        writer.write_all(&write_u64_be(self.mdat_size))?;
        writer.seek(SeekFrom::Start(current))?;

        Ok(())
    }

    /// Write moov ahead of mdat, moving the media data back.
    fn write_moov_ahead(&mut self) -> Result<()> {
        // Chunk offsets grow by the moov size, which can switch stco to co64.
        let mut shift = 0u64;
        let mut moov = self.build_moov(shift)?;
        for _ in 0..4 {
            if moov.len() as u64 == shift {
                break;
            }
            shift = moov.len() as u64;
            moov = self.build_moov(shift)?;
        }
        if moov.len() as u64 != shift {
            return Err(Error::Container(ContainerError::Other(
                "moov size did not settle for faststart".into(),
            )));
        }

        let start = self.mdat_start;
        let end = self.mdat_start + self.mdat_size;
        let writer = self.writer.as_mut().ok_or_else(no_writer)?;

        let mut buf = vec![0u8; RELOCATION_BLOCK_SIZE];
        let mut pos = end;
        while pos > start {
            let n = ((pos - start) as usize).min(buf.len());
            pos -= n as u64;
            writer.seek(SeekFrom::Start(pos))?;
            writer.read_exact(&mut buf[..n])?;
            writer.seek(SeekFrom::Start(pos + shift))?;
            writer.write_all(&buf[..n])?;
        }

        writer.seek(SeekFrom::Start(start))?;
        writer.write_all(&moov)?;
        writer.seek(SeekFrom::End(0))?;

        debug!(moov_size = shift, mdat_size = self.mdat_size, "moved moov ahead of mdat");
        Ok(())
    }

    /// Build moov atom data with chunk offsets moved by `offset_shift`.
    fn build_moov(&self, offset_shift: u64) -> Result<Vec<u8>> {
        let max_duration = self
            .tracks
            .iter()
            .map(TrackState::movie_duration)
            .max()
            .unwrap_or(0);

        let mut moov = self.build_mvhd(max_duration);
        for (i, track) in self.tracks.iter().enumerate() {
            moov.extend_from_slice(&self.build_trak(track, i as u32 + 1, offset_shift)?);
        }

        Ok(wrap_box(b"moov", &moov))
    }

    /// Build mvhd atom.
    fn build_mvhd(&self, duration: u64) -> Vec<u8> {
        let version = if duration > u32::MAX as u64 { 1u8 } else { 0u8 };

        let mut data = Vec::with_capacity(108);
        if version == 1 {
            data.extend_from_slice(&write_u64_be(0)); // creation time
            data.extend_from_slice(&write_u64_be(0)); // modification time
            data.extend_from_slice(&write_u32_be(MOVIE_TIMESCALE));
            data.extend_from_slice(&write_u64_be(duration));
        } else {
            data.extend_from_slice(&write_u32_be(0)); // creation time
            data.extend_from_slice(&write_u32_be(0)); // modification time
            data.extend_from_slice(&write_u32_be(MOVIE_TIMESCALE));
            data.extend_from_slice(&write_u32_be(duration as u32));
        }

        data.extend_from_slice(&write_u32_be(0x00010000)); // rate 1.0
        data.extend_from_slice(&[0x01, 0x00]); // volume 1.0
        data.extend_from_slice(&[0u8; 10]); // reserved
        write_matrix(&mut data, [1, 0, 0, 1, 0, 0]);
        data.extend_from_slice(&[0u8; 24]); // pre-defined
        data.extend_from_slice(&write_u32_be(self.tracks.len() as u32 + 1)); // next track ID

        wrap_full_box(b"mvhd", version, 0, &data)
    }

    /// Build trak atom.
    fn build_trak(&self, track: &TrackState, track_id: u32, offset_shift: u64) -> Result<Vec<u8>> {
        let mut trak = self.build_tkhd(track, track_id);

        let edits = track.edit_list();
        if !edits.is_empty() {
            trak.extend_from_slice(&build_edts(&edits));
        }

        trak.extend_from_slice(&self.build_mdia(track, offset_shift)?);
        Ok(wrap_box(b"trak", &trak))
    }

    /// Build tkhd atom.
    fn build_tkhd(&self, track: &TrackState, track_id: u32) -> Vec<u8> {
        let duration = track.movie_duration();
        let version = if duration > u32::MAX as u64 { 1u8 } else { 0u8 };

        let mut data = Vec::with_capacity(92);
        if version == 1 {
            data.extend_from_slice(&write_u64_be(0)); // creation time
            data.extend_from_slice(&write_u64_be(0)); // modification time
            data.extend_from_slice(&write_u32_be(track_id));
            data.extend_from_slice(&[0u8; 4]); // reserved
            data.extend_from_slice(&write_u64_be(duration));
        } else {
            data.extend_from_slice(&write_u32_be(0)); // creation time
            data.extend_from_slice(&write_u32_be(0)); // modification time
            data.extend_from_slice(&write_u32_be(track_id));
            data.extend_from_slice(&[0u8; 4]); // reserved
            data.extend_from_slice(&write_u32_be(duration as u32));
        }

        data.extend_from_slice(&[0u8; 8]); // reserved
        data.extend_from_slice(&[0u8; 4]); // layer and alternate group
        if track.stream.media_type == MediaType::Audio {
            data.extend_from_slice(&[0x01, 0x00]);
        } else {
            data.extend_from_slice(&[0, 0]);
        }
        data.extend_from_slice(&[0u8; 2]); // reserved

        let (width, height) = track
            .stream
            .video
            .map_or((0, 0), |v| (v.width as i64, v.height as i64));
        let matrix = match track.stream.rotation() {
            90 => [0, 1, -1, 0, height, 0],
            180 => [-1, 0, 0, -1, width, height],
            270 => [0, -1, 1, 0, 0, width],
            _ => [1, 0, 0, 1, 0, 0],
        };
        write_matrix(&mut data, matrix);

        // Width and height (fixed-point 16.16)
        data.extend_from_slice(&write_u32_be((width as u32) << 16));
        data.extend_from_slice(&write_u32_be((height as u32) << 16));

        // flags: enabled, in movie
        wrap_full_box(b"tkhd", version, 0x000003, &data)
    }

    /// Build mdia atom.
    fn build_mdia(&self, track: &TrackState, offset_shift: u64) -> Result<Vec<u8>> {
        let mut mdia = build_mdhd(track);
        mdia.extend_from_slice(&build_hdlr(track));
        mdia.extend_from_slice(&self.build_minf(track, offset_shift)?);
        Ok(wrap_box(b"mdia", &mdia))
    }

    /// Build minf atom.
    fn build_minf(&self, track: &TrackState, offset_shift: u64) -> Result<Vec<u8>> {
        let mut minf = match track.stream.media_type {
            MediaType::Video => wrap_full_box(b"vmhd", 0, 1, &[0u8; 8]),
            MediaType::Audio => wrap_full_box(b"smhd", 0, 0, &[0u8; 4]),
            MediaType::Subtitle | MediaType::Data => wrap_full_box(b"nmhd", 0, 0, &[]),
        };

        // dref with one self-contained url entry
        let mut dref = write_u32_be(1).to_vec();
        dref.extend_from_slice(&wrap_full_box(b"url ", 0, 1, &[]));
        minf.extend_from_slice(&wrap_box(b"dinf", &wrap_full_box(b"dref", 0, 0, &dref)));

        minf.extend_from_slice(&self.build_stbl(track, offset_shift)?);
        Ok(wrap_box(b"minf", &minf))
    }

    /// Build stbl atom.
    fn build_stbl(&self, track: &TrackState, offset_shift: u64) -> Result<Vec<u8>> {
        let mut stsd = write_u32_be(1).to_vec();
        stsd.extend_from_slice(&build_sample_entry(track)?);
        let mut stbl = wrap_full_box(b"stsd", 0, 0, &stsd);

        stbl.extend_from_slice(&build_stts(track));
        if track.samples.iter().any(|s| s.cts_offset != 0) {
            stbl.extend_from_slice(&build_ctts(track));
        }
        if track.stream.media_type == MediaType::Video {
            stbl.extend_from_slice(&build_stss(track));
        }
        stbl.extend_from_slice(&build_stsc(track));
        stbl.extend_from_slice(&build_stsz(track));
        stbl.extend_from_slice(&build_stco(track, offset_shift));

        Ok(wrap_box(b"stbl", &stbl))
    }
}

/// Write a 3x3 display matrix from `(a, b, c, d, tx, ty)`.
fn write_matrix(data: &mut Vec<u8>, [a, b, c, d, tx, ty]: [i64; 6]) {
    let fixed = |v: i64| write_u32_be((v << 16) as u32);
    data.extend_from_slice(&fixed(a));
    data.extend_from_slice(&fixed(b));
    data.extend_from_slice(&[0u8; 4]); // u
    data.extend_from_slice(&fixed(c));
    data.extend_from_slice(&fixed(d));
    data.extend_from_slice(&[0u8; 4]); // v
    data.extend_from_slice(&fixed(tx));
    data.extend_from_slice(&fixed(ty));
    data.extend_from_slice(&write_u32_be(0x40000000)); // w
}

/// Build edts atom holding an elst.
fn build_edts(edits: &[(u64, i64)]) -> Vec<u8> {
    let mut elst = write_u32_be(edits.len() as u32).to_vec();
    for &(segment_duration, media_time) in edits {
        elst.extend_from_slice(&write_u64_be(segment_duration));
        elst.extend_from_slice(&media_time.to_be_bytes());
        elst.extend_from_slice(&[0, 1, 0, 0]); // rate 1.0
    }
    wrap_box(b"edts", &wrap_full_box(b"elst", 1, 0, &elst))
}

/// Build mdhd atom.
fn build_mdhd(track: &TrackState) -> Vec<u8> {
    let duration = track.media_duration();
    let version = if duration > u32::MAX as u64 { 1u8 } else { 0u8 };

    let mut data = Vec::with_capacity(32);
    if version == 1 {
        data.extend_from_slice(&write_u64_be(0)); // creation time
        data.extend_from_slice(&write_u64_be(0)); // modification time
        data.extend_from_slice(&write_u32_be(track.timescale));
        data.extend_from_slice(&write_u64_be(duration));
    } else {
        data.extend_from_slice(&write_u32_be(0)); // creation time
        data.extend_from_slice(&write_u32_be(0)); // modification time
        data.extend_from_slice(&write_u32_be(track.timescale));
        data.extend_from_slice(&write_u32_be(duration as u32));
    }
    data.extend_from_slice(&[0x55, 0xC4]); // "und"
    data.extend_from_slice(&[0, 0]); // pre-defined

    wrap_full_box(b"mdhd", version, 0, &data)
}

/// Build hdlr atom.
fn build_hdlr(track: &TrackState) -> Vec<u8> {
    let (handler_type, name): (&[u8; 4], &str) = match (track.stream.media_type, track.stream.codec_id) {
        (MediaType::Video, _) => (b"vide", "VideoHandler"),
        (MediaType::Audio, _) => (b"soun", "SoundHandler"),
        (_, CodecId::DvdSubtitle) => (b"subp", "SubtitleHandler"),
        (MediaType::Subtitle, _) => (b"sbtl", "SubtitleHandler"),
        (MediaType::Data, _) => (b"odsm", "ObjectDescriptorHandler"),
    };

    let mut data = Vec::with_capacity(32);
    data.extend_from_slice(&[0u8; 4]); // pre-defined
    data.extend_from_slice(handler_type);
    data.extend_from_slice(&[0u8; 12]); // reserved
    data.extend_from_slice(name.as_bytes());
    data.push(0);

    wrap_full_box(b"hdlr", 0, 0, &data)
}

/// Build the single sample description of a track.
fn build_sample_entry(track: &TrackState) -> Result<Vec<u8>> {
    let stream = &track.stream;
    let entry = SampleEntryType::for_codec(stream.codec_id).ok_or_else(|| {
        Error::unsupported(format!("codec {} cannot be stored in mp4", stream.codec_id))
    })?;
    let extra = stream.extra_data.as_deref().filter(|e| !e.is_empty());
    let config_box = |box_type: &[u8; 4]| extra.map(|e| wrap_box(box_type, e));

    let children: Vec<u8> = match entry {
        SampleEntryType::Avc1 => config_box(b"avcC").unwrap_or_default(),
        SampleEntryType::Hvc1 => config_box(b"hvcC").unwrap_or_default(),
        SampleEntryType::Vp09 => config_box(b"vpcC").unwrap_or_default(),
        SampleEntryType::Vc1 => config_box(b"dvc1").unwrap_or_default(),
        SampleEntryType::Ac3 => config_box(b"dac3").unwrap_or_default(),
        SampleEntryType::Ec3 => config_box(b"dec3").unwrap_or_default(),
        SampleEntryType::Mp4v | SampleEntryType::Mp4a | SampleEntryType::Mp4s => {
            build_esds(stream.codec_id, extra, track.avg_bitrate())
        }
        _ => config_box(b"glbl").unwrap_or_default(),
    };

    let mut data = Vec::with_capacity(96 + children.len());
    data.extend_from_slice(&[0u8; 6]); // reserved
    data.extend_from_slice(&[0, 1]); // data reference index

    if entry.is_video() {
        let (width, height) = stream.video.map_or((0, 0), |v| (v.width, v.height));
        data.extend_from_slice(&[0u8; 16]); // pre-defined and reserved
        data.extend_from_slice(&(width as u16).to_be_bytes());
        data.extend_from_slice(&(height as u16).to_be_bytes());
        data.extend_from_slice(&write_u32_be(0x00480000)); // horiz resolution
        data.extend_from_slice(&write_u32_be(0x00480000)); // vert resolution
        data.extend_from_slice(&[0u8; 4]); // reserved
        data.extend_from_slice(&[0, 1]); // frame count
        data.extend_from_slice(&[0u8; 32]); // compressor name
        data.extend_from_slice(&[0, 0x18]); // depth
        data.extend_from_slice(&[0xFF, 0xFF]); // pre-defined
        data.extend_from_slice(&children);
    } else if entry.is_audio() {
        let audio = stream.audio.unwrap_or(crate::traits::AudioStreamInfo {
            sample_rate: track.timescale,
            channels: 2,
            bits_per_sample: 16,
        });
        data.extend_from_slice(&[0u8; 8]); // reserved
        data.extend_from_slice(&(audio.channels as u16).to_be_bytes());
        data.extend_from_slice(&(audio.bits_per_sample.max(16) as u16).to_be_bytes());
        data.extend_from_slice(&[0u8; 4]); // pre-defined and reserved
        data.extend_from_slice(&write_u32_be(audio.sample_rate.min(0xFFFF) << 16));
        data.extend_from_slice(&children);
    } else if entry == SampleEntryType::Tx3g {
        data.extend_from_slice(extra.unwrap_or(&DEFAULT_TX3G_DESCRIPTION));
    } else {
        data.extend_from_slice(&children);
    }

    Ok(wrap_box(&entry.to_bytes(), &data))
}

/// Timed text description used when the stream carries none: bottom
/// centered, white on transparent, one "Serif" font.
const DEFAULT_TX3G_DESCRIPTION: [u8; 48] = [
    0, 0, 0, 0, // display flags
    0x01, 0xFF, // horizontal / vertical justification
    0, 0, 0, 0, // background color
    0, 0, 0, 0, 0, 0, 0, 0, // default text box
    0, 0, 0, 0, 0, 1, 0, 0x12, 0xFF, 0xFF, 0xFF, 0xFF, // style record
    0, 0, 0, 18, b'f', b't', b'a', b'b', 0, 1, 0, 1, 5, b'S', b'e', b'r', b'i', b'f',
];

/// Build stts atom.
fn build_stts(track: &TrackState) -> Vec<u8> {
    let mut entries: Vec<(u32, u32)> = Vec::new();
    for &duration in &track.durations {
        match entries.last_mut() {
            Some(last) if last.1 == duration => last.0 += 1,
            _ => entries.push((1, duration)),
        }
    }

    let mut data = write_u32_be(entries.len() as u32).to_vec();
    for (count, delta) in entries {
        data.extend_from_slice(&write_u32_be(count));
        data.extend_from_slice(&write_u32_be(delta));
    }
    wrap_full_box(b"stts", 0, 0, &data)
}

/// Build ctts atom (version 1, signed offsets).
fn build_ctts(track: &TrackState) -> Vec<u8> {
    let mut entries: Vec<(u32, i32)> = Vec::new();
    for sample in &track.samples {
        match entries.last_mut() {
            Some(last) if last.1 == sample.cts_offset => last.0 += 1,
            _ => entries.push((1, sample.cts_offset)),
        }
    }

    let mut data = write_u32_be(entries.len() as u32).to_vec();
    for (count, offset) in entries {
        data.extend_from_slice(&write_u32_be(count));
        data.extend_from_slice(&offset.to_be_bytes());
    }
    wrap_full_box(b"ctts", 1, 0, &data)
}

/// Build stss atom.
fn build_stss(track: &TrackState) -> Vec<u8> {
    let keyframes: Vec<u32> = track
        .samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.keyframe)
        .map(|(i, _)| i as u32 + 1)
        .collect();

    let mut data = write_u32_be(keyframes.len() as u32).to_vec();
    for sample_num in keyframes {
        data.extend_from_slice(&write_u32_be(sample_num));
    }
    wrap_full_box(b"stss", 0, 0, &data)
}

/// Build stsc atom.
fn build_stsc(track: &TrackState) -> Vec<u8> {
    let mut entries: Vec<(u32, u32)> = Vec::new();
    for (i, chunk) in track.chunks.iter().enumerate() {
        if entries.last().map_or(true, |&(_, n)| n != chunk.sample_count) {
            entries.push((i as u32 + 1, chunk.sample_count));
        }
    }

    let mut data = write_u32_be(entries.len() as u32).to_vec();
    for (first_chunk, samples) in entries {
        data.extend_from_slice(&write_u32_be(first_chunk));
        data.extend_from_slice(&write_u32_be(samples));
        data.extend_from_slice(&write_u32_be(1)); // sample description index
    }
    wrap_full_box(b"stsc", 0, 0, &data)
}

/// Build stsz atom.
fn build_stsz(track: &TrackState) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + track.samples.len() * 4);
    data.extend_from_slice(&write_u32_be(0)); // sample size (variable)
    data.extend_from_slice(&write_u32_be(track.samples.len() as u32));
    for sample in &track.samples {
        data.extend_from_slice(&write_u32_be(sample.size));
    }
    wrap_full_box(b"stsz", 0, 0, &data)
}

/// Build stco or co64 atom.
fn build_stco(track: &TrackState, offset_shift: u64) -> Vec<u8> {
    let use_64bit = track
        .chunks
        .iter()
        .any(|c| c.offset + offset_shift > u32::MAX as u64);

    let mut data = write_u32_be(track.chunks.len() as u32).to_vec();
    for chunk in &track.chunks {
        let offset = chunk.offset + offset_shift;
        if use_64bit {
            data.extend_from_slice(&write_u64_be(offset));
        } else {
            data.extend_from_slice(&write_u32_be(offset as u32));
        }
    }

    let box_type = if use_64bit { b"co64" } else { b"stco" };
    wrap_full_box(box_type, 0, 0, &data)
}

impl Default for Mp4Muxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Muxer for Mp4Muxer {
    fn create<W: Read + Write + Seek + Send + 'static>(&mut self, writer: W) -> Result<()> {
        self.writer = Some(Box::new(writer));
        Ok(())
    }

    fn format_name(&self) -> &str {
        "mp4"
    }

    fn add_stream(&mut self, mut info: StreamInfo) -> Result<usize> {
        if self.header_written {
            return Err(Error::Container(ContainerError::InvalidState(
                "streams cannot be added after the header".into(),
            )));
        }
        let index = self.tracks.len();
        info.index = index;
        self.tracks.push(TrackState::new(info));
        Ok(index)
    }

    fn stream_info(&self, index: usize) -> Option<&StreamInfo> {
        self.tracks.get(index).map(|t| &t.stream)
    }

    fn write_header(&mut self, options: &MuxOptions) -> Result<()> {
        if self.header_written {
            return Err(Error::Container(ContainerError::InvalidState("header already written".into())));
        }
        if self.tracks.is_empty() {
            return Err(Error::Container(ContainerError::TrackConfig("no streams added".into())));
        }

        for track in &mut self.tracks {
            let entry = SampleEntryType::for_codec(track.stream.codec_id).ok_or_else(|| {
                Error::unsupported(format!("codec {} cannot be stored in mp4", track.stream.codec_id))
            })?;

            track.timescale = TrackState::select_timescale(&track.stream);
            track.stream.time_base = Rational::new(1, track.timescale as i64);
            track.stream.codec_tag = Some(entry.to_bytes());

            if let Some(extra) = track.stream.extra_data.take() {
                track.adopt_config(&extra);
            }
        }

        self.fast_start = options
            .get("movflags")
            .map_or(false, |flags| flags.split('+').any(|f| f == "faststart"));

        self.write_ftyp()?;
        self.start_mdat()?;
        self.header_written = true;

        info!(
            tracks = self.tracks.len(),
            fast_start = self.fast_start,
            "mp4 header written"
        );
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if !self.header_written || self.trailer_written {
            return Err(Error::Container(ContainerError::InvalidState(
                "packets are accepted between header and trailer".into(),
            )));
        }

        let index = packet.stream_index;
        let track = self
            .tracks
            .get_mut(index)
            .ok_or(Error::Container(ContainerError::StreamNotFound { index }))?;

        let dts = match (packet.dts, packet.pts) {
            (dts, _) if dts != NOPTS => dts,
            (_, pts) if pts != NOPTS => pts,
            _ => track
                .samples
                .last()
                .map_or(0, |s| s.dts.saturating_add(s.duration_hint.max(1))),
        };
        let pts = if packet.pts != NOPTS { packet.pts } else { dts };

        if let Some(last) = track.samples.last() {
            if dts <= last.dts {
                return Err(Error::Container(ContainerError::NonMonotonicDts {
                    index,
                    last: last.dts,
                    dts,
                }));
            }
        }
        let cts_offset = i32::try_from(pts - dts)
            .map_err(|_| Error::invalid_param(format!("composition offset {} out of range", pts - dts)))?;

        if let Some(side) = packet.get_side_data(SideDataType::NewExtradata) {
            track.adopt_config(&side.data);
        }

        let mut payload = Cow::Borrowed(packet.data());
        if matches!(track.stream.codec_id, CodecId::H264 | CodecId::Hevc) && bitstream::is_annex_b(&payload) {
            if track.stream.codec_id == CodecId::H264 && track.stream.extra_data.is_none() {
                track.stream.extra_data = avcc_from_annexb(&payload);
            }
            payload = Cow::Owned(bitstream::annexb_to_length_prefixed(&payload));
        }
        let size = u32::try_from(payload.len())
            .map_err(|_| Error::invalid_param("packet larger than 4 GiB"))?;

        let writer = self.writer.as_mut().ok_or_else(no_writer)?;
        let offset = writer.stream_position()?;
        writer.write_all(&payload)?;

        let continues_chunk = self.last_track == Some(index)
            && track
                .chunks
                .last()
                .map_or(false, |c| c.sample_count < MAX_SAMPLES_PER_CHUNK);
        match track.chunks.last_mut() {
            Some(chunk) if continues_chunk => chunk.sample_count += 1,
            _ => track.chunks.push(ChunkInfo {
                offset,
                sample_count: 1,
            }),
        }

        track.samples.push(SampleInfo {
            size,
            dts,
            cts_offset,
            keyframe: packet.is_keyframe(),
            duration_hint: packet.duration,
        });
        track.bytes += size as u64;
        self.last_track = Some(index);

        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        if !self.header_written || self.trailer_written {
            return Err(Error::Container(ContainerError::InvalidState(
                "trailer requires a written header".into(),
            )));
        }

        for track in &mut self.tracks {
            track.resolve_durations();
        }

        self.finish_mdat()?;
        if self.fast_start {
            self.write_moov_ahead()?;
        } else {
            let moov = self.build_moov(0)?;
            let writer = self.writer.as_mut().ok_or_else(no_writer)?;
            writer.write_all(&moov)?;
        }

        let writer = self.writer.as_mut().ok_or_else(no_writer)?;
        writer.flush()?;
        self.trailer_written = true;

        info!(
            samples = self.tracks.iter().map(|t| t.samples.len()).sum::<usize>(),
            mdat_size = self.mdat_size,
            "mp4 trailer written"
        );
        Ok(())
    }

    fn close(&mut self) {
        self.writer = None;
    }
}
