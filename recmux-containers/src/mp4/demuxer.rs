//! MP4 demuxer implementation.

use super::atoms::{
    parse_elst, read_content, AtomHeader, EditEntry, FtypAtom, HdlrAtom, MdhdAtom, MvhdAtom,
    StblInfo, TkhdAtom,
};
use super::codec_config::codec_from_object_type;
use crate::traits::{AudioStreamInfo, Demuxer, StreamInfo, VideoStreamInfo, ROTATE_KEY};
use recmux_core::error::{ContainerError, Error, Result};
use recmux_core::format::{CodecId, MediaType};
use recmux_core::packet::Packet;
use recmux_core::rational::Rational;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

/// Maximum size for sample data allocation (50 MB).
/// Individual video/audio samples shouldn't exceed this.
const MAX_SAMPLE_SIZE: u32 = 50 * 1024 * 1024;

/// One sample resolved from the sample tables.
#[derive(Debug, Clone, Copy)]
struct SampleRef {
    offset: u64,
    size: u32,
    dts: i64,
    cts_offset: i32,
    duration: u32,
    keyframe: bool,
}

/// Track information.
#[derive(Debug)]
struct TrackInfo {
    /// Stream info.
    stream: StreamInfo,
    /// Resolved samples in decode order.
    samples: Vec<SampleRef>,
    /// Current sample index.
    current_sample: usize,
    /// Media timescale.
    timescale: u32,
    /// Added to every decoded timestamp, from the edit list.
    dts_shift: i64,
}

impl TrackInfo {
    fn next_dts(&self) -> Option<i64> {
        self.samples
            .get(self.current_sample)
            .map(|s| s.dts + self.dts_shift)
    }
}

/// Expand the compact sample tables into one entry per sample.
fn resolve_samples(stbl: &StblInfo) -> Vec<SampleRef> {
    let sample_count = stbl.sample_sizes.len();

    let mut offsets = Vec::with_capacity(sample_count);
    let mut stsc_idx = 0;
    'chunks: for (chunk_idx, &chunk_offset) in stbl.chunk_offsets.iter().enumerate() {
        let chunk_number = chunk_idx as u32 + 1;
        while stbl
            .stsc
            .get(stsc_idx + 1)
            .map_or(false, |e| e.0 <= chunk_number)
        {
            stsc_idx += 1;
        }
        let Some(&(_, samples_per_chunk, _)) = stbl.stsc.get(stsc_idx) else {
            break;
        };

        let mut offset = chunk_offset;
        for _ in 0..samples_per_chunk {
            let Some(&size) = stbl.sample_sizes.get(offsets.len()) else {
                break 'chunks;
            };
            offsets.push(offset);
            offset = offset.saturating_add(size as u64);
        }
    }

    let resolved = offsets.len();
    if resolved < sample_count {
        debug!(sample_count, resolved, "sample tables cover fewer samples than stsz");
    }

    let mut timing = Vec::with_capacity(resolved);
    let mut dts = 0i64;
    for &(count, delta) in &stbl.stts {
        for _ in 0..count {
            if timing.len() >= resolved {
                break;
            }
            timing.push((dts, delta));
            dts = dts.saturating_add(delta as i64);
        }
    }
    let last_delta = timing.last().map_or(1, |&(_, d)| d);
    while timing.len() < resolved {
        timing.push((dts, last_delta));
        dts = dts.saturating_add(last_delta as i64);
    }

    let mut cts = Vec::with_capacity(if stbl.ctts.is_empty() { 0 } else { resolved });
    for &(count, offset) in &stbl.ctts {
        for _ in 0..count {
            if cts.len() >= resolved {
                break;
            }
            cts.push(offset);
        }
    }

    offsets
        .into_iter()
        .enumerate()
        .map(|(i, offset)| SampleRef {
            offset,
            size: stbl.sample_sizes[i],
            dts: timing[i].0,
            cts_offset: cts.get(i).copied().unwrap_or(0),
            duration: timing[i].1,
            keyframe: stbl.stss.is_empty() || stbl.stss.binary_search(&(i as u32 + 1)).is_ok(),
        })
        .collect()
}

/// Track duration in media time. Falls back to the track header, which is
/// in movie time, when the media header carries none.
fn track_duration(media: u64, header: u64, movie_timescale: u32, timescale: u32) -> Option<i64> {
    if media == 0 && header > 0 && movie_timescale > 0 {
        return i64::try_from(header as u128 * timescale as u128 / movie_timescale as u128).ok();
    }
    i64::try_from(media).ok()
}

/// Shift applied to media timestamps by an edit list.
///
/// Leading empty edits delay the media; the first media edit skips its
/// `media_time`.
fn edit_list_shift(edits: &[EditEntry], movie_timescale: u32, media_timescale: u32) -> i64 {
    let movie = Rational::new(1, movie_timescale.max(1) as i64);
    let media = Rational::new(1, media_timescale.max(1) as i64);

    let mut shift = 0i64;
    for edit in edits {
        if edit.media_time == -1 {
            let empty = i64::try_from(edit.segment_duration).unwrap_or(i64::MAX);
            shift = shift.saturating_add(movie.rescale(empty, media));
        } else {
            shift = shift.saturating_sub(edit.media_time);
            break;
        }
    }
    shift
}

fn media_type_for_handler(handler: &[u8; 4]) -> MediaType {
    match handler {
        b"vide" => MediaType::Video,
        b"soun" => MediaType::Audio,
        b"sbtl" | b"subt" | b"text" | b"subp" => MediaType::Subtitle,
        _ => MediaType::Data,
    }
}

/// MP4 demuxer.
pub struct Mp4Demuxer {
    /// Reader.
    reader: Option<Box<dyn ReadSeek>>,
    /// File type.
    ftyp: Option<FtypAtom>,
    /// Movie header.
    mvhd: Option<MvhdAtom>,
    /// Tracks.
    tracks: Vec<TrackInfo>,
}

trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

impl Mp4Demuxer {
    /// Create a new MP4 demuxer.
    pub fn new() -> Self {
        Self {
            reader: None,
            ftyp: None,
            mvhd: None,
            tracks: Vec::new(),
        }
    }

    /// Major brand from the `ftyp` box, if present.
    pub fn major_brand(&self) -> Option<[u8; 4]> {
        self.ftyp.as_ref().map(|f| f.major_brand)
    }

    /// Compatible brands from the `ftyp` box.
    pub fn compatible_brands(&self) -> &[[u8; 4]] {
        self.ftyp
            .as_ref()
            .map(|f| f.compatible_brands.as_slice())
            .unwrap_or(&[])
    }

    /// Parse the file structure.
    fn parse(&mut self) -> Result<()> {
        let mut reader = self
            .reader
            .take()
            .ok_or(Error::Container(ContainerError::InvalidState("no reader".into())))?;

        reader.seek(SeekFrom::Start(0))?;

        let mut moov_header = None;

        while let Some(header) = AtomHeader::read(reader.as_mut())? {
            match &header.atom_type {
                b"ftyp" => {
                    let content = read_content(reader.as_mut(), &header)?;
                    let ftyp = FtypAtom::parse(&content)?;
                    if !ftyp.is_iso_family() {
                        warn!(
                            brand = %String::from_utf8_lossy(&ftyp.major_brand),
                            "no ISO base media brand declared, reading anyway"
                        );
                    }
                    self.ftyp = Some(ftyp);
                }
                b"moov" => {
                    moov_header = Some(header.clone());
                    reader.seek(SeekFrom::Start(header.end()))?;
                }
                _ => {
                    reader.seek(SeekFrom::Start(header.end()))?;
                }
            }
        }

        let moov = moov_header.ok_or(Error::Container(ContainerError::MissingElement("moov".into())))?;
        self.parse_moov(&mut reader, &moov)?;

        self.reader = Some(reader);
        Ok(())
    }

    /// Parse moov atom.
    fn parse_moov(&mut self, reader: &mut Box<dyn ReadSeek>, moov_header: &AtomHeader) -> Result<()> {
        let end = moov_header.end();
        reader.seek(SeekFrom::Start(moov_header.offset + moov_header.header_size as u64))?;

        let mut trak_headers = Vec::new();

        while reader.stream_position()? < end {
            let Some(header) = AtomHeader::read(reader.as_mut())? else {
                break;
            };

            match &header.atom_type {
                b"mvhd" => {
                    let content = read_content(reader.as_mut(), &header)?;
                    self.mvhd = Some(MvhdAtom::parse(&content)?);
                }
                b"trak" => {
                    trak_headers.push(header.clone());
                    reader.seek(SeekFrom::Start(header.end()))?;
                }
                _ => {
                    reader.seek(SeekFrom::Start(header.end()))?;
                }
            }
        }

        // Edit lists are in movie time, so traks wait for mvhd.
        for trak_header in trak_headers {
            self.parse_trak(reader, &trak_header)?;
        }

        Ok(())
    }

    /// Parse trak atom.
    fn parse_trak(&mut self, reader: &mut Box<dyn ReadSeek>, trak_header: &AtomHeader) -> Result<()> {
        let end = trak_header.end();
        reader.seek(SeekFrom::Start(trak_header.offset + trak_header.header_size as u64))?;

        let mut tkhd: Option<TkhdAtom> = None;
        let mut mdhd: Option<MdhdAtom> = None;
        let mut hdlr: Option<HdlrAtom> = None;
        let mut stbl: Option<StblInfo> = None;
        let mut edits: Vec<EditEntry> = Vec::new();

        while reader.stream_position()? < end {
            let Some(header) = AtomHeader::read(reader.as_mut())? else {
                break;
            };

            match &header.atom_type {
                b"tkhd" => {
                    let content = read_content(reader.as_mut(), &header)?;
                    tkhd = Some(TkhdAtom::parse(&content)?);
                }
                // Containers whose children we need: descend in place.
                b"edts" | b"mdia" | b"minf" => {}
                b"elst" => {
                    let content = read_content(reader.as_mut(), &header)?;
                    edits = parse_elst(&content)?;
                }
                b"mdhd" => {
                    let content = read_content(reader.as_mut(), &header)?;
                    mdhd = Some(MdhdAtom::parse(&content)?);
                }
                b"hdlr" => {
                    let content = read_content(reader.as_mut(), &header)?;
                    hdlr = Some(HdlrAtom::parse(&content)?);
                }
                b"stbl" => {
                    stbl = Some(StblInfo::parse(reader.as_mut(), header.content_size())?);
                    reader.seek(SeekFrom::Start(header.end()))?;
                }
                _ => {
                    reader.seek(SeekFrom::Start(header.end()))?;
                }
            }
        }

        let (Some(tkhd), Some(mdhd), Some(hdlr), Some(stbl)) = (tkhd, mdhd, hdlr, stbl) else {
            debug!(offset = trak_header.offset, "skipping incomplete trak");
            return Ok(());
        };

        let media_type = media_type_for_handler(&hdlr.handler_type);
        let index = self.tracks.len();
        let timescale = mdhd.timescale.max(1);
        let mut stream = StreamInfo::new(index, CodecId::Unknown, Rational::new(1, timescale as i64));
        stream.media_type = media_type;
        let movie_timescale = self.mvhd.as_ref().map_or(timescale, |m| m.timescale);
        stream.duration = track_duration(mdhd.duration, tkhd.duration, movie_timescale, timescale);

        if let Some(entry) = stbl.sample_entries.first() {
            stream.codec_tag = Some(entry.entry_type.to_bytes());
            stream.codec_id = match (entry.entry_type.codec_id(), &entry.esds) {
                (Some(codec), _) => codec,
                (None, Some(esds)) => codec_from_object_type(esds.object_type, entry.config.as_deref()),
                (None, None) => CodecId::Unknown,
            };
            stream.extra_data = entry.config.clone();

            match media_type {
                MediaType::Video => {
                    let (width, height) = if entry.width > 0 {
                        (entry.width as u32, entry.height as u32)
                    } else {
                        (tkhd.width_pixels(), tkhd.height_pixels())
                    };
                    stream.video = Some(VideoStreamInfo { width, height });
                }
                MediaType::Audio => {
                    stream.audio = Some(AudioStreamInfo {
                        sample_rate: entry.sample_rate,
                        channels: entry.channel_count as u8,
                        bits_per_sample: entry.sample_size as u8,
                    });
                }
                MediaType::Subtitle | MediaType::Data => {}
            }
        }

        let rotation = tkhd.rotation();
        if rotation != 0 {
            stream.metadata.insert(ROTATE_KEY.to_string(), rotation.to_string());
        }

        let dts_shift = edit_list_shift(&edits, movie_timescale, timescale);
        let samples = resolve_samples(&stbl);

        debug!(
            track_id = tkhd.track_id,
            index,
            codec = %stream.codec_id,
            samples = samples.len(),
            dts_shift,
            "parsed mp4 track"
        );

        self.tracks.push(TrackInfo {
            stream,
            samples,
            current_sample: 0,
            timescale,
            dts_shift,
        });

        Ok(())
    }

    /// Find track with next sample to read, by earliest decode time.
    fn find_next_track(&self) -> Option<usize> {
        let mut best: Option<(usize, i64, u32)> = None;

        for (i, track) in self.tracks.iter().enumerate() {
            let Some(dts) = track.next_dts() else {
                continue;
            };
            let earlier = match best {
                None => true,
                Some((_, best_dts, best_ts)) => {
                    let lhs = dts as i128 * best_ts as i128;
                    let rhs = best_dts as i128 * track.timescale as i128;
                    lhs.cmp(&rhs) == Ordering::Less
                }
            };
            if earlier {
                best = Some((i, dts, track.timescale));
            }
        }

        best.map(|(i, _, _)| i)
    }
}

impl Default for Mp4Demuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer for Mp4Demuxer {
    fn open<R: Read + Seek + Send + 'static>(&mut self, reader: R) -> Result<()> {
        self.reader = Some(Box::new(reader));
        self.parse()
    }

    fn format_name(&self) -> &str {
        "mp4"
    }

    fn duration(&self) -> Option<i64> {
        self.mvhd.as_ref().and_then(MvhdAtom::duration_us)
    }

    fn num_streams(&self) -> usize {
        self.tracks.len()
    }

    fn stream_info(&self, index: usize) -> Option<&StreamInfo> {
        self.tracks.get(index).map(|t| &t.stream)
    }

    fn read_packet(&mut self) -> Result<Option<Packet<'static>>> {
        let Some(track_idx) = self.find_next_track() else {
            return Ok(None);
        };

        let track = &mut self.tracks[track_idx];
        let sample = track.samples[track.current_sample];

        if sample.size > MAX_SAMPLE_SIZE {
            return Err(Error::Container(ContainerError::InvalidSize {
                offset: sample.offset,
                message: format!(
                    "sample size {} exceeds maximum allowed size {}",
                    sample.size, MAX_SAMPLE_SIZE
                ),
            }));
        }

        let reader = self
            .reader
            .as_mut()
            .ok_or(Error::Container(ContainerError::InvalidState("no reader".into())))?;
        reader.seek(SeekFrom::Start(sample.offset))?;

        let mut data = vec![0u8; sample.size as usize];
        reader.read_exact(&mut data)?;

        let dts = sample.dts + track.dts_shift;
        let mut packet = Packet::new(data)
            .with_stream_index(track_idx)
            .with_timestamps(dts + sample.cts_offset as i64, dts)
            .with_duration(sample.duration as i64);
        packet.pos = Some(sample.offset);
        packet.set_keyframe(sample.keyframe);

        track.current_sample += 1;

        Ok(Some(packet))
    }

    fn close(&mut self) {
        self.reader = None;
        self.tracks.clear();
    }
}

/// Duration of an MP4 file in milliseconds, or `None` if it cannot be read.
pub fn probe_duration(path: impl AsRef<Path>) -> Option<u64> {
    let file = File::open(path.as_ref()).ok()?;
    let mut demuxer = Mp4Demuxer::new();
    if let Err(e) = demuxer.open(BufReader::new(file)) {
        debug!(path = %path.as_ref().display(), error = %e, "duration probe failed");
        return None;
    }
    demuxer.duration().and_then(|us| u64::try_from(us / 1000).ok())
}
