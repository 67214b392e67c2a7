//! MP4 atom (box) parsing.

use super::codec_config::{parse_esds, EsdsInfo};
use super::{read_u32_be, read_u64_be, Mp4Brand, SampleEntryType};
use recmux_core::error::{ContainerError, Error, Result};
use std::io::{Read, Seek, SeekFrom};

/// Maximum size for atom content allocation (100 MB).
/// Prevents denial of service from malformed files with huge atom sizes.
pub(super) const MAX_ATOM_CONTENT_SIZE: u64 = 100 * 1024 * 1024;

/// Validate that an allocation size is within acceptable limits.
pub(super) fn validate_allocation_size(size: u64) -> Result<usize> {
    if size > MAX_ATOM_CONTENT_SIZE {
        return Err(Error::Container(ContainerError::InvalidSize {
            offset: 0,
            message: format!(
                "atom content size {} exceeds maximum allowed size {}",
                size, MAX_ATOM_CONTENT_SIZE
            ),
        }));
    }
    Ok(size as usize)
}

/// Read the content of an atom whose header was just consumed.
pub(super) fn read_content<R: Read + ?Sized>(reader: &mut R, header: &AtomHeader) -> Result<Vec<u8>> {
    let size = validate_allocation_size(header.content_size())?;
    let mut content = vec![0u8; size];
    reader.read_exact(&mut content)?;
    Ok(content)
}

/// Atom header.
#[derive(Debug, Clone)]
pub struct AtomHeader {
    /// Atom type (4 bytes).
    pub atom_type: [u8; 4],
    /// Atom size (including header).
    pub size: u64,
    /// Header size (8 or 16 bytes).
    pub header_size: u8,
    /// Offset in file.
    pub offset: u64,
}

impl AtomHeader {
    /// Read atom header from reader.
    pub fn read<R: Read + Seek + ?Sized>(reader: &mut R) -> Result<Option<Self>> {
        let offset = reader.stream_position()?;

        let mut header = [0u8; 8];
        match reader.read_exact(&mut header) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let atom_type = [header[4], header[5], header[6], header[7]];

        let (size, header_size) = if size == 1 {
            let mut ext_size = [0u8; 8];
            reader.read_exact(&mut ext_size)?;
            (u64::from_be_bytes(ext_size), 16)
        } else if size == 0 {
            // Size extends to end of file
            let current = reader.stream_position()?;
            let end = reader.seek(SeekFrom::End(0))?;
            reader.seek(SeekFrom::Start(current))?;
            (end - offset, 8)
        } else {
            (size as u64, 8)
        };

        if size < header_size as u64 {
            return Err(Error::Container(ContainerError::InvalidSize {
                offset,
                message: format!("atom size {} smaller than its header", size),
            }));
        }

        Ok(Some(Self {
            atom_type,
            size,
            header_size,
            offset,
        }))
    }

    /// Get content size (size - header).
    pub fn content_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size as u64)
    }

    /// Offset just past this atom.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

/// Iterate the child boxes of an in-memory payload as `(type, body)`.
pub(super) fn child_boxes(mut data: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> {
    std::iter::from_fn(move || {
        if data.len() < 8 {
            return None;
        }
        let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let box_type = [data[4], data[5], data[6], data[7]];
        if size < 8 || size > data.len() {
            return None;
        }
        let body = &data[8..size];
        data = &data[size..];
        Some((box_type, body))
    })
}

/// File type atom (ftyp).
#[derive(Debug, Clone)]
pub struct FtypAtom {
    /// Major brand.
    pub major_brand: [u8; 4],
    /// Compatible brands.
    pub compatible_brands: Vec<[u8; 4]>,
}

impl FtypAtom {
    /// Parse ftyp atom.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::Container("ftyp atom too short".into()));
        }

        let major_brand = [data[0], data[1], data[2], data[3]];
        let compatible_brands = data[8..]
            .chunks_exact(4)
            .map(|b| [b[0], b[1], b[2], b[3]])
            .collect();

        Ok(Self {
            major_brand,
            compatible_brands,
        })
    }

    /// Whether the major or any compatible brand is an ISO base media brand.
    pub fn is_iso_family(&self) -> bool {
        std::iter::once(&self.major_brand)
            .chain(&self.compatible_brands)
            .any(|b| !matches!(Mp4Brand::from_bytes(b), Mp4Brand::Unknown(_)))
    }
}

/// Movie header atom (mvhd).
#[derive(Debug, Clone)]
pub struct MvhdAtom {
    /// Timescale (units per second).
    pub timescale: u32,
    /// Duration.
    pub duration: u64,
}

impl MvhdAtom {
    /// Parse mvhd atom.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(&version) = data.first() else {
            return Err(Error::Container("mvhd atom empty".into()));
        };

        let (timescale, duration) = if version == 1 {
            if data.len() < 32 {
                return Err(Error::Container("mvhd v1 atom too short".into()));
            }
            (read_u32_be(&data[20..24])?, read_u64_be(&data[24..32])?)
        } else {
            if data.len() < 20 {
                return Err(Error::Container("mvhd v0 atom too short".into()));
            }
            (read_u32_be(&data[12..16])?, read_u32_be(&data[16..20])? as u64)
        };

        Ok(Self { timescale, duration })
    }

    /// Duration in microseconds.
    pub fn duration_us(&self) -> Option<i64> {
        if self.timescale == 0 {
            return None;
        }
        i64::try_from(self.duration as u128 * 1_000_000 / self.timescale as u128).ok()
    }
}

/// Track header atom (tkhd).
#[derive(Debug, Clone)]
pub struct TkhdAtom {
    /// Track ID.
    pub track_id: u32,
    /// Duration in movie timescale.
    pub duration: u64,
    /// Display matrix entries a, b, c, d (16.16 fixed point).
    pub matrix: [i32; 4],
    /// Width (fixed-point 16.16).
    pub width: u32,
    /// Height (fixed-point 16.16).
    pub height: u32,
}

impl TkhdAtom {
    /// Parse tkhd atom.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(&version) = data.first() else {
            return Err(Error::Container("tkhd atom empty".into()));
        };

        let (track_id, duration, offset) = if version == 1 {
            if data.len() < 36 {
                return Err(Error::Container("tkhd v1 atom too short".into()));
            }
            (read_u32_be(&data[20..24])?, read_u64_be(&data[28..36])?, 36)
        } else {
            if data.len() < 24 {
                return Err(Error::Container("tkhd v0 atom too short".into()));
            }
            (read_u32_be(&data[12..16])?, read_u32_be(&data[20..24])? as u64, 24)
        };

        // reserved(8) layer(2) alternate_group(2) volume(2) reserved(2)
        let matrix_offset = offset + 16;
        let dim_offset = matrix_offset + 36;
        let (matrix, width, height) = if data.len() >= dim_offset + 8 {
            let m = |i: usize| read_u32_be(&data[matrix_offset + i * 4..]).map(|v| v as i32);
            (
                [m(0)?, m(1)?, m(3)?, m(4)?],
                read_u32_be(&data[dim_offset..])?,
                read_u32_be(&data[dim_offset + 4..])?,
            )
        } else {
            ([0x10000, 0, 0, 0x10000], 0, 0)
        };

        Ok(Self {
            track_id,
            duration,
            matrix,
            width,
            height,
        })
    }

    /// Clockwise display rotation encoded by the matrix, in degrees.
    pub fn rotation(&self) -> i32 {
        let sign = |v: i32| v.signum();
        match self.matrix.map(sign) {
            [0, 1, -1, 0] => 90,
            [-1, 0, 0, -1] => 180,
            [0, -1, 1, 0] => 270,
            _ => 0,
        }
    }

    /// Get width in pixels.
    pub fn width_pixels(&self) -> u32 {
        self.width >> 16
    }

    /// Get height in pixels.
    pub fn height_pixels(&self) -> u32 {
        self.height >> 16
    }
}

/// Media header atom (mdhd).
#[derive(Debug, Clone)]
pub struct MdhdAtom {
    /// Timescale.
    pub timescale: u32,
    /// Duration.
    pub duration: u64,
}

impl MdhdAtom {
    /// Parse mdhd atom.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(&version) = data.first() else {
            return Err(Error::Container("mdhd atom empty".into()));
        };

        let (timescale, duration) = if version == 1 {
            if data.len() < 32 {
                return Err(Error::Container("mdhd v1 atom too short".into()));
            }
            (read_u32_be(&data[20..24])?, read_u64_be(&data[24..32])?)
        } else {
            if data.len() < 20 {
                return Err(Error::Container("mdhd v0 atom too short".into()));
            }
            (read_u32_be(&data[12..16])?, read_u32_be(&data[16..20])? as u64)
        };

        Ok(Self { timescale, duration })
    }
}

/// Handler reference atom (hdlr).
#[derive(Debug, Clone)]
pub struct HdlrAtom {
    /// Handler type.
    pub handler_type: [u8; 4],
}

impl HdlrAtom {
    /// Parse hdlr atom.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(Error::Container("hdlr atom too short".into()));
        }
        Ok(Self {
            handler_type: [data[8], data[9], data[10], data[11]],
        })
    }
}

/// Edit list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditEntry {
    /// Segment duration in movie timescale.
    pub segment_duration: u64,
    /// Start of the segment in media time, `-1` for an empty edit.
    pub media_time: i64,
}

/// Parse an elst atom.
pub fn parse_elst(data: &[u8]) -> Result<Vec<EditEntry>> {
    if data.len() < 8 {
        return Err(Error::Container("elst too short".into()));
    }
    let version = data[0];
    let entry_count = read_u32_be(&data[4..8])? as usize;
    let entry_size = if version == 1 { 20 } else { 12 };

    let entries = data[8..]
        .chunks_exact(entry_size)
        .take(entry_count)
        .map(|e| {
            if version == 1 {
                Ok(EditEntry {
                    segment_duration: read_u64_be(&e[0..8])?,
                    media_time: read_u64_be(&e[8..16])? as i64,
                })
            } else {
                Ok(EditEntry {
                    segment_duration: read_u32_be(&e[0..4])? as u64,
                    media_time: read_u32_be(&e[4..8])? as i32 as i64,
                })
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(entries)
}

/// Sample table box (stbl) contents.
#[derive(Debug, Clone, Default)]
pub struct StblInfo {
    /// Sample descriptions.
    pub sample_entries: Vec<SampleEntry>,
    /// Sample sizes.
    pub sample_sizes: Vec<u32>,
    /// Sample to chunk mapping.
    pub stsc: Vec<(u32, u32, u32)>, // (first_chunk, samples_per_chunk, description_index)
    /// Chunk offsets.
    pub chunk_offsets: Vec<u64>,
    /// Time to sample mapping.
    pub stts: Vec<(u32, u32)>, // (sample_count, sample_delta)
    /// Composition time offsets.
    pub ctts: Vec<(u32, i32)>, // (sample_count, offset)
    /// Sync samples (keyframes).
    pub stss: Vec<u32>,
}

/// Sample entry description.
#[derive(Debug, Clone)]
pub struct SampleEntry {
    /// Entry type.
    pub entry_type: SampleEntryType,
    /// Video width.
    pub width: u16,
    /// Video height.
    pub height: u16,
    /// Audio sample rate in Hz.
    pub sample_rate: u32,
    /// Audio channel count.
    pub channel_count: u16,
    /// Audio sample size.
    pub sample_size: u16,
    /// Codec configuration record (avcC, hvcC, dac3, ... payload).
    pub config: Option<Vec<u8>>,
    /// Elementary stream descriptor for the MPEG-4 family entries.
    pub esds: Option<EsdsInfo>,
}

/// Size of the fixed part of a visual sample entry, box header included.
const VISUAL_ENTRY_SIZE: usize = 86;
/// Size of the fixed part of an audio sample entry, box header included.
const AUDIO_ENTRY_SIZE: usize = 36;
/// Size of a generic sample entry prefix, box header included.
const GENERIC_ENTRY_SIZE: usize = 16;

impl SampleEntry {
    fn empty(entry_type: SampleEntryType) -> Self {
        Self {
            entry_type,
            width: 0,
            height: 0,
            sample_rate: 0,
            channel_count: 0,
            sample_size: 0,
            config: None,
            esds: None,
        }
    }

    /// Parse one entry, `data` including its box header.
    fn parse(data: &[u8]) -> Result<Self> {
        let entry_type = SampleEntryType::from_bytes(&[data[4], data[5], data[6], data[7]]);
        let mut entry = Self::empty(entry_type);

        let children = if entry_type.is_video() {
            if data.len() < VISUAL_ENTRY_SIZE {
                return Err(Error::Container("Video sample entry too short".into()));
            }
            entry.width = u16::from_be_bytes([data[32], data[33]]);
            entry.height = u16::from_be_bytes([data[34], data[35]]);
            &data[VISUAL_ENTRY_SIZE..]
        } else if entry_type.is_audio() {
            if data.len() < AUDIO_ENTRY_SIZE {
                return Err(Error::Container("Audio sample entry too short".into()));
            }
            entry.channel_count = u16::from_be_bytes([data[24], data[25]]);
            entry.sample_size = u16::from_be_bytes([data[26], data[27]]);
            entry.sample_rate = read_u32_be(&data[32..36])? >> 16;
            &data[AUDIO_ENTRY_SIZE..]
        } else if entry_type == SampleEntryType::Tx3g {
            if data.len() > GENERIC_ENTRY_SIZE {
                entry.config = Some(data[GENERIC_ENTRY_SIZE..].to_vec());
            }
            return Ok(entry);
        } else {
            data.get(GENERIC_ENTRY_SIZE..).unwrap_or_default()
        };

        for (box_type, body) in child_boxes(children) {
            match &box_type {
                b"avcC" | b"hvcC" | b"vpcC" | b"dac3" | b"dec3" | b"dvc1" | b"glbl" => {
                    entry.config = Some(body.to_vec());
                }
                b"esds" if body.len() > 4 => {
                    entry.esds = parse_esds(&body[4..]);
                    if let Some(dsi) = entry.esds.as_ref().and_then(|e| e.decoder_specific_info.clone()) {
                        entry.config = Some(dsi);
                    }
                }
                _ => {}
            }
        }

        Ok(entry)
    }
}

impl StblInfo {
    /// Parse stbl contents.
    pub fn parse<R: Read + Seek + ?Sized>(reader: &mut R, stbl_size: u64) -> Result<Self> {
        let start = reader.stream_position()?;
        let end = start + stbl_size;
        let mut info = StblInfo::default();

        while reader.stream_position()? < end {
            let Some(header) = AtomHeader::read(reader)? else {
                break;
            };

            let content = read_content(reader, &header)?;

            match &header.atom_type {
                b"stsd" => info.sample_entries = Self::parse_stsd(&content)?,
                b"stsz" => info.sample_sizes = Self::parse_stsz(&content)?,
                b"stsc" => info.stsc = Self::parse_stsc(&content)?,
                b"stco" => info.chunk_offsets = Self::parse_stco(&content)?,
                b"co64" => info.chunk_offsets = Self::parse_co64(&content)?,
                b"stts" => info.stts = Self::parse_stts(&content)?,
                b"ctts" => info.ctts = Self::parse_ctts(&content)?,
                b"stss" => info.stss = Self::parse_stss(&content)?,
                _ => {}
            }
        }

        Ok(info)
    }

    fn parse_stsd(data: &[u8]) -> Result<Vec<SampleEntry>> {
        if data.len() < 8 {
            return Err(Error::Container("stsd too short".into()));
        }

        let entry_count = read_u32_be(&data[4..8])? as usize;
        let mut entries = Vec::with_capacity(entry_count.min(16));
        let mut offset = 8;

        for _ in 0..entry_count {
            if offset + 8 > data.len() {
                break;
            }

            let entry_size = read_u32_be(&data[offset..offset + 4])? as usize;
            if entry_size < 8 || offset + entry_size > data.len() {
                break;
            }

            entries.push(SampleEntry::parse(&data[offset..offset + entry_size])?);
            offset += entry_size;
        }

        Ok(entries)
    }

    /// Read `count` fixed-size records following an 8-byte table header.
    fn records(data: &[u8], header_len: usize, record_len: usize) -> Result<impl Iterator<Item = &[u8]>> {
        if data.len() < header_len {
            return Err(Error::Container("sample table too short".into()));
        }
        let count = read_u32_be(&data[header_len - 4..header_len])? as usize;
        Ok(data[header_len..].chunks_exact(record_len).take(count))
    }

    fn parse_stsz(data: &[u8]) -> Result<Vec<u32>> {
        if data.len() < 12 {
            return Err(Error::Container("stsz too short".into()));
        }

        let sample_size = read_u32_be(&data[4..8])?;
        let sample_count = read_u32_be(&data[8..12])? as usize;

        if sample_size != 0 {
            let count = validate_allocation_size(sample_count as u64 * 4)? / 4;
            Ok(vec![sample_size; count])
        } else {
            Self::records(data, 12, 4)?.map(read_u32_be).collect()
        }
    }

    fn parse_stsc(data: &[u8]) -> Result<Vec<(u32, u32, u32)>> {
        Self::records(data, 8, 12)?
            .map(|r| Ok((read_u32_be(&r[0..4])?, read_u32_be(&r[4..8])?, read_u32_be(&r[8..12])?)))
            .collect()
    }

    fn parse_stco(data: &[u8]) -> Result<Vec<u64>> {
        Self::records(data, 8, 4)?
            .map(|r| read_u32_be(r).map(u64::from))
            .collect()
    }

    fn parse_co64(data: &[u8]) -> Result<Vec<u64>> {
        Self::records(data, 8, 8)?.map(read_u64_be).collect()
    }

    fn parse_stts(data: &[u8]) -> Result<Vec<(u32, u32)>> {
        Self::records(data, 8, 8)?
            .map(|r| Ok((read_u32_be(&r[0..4])?, read_u32_be(&r[4..8])?)))
            .collect()
    }

    fn parse_ctts(data: &[u8]) -> Result<Vec<(u32, i32)>> {
        // Version 1 offsets are signed; version 0 writers never exceed i32::MAX.
        Self::records(data, 8, 8)?
            .map(|r| Ok((read_u32_be(&r[0..4])?, read_u32_be(&r[4..8])? as i32)))
            .collect()
    }

    fn parse_stss(data: &[u8]) -> Result<Vec<u32>> {
        Self::records(data, 8, 4)?.map(read_u32_be).collect()
    }
}
