//! Encoded media packets.
//!
//! Timestamps are raw `i64` ticks in whatever time base the packet's owner
//! is using; the packet itself does not carry one.

use crate::timestamp::NOPTS;
use bitflags::bitflags;
use std::borrow::Cow;
use std::fmt;

bitflags! {
    /// Flags for packet properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// This packet contains a keyframe.
        const KEYFRAME = 0x0001;
        /// Packet data is corrupted.
        const CORRUPT = 0x0002;
        /// Packet should be discarded.
        const DISCARD = 0x0004;
    }
}

/// An encoded media packet.
///
/// Packets can own their data or reference external data (zero-copy).
#[derive(Clone)]
pub struct Packet<'a> {
    data: Cow<'a, [u8]>,
    /// Presentation timestamp, or [`NOPTS`].
    pub pts: i64,
    /// Decode timestamp, or [`NOPTS`].
    pub dts: i64,
    /// Duration in time base ticks (0 when unknown).
    pub duration: i64,
    /// Stream index this packet belongs to.
    pub stream_index: usize,
    /// Packet flags.
    pub flags: PacketFlags,
    /// Position in the input stream (bytes).
    pub pos: Option<u64>,
    side_data: Vec<SideData>,
}

impl<'a> Packet<'a> {
    /// Create a new packet with owned data.
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_data(Cow::Owned(data))
    }

    /// Create a new packet referencing external data.
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self::with_data(Cow::Borrowed(data))
    }

    fn with_data(data: Cow<'a, [u8]>) -> Self {
        Self {
            data,
            pts: NOPTS,
            dts: NOPTS,
            duration: 0,
            stream_index: 0,
            flags: PacketFlags::empty(),
            pos: None,
            side_data: Vec::new(),
        }
    }

    /// Create an empty packet.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Get the packet data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the payload.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = Cow::Owned(data);
    }

    /// Get the size of the packet data.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if this packet is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if this is a keyframe packet.
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }

    /// Set the keyframe flag.
    pub fn set_keyframe(&mut self, keyframe: bool) {
        self.flags.set(PacketFlags::KEYFRAME, keyframe);
    }

    /// Make the packet own its data.
    pub fn into_owned(self) -> Packet<'static> {
        Packet {
            data: Cow::Owned(self.data.into_owned()),
            pts: self.pts,
            dts: self.dts,
            duration: self.duration,
            stream_index: self.stream_index,
            flags: self.flags,
            pos: self.pos,
            side_data: self.side_data,
        }
    }

    /// Copy the packet, borrowing its payload.
    pub fn borrowed(&self) -> Packet<'_> {
        Packet {
            data: Cow::Borrowed(&self.data),
            pts: self.pts,
            dts: self.dts,
            duration: self.duration,
            stream_index: self.stream_index,
            flags: self.flags,
            pos: self.pos,
            side_data: self.side_data.clone(),
        }
    }

    /// Add side data to the packet.
    pub fn add_side_data(&mut self, data: SideData) {
        self.side_data.push(data);
    }

    /// Get side data of a specific type.
    pub fn get_side_data(&self, data_type: SideDataType) -> Option<&SideData> {
        self.side_data.iter().find(|sd| sd.data_type == data_type)
    }

    /// Set presentation and decode timestamps.
    pub fn with_timestamps(mut self, pts: i64, dts: i64) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    /// Set the stream index.
    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = index;
        self
    }

    /// Set the flags.
    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl<'a> fmt::Debug for Packet<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("size", &self.size())
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("duration", &self.duration)
            .field("stream_index", &self.stream_index)
            .field("flags", &self.flags)
            .finish()
    }
}

impl<'a> Default for Packet<'a> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Types of side data that can be attached to packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SideDataType {
    /// Replacement codec configuration (e.g. SPS/PPS found in-band).
    NewExtradata,
    /// Display matrix (rotation/flip).
    DisplayMatrix,
}

/// Side data attached to a packet.
#[derive(Debug, Clone)]
pub struct SideData {
    /// Type of side data.
    pub data_type: SideDataType,
    /// The side data payload.
    pub data: Vec<u8>,
}

impl SideData {
    /// Create new side data.
    pub fn new(data_type: SideDataType, data: Vec<u8>) -> Self {
        Self { data_type, data }
    }
}
