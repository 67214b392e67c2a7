//! Packet ingestion: the key frame gate and timestamp normalization.

use recmux_core::format::MediaType;
use recmux_core::packet::Packet;
use recmux_core::rational::{Rational, RoundingMode};
use recmux_core::timestamp::{self, NOPTS};

/// Start alignment state of a recording.
///
/// Each start is set once, from the first valid timestamp observed for
/// its media type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    /// First video pts, in the video input time base.
    pub video_start: Option<i64>,
    /// First audio pts, in the audio input time base.
    pub audio_start: Option<i64>,
    /// Whether the first video key frame went through.
    pub first_keyframe_seen: bool,
}

impl SyncState {
    /// Create the state. Without key frame checking the gate starts open.
    pub fn new(check_first_keyframe: bool) -> Self {
        Self {
            first_keyframe_seen: !check_first_keyframe,
            ..Self::default()
        }
    }

    /// Apply the gate to a packet.
    ///
    /// Returns the start offset to subtract from its timestamps, or `None`
    /// if the packet is dropped. While a session carrying video waits for
    /// its first key frame, every packet is dropped.
    pub fn admit(&mut self, media_type: MediaType, pts: i64, keyframe: bool, has_video: bool) -> Option<i64> {
        match media_type {
            MediaType::Video => {
                if !self.first_keyframe_seen {
                    if self.video_start.is_none() && timestamp::is_valid(pts) {
                        self.video_start = Some(pts);
                    }
                    if !keyframe {
                        return None;
                    }
                    self.first_keyframe_seen = true;
                }
                Some(self.video_start.unwrap_or(0))
            }
            MediaType::Audio => {
                if self.audio_start.is_none() && timestamp::is_valid(pts) {
                    self.audio_start = Some(pts);
                }
                self.gate_open(has_video)
                    .then(|| self.audio_start.unwrap_or(0))
            }
            MediaType::Subtitle | MediaType::Data => self.gate_open(has_video).then_some(0),
        }
    }

    fn gate_open(&self, has_video: bool) -> bool {
        self.first_keyframe_seen || !has_video
    }
}

/// Live input accepted by a recording session.
#[derive(Debug)]
pub enum MediaInput<'a> {
    /// An encoded packet, with an optional time base overriding the one
    /// registered for its stream.
    Packet {
        /// The packet.
        packet: &'a Packet<'a>,
        /// Time base of the packet's timestamps.
        time_base: Option<Rational>,
    },
    /// An encoded video frame from the live path.
    VideoFrame(VideoFrame<'a>),
}

/// An encoded video frame with a millisecond timestamp.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    /// Encoded frame.
    pub data: &'a [u8],
    /// Presentation and decode time.
    pub timestamp: i64,
    /// Display rotation in degrees, applied when the file is remuxed.
    pub rotation: i32,
    /// Input stream index.
    pub stream_index: usize,
    /// Key frame flag.
    pub keyframe: bool,
}

impl<'a> VideoFrame<'a> {
    /// Packet view of the frame, with `pts = dts = timestamp`.
    pub fn to_packet(&self) -> Packet<'a> {
        let mut packet = Packet::from_slice(self.data)
            .with_timestamps(self.timestamp, self.timestamp)
            .with_stream_index(self.stream_index);
        packet.set_keyframe(self.keyframe);
        packet
    }
}

/// Rescale a packet into the writer's time base.
///
/// Timestamps are moved by `start` and rounded to nearest; the duration is
/// truncated. The payload is borrowed, and the input is left untouched.
pub fn rescale_packet<'p>(
    packet: &'p Packet<'_>,
    start: i64,
    from: Rational,
    to: Rational,
    output_index: usize,
) -> Packet<'p> {
    let shift = |ts: i64| {
        if ts == NOPTS {
            NOPTS
        } else {
            from.rescale_rnd(ts.saturating_sub(start), to, RoundingMode::NEAR_INF_PASS_MINMAX)
        }
    };

    let mut out = packet.borrowed();
    out.pts = shift(packet.pts);
    out.dts = shift(packet.dts);
    out.duration = from.rescale(packet.duration, to);
    out.pos = None;
    out.stream_index = output_index;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_video_waits_for_keyframe() {
        let mut sync = SyncState::new(true);
        assert_eq!(sync.admit(MediaType::Video, 100, false, true), None);
        assert_eq!(sync.video_start, Some(100));
        assert_eq!(sync.admit(MediaType::Video, 140, false, true), None);
        assert_eq!(sync.admit(MediaType::Video, 180, true, true), Some(100));
        assert!(sync.first_keyframe_seen);
        assert_eq!(sync.admit(MediaType::Video, 220, false, true), Some(100));
        assert_eq!(sync.video_start, Some(100));
    }

    #[test]
    fn test_audio_anchors_while_gated() {
        let mut sync = SyncState::new(true);
        assert_eq!(sync.admit(MediaType::Audio, 4800, true, true), None);
        assert_eq!(sync.audio_start, Some(4800));
        sync.admit(MediaType::Video, 0, true, true);
        assert_eq!(sync.admit(MediaType::Audio, 5760, true, true), Some(4800));
    }

    #[test]
    fn test_audio_only_session_is_not_gated() {
        let mut sync = SyncState::new(true);
        assert_eq!(sync.admit(MediaType::Audio, 1024, true, false), Some(1024));
        assert_eq!(sync.admit(MediaType::Subtitle, 5, true, false), Some(0));
    }

    #[test]
    fn test_disabled_gate() {
        let mut sync = SyncState::new(false);
        assert_eq!(sync.admit(MediaType::Video, 500, false, true), Some(0));
        assert_eq!(sync.video_start, None);
        assert_eq!(sync.admit(MediaType::Audio, 300, false, true), Some(300));
    }

    #[test]
    fn test_invalid_pts_does_not_anchor() {
        let mut sync = SyncState::new(true);
        assert_eq!(sync.admit(MediaType::Video, NOPTS, false, true), None);
        assert_eq!(sync.video_start, None);
        sync.admit(MediaType::Video, 40, false, true);
        assert_eq!(sync.video_start, Some(40));
    }

    #[test]
    fn test_rescale_packet() {
        let mut packet = Packet::new(vec![1, 2, 3])
            .with_timestamps(1040, 1000)
            .with_duration(40)
            .with_stream_index(5);
        packet.pos = Some(77);

        let out = rescale_packet(&packet, 1000, Rational::new(1, 1000), Rational::new(1, 90000), 1);
        assert_eq!(out.pts, 3600);
        assert_eq!(out.dts, 0);
        assert_eq!(out.duration, 3600);
        assert_eq!(out.pos, None);
        assert_eq!(out.stream_index, 1);
        assert_eq!(out.data(), &[1, 2, 3]);

        // the input is untouched
        assert_eq!((packet.pts, packet.dts, packet.pos), (1040, 1000, Some(77)));
    }

    #[test]
    fn test_rescale_keeps_nopts() {
        let packet = Packet::new(vec![0]).with_timestamps(NOPTS, 90);
        let out = rescale_packet(&packet, 0, Rational::new(1, 90000), Rational::new(1, 1000), 0);
        assert_eq!(out.pts, NOPTS);
        assert_eq!(out.dts, 1);
    }

    #[test]
    fn test_video_frame_packet() {
        let data = [0u8, 0, 0, 1, 0x65];
        let frame = VideoFrame {
            data: &data,
            timestamp: 120,
            rotation: 90,
            stream_index: 2,
            keyframe: true,
        };
        let packet = frame.to_packet();
        assert_eq!((packet.pts, packet.dts), (120, 120));
        assert_eq!(packet.stream_index, 2);
        assert!(packet.is_keyframe());
    }

    #[derive(Debug, Clone)]
    struct Input {
        video: bool,
        pts: i64,
        keyframe: bool,
    }

    fn input() -> impl Strategy<Value = Input> {
        (any::<bool>(), 0i64..1_000_000, prop::bool::weighted(0.2)).prop_map(|(video, pts, keyframe)| Input {
            video,
            pts,
            keyframe,
        })
    }

    proptest! {
        #[test]
        fn gate_drops_everything_before_first_keyframe(inputs in prop::collection::vec(input(), 1..64)) {
            let mut sync = SyncState::new(true);
            let first_key = inputs.iter().position(|i| i.video && i.keyframe);

            for (n, i) in inputs.iter().enumerate() {
                let media_type = if i.video { MediaType::Video } else { MediaType::Audio };
                let admitted = sync.admit(media_type, i.pts, i.keyframe, true).is_some();
                match first_key {
                    Some(k) if n >= k => prop_assert!(admitted),
                    _ => prop_assert!(!admitted),
                }
            }
        }

        #[test]
        fn starts_are_first_observed_pts(inputs in prop::collection::vec(input(), 1..64)) {
            let mut sync = SyncState::new(true);
            for i in &inputs {
                let media_type = if i.video { MediaType::Video } else { MediaType::Audio };
                sync.admit(media_type, i.pts, i.keyframe, true);
            }

            let first_audio = inputs.iter().find(|i| !i.video).map(|i| i.pts);
            prop_assert_eq!(sync.audio_start, first_audio);

            let first_video = inputs.iter().find(|i| i.video).map(|i| i.pts);
            prop_assert_eq!(sync.video_start, first_video);
        }

        #[test]
        fn admitted_offsets_are_stable(inputs in prop::collection::vec(input(), 1..64)) {
            let mut sync = SyncState::new(true);
            let mut offsets = (None, None);
            for i in &inputs {
                let media_type = if i.video { MediaType::Video } else { MediaType::Audio };
                if let Some(offset) = sync.admit(media_type, i.pts, i.keyframe, true) {
                    let slot = if i.video { &mut offsets.0 } else { &mut offsets.1 };
                    prop_assert_eq!(*slot.get_or_insert(offset), offset);
                }
            }
        }
    }
}
