//! Recording session tests.
//!
//! Sessions write into a temp directory and run their deferred jobs on a
//! [`QueueScheduler`].

use parking_lot::Mutex;
use recmux::media::{CodecId, MediaType, Packet, Rational};
use recmux::{
    resolve_unique_key, FileType, LocalStorage, MediaInput, Mp4Demuxer, MuxError, MuxerConfig, MuxingListener,
    QueueScheduler, RecordingSession, RemuxTrigger, SessionState, StorageClient, StreamAcceptFilter, StreamInfo,
};
use recmux_containers::{Demuxer, ROTATE_KEY};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const AVCC: [u8; 17] = [
    1, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0, 4, 0x67, 0x42, 0xC0, 0x1E, 1, 0, 2, 0x68, 0xCE,
];
const ASC: [u8; 2] = [0x11, 0x90];

#[derive(Default)]
struct RecordingListener {
    calls: Mutex<Vec<(String, PathBuf, Option<u64>, Option<u32>)>>,
}

impl MuxingListener for RecordingListener {
    fn on_muxing_finished(&self, stream_id: &str, file: &Path, duration_ms: Option<u64>, resolution: Option<u32>) {
        self.calls
            .lock()
            .push((stream_id.to_string(), file.to_path_buf(), duration_ms, resolution));
    }
}

struct RejectAll;

impl StreamAcceptFilter for RejectAll {
    fn is_valid_stream_parameters(&self, _streams: &[StreamInfo]) -> bool {
        false
    }
}

fn config(dir: &Path) -> MuxerConfig {
    MuxerConfig {
        output_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

fn video_source() -> StreamInfo {
    StreamInfo::video(0, CodecId::H264, Rational::new(1, 90000), 320, 240).with_extra_data(AVCC.to_vec())
}

fn audio_source() -> StreamInfo {
    StreamInfo::audio(1, CodecId::Aac, Rational::new(1, 48000), 48000, 2).with_extra_data(ASC.to_vec())
}

fn video_packet(i: i64, keyframe: bool) -> Packet<'static> {
    let mut packet = Packet::new(vec![0, 0, 0, 2, 0x65, i as u8])
        .with_stream_index(0)
        .with_timestamps(90000 + i * 3600, 90000 + i * 3600)
        .with_duration(3600);
    packet.set_keyframe(keyframe);
    packet
}

fn audio_packet(j: i64) -> Packet<'static> {
    let mut packet = Packet::new(vec![0x21, j as u8])
        .with_stream_index(1)
        .with_timestamps(48000 + j * 960, 48000 + j * 960)
        .with_duration(960);
    packet.set_keyframe(true);
    packet
}

/// 50 video frames at 40 ms and 100 audio frames at 20 ms, both starting
/// one second in, in submission order. Video goes first on equal times.
fn interleaved() -> Vec<Packet<'static>> {
    let mut packets = Vec::new();
    let mut j = 0;
    for i in 0..50 {
        let video_ms = 40 * i;
        while j < 100 && 20 * j < video_ms {
            packets.push(audio_packet(j));
            j += 1;
        }
        packets.push(video_packet(i, i == 1 || i == 26));
    }
    while j < 100 {
        packets.push(audio_packet(j));
        j += 1;
    }
    packets
}

fn read_back(path: &Path) -> (Mp4Demuxer, Vec<Packet<'static>>) {
    let mut demuxer = Mp4Demuxer::new();
    demuxer.open(BufReader::new(File::open(path).unwrap())).unwrap();
    let mut packets = Vec::new();
    while let Some(packet) = demuxer.read_packet().unwrap() {
        packets.push(packet);
    }
    (demuxer, packets)
}

fn of_stream(packets: &[Packet<'static>], index: usize) -> Vec<Packet<'static>> {
    packets.iter().filter(|p| p.stream_index == index).cloned().collect()
}

// =============================================================================
// End To End Tests
// =============================================================================

#[tokio::test]
async fn test_live_sync_and_promotion() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Arc::new(QueueScheduler::new());
    let listener = Arc::new(RecordingListener::default());
    let session = RecordingSession::new("stream1", config(dir.path()), scheduler.clone())
        .unwrap()
        .with_listener(listener.clone());

    session.prepare(&[video_source(), audio_source()]).unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert!(!session.remux_required());
    assert!(session.temp_path().exists());

    for packet in interleaved() {
        session.write_packet(&packet);
    }

    let sync = session.sync_state();
    assert_eq!(sync.video_start, Some(90000));
    assert_eq!(sync.audio_start, Some(48000));
    assert!(sync.first_keyframe_seen);

    assert!(session.finalize());
    assert_eq!(session.state(), SessionState::Closed);
    scheduler.run_pending().await;

    let final_path = dir.path().join("stream1.mp4");
    assert!(final_path.exists());
    assert!(!session.temp_path().exists());

    let (demuxer, packets) = read_back(&final_path);
    assert_eq!(demuxer.num_streams(), 2);

    let video = of_stream(&packets, 0);
    assert_eq!(video.len(), 49);
    assert_eq!(video[0].dts, 3600);
    assert!(video[0].is_keyframe());
    assert_eq!(video[0].data(), &[0, 0, 0, 2, 0x65, 1]);

    let audio = of_stream(&packets, 1);
    assert_eq!(audio.len(), 98);
    assert_eq!(audio[0].dts, 1920);
    assert_eq!(audio[0].data(), &[0x21, 2]);

    let calls = listener.calls.lock();
    assert_eq!(calls.len(), 1);
    let (stream_id, file, duration_ms, resolution) = &calls[0];
    assert_eq!(stream_id, "stream1");
    assert_eq!(file, &final_path);
    assert_eq!(*duration_ms, Some(2000));
    assert_eq!(*resolution, Some(240));
}

#[tokio::test]
async fn test_caller_packets_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let session = RecordingSession::new("s", config(dir.path()), Arc::new(QueueScheduler::new())).unwrap();
    session.prepare(&[video_source()]).unwrap();

    let mut packet = video_packet(3, true);
    packet.pos = Some(1234);
    session.ingest(MediaInput::Packet {
        packet: &packet,
        time_base: None,
    });

    assert_eq!(packet.pts, 90000 + 3 * 3600);
    assert_eq!(packet.dts, 90000 + 3 * 3600);
    assert_eq!(packet.duration, 3600);
    assert_eq!(packet.pos, Some(1234));
    assert_eq!(packet.stream_index, 0);
}

#[tokio::test]
async fn test_explicit_time_base() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Arc::new(QueueScheduler::new());
    let session = RecordingSession::new("tb", config(dir.path()), scheduler.clone()).unwrap();
    session.prepare(&[audio_source()]).unwrap();

    // millisecond timestamps into a 48 kHz track
    for k in 0..5i64 {
        let packet = Packet::new(vec![0x21, k as u8])
            .with_stream_index(1)
            .with_timestamps(500 + k * 20, 500 + k * 20)
            .with_duration(20);
        session.write_packet_with_time_base(&packet, Rational::new(1, 1000));
    }
    session.finalize();
    scheduler.run_pending().await;

    let (_, packets) = read_back(&dir.path().join("tb.mp4"));
    let dts: Vec<i64> = packets.iter().map(|p| p.dts).collect();
    assert_eq!(dts, vec![0, 960, 1920, 2880, 3840]);
}

#[tokio::test]
async fn test_adts_audio_filter() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Arc::new(QueueScheduler::new());
    let config = MuxerConfig {
        audio_filter: Some("aac_adtstoasc".into()),
        ..config(dir.path())
    };
    let session = RecordingSession::new("adts", config, scheduler.clone()).unwrap();
    let source = StreamInfo::audio(0, CodecId::Aac, Rational::new(1, 44100), 44100, 2);
    session.prepare(&[source]).unwrap();

    for k in 0..4i64 {
        let payload = [0x21, 0x10, k as u8];
        let len = payload.len() + 7;
        let mut frame = vec![
            0xFF,
            0xF1,
            (1 << 6) | (4 << 2),
            (2 << 6) | ((len >> 11) & 3) as u8,
            ((len >> 3) & 0xFF) as u8,
            (((len & 7) << 5) as u8) | 0x1F,
            0xFC,
        ];
        frame.extend_from_slice(&payload);
        let mut packet = Packet::new(frame)
            .with_stream_index(0)
            .with_timestamps(k * 1024, k * 1024)
            .with_duration(1024);
        packet.set_keyframe(true);
        session.write_packet(&packet);
    }
    session.finalize();
    scheduler.run_pending().await;

    let (demuxer, packets) = read_back(&dir.path().join("adts.mp4"));
    let audio = demuxer.stream_info(0).unwrap();
    assert_eq!(audio.media_type, MediaType::Audio);
    assert_eq!(audio.extra_data.as_deref(), Some(&[0x12, 0x10][..]));
    assert_eq!(packets.len(), 4);
    assert_eq!(packets[0].data(), &[0x21, 0x10, 0]);
}

// =============================================================================
// Negotiation Tests
// =============================================================================

#[tokio::test]
async fn test_unsupported_only_source() {
    let dir = tempfile::tempdir().unwrap();
    let session = RecordingSession::new("opus", config(dir.path()), Arc::new(QueueScheduler::new())).unwrap();
    let opus = StreamInfo::audio(0, CodecId::Opus, Rational::new(1, 48000), 48000, 2);

    let err = session.prepare(&[opus]).unwrap_err();
    assert!(matches!(err, MuxError::NoSupportedStreams));
    assert_eq!(session.state(), SessionState::Created);
    assert!(!session.temp_path().exists());
    assert!(!session.final_path().exists());
    assert!(!session.finalize());
}

#[test]
fn test_unsupported_streams_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let session = RecordingSession::new("mixed", config(dir.path()), Arc::new(QueueScheduler::new())).unwrap();
    let opus = StreamInfo::audio(1, CodecId::Opus, Rational::new(1, 48000), 48000, 2);

    session.prepare(&[video_source(), opus]).unwrap();
    assert_eq!(session.state(), SessionState::Running);

    // packets of the skipped stream are ignored
    let mut packet = Packet::new(vec![1, 2, 3]).with_stream_index(1).with_timestamps(0, 0);
    packet.set_keyframe(true);
    session.write_packet(&packet);
    assert_eq!(session.sync_state().audio_start, None);
}

#[test]
fn test_accept_filter_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let session = RecordingSession::new("r", config(dir.path()), Arc::new(QueueScheduler::new()))
        .unwrap()
        .with_accept_filter(Arc::new(RejectAll));

    assert!(matches!(session.prepare(&[video_source()]), Err(MuxError::StreamRejected)));
    assert!(!session.temp_path().exists());
}

#[test]
fn test_prepare_twice() {
    let dir = tempfile::tempdir().unwrap();
    let session = RecordingSession::new("p", config(dir.path()), Arc::new(QueueScheduler::new())).unwrap();
    session.prepare(&[video_source()]).unwrap();
    assert!(matches!(session.prepare(&[video_source()]), Err(MuxError::AlreadyPrepared)));
}

#[test]
fn test_prepare_from_reader() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("source.mp4");
    let session = RecordingSession::new("src", config(dir.path()), Arc::new(QueueScheduler::new())).unwrap();
    session.prepare(&[video_source(), audio_source()]).unwrap();
    session.write_packet(&video_packet(0, true));
    session.finalize();
    std::fs::rename(session.temp_path(), &source_path).unwrap();

    let mut demuxer = Mp4Demuxer::new();
    demuxer.open(BufReader::new(File::open(&source_path).unwrap())).unwrap();

    let copy = RecordingSession::new("copy", config(dir.path()), Arc::new(QueueScheduler::new())).unwrap();
    copy.prepare_from(&demuxer).unwrap();
    assert_eq!(copy.state(), SessionState::Running);
}

// =============================================================================
// Remux Tests
// =============================================================================

#[tokio::test]
async fn test_live_video_remux_with_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Arc::new(QueueScheduler::new());
    let session = RecordingSession::new("live", config(dir.path()), scheduler.clone()).unwrap();

    assert!(session
        .add_video_stream(640, 360, CodecId::H264, 0, Some(AVCC.to_vec()))
        .unwrap());
    session.prepare_io().unwrap();
    assert!(session.remux_required());

    for k in 0..10i64 {
        let frame = [0, 0, 0, 2, 0x65, k as u8];
        session.write_video_frame(&frame, 1000 + k * 40, 90, 0, k % 5 == 0);
    }
    assert!(session.finalize());
    scheduler.run_pending().await;

    let final_path = dir.path().join("live.mp4");
    assert!(final_path.exists());
    assert!(!session.temp_path().exists());

    let (demuxer, packets) = read_back(&final_path);
    let video = demuxer.stream_info(0).unwrap();
    assert_eq!(video.metadata.get(ROTATE_KEY).map(String::as_str), Some("90"));
    assert_eq!(video.extra_data.as_deref(), Some(&AVCC[..]));
    assert_eq!(packets.len(), 10);
    assert_eq!(packets[0].dts, 0);
    assert_eq!(packets[1].dts - packets[0].dts, 3600);
}

#[tokio::test]
async fn test_remux_trigger_never() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Arc::new(QueueScheduler::new());
    let config = MuxerConfig {
        remux_trigger: RemuxTrigger::Never,
        ..config(dir.path())
    };
    let session = RecordingSession::new("plain", config, scheduler.clone()).unwrap();
    session
        .add_video_stream(640, 360, CodecId::H264, 0, Some(AVCC.to_vec()))
        .unwrap();
    session.prepare_io().unwrap();
    assert!(!session.remux_required());

    session.write_video_frame(&[0, 0, 0, 2, 0x65, 0], 0, 90, 0, true);
    session.finalize();
    scheduler.run_pending().await;

    let (demuxer, _) = read_back(&dir.path().join("plain.mp4"));
    assert!(demuxer.stream_info(0).unwrap().metadata.get(ROTATE_KEY).is_none());
}

#[test]
fn test_remux_missing_source() {
    let dir = tempfile::tempdir().unwrap();
    let dst = dir.path().join("out.mp4");
    let result = recmux::remux(&dir.path().join("missing.mp4"), &dst, 0, &Default::default());
    assert!(matches!(result, Err(MuxError::Io(_))));
    assert!(!dst.exists());
}

// =============================================================================
// Storage Handoff Tests
// =============================================================================

#[tokio::test]
async fn test_collision_naming() {
    let bucket = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(bucket.path());
    storage.put("streams/stream1.mp4", "a".into()).await.unwrap();
    storage.put("streams/stream1_1.mp4", "b".into()).await.unwrap();

    let key = resolve_unique_key(&storage, FileType::Stream, "stream1.mp4").await.unwrap();
    assert_eq!(key, "streams/stream1_2.mp4");

    let fresh = resolve_unique_key(&storage, FileType::Stream, "other.mp4").await.unwrap();
    assert_eq!(fresh, "streams/other.mp4");
}

#[tokio::test]
async fn test_upload_after_finalize() {
    let dir = tempfile::tempdir().unwrap();
    let bucket = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalStorage::new(bucket.path()));
    storage.put("streams/up.mp4", "existing".into()).await.unwrap();

    let scheduler = Arc::new(QueueScheduler::new());
    let session = RecordingSession::new("up", config(dir.path()), scheduler.clone())
        .unwrap()
        .with_storage(storage.clone());
    session.prepare(&[video_source()]).unwrap();
    session.write_packet(&video_packet(0, true));
    session.finalize();

    assert_eq!(scheduler.run_pending().await, 2);
    assert_eq!(
        scheduler.scheduled_delays(),
        vec![Duration::ZERO, Duration::from_millis(1000)]
    );

    assert!(storage.exists("streams/up_1.mp4").await.unwrap());
    assert!(!dir.path().join("up.mp4").exists());
}

// =============================================================================
// Dropped Packet Tests
// =============================================================================

#[tokio::test]
async fn test_filter_failure_drops_packet() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Arc::new(QueueScheduler::new());
    let config = MuxerConfig {
        audio_filter: Some("aac_adtstoasc".into()),
        ..config(dir.path())
    };
    let session = RecordingSession::new("bsf", config, scheduler.clone()).unwrap();
    let source = StreamInfo::audio(0, CodecId::Aac, Rational::new(1, 44100), 44100, 2);
    session.prepare(&[source]).unwrap();

    // raw AAC with no configuration cannot be converted
    let mut raw = Packet::new(vec![0x21, 0x10, 0x99])
        .with_stream_index(0)
        .with_timestamps(0, 0)
        .with_duration(1024);
    raw.set_keyframe(true);
    session.write_packet(&raw);
    assert_eq!(session.state(), SessionState::Running);

    let payload = [0x21, 0x10, 0x01];
    let len = payload.len() + 7;
    let mut frame = vec![
        0xFF,
        0xF1,
        (1 << 6) | (4 << 2),
        (2 << 6) | ((len >> 11) & 3) as u8,
        ((len >> 3) & 0xFF) as u8,
        (((len & 7) << 5) as u8) | 0x1F,
        0xFC,
    ];
    frame.extend_from_slice(&payload);
    let mut adts = Packet::new(frame)
        .with_stream_index(0)
        .with_timestamps(1024, 1024)
        .with_duration(1024);
    adts.set_keyframe(true);
    session.write_packet(&adts);

    assert!(session.finalize());
    scheduler.run_pending().await;

    let (demuxer, packets) = read_back(&dir.path().join("bsf.mp4"));
    assert_eq!(demuxer.stream_info(0).unwrap().extra_data.as_deref(), Some(&[0x12, 0x10][..]));
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].data(), &payload);
}

#[tokio::test]
async fn test_write_failure_drops_packet() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Arc::new(QueueScheduler::new());
    let session = RecordingSession::new("dts", config(dir.path()), scheduler.clone()).unwrap();
    session.prepare(&[video_source()]).unwrap();

    session.write_packet(&video_packet(0, true));
    // same decode time as the packet before
    let mut repeated = Packet::new(vec![0, 0, 0, 2, 0x65, 0xAA])
        .with_stream_index(0)
        .with_timestamps(90000, 90000)
        .with_duration(3600);
    repeated.set_keyframe(true);
    session.write_packet(&repeated);
    assert_eq!(session.state(), SessionState::Running);

    session.write_packet(&video_packet(1, false));
    assert!(session.finalize());
    scheduler.run_pending().await;

    let (_, packets) = read_back(&dir.path().join("dts.mp4"));
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].data(), &[0, 0, 0, 2, 0x65, 0]);
    assert_eq!(packets[1].data(), &[0, 0, 0, 2, 0x65, 1]);
    assert_eq!(packets[1].dts - packets[0].dts, 3600);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_finalize_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Arc::new(QueueScheduler::new());
    let listener = Arc::new(RecordingListener::default());
    let session = RecordingSession::new("once", config(dir.path()), scheduler.clone())
        .unwrap()
        .with_listener(listener.clone());
    session.prepare(&[video_source()]).unwrap();
    session.write_packet(&video_packet(0, true));

    assert!(session.finalize());
    assert!(!session.finalize());
    assert_eq!(scheduler.len(), 1);

    scheduler.run_pending().await;
    assert_eq!(listener.calls.lock().len(), 1);
}

#[test]
fn test_packets_rejected_outside_running() {
    let dir = tempfile::tempdir().unwrap();
    let session = RecordingSession::new("gate", config(dir.path()), Arc::new(QueueScheduler::new())).unwrap();
    assert!(session
        .add_video_stream(640, 360, CodecId::H264, 0, Some(AVCC.to_vec()))
        .unwrap());

    session.write_video_frame(&[0, 0, 0, 2, 0x65, 0], 100, 0, 0, true);
    assert_eq!(session.sync_state().video_start, None);

    session.prepare_io().unwrap();
    session.finalize();
    session.write_video_frame(&[0, 0, 0, 2, 0x65, 1], 140, 0, 0, true);
    assert_eq!(session.sync_state().video_start, None);
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn test_unknown_stream_index_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let session = RecordingSession::new("idx", config(dir.path()), Arc::new(QueueScheduler::new())).unwrap();
    session.prepare(&[video_source()]).unwrap();

    session.write_packet(&video_packet(0, true).with_stream_index(9));
    assert!(!session.sync_state().first_keyframe_seen);
}
