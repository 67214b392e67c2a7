//! Callbacks into the owner of a recording.

use recmux_containers::StreamInfo;
use std::path::Path;

/// Notified when a recording is ready on disk.
pub trait MuxingListener: Send + Sync {
    /// The finished file is at `file`.
    ///
    /// `duration_ms` is `None` when the file could not be probed.
    /// `resolution` is the video height, if the recording has video.
    fn on_muxing_finished(&self, stream_id: &str, file: &Path, duration_ms: Option<u64>, resolution: Option<u32>);
}

/// Accepts or refuses the streams of a source before negotiation.
pub trait StreamAcceptFilter: Send + Sync {
    /// Whether a source with these streams may be recorded.
    fn is_valid_stream_parameters(&self, streams: &[StreamInfo]) -> bool;
}
