//! Finalization: promoting the temporary file, reporting and handoff.

use crate::error::{MuxError, Result};
use crate::handoff;
use crate::ingest::rescale_packet;
use crate::listener::MuxingListener;
use crate::negotiate::is_recordable;
use crate::scheduler::Scheduler;
use recmux_containers::{probe_duration, Demuxer, Mp4Demuxer, Mp4Muxer, MuxOptions, Muxer, ROTATE_KEY};
use recmux_core::format::MediaType;
use recmux_core::rational::Rational;
use recmux_storage::StorageClient;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Rewrite `src` into a fresh MP4 at `dst`, then delete `src`.
///
/// Video streams get the `rotate` tag set to `rotation`. Codec tags are
/// re-derived by the writer. On failure `dst` is removed and `src` is kept.
/// Once `dst` is complete the call succeeds; a failed delete of `src` is
/// only logged.
pub fn remux(src: &Path, dst: &Path, rotation: i32, options: &MuxOptions) -> Result<()> {
    remux_file(src, dst, Some(rotation), options)?;
    if let Err(e) = fs::remove_file(src) {
        warn!(path = %src.display(), error = %e, "could not remove remuxed source");
    }
    info!(src = %src.display(), dst = %dst.display(), rotation, "remux complete");
    Ok(())
}

/// Rewrite `src` into a fresh MP4 at `dst`, leaving `src` in place.
///
/// With `rotation` set, video streams are tagged with it; otherwise the
/// source rotation is kept.
pub fn remux_file(src: &Path, dst: &Path, rotation: Option<i32>, options: &MuxOptions) -> Result<()> {
    copy_streams(src, dst, rotation, options).map_err(|e| {
        if let Err(cleanup) = fs::remove_file(dst) {
            debug!(path = %dst.display(), error = %cleanup, "no partial output to remove");
        }
        e
    })
}

fn copy_streams(src: &Path, dst: &Path, rotation: Option<i32>, options: &MuxOptions) -> Result<()> {
    let mut demuxer = Mp4Demuxer::new();
    demuxer.open(BufReader::new(File::open(src)?))?;

    let output = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)?;
    let mut muxer = Mp4Muxer::new();
    muxer.create(output)?;

    // input index -> (output index, input time base)
    let mut slots: HashMap<usize, (usize, Rational)> = HashMap::new();
    for source in demuxer.streams() {
        if !is_recordable(&source) {
            continue;
        }
        let mut stream = source.clone();
        stream.codec_tag = None;
        if let (MediaType::Video, Some(degrees)) = (stream.media_type, rotation) {
            stream.metadata.insert(ROTATE_KEY.to_string(), degrees.to_string());
        }
        let output_index = muxer.add_stream(stream)?;
        slots.insert(source.index, (output_index, source.time_base));
    }

    if slots.is_empty() {
        return Err(MuxError::NoSupportedStreams);
    }

    muxer.write_header(options)?;

    let mut time_bases = HashMap::with_capacity(slots.len());
    for (&input, &(output, from)) in &slots {
        let to = muxer
            .stream_info(output)
            .map_or(from, |info| info.time_base);
        time_bases.insert(input, (output, from, to));
    }

    let mut copied = 0u64;
    while let Some(packet) = demuxer.read_packet()? {
        let Some(&(output, from, to)) = time_bases.get(&packet.stream_index) else {
            continue;
        };
        muxer.write_packet(&rescale_packet(&packet, 0, from, to, output))?;
        copied += 1;
    }

    muxer.write_trailer()?;
    muxer.close();
    demuxer.close();

    debug!(packets = copied, "streams copied");
    Ok(())
}

/// Deferred work run once a session is closed.
pub(crate) struct PromoteJob {
    pub stream_id: String,
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
    pub remux_required: bool,
    pub rotation: i32,
    pub options: MuxOptions,
    pub resolution: Option<u32>,
    pub listener: Option<Arc<dyn MuxingListener>>,
    pub storage: Option<Arc<dyn StorageClient>>,
    pub scheduler: Arc<dyn Scheduler>,
    pub upload_delay: Duration,
}

impl PromoteJob {
    /// Promote, report, then schedule the upload. Each step logs its own
    /// failure and the next one still runs.
    pub async fn run(self) {
        self.promote().await;

        let probe_path = self.final_path.clone();
        let duration_ms = match tokio::task::spawn_blocking(move || probe_duration(probe_path)).await {
            Ok(duration) => duration,
            Err(e) => {
                error!(stream_id = %self.stream_id, error = %e, "duration probe did not complete");
                None
            }
        };
        if duration_ms.is_none() {
            warn!(stream_id = %self.stream_id, path = %self.final_path.display(), "recording duration unknown");
        }

        if let Some(listener) = &self.listener {
            listener.on_muxing_finished(&self.stream_id, &self.final_path, duration_ms, self.resolution);
        }
        info!(stream_id = %self.stream_id, path = %self.final_path.display(), ?duration_ms, "recording ready");

        if let Some(storage) = self.storage {
            let path = self.final_path;
            self.scheduler.schedule_once(
                self.upload_delay,
                Box::pin(async move {
                    handoff::upload_recording(storage.as_ref(), &path).await;
                }),
            );
        }
    }

    async fn promote(&self) {
        if self.remux_required {
            let (src, dst) = (self.temp_path.clone(), self.final_path.clone());
            let (rotation, options) = (self.rotation, self.options.clone());
            let outcome = tokio::task::spawn_blocking(move || remux(&src, &dst, rotation, &options)).await;
            match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => error!(stream_id = %self.stream_id, error = %e, "remux failed, keeping the recorded file"),
                Err(e) => error!(stream_id = %self.stream_id, error = %e, "remux did not complete"),
            }
        }

        if let Err(e) = tokio::fs::rename(&self.temp_path, &self.final_path).await {
            error!(
                stream_id = %self.stream_id,
                from = %self.temp_path.display(),
                to = %self.final_path.display(),
                error = %e,
                "rename failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recmux_containers::StreamInfo;
    use recmux_core::format::CodecId;
    use recmux_core::packet::Packet;

    fn write_source(path: &Path) {
        let mut muxer = Mp4Muxer::new();
        muxer.create(File::create(path).unwrap()).unwrap();
        let video = StreamInfo::video(0, CodecId::H264, Rational::new(1, 1000), 320, 240)
            .with_extra_data(vec![1, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0, 4, 0x67, 0x42, 0xC0, 0x1E, 1, 0, 2, 0x68, 0xCE]);
        muxer.add_stream(video).unwrap();
        muxer.write_header(&MuxOptions::new()).unwrap();
        for i in 0..3i64 {
            let mut packet = Packet::new(vec![0, 0, 0, 2, 0x65, i as u8])
                .with_stream_index(0)
                .with_timestamps(i * 40, i * 40)
                .with_duration(40);
            packet.set_keyframe(i == 0);
            muxer.write_packet(&packet).unwrap();
        }
        muxer.write_trailer().unwrap();
        muxer.close();
    }

    #[test]
    fn test_remux_deletes_source() {
        let dir = tempfile::tempdir().unwrap();
        let (src, dst) = (dir.path().join("a.mp4.tmp"), dir.path().join("a.mp4"));
        write_source(&src);

        remux(&src, &dst, 180, &MuxOptions::new()).unwrap();
        assert!(!src.exists());

        let mut demuxer = Mp4Demuxer::new();
        demuxer.open(BufReader::new(File::open(&dst).unwrap())).unwrap();
        assert_eq!(demuxer.streams()[0].rotation(), 180);
    }

    #[cfg(unix)]
    #[test]
    fn test_remux_keeps_output_when_source_delete_fails() {
        use std::os::unix::fs::PermissionsExt;

        let src_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let (src, dst) = (src_dir.path().join("b.mp4.tmp"), out_dir.path().join("b.mp4"));
        write_source(&src);

        fs::set_permissions(src_dir.path(), fs::Permissions::from_mode(0o555)).unwrap();
        // privileged users can still unlink, so only the outcome for dst is fixed
        let locked = File::create(src_dir.path().join("write_check")).is_err();

        let result = remux(&src, &dst, 90, &MuxOptions::new());
        fs::set_permissions(src_dir.path(), fs::Permissions::from_mode(0o755)).unwrap();

        assert!(result.is_ok());
        assert_eq!(src.exists(), locked);
        let mut demuxer = Mp4Demuxer::new();
        demuxer.open(BufReader::new(File::open(&dst).unwrap())).unwrap();
        assert_eq!(demuxer.streams()[0].rotation(), 90);
    }
}
