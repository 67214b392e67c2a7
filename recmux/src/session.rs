//! Recording sessions.
//!
//! A session owns one output file from stream negotiation to finalization:
//!
//! ```text
//! Created --prepare--> Prepared --header--> Running --finalize--> Finalizing --> Closed
//! ```
//!
//! Every entry point takes the session lock, so a session can be fed from
//! several threads.

use crate::config::MuxerConfig;
use crate::error::{MuxError, Result};
use crate::finalize::PromoteJob;
use crate::ingest::{rescale_packet, MediaInput, SyncState};
use crate::listener::{MuxingListener, StreamAcceptFilter};
use crate::negotiate::{self, Negotiated, RegisteredStream, StreamMap, LIVE_VIDEO_TIME_BASE};
use crate::scheduler::Scheduler;
use recmux_containers::{Demuxer, Mp4Muxer, Muxer, StreamInfo};
use recmux_core::format::{CodecId, MediaType};
use recmux_core::packet::Packet;
use recmux_core::rational::Rational;
use recmux_storage::StorageClient;
use parking_lot::Mutex;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Streams may be added.
    Created,
    /// The output is open and the header is being written.
    Prepared,
    /// Packets are accepted.
    Running,
    /// The trailer is being written.
    Finalizing,
    /// The output is released.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Prepared => "prepared",
            SessionState::Running => "running",
            SessionState::Finalizing => "finalizing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct SessionInner<M> {
    state: SessionState,
    muxer: M,
    streams: StreamMap,
    sync: SyncState,
    live_video: bool,
    remux_required: bool,
    rotation: i32,
    resolution: Option<u32>,
}

/// One recording, written to `<output_dir>/<stream_id>.mp4`.
pub struct RecordingSession<M: Muxer = Mp4Muxer> {
    stream_id: String,
    config: MuxerConfig,
    scheduler: Arc<dyn Scheduler>,
    storage: Option<Arc<dyn StorageClient>>,
    listener: Option<Arc<dyn MuxingListener>>,
    accept_filter: Option<Arc<dyn StreamAcceptFilter>>,
    inner: Mutex<SessionInner<M>>,
}

impl RecordingSession<Mp4Muxer> {
    /// Create an MP4 recording session.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Configuration`] if the configuration is invalid.
    pub fn new(stream_id: impl Into<String>, config: MuxerConfig, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        Self::with_muxer(Mp4Muxer::new(), stream_id, config, scheduler)
    }
}

impl<M: Muxer + Send> RecordingSession<M> {
    /// Create a session writing through `muxer`.
    pub fn with_muxer(
        muxer: M,
        stream_id: impl Into<String>,
        config: MuxerConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        config.validate()?;
        let sync = SyncState::new(config.check_first_keyframe);
        Ok(Self {
            stream_id: stream_id.into(),
            config,
            scheduler,
            storage: None,
            listener: None,
            accept_filter: None,
            inner: Mutex::new(SessionInner {
                state: SessionState::Created,
                muxer,
                streams: StreamMap::new(),
                sync,
                live_video: false,
                remux_required: false,
                rotation: 0,
                resolution: None,
            }),
        })
    }

    /// Upload finished recordings to `storage`.
    pub fn with_storage(mut self, storage: Arc<dyn StorageClient>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Report finished recordings to `listener`.
    pub fn with_listener(mut self, listener: Arc<dyn MuxingListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Consult `filter` before negotiating a source.
    pub fn with_accept_filter(mut self, filter: Arc<dyn StreamAcceptFilter>) -> Self {
        self.accept_filter = Some(filter);
        self
    }

    /// Stream identifier.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Session configuration.
    pub fn config(&self) -> &MuxerConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Start alignment state.
    pub fn sync_state(&self) -> SyncState {
        self.inner.lock().sync
    }

    /// Whether the finished file will be remuxed. Decided when the output
    /// is opened.
    pub fn remux_required(&self) -> bool {
        self.inner.lock().remux_required
    }

    /// Path written while recording.
    pub fn temp_path(&self) -> PathBuf {
        self.config.temp_path(&self.stream_id)
    }

    /// Path of the finished recording.
    pub fn final_path(&self) -> PathBuf {
        self.config.final_path(&self.stream_id)
    }

    /// Register one stream of a live source.
    ///
    /// Configured filters are not applied to live streams. Returns
    /// `Ok(false)` if the stream cannot be recorded.
    pub fn add_stream(&self, stream: &StreamInfo, input_index: usize) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.ensure_created()?;
        inner.ensure_unregistered(input_index)?;

        let Some(output) = negotiate::live_stream(stream) else {
            return Ok(false);
        };
        inner.register(Negotiated { output, filter: None }, input_index, stream.time_base)?;
        Ok(true)
    }

    /// Register the live video track, fed through
    /// [`write_video_frame`](Self::write_video_frame).
    ///
    /// Returns `Ok(false)` if the codec cannot be recorded.
    pub fn add_video_stream(
        &self,
        width: u32,
        height: u32,
        codec: CodecId,
        input_index: usize,
        extra_data: Option<Vec<u8>>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.ensure_created()?;
        inner.ensure_unregistered(input_index)?;

        let output = negotiate::live_video_stream(width, height, codec, input_index, extra_data);
        if !negotiate::is_recordable(&output) || output.media_type != MediaType::Video {
            return Ok(false);
        }
        inner.register(Negotiated { output, filter: None }, input_index, LIVE_VIDEO_TIME_BASE)?;
        inner.live_video = true;
        Ok(true)
    }

    /// Negotiate the streams of a source, then open the output.
    ///
    /// Nothing is registered unless at least one stream is recordable.
    ///
    /// # Errors
    ///
    /// - [`MuxError::StreamRejected`] if the accept filter refuses the source
    /// - [`MuxError::NoSupportedStreams`] if no stream can be recorded
    /// - setup errors from the output
    pub fn prepare(&self, streams: &[StreamInfo]) -> Result<()> {
        if let Some(filter) = &self.accept_filter {
            if !filter.is_valid_stream_parameters(streams) {
                warn!(stream_id = %self.stream_id, "stream parameters rejected");
                return Err(MuxError::StreamRejected);
            }
        }

        let mut inner = self.inner.lock();
        inner.ensure_created()?;

        let mut negotiated = Vec::new();
        for stream in streams {
            let seen = negotiated.iter().any(|(_, index, _)| *index == stream.index);
            if seen || inner.streams.contains(stream.index) {
                return Err(MuxError::Negotiation(format!(
                    "input stream {} registered twice",
                    stream.index
                )));
            }
            if let Some(n) = negotiate::negotiate_source_stream(stream, &self.config)? {
                negotiated.push((n, stream.index, stream.time_base));
            }
        }
        if negotiated.is_empty() {
            return Err(MuxError::NoSupportedStreams);
        }

        for (n, input_index, time_base) in negotiated {
            inner.register(n, input_index, time_base)?;
        }
        self.open_output(&mut inner)
    }

    /// Negotiate every stream of an opened source reader, then open the
    /// output.
    pub fn prepare_from<D: Demuxer>(&self, source: &D) -> Result<()> {
        self.prepare(&source.streams())
    }

    /// Open the output and write the header, for streams registered
    /// through [`add_stream`](Self::add_stream) and
    /// [`add_video_stream`](Self::add_video_stream).
    pub fn prepare_io(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_created()?;
        self.open_output(&mut inner)
    }

    fn open_output(&self, inner: &mut SessionInner<M>) -> Result<()> {
        if inner.streams.is_empty() {
            return Err(MuxError::NoSupportedStreams);
        }

        let outputs: Vec<&StreamInfo> = inner
            .streams
            .iter()
            .filter_map(|s| inner.muxer.stream_info(s.output_index))
            .collect();
        inner.remux_required = negotiate::remux_required(self.config.remux_trigger, &outputs, inner.live_video);

        let temp_path = self.temp_path();
        fs::create_dir_all(&self.config.output_dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut opened = inner.muxer.create(file);
        if opened.is_ok() {
            inner.state = SessionState::Prepared;
            opened = inner.muxer.write_header(&self.config.mux_options());
        }
        if let Err(e) = opened {
            error!(stream_id = %self.stream_id, error = %e, "could not write header");
            inner.muxer.close();
            inner.streams.clear();
            inner.state = SessionState::Closed;
            if let Err(e) = fs::remove_file(&temp_path) {
                warn!(path = %temp_path.display(), error = %e, "could not remove output");
            }
            return Err(e.into());
        }

        for stream in inner.streams.iter_mut() {
            if let Some(info) = inner.muxer.stream_info(stream.output_index) {
                stream.output_time_base = info.time_base;
            }
        }

        inner.state = SessionState::Running;
        info!(
            stream_id = %self.stream_id,
            path = %temp_path.display(),
            streams = inner.streams.len(),
            remux = inner.remux_required,
            "recording started"
        );
        Ok(())
    }

    /// Feed live media.
    ///
    /// Rejected and failed packets are logged and dropped.
    pub fn ingest(&self, input: MediaInput<'_>) {
        let mut inner = self.inner.lock();
        match input {
            MediaInput::Packet { packet, time_base } => inner.write(&self.stream_id, packet, time_base),
            MediaInput::VideoFrame(frame) => {
                inner.rotation = frame.rotation;
                let packet = frame.to_packet();
                inner.write(&self.stream_id, &packet, None);
            }
        }
    }

    /// Feed a packet timed in its stream's registered time base.
    pub fn write_packet(&self, packet: &Packet<'_>) {
        self.ingest(MediaInput::Packet { packet, time_base: None });
    }

    /// Feed a packet timed in `time_base`.
    pub fn write_packet_with_time_base(&self, packet: &Packet<'_>, time_base: Rational) {
        self.ingest(MediaInput::Packet {
            packet,
            time_base: Some(time_base),
        });
    }

    /// Feed an encoded frame of the live video track, timed in milliseconds.
    pub fn write_video_frame(&self, data: &[u8], timestamp: i64, rotation: i32, input_index: usize, keyframe: bool) {
        self.ingest(MediaInput::VideoFrame(crate::ingest::VideoFrame {
            data,
            timestamp,
            rotation,
            stream_index: input_index,
            keyframe,
        }));
    }

    /// Close the recording and schedule promotion of the file.
    ///
    /// Returns true if this call finished a running recording. Later calls,
    /// and calls on a session that never started, return false.
    pub fn finalize(&self) -> bool {
        let job = {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Running => {}
                SessionState::Finalizing | SessionState::Closed => return false,
                SessionState::Created | SessionState::Prepared => {
                    inner.muxer.close();
                    inner.streams.clear();
                    inner.state = SessionState::Closed;
                    debug!(stream_id = %self.stream_id, "session closed before recording");
                    return false;
                }
            }

            inner.state = SessionState::Finalizing;
            match inner.muxer.write_trailer() {
                Ok(()) => info!(stream_id = %self.stream_id, "trailer written"),
                Err(e) => error!(stream_id = %self.stream_id, error = %e, "could not write trailer"),
            }
            inner.muxer.close();
            inner.streams.clear();
            inner.state = SessionState::Closed;

            PromoteJob {
                stream_id: self.stream_id.clone(),
                temp_path: self.temp_path(),
                final_path: self.final_path(),
                remux_required: inner.remux_required,
                rotation: inner.rotation,
                options: self.config.mux_options(),
                resolution: inner.resolution,
                listener: self.listener.clone(),
                storage: self.storage.clone(),
                scheduler: Arc::clone(&self.scheduler),
                upload_delay: self.config.upload_delay(),
            }
        };

        self.scheduler
            .schedule_once(self.config.promote_delay(), Box::pin(job.run()));
        true
    }
}

impl<M: Muxer> SessionInner<M> {
    fn ensure_created(&self) -> Result<()> {
        match self.state {
            SessionState::Created => Ok(()),
            _ => Err(MuxError::AlreadyPrepared),
        }
    }

    fn ensure_unregistered(&self, input_index: usize) -> Result<()> {
        if self.streams.contains(input_index) {
            return Err(MuxError::Negotiation(format!(
                "input stream {} registered twice",
                input_index
            )));
        }
        Ok(())
    }

    fn register(&mut self, negotiated: Negotiated, input_index: usize, input_time_base: Rational) -> Result<()> {
        let Negotiated { output, filter } = negotiated;
        let media_type = output.media_type;
        let output_time_base = output.time_base;
        let height = output.video.map(|v| v.height);

        let output_index = self.muxer.add_stream(output)?;
        self.streams.register(RegisteredStream {
            input_index,
            output_index,
            media_type,
            input_time_base,
            output_time_base,
            filter,
        });

        if media_type == MediaType::Video && self.resolution.is_none() {
            self.resolution = height;
        }
        debug!(input_index, output_index, %media_type, "stream registered");
        Ok(())
    }

    fn write(&mut self, stream_id: &str, packet: &Packet<'_>, time_base: Option<Rational>) {
        if self.state != SessionState::Running {
            debug!(stream_id, state = %self.state, index = packet.stream_index, "packet rejected");
            return;
        }

        let has_video = self.streams.has_video();
        let Some(stream) = self.streams.get_mut(packet.stream_index) else {
            debug!(stream_id, index = packet.stream_index, "packet for unregistered stream");
            return;
        };

        let gate_was_open = self.sync.first_keyframe_seen;
        let Some(start) = self
            .sync
            .admit(stream.media_type, packet.pts, packet.is_keyframe(), has_video)
        else {
            debug!(stream_id, index = packet.stream_index, pts = packet.pts, "waiting for first key frame");
            return;
        };
        if !gate_was_open && self.sync.first_keyframe_seen {
            info!(stream_id, pts = packet.pts, "first key frame");
        }

        let from = time_base.unwrap_or(stream.input_time_base);
        let rescaled = rescale_packet(packet, start, from, stream.output_time_base, stream.output_index);

        let packets = match stream.filter.as_mut() {
            Some(filter) => match filter.push(rescaled.into_owned()) {
                Ok(packets) => packets,
                Err(e) => {
                    warn!(stream_id, filter = filter.name(), error = %e, "filter dropped packet");
                    return;
                }
            },
            None => {
                if let Err(e) = self.muxer.write_packet(&rescaled) {
                    warn!(stream_id, index = packet.stream_index, pts = packet.pts, error = %e, "write failed");
                }
                return;
            }
        };

        for out in &packets {
            if let Err(e) = self.muxer.write_packet(out) {
                warn!(stream_id, index = packet.stream_index, pts = out.pts, error = %e, "write failed");
            }
        }
    }
}
