//! # recmux
//!
//! Live recording engine: turns a stream of encoded packets into a finished
//! MP4 file, then hands it to storage.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use recmux::{MuxerConfig, QueueScheduler, RecordingSession};
//! use recmux::media::CodecId;
//! use std::sync::Arc;
//!
//! fn main() -> recmux::Result<()> {
//!     let scheduler = Arc::new(QueueScheduler::new());
//!     let session = RecordingSession::new("stream1", MuxerConfig::default(), scheduler)?;
//!
//!     session.add_video_stream(1280, 720, CodecId::H264, 0, None)?;
//!     session.prepare_io()?;
//!
//!     let frame = [0u8, 0, 0, 1, 0x65, 0x88];
//!     session.write_video_frame(&frame, 0, 0, 0, true);
//!
//!     session.finalize();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - `recmux-core`: packets, rational time and bitstream helpers
//! - `recmux-containers`: MP4 reader and writer
//! - `recmux-storage`: the storage client contract and a local backend
//!
//! This crate holds the session: stream negotiation, the key frame gate,
//! timestamp normalization, finalization and upload.

pub mod codecs;
pub mod config;
pub mod error;
pub mod filter;
pub mod finalize;
pub mod handoff;
pub mod ingest;
pub mod listener;
pub mod negotiate;
pub mod scheduler;
pub mod session;

pub use codecs::{is_supported, SUPPORTED_CODECS};
pub use config::{MuxerConfig, RemuxTrigger};
pub use error::{MuxError, Result};
pub use filter::{create_filter, BitstreamFilter};
pub use finalize::{remux, remux_file};
pub use handoff::{resolve_unique_key, upload_recording};
pub use ingest::{MediaInput, SyncState, VideoFrame};
pub use listener::{MuxingListener, StreamAcceptFilter};
pub use scheduler::{QueueScheduler, Scheduler, Task, TokioScheduler};
pub use session::{RecordingSession, SessionState};

/// Core types.
pub mod media {
    pub use recmux_core::format::{CodecId, MediaType};
    pub use recmux_core::packet::{Packet, PacketFlags};
    pub use recmux_core::rational::Rational;
    pub use recmux_core::timestamp::NOPTS;
}

pub use recmux_containers::{Demuxer, Mp4Demuxer, Mp4Muxer, Muxer, MuxOptions, StreamInfo};
pub use recmux_storage::{FileType, LocalStorage, StorageClient, StorageError, StorageSettings};
