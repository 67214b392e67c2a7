//! Container format implementations for demuxing and muxing.
//!
//! This crate provides the MP4 writer used for recordings and a reader
//! used to probe and remux finished files.

pub mod mp4;
pub mod traits;

pub use mp4::{probe_duration, Mp4Brand, Mp4Demuxer, Mp4Muxer};
pub use traits::{
    AudioStreamInfo, Demuxer, MuxOptions, Muxer, StreamInfo, VideoStreamInfo, ROTATE_KEY,
};
