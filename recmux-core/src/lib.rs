//! # Recmux Core
//!
//! Core types shared by every recmux crate.
//!
//! This crate provides the fundamental building blocks of the recording engine:
//! - Error handling types
//! - Rational time arithmetic with rounding-aware rescaling
//! - Time bases and the "no timestamp" sentinel
//! - Encoded packets
//! - Codec and media type identifiers
//! - Annex-B NAL unit helpers

pub mod error;
pub mod bitstream;
pub mod packet;
pub mod timestamp;
pub mod format;
pub mod rational;

pub use error::{Error, Result};
pub use packet::{Packet, PacketFlags, SideData, SideDataType};
pub use timestamp::{TimeBase, NOPTS};
pub use format::{CodecId, ContainerFormat, MediaType};
pub use rational::{Rational, Rounding, RoundingMode};
