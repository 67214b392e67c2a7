//! CLI subcommand implementations.

pub mod codecs;
pub mod probe;
pub mod record;
pub mod remux;

pub use codecs::CmdCodecs;
pub use probe::CmdProbe;
pub use record::CmdRecord;
pub use remux::CmdRemux;
