//! Recorder configuration

use crate::error::{MuxError, Result};
use crate::filter;
use recmux_containers::MuxOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// When a finished recording is rewritten instead of renamed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemuxTrigger {
    /// A live video stream was registered through `add_video_stream`
    #[default]
    LiveVideoStream,
    /// A registered video stream carries no codec configuration
    MissingVideoConfig,
    /// Always remux
    Always,
    /// Never remux
    Never,
}

/// Recorder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxerConfig {
    /// Directory receiving recordings
    pub output_dir: PathBuf,
    /// Suffix appended to the file name while recording
    pub temp_extension: String,
    /// Place the movie header ahead of the media data
    pub fast_start: bool,
    /// Bitstream filter for audio streams negotiated from a source
    pub audio_filter: Option<String>,
    /// Bitstream filter for video streams negotiated from a source
    pub video_filter: Option<String>,
    /// Drop video until the first key frame
    pub check_first_keyframe: bool,
    /// Remux policy
    pub remux_trigger: RemuxTrigger,
    /// Delay before the finished file is promoted, in milliseconds
    pub promote_delay_ms: u64,
    /// Delay before the upload starts, in milliseconds
    pub upload_delay_ms: u64,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            temp_extension: ".tmp_extension".to_string(),
            fast_start: true,
            audio_filter: None,
            video_filter: None,
            check_first_keyframe: true,
            remux_trigger: RemuxTrigger::LiveVideoStream,
            promote_delay_ms: 0,
            upload_delay_ms: 1000,
        }
    }
}

impl MuxerConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The temporary extension is empty or equals `.mp4`
    /// - A filter name is unknown
    pub fn validate(&self) -> Result<()> {
        if self.temp_extension.is_empty() {
            return Err(MuxError::Configuration("temp extension must not be empty".into()));
        }
        if self.temp_extension.eq_ignore_ascii_case(".mp4") {
            return Err(MuxError::Configuration(
                "temp extension must differ from the final extension".into(),
            ));
        }

        for name in self.audio_filter.iter().chain(self.video_filter.iter()) {
            if !filter::is_known_filter(name) {
                return Err(MuxError::Configuration(format!("unknown filter {:?}", name)));
            }
        }

        Ok(())
    }

    /// Writer options derived from the configuration.
    pub fn mux_options(&self) -> MuxOptions {
        let mut options = MuxOptions::new();
        if self.fast_start {
            options.insert("movflags".to_string(), "+faststart".to_string());
        }
        options
    }

    /// Path of the finished recording.
    pub fn final_path(&self, stream_id: &str) -> PathBuf {
        self.output_dir.join(format!("{}.mp4", stream_id))
    }

    /// Path written while recording.
    pub fn temp_path(&self, stream_id: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.mp4{}", stream_id, self.temp_extension))
    }

    /// Promotion delay.
    pub fn promote_delay(&self) -> Duration {
        Duration::from_millis(self.promote_delay_ms)
    }

    /// Upload delay.
    pub fn upload_delay(&self) -> Duration {
        Duration::from_millis(self.upload_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MuxerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.fast_start);
        assert!(config.check_first_keyframe);
        assert_eq!(config.remux_trigger, RemuxTrigger::LiveVideoStream);
        assert_eq!(config.upload_delay(), Duration::from_secs(1));
        assert_eq!(config.mux_options().get("movflags").map(String::as_str), Some("+faststart"));
    }

    #[test]
    fn test_paths() {
        let config = MuxerConfig {
            output_dir: PathBuf::from("/rec"),
            ..Default::default()
        };
        assert_eq!(config.final_path("s1"), PathBuf::from("/rec/s1.mp4"));
        assert_eq!(config.temp_path("s1"), PathBuf::from("/rec/s1.mp4.tmp_extension"));
    }

    #[test]
    fn test_validate_rejects() {
        let empty = MuxerConfig {
            temp_extension: String::new(),
            ..Default::default()
        };
        assert!(matches!(empty.validate(), Err(MuxError::Configuration(_))));

        let same = MuxerConfig {
            temp_extension: ".mp4".into(),
            ..Default::default()
        };
        assert!(matches!(same.validate(), Err(MuxError::Configuration(_))));

        let filter = MuxerConfig {
            audio_filter: Some("bogus".into()),
            ..Default::default()
        };
        assert!(matches!(filter.validate(), Err(MuxError::Configuration(_))));
    }

    #[test]
    fn test_no_faststart_option() {
        let config = MuxerConfig {
            fast_start: false,
            ..Default::default()
        };
        assert!(config.mux_options().is_empty());
    }

    #[test]
    fn test_partial_json() {
        let config: MuxerConfig =
            serde_json::from_str(r#"{"fast_start": false, "remux_trigger": "never"}"#).unwrap();
        assert!(!config.fast_start);
        assert_eq!(config.remux_trigger, RemuxTrigger::Never);
        assert_eq!(config.temp_extension, ".tmp_extension");
    }
}
