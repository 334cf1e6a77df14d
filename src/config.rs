use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::audio::DEFAULT_SAMPLE_RATE;

const DEFAULT_CONFIG: &str = r#"[audio]
sample_rate = 16000
min_duration = 0.0
vad_enabled = true
noise_reduction = true
normalize_audio = true
timeout = 0

[backup]
directory = "~/.whisper"
history_limit = 100
retention_days = 0

[telemetry]
enabled = true
log_path = "~/.whisper/whisper-voice.log"
"#;

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub backup: BackupConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate the pipeline runs at; input files are resampled to it
    pub sample_rate: u32,
    /// Recordings shorter than this (seconds) are rejected
    pub min_duration: f64,
    pub vad_enabled: bool,
    pub noise_reduction: bool,
    pub normalize_audio: bool,
    /// Pipeline timeout in seconds (0 = unlimited)
    pub timeout: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            min_duration: 0.0,
            vad_enabled: true,
            noise_reduction: true,
            normalize_audio: true,
            timeout: 0,
        }
    }
}

impl AudioConfig {
    /// Stage flags consumed by the audio processor
    #[must_use]
    pub const fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            vad_enabled: self.vad_enabled,
            noise_reduction: self.noise_reduction,
            normalize_audio: self.normalize_audio,
        }
    }
}

/// Per-stage switches, snapshotted at the start of every processing call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct ProcessorConfig {
    pub vad_enabled: bool,
    pub noise_reduction: bool,
    pub normalize_audio: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            vad_enabled: true,
            noise_reduction: true,
            normalize_audio: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BackupConfig {
    /// Where last_recording*.wav and audio_history/ live
    pub directory: String,
    /// Keep at most this many history recordings (0 = unlimited)
    pub history_limit: usize,
    /// Delete history recordings older than this many days (0 = never)
    pub retention_days: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: "~/.whisper".to_owned(),
            history_limit: 100,
            retention_days: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub log_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: "~/.whisper/whisper-voice.log".to_owned(),
        }
    }
}

impl Config {
    /// Load config from ~/.whisper/config.toml, creating it if missing
    ///
    /// # Errors
    /// Returns error if HOME is unset or the file cannot be read or parsed
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load config from `path`, writing the default file first if it does not exist
    ///
    /// # Errors
    /// Returns error if the file cannot be created, read or parsed
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            Self::create_default(path).context("failed to create default config")?;
        }

        let contents = fs::read_to_string(path).context("failed to read config file")?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a TOML document; missing keys take their defaults
    ///
    /// # Errors
    /// Returns error if `contents` is not valid TOML for this schema
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(contents).context("failed to parse config TOML")?;
        config.validate();
        Ok(config)
    }

    /// Replace out-of-range values with defaults
    fn validate(&mut self) {
        if self.audio.sample_rate == 0 {
            warn!(
                default = DEFAULT_SAMPLE_RATE,
                "audio.sample_rate must be positive, using default"
            );
            self.audio.sample_rate = DEFAULT_SAMPLE_RATE;
        } else if self.audio.sample_rate != DEFAULT_SAMPLE_RATE {
            warn!(
                sample_rate = self.audio.sample_rate,
                "transcription engines expect 16000 Hz audio"
            );
        }
        if !self.audio.min_duration.is_finite() || self.audio.min_duration < 0.0 {
            warn!(
                value = self.audio.min_duration,
                "audio.min_duration must be a non-negative number, using 0"
            );
            self.audio.min_duration = 0.0;
        }
    }

    /// Path of the config file
    ///
    /// # Errors
    /// Returns error if HOME is unset
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".whisper").join("config.toml"))
    }

    fn create_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        fs::write(path, DEFAULT_CONFIG).context("failed to write default config")?;
        Ok(())
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if the path starts with `~/` and HOME is unset
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}
