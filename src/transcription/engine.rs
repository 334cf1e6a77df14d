use std::path::Path;
use std::process::Command;
use thiserror::Error;

use crate::error::ProcessingError;

/// Black-box speech-to-text engine working on WAV files
///
/// Production code uses [`CommandTranscriber`]; tests use `MockTranscriber`
/// (via `mockall`).
#[cfg_attr(test, mockall::automock)]
pub trait Transcriber: Send + Sync {
    /// Transcribe the WAV file at `audio_path` to text
    ///
    /// # Errors
    /// Returns error if the engine fails or produces no text
    fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError>;
}

/// Errors that can occur during transcription
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// VAD found no speech in the recording
    #[error("no speech detected")]
    NoSpeech,

    /// Engine succeeded but returned no text
    #[error("transcription engine returned no text")]
    Empty,

    /// Engine process could not be started
    #[error("failed to run transcription engine {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Engine ran but reported failure
    #[error("transcription engine failed: {0}")]
    Engine(String),

    /// Audio was rejected by the pipeline
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    /// Audio files for the engine could not be written
    #[error("failed to hand audio to the engine: {0:#}")]
    Handoff(#[from] anyhow::Error),

    /// Pipeline did not finish within the configured limit
    #[error("audio pipeline timed out after {}s", .0.as_secs_f64())]
    TimedOut(std::time::Duration),

    /// Pipeline thread could not be started or died without a result
    #[error("audio pipeline thread failed: {0}")]
    Worker(String),
}

/// Engine run as a subprocess: `program args... <wav path>`
///
/// The transcript is read from stdout.
#[derive(Debug, Clone)]
pub struct CommandTranscriber {
    program: String,
    args: Vec<String>,
}

impl CommandTranscriber {
    /// Creates a transcriber invoking `program` with leading `args`
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Engine program name
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Transcriber for CommandTranscriber {
    fn transcribe(&self, audio_path: &Path) -> Result<String, TranscriptionError> {
        let _span = tracing::debug_span!("transcription", program = %self.program).entered();

        if !audio_path.is_file() {
            return Err(TranscriptionError::Engine(format!(
                "no audio file at {}",
                audio_path.display()
            )));
        }

        let start = std::time::Instant::now();
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(audio_path)
            .output()
            .map_err(|source| TranscriptionError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let inference_duration = start.elapsed();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscriptionError::Engine(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_owned();

        tracing::info!(
            path = %audio_path.display(),
            text_len = text.len(),
            inference_ms = inference_duration.as_millis(),
            "transcription completed"
        );

        if text.is_empty() {
            return Err(TranscriptionError::Empty);
        }
        Ok(text)
    }
}
