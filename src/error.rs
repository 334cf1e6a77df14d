use std::path::PathBuf;
use thiserror::Error;

/// Contract violations rejected by the audio pipeline
///
/// The pipeline degrades gracefully on every runtime condition (silence, short
/// buffers, unreliable noise estimates); these variants only cover inputs a
/// caller should never hand over.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProcessingError {
    /// Sample rate must be positive
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    /// Buffer contains NaN or infinity
    #[error("non-finite sample at index {index}")]
    NonFiniteSample {
        /// Position of the first offending sample
        index: usize,
    },
}

/// Errors reading or writing WAV files
#[derive(Debug, Error)]
pub enum AudioIoError {
    /// File could not be opened or decoded
    #[error("failed to read WAV file {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying decoder error
        source: hound::Error,
    },

    /// File could not be created or encoded
    #[error("failed to write WAV file {path}: {source}")]
    Write {
        /// File path
        path: PathBuf,
        /// Underlying encoder error
        source: hound::Error,
    },

    /// Parent directory could not be created
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        /// Directory path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// WAV header describes something we cannot decode
    #[error("unsupported WAV format: {0}")]
    Unsupported(String),
}
