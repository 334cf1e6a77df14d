/// Transcription engine contract and subprocess-backed engine
pub mod engine;
/// Processing, backup and segmented transcription of one recording
pub mod pipeline;

pub use engine::{CommandTranscriber, Transcriber, TranscriptionError};
pub use pipeline::{run_detached, transcribe_recording};
