//! Whisper Voice - speech pre-processing for local voice-to-text
//!
//! Cleans up recordings (VAD, silence trimming, spectral noise gating, loudness
//! normalization), splits long ones at speech gaps and hands them to a
//! transcription engine.

/// Audio pre-processing pipeline and WAV I/O
pub mod audio;
/// Handoff files and audio history retention
pub mod backup;
/// Configuration management
pub mod config;
/// Typed errors for the audio layer
pub mod error;
/// Telemetry and logging
pub mod telemetry;
/// Transcription engine contract and orchestration
pub mod transcription;
