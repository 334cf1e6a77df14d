use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info};

use super::{
    detect_speech, normalize, peak, reduce_noise, rms, samples_to_seconds, segment_long_audio,
    trim_silence, SpeechSegment,
};
use crate::config::ProcessorConfig;
use crate::error::ProcessingError;

/// Output of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    /// Trimmed, denoised and normalized audio, ready for transcription
    pub audio: Vec<f32>,
    /// Untouched input, kept for backup and retry
    pub raw_audio: Vec<f32>,
    /// Whether VAD found any speech
    pub has_speech: bool,
    /// Fraction of input samples classified as speech (before trimming)
    pub speech_ratio: f32,
    /// Peak absolute amplitude of `audio`
    pub peak_level: f32,
    /// Duration of `audio` in seconds
    pub duration: f64,
    /// Speech segments relative to `audio`
    pub segments: Vec<SpeechSegment>,
    /// Sample rate of both buffers
    pub sample_rate: u32,
}

impl ProcessingResult {
    fn empty(sample_rate: u32) -> Self {
        Self {
            audio: Vec::new(),
            raw_audio: Vec::new(),
            has_speech: false,
            speech_ratio: 0.0,
            peak_level: 0.0,
            duration: 0.0,
            segments: Vec::new(),
            sample_rate,
        }
    }
}

/// Runs VAD, silence trimming, noise reduction and normalization
///
/// The processor keeps no state between calls besides a handle to the stage
/// flags, which are re-read at the start of every [`AudioProcessor::process`]
/// call. Independent buffers may be processed concurrently from several threads.
#[derive(Debug, Clone)]
pub struct AudioProcessor {
    config: Arc<RwLock<ProcessorConfig>>,
}

impl AudioProcessor {
    /// Creates a processor reading its stage flags from a shared handle
    #[must_use]
    pub const fn new(config: Arc<RwLock<ProcessorConfig>>) -> Self {
        Self { config }
    }

    /// Creates a processor with fixed stage flags
    #[must_use]
    pub fn with_config(config: ProcessorConfig) -> Self {
        Self::new(Arc::new(RwLock::new(config)))
    }

    /// Current stage flags
    #[must_use]
    pub fn config(&self) -> ProcessorConfig {
        // Flags are plain Copy data, so a poisoned lock still holds a usable value
        *self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the full pipeline on `audio`
    ///
    /// Empty input yields an empty result with `has_speech == false`, whatever
    /// the sample rate.
    ///
    /// # Errors
    /// Returns error if `audio` is non-empty and `sample_rate` is zero or a
    /// sample is NaN/infinity
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn process(
        &self,
        audio: &[f32],
        sample_rate: u32,
    ) -> Result<ProcessingResult, ProcessingError> {
        if audio.is_empty() {
            return Ok(ProcessingResult::empty(sample_rate));
        }
        validate(audio, sample_rate)?;

        let _span = tracing::debug_span!("process", samples = audio.len()).entered();
        let start = Instant::now();
        let config = self.config();
        let input_duration = samples_to_seconds(audio.len(), sample_rate);
        info!(
            duration_s = %format!("{input_duration:.2}"),
            vad = config.vad_enabled,
            noise_reduction = config.noise_reduction,
            normalize = config.normalize_audio,
            "audio pipeline started"
        );

        let segments = if config.vad_enabled {
            detect_speech(audio, sample_rate)
        } else {
            vec![SpeechSegment::new(0, audio.len())]
        };

        if segments.is_empty() {
            info!("no speech detected");
            return Ok(ProcessingResult {
                audio: audio.to_vec(),
                raw_audio: audio.to_vec(),
                has_speech: false,
                speech_ratio: 0.0,
                peak_level: peak(audio),
                duration: input_duration,
                segments: Vec::new(),
                sample_rate,
            });
        }

        let speech_samples: usize = segments.iter().map(SpeechSegment::len).sum();
        let speech_ratio = (speech_samples as f64 / audio.len() as f64).min(1.0) as f32;

        let (mut processed, segments) = if config.vad_enabled {
            let (trimmed, adjusted) = trim_silence(audio, &segments, sample_rate);
            info!(
                duration_s = %format!("{:.2}", samples_to_seconds(trimmed.len(), sample_rate)),
                removed_s = %format!("{:.2}", samples_to_seconds(audio.len() - trimmed.len(), sample_rate)),
                "silence trimmed"
            );
            (trimmed, adjusted)
        } else {
            (audio.to_vec(), segments)
        };

        if config.noise_reduction {
            processed = reduce_noise(&processed, &segments, sample_rate);
        } else {
            info!("noise reduction skipped (disabled)");
        }

        if config.normalize_audio {
            let pre_rms = rms(&processed);
            processed = normalize(&processed);
            let post_rms = rms(&processed);
            if pre_rms > 1e-6 {
                let gain_db = 20.0 * (post_rms / pre_rms).log10();
                info!(gain_db = %format!("{gain_db:+.1}"), "normalization applied");
            }
        } else {
            info!("normalization skipped (disabled)");
        }

        let result = ProcessingResult {
            peak_level: peak(&processed),
            duration: samples_to_seconds(processed.len(), sample_rate),
            audio: processed,
            raw_audio: audio.to_vec(),
            has_speech: true,
            speech_ratio,
            segments,
            sample_rate,
        };

        debug!(
            speech_ratio = %result.speech_ratio,
            peak = %result.peak_level,
            segments = result.segments.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "audio pipeline complete"
        );

        Ok(result)
    }

    /// Splits long audio at speech gaps; see [`segment_long_audio`]
    ///
    /// # Errors
    /// Returns error if `sample_rate` is zero or `audio` contains NaN/infinity
    pub fn segment_long_audio(
        &self,
        audio: &[f32],
        sample_rate: u32,
    ) -> Result<Vec<Vec<f32>>, ProcessingError> {
        validate(audio, sample_rate)?;
        Ok(segment_long_audio(audio, sample_rate))
    }
}

fn validate(audio: &[f32], sample_rate: u32) -> Result<(), ProcessingError> {
    if sample_rate == 0 {
        return Err(ProcessingError::InvalidSampleRate(sample_rate));
    }
    if let Some(index) = audio.iter().position(|s| !s.is_finite()) {
        return Err(ProcessingError::NonFiniteSample { index });
    }
    Ok(())
}
