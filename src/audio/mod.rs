/// Spectral-gating noise reduction
pub mod denoise;
/// Loudness normalization
pub mod normalize;
/// Full pre-processing pipeline
pub mod processor;
/// Long-recording segmentation at speech gaps
pub mod segment;
/// Short-time Fourier transform
pub mod stft;
/// Edge silence trimming
pub mod trim;
/// Energy-based voice activity detection
pub mod vad;
/// WAV file decoding/encoding
pub mod wav;

pub use denoise::reduce_noise;
pub use normalize::normalize;
pub use processor::{AudioProcessor, ProcessingResult};
pub use segment::segment_long_audio;
pub use trim::trim_silence;
pub use vad::detect_speech;

/// Default sample rate expected by the transcription engines
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Half-open speech interval `[start, end)` in samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSegment {
    /// First sample of the interval
    pub start: usize,
    /// One past the last sample of the interval
    pub end: usize,
}

impl SpeechSegment {
    /// Creates a new segment
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of samples covered
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Whether the segment covers no samples
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Root-mean-square level of a buffer (0.0 for an empty buffer)
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Peak absolute amplitude (0.0 for an empty buffer)
#[must_use]
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |acc, &s| acc.max(s.abs()))
}

/// Converts a duration in seconds to a sample count at `sample_rate`
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub(crate) fn seconds_to_samples(seconds: f64, sample_rate: u32) -> usize {
    (seconds * f64::from(sample_rate)).round() as usize
}

/// Duration in seconds of `len` samples at `sample_rate`
#[allow(clippy::cast_precision_loss)]
pub(crate) fn samples_to_seconds(len: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    len as f64 / f64::from(sample_rate)
}
