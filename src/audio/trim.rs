use tracing::debug;

use super::{seconds_to_samples, SpeechSegment};

/// Padding kept around the outermost speech segments, in seconds
pub const TRIM_PAD_SECONDS: f64 = 0.3;

/// Trims leading and trailing silence, keeping interior pauses intact
///
/// The buffer is cut to `[first.start - pad, last.end + pad)` and the segments
/// are re-expressed relative to the trimmed buffer. With no segments the input
/// is returned unchanged.
#[must_use]
pub fn trim_silence(
    audio: &[f32],
    segments: &[SpeechSegment],
    sample_rate: u32,
) -> (Vec<f32>, Vec<SpeechSegment>) {
    let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
        return (audio.to_vec(), segments.to_vec());
    };

    let pad = seconds_to_samples(TRIM_PAD_SECONDS, sample_rate);
    let trim_start = first.start.saturating_sub(pad).min(audio.len());
    let trim_end = last.end.saturating_add(pad).min(audio.len()).max(trim_start);

    let trimmed = audio[trim_start..trim_end].to_vec();
    let adjusted = segments
        .iter()
        .map(|seg| {
            SpeechSegment::new(
                seg.start.saturating_sub(trim_start).min(trimmed.len()),
                seg.end.saturating_sub(trim_start).min(trimmed.len()),
            )
        })
        .collect();

    debug!(
        trim_start,
        trim_end,
        removed = audio.len() - trimmed.len(),
        "edge silence trimmed"
    );

    (trimmed, adjusted)
}
