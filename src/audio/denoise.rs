//! Spectral-gating noise reduction
//!
//! A per-bin noise floor is estimated from the frames VAD marked as non-speech;
//! bins that stay below twice that floor are attenuated (never zeroed). Long
//! recordings are processed in overlapping chunks to bound memory, then
//! stitched back together with a linear crossfade.

use std::time::Instant;
use tracing::{debug, info, warn};

use super::stft::{Stft, FFT_SIZE, HOP_SIZE};
use super::{rms, seconds_to_samples, SpeechSegment};

/// Recordings longer than this are denoised chunk by chunk
pub const CHUNKED_THRESHOLD_SECONDS: f64 = 180.0;
/// Chunk length for the chunked path
pub const CHUNK_SECONDS: f64 = 60.0;
/// Overlap between consecutive chunks, crossfaded on stitching
pub const CHUNK_OVERLAP_SECONDS: f64 = 0.5;
/// Bins below `noise_floor * GATE_MULTIPLIER` are gated
pub const GATE_MULTIPLIER: f32 = 2.0;
/// Gain applied to gated bins
pub const GATE_ATTENUATION: f32 = 0.3;
/// Skip reduction when mean noise floor exceeds this fraction of signal RMS
pub const NOISE_FLOOR_SAFETY_RATIO: f32 = 0.3;

/// Fraction of quietest frames used as a noise proxy when every frame is speech
const QUIET_FRAME_FRACTION: f64 = 0.05;
/// Scale applied to the quiet-frame proxy (it still carries some speech)
const QUIET_FRAME_SCALE: f32 = 0.5;
const MIN_SIGNAL_RMS: f32 = 1e-6;

/// Result of gating one contiguous buffer
#[derive(Debug)]
enum Gate {
    Applied { audio: Vec<f32>, floor_ratio: f32 },
    TooShort,
    Silent,
    UnreliableFloor { floor_ratio: f32 },
}

/// Denoises `audio` using `segments` (relative to `audio`) to locate noise
///
/// Always returns a buffer of the same length. When the buffer is too short
/// to analyze, silent, or its noise estimate is unreliable, the input is
/// returned unchanged.
#[must_use]
pub fn reduce_noise(audio: &[f32], segments: &[SpeechSegment], sample_rate: u32) -> Vec<f32> {
    let _span = tracing::debug_span!("reduce_noise", samples = audio.len()).entered();
    let start = Instant::now();
    let stft = Stft::new();

    let chunked_threshold = seconds_to_samples(CHUNKED_THRESHOLD_SECONDS, sample_rate);
    if sample_rate > 0 && audio.len() > chunked_threshold {
        let output = reduce_noise_chunked(&stft, audio, segments, sample_rate);
        info!(
            samples = audio.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "noise reduction applied (chunked)"
        );
        return output;
    }

    match gate(&stft, audio, segments) {
        Gate::Applied { audio, floor_ratio } => {
            info!(
                floor_ratio = %format!("{floor_ratio:.3}"),
                elapsed_ms = start.elapsed().as_millis(),
                "noise reduction applied"
            );
            audio
        }
        Gate::TooShort => {
            info!("noise reduction skipped (audio too short)");
            audio.to_vec()
        }
        Gate::Silent => {
            info!("noise reduction skipped (silent input)");
            audio.to_vec()
        }
        Gate::UnreliableFloor { floor_ratio } => {
            warn!(
                floor_ratio = %format!("{floor_ratio:.2}"),
                "noise reduction skipped (noise floor too high relative to signal)"
            );
            audio.to_vec()
        }
    }
}

/// Spectral gating of a single contiguous buffer
fn gate(stft: &Stft, audio: &[f32], segments: &[SpeechSegment]) -> Gate {
    if audio.len() < FFT_SIZE {
        return Gate::TooShort;
    }

    let signal_rms = rms(audio);
    if signal_rms < MIN_SIGNAL_RMS {
        return Gate::Silent;
    }

    let mut spectrogram = stft.forward(audio);
    let magnitudes: Vec<Vec<f32>> = (0..spectrogram.n_frames())
        .map(|t| spectrogram.frame(t).iter().map(|c| c.norm()).collect())
        .collect();

    let noise_floor = estimate_noise_floor(&magnitudes, segments);
    let floor_ratio = mean(&noise_floor) / signal_rms;
    if floor_ratio > NOISE_FLOOR_SAFETY_RATIO {
        return Gate::UnreliableFloor { floor_ratio };
    }

    let thresholds: Vec<f32> = noise_floor.iter().map(|f| f * GATE_MULTIPLIER).collect();
    for (frame, mags) in spectrogram.frames_mut().zip(&magnitudes) {
        for ((bin, &mag), &threshold) in frame.iter_mut().zip(mags).zip(&thresholds) {
            if mag < threshold {
                *bin *= GATE_ATTENUATION;
            }
        }
    }

    let mut output = stft.inverse(&spectrogram, audio.len());
    // Window edges can amplify after overlap-add normalization
    for sample in &mut output {
        *sample = sample.clamp(-1.0, 1.0);
    }

    Gate::Applied {
        audio: output,
        floor_ratio,
    }
}

/// Per-bin noise floor from non-speech frames
///
/// Frame `t` counts as speech when it falls in `start / hop ..= end / hop` of
/// any segment. Without non-speech frames, the quietest 5% of frames (by mean
/// magnitude) stand in, scaled down by half.
fn estimate_noise_floor(magnitudes: &[Vec<f32>], segments: &[SpeechSegment]) -> Vec<f32> {
    let n_frames = magnitudes.len();
    let mut is_speech = vec![false; n_frames];
    for seg in segments {
        let first = seg.start / HOP_SIZE;
        let last = (seg.end / HOP_SIZE + 1).min(n_frames);
        for flag in is_speech.iter_mut().take(last).skip(first) {
            *flag = true;
        }
    }

    let noise_frames: Vec<usize> = (0..n_frames).filter(|&t| !is_speech[t]).collect();
    if !noise_frames.is_empty() {
        debug!(
            noise_frames = noise_frames.len(),
            total_frames = n_frames,
            "noise floor from non-speech frames"
        );
        return bin_medians(magnitudes, &noise_frames);
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let quiet_count = ((n_frames as f64 * QUIET_FRAME_FRACTION).ceil() as usize).max(1);

    let frame_means: Vec<f32> = magnitudes.iter().map(|m| mean(m)).collect();
    let mut order: Vec<usize> = (0..n_frames).collect();
    order.sort_by(|&a, &b| frame_means[a].total_cmp(&frame_means[b]));
    order.truncate(quiet_count);

    debug!(
        quiet_frames = order.len(),
        total_frames = n_frames,
        "no non-speech frames, using quietest frames as noise proxy"
    );

    bin_medians(magnitudes, &order)
        .into_iter()
        .map(|m| m * QUIET_FRAME_SCALE)
        .collect()
}

/// Median magnitude per frequency bin across the selected frames
fn bin_medians(magnitudes: &[Vec<f32>], frames: &[usize]) -> Vec<f32> {
    let n_bins = magnitudes.first().map_or(0, Vec::len);
    let mut column = Vec::with_capacity(frames.len());

    (0..n_bins)
        .map(|bin| {
            column.clear();
            column.extend(frames.iter().map(|&t| magnitudes[t][bin]));
            median(&mut column)
        })
        .collect()
}

/// Median, averaging the two middle values for even counts
fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Chunked gating with linear crossfade over each chunk overlap
///
/// The write cursor advances by `chunk - overlap` per chunk, so the output has
/// exactly the input length.
fn reduce_noise_chunked(
    stft: &Stft,
    audio: &[f32],
    segments: &[SpeechSegment],
    sample_rate: u32,
) -> Vec<f32> {
    let chunk_len = seconds_to_samples(CHUNK_SECONDS, sample_rate).max(2);
    let overlap = seconds_to_samples(CHUNK_OVERLAP_SECONDS, sample_rate).min(chunk_len - 1);
    let step = chunk_len - overlap;

    let mut output = vec![0.0_f32; audio.len()];
    let mut start = 0;
    let mut chunk_index = 0_usize;
    let mut gated_chunks = 0_usize;

    loop {
        let end = (start + chunk_len).min(audio.len());
        let chunk = &audio[start..end];
        let local_segments = localize_segments(segments, start, end);

        let processed = match gate(stft, chunk, &local_segments) {
            Gate::Applied { audio, floor_ratio } => {
                gated_chunks += 1;
                debug!(chunk = chunk_index, floor_ratio = %floor_ratio, "chunk gated");
                audio
            }
            other => {
                debug!(chunk = chunk_index, outcome = ?other, "chunk left unchanged");
                chunk.to_vec()
            }
        };

        let fade = if start == 0 {
            0
        } else {
            overlap.min(processed.len())
        };
        crossfade_into(&mut output[start..end], &processed, fade);

        chunk_index += 1;
        if end == audio.len() {
            break;
        }
        start += step;
    }

    debug!(
        chunks = chunk_index,
        gated = gated_chunks,
        chunk_len,
        overlap,
        "chunked noise reduction complete"
    );

    output
}

/// Writes `incoming` over `out`, ramping linearly from the existing samples
/// over the first `fade` samples
///
/// Sample `j < fade` becomes `out[j] * (1 - j/fade) + incoming[j] * j/fade`;
/// everything from `fade` on is copied from `incoming`. Both slices have the
/// same length.
#[allow(clippy::cast_precision_loss)]
fn crossfade_into(out: &mut [f32], incoming: &[f32], fade: usize) {
    let fade = fade.min(out.len());
    for (j, (dst, &sample)) in out.iter_mut().zip(incoming).take(fade).enumerate() {
        let t = j as f32 / fade as f32;
        *dst = (*dst).mul_add(1.0 - t, sample * t);
    }
    out[fade..].copy_from_slice(&incoming[fade..]);
}

/// Clips `segments` to `[start, end)` and shifts them to chunk-local coordinates
fn localize_segments(segments: &[SpeechSegment], start: usize, end: usize) -> Vec<SpeechSegment> {
    segments
        .iter()
        .filter_map(|seg| {
            let local_start = seg.start.max(start);
            let local_end = seg.end.min(end);
            if local_start < local_end {
                Some(SpeechSegment::new(local_start - start, local_end - start))
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::float_cmp
)]
mod tests {
    use super::*;

    const SR: u32 = 16_000;

    /// Deterministic uniform noise in `[-amplitude, amplitude)`
    fn lcg_noise(len: usize, amplitude: f32, seed: u64) -> Vec<f32> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                let unit = (state >> 40) as f32 / 16_777_216.0;
                unit.mul_add(2.0, -1.0) * amplitude
            })
            .collect()
    }

    fn sine(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SR as f32).sin() * amplitude)
            .collect()
    }

    #[test]
    fn test_length_preserved() {
        for len in [0, 10, 1023, 1024, 1500, 16_001, 32_000] {
            let audio = lcg_noise(len, 0.2, 7);
            let segments = [SpeechSegment::new(0, len / 2)];
            assert_eq!(reduce_noise(&audio, &segments, SR).len(), len, "len {len}");
        }
    }

    #[test]
    fn test_too_short_returns_input() {
        let audio = sine(1000, 0.5);
        assert_eq!(reduce_noise(&audio, &[], SR), audio);
    }

    #[test]
    fn test_unreliable_floor_returns_input_exactly() {
        // Broadband noise everywhere: the spectral floor dwarfs 30% of signal RMS
        let audio = lcg_noise(32_000, 0.1, 42);
        let output = reduce_noise(&audio, &[], SR);
        assert_eq!(output, audio);
    }

    #[test]
    fn test_silent_input_returns_input() {
        let audio = vec![0.0; 4096];
        assert_eq!(reduce_noise(&audio, &[], SR), audio);
    }

    #[test]
    fn test_gating_attenuates_noise_and_keeps_speech() {
        let mut audio = lcg_noise(32_000, 0.001, 3);
        for (dst, s) in audio[8_000..24_000].iter_mut().zip(sine(16_000, 0.5)) {
            *dst += s;
        }
        let segments = [SpeechSegment::new(8_000, 24_000)];

        let output = reduce_noise(&audio, &segments, SR);
        assert_eq!(output.len(), audio.len());

        let noise_in = rms(&audio[1_024..7_000]);
        let noise_out = rms(&output[1_024..7_000]);
        assert!(noise_out < noise_in * 0.8, "{noise_out} vs {noise_in}");

        let speech_in = rms(&audio[10_000..22_000]);
        let speech_out = rms(&output[10_000..22_000]);
        assert!((speech_out - speech_in).abs() < speech_in * 0.1);

        assert!(output.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_noise_floor_from_non_speech_frames() {
        // Frames 0..4 quiet, 4..8 loud; speech covers samples of frames 4..8
        let magnitudes: Vec<Vec<f32>> = (0..8)
            .map(|t| if t < 4 { vec![1.0, 2.0] } else { vec![50.0, 60.0] })
            .collect();
        let segments = [SpeechSegment::new(4 * HOP_SIZE, 7 * HOP_SIZE)];

        assert_eq!(estimate_noise_floor(&magnitudes, &segments), vec![1.0, 2.0]);
    }

    #[test]
    fn test_noise_floor_fallback_uses_quietest_frames() {
        let magnitudes: Vec<Vec<f32>> = (0..20)
            .map(|t| {
                let level = if t == 13 { 4.0 } else { 10.0 + t as f32 };
                vec![level, level * 2.0]
            })
            .collect();
        let segments = [SpeechSegment::new(0, 20 * HOP_SIZE)];

        // ceil(5% of 20) = 1 frame, halved
        assert_eq!(estimate_noise_floor(&magnitudes, &segments), vec![2.0, 4.0]);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&mut []), 0.0);
    }

    #[test]
    fn test_localize_segments_clips_to_chunk() {
        let segments = [
            SpeechSegment::new(0, 50),
            SpeechSegment::new(80, 150),
            SpeechSegment::new(190, 400),
        ];
        assert_eq!(
            localize_segments(&segments, 100, 200),
            vec![SpeechSegment::new(0, 50), SpeechSegment::new(90, 100)]
        );
    }

    #[test]
    fn test_chunked_path_preserves_length_and_content_when_skipped() {
        // At 1 kHz the chunked path starts past 180_000 samples
        let sample_rate = 1_000;
        let audio = lcg_noise(200_123, 0.1, 9);

        let output = reduce_noise(&audio, &[], sample_rate);

        assert_eq!(output.len(), audio.len());
        // Every chunk is left unchanged, so the crossfades blend identical samples
        for (a, b) in output.iter().zip(&audio) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_crossfade_ramps_linearly_into_incoming_chunk() {
        let mut out = vec![1.0; 10];
        let incoming = vec![0.0; 10];

        crossfade_into(&mut out, &incoming, 4);

        // Outgoing weight falls 1, 0.75, 0.5, 0.25 across the overlap
        let expected = [1.0, 0.75, 0.5, 0.25, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{out:?}");
        }
    }

    #[test]
    fn test_crossfade_weights_incoming_chunk_up() {
        let mut out = vec![-0.5; 6];
        let incoming = vec![0.5; 6];

        crossfade_into(&mut out, &incoming, 4);

        assert!((out[0] + 0.5).abs() < 1e-6);
        assert!((out[1] + 0.25).abs() < 1e-6);
        assert!(out[2].abs() < 1e-6);
        assert!((out[3] - 0.25).abs() < 1e-6);
        assert_eq!(&out[4..], &[0.5, 0.5]);
    }

    #[test]
    fn test_crossfade_without_overlap_copies_incoming() {
        let mut out = vec![1.0; 3];
        crossfade_into(&mut out, &[0.2; 3], 0);
        assert_eq!(out, vec![0.2, 0.2, 0.2]);
    }

    #[test]
    fn test_chunked_path_gates_quiet_noise() {
        let sample_rate = 1_000;
        let len = 190_000;
        let mut audio = lcg_noise(len, 0.001, 11);
        let speech: Vec<f32> = (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * 50.0 * i as f32 / 1_000.0).sin() * 0.5)
            .collect();
        // Speech in the middle 10 seconds of each minute
        let mut segments = Vec::new();
        for minute in 0..3 {
            let start = minute * 60_000 + 25_000;
            let end = start + 10_000;
            for (dst, s) in audio[start..end].iter_mut().zip(&speech[start..end]) {
                *dst += s;
            }
            segments.push(SpeechSegment::new(start, end));
        }

        let output = reduce_noise(&audio, &segments, sample_rate);

        assert_eq!(output.len(), len);
        let noise_in = rms(&audio[5_000..20_000]);
        let noise_out = rms(&output[5_000..20_000]);
        assert!(noise_out < noise_in);
    }
}
