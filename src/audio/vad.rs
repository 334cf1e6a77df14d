//! Energy-based voice activity detection
//!
//! The buffer is cut into non-overlapping 30 ms windows and each window is
//! classified by RMS energy against an adaptive threshold derived from the
//! recording's own noise floor. The constants below are empirical and tunable;
//! they are kept at their tuned values so segment boundaries stay stable.

use tracing::debug;

use super::{peak, rms, seconds_to_samples, SpeechSegment};

/// Analysis window length in seconds
pub const WINDOW_SECONDS: f64 = 0.03;
/// Percentile of window energies taken as the noise floor
pub const NOISE_FLOOR_PERCENTILE: f64 = 10.0;
/// Speech threshold as a multiple of the noise floor
pub const THRESHOLD_MULTIPLIER: f32 = 3.0;
/// Absolute lower bound for the speech threshold
pub const MIN_THRESHOLD: f32 = 0.003;
/// Median/floor ratio below which the recording is considered uniformly loud
pub const UNIFORM_ENERGY_RATIO: f32 = 2.0;
/// Minimum median energy for the uniform-loudness shortcut
pub const UNIFORM_MIN_MEDIAN: f32 = 0.01;
/// Majority-filter kernel, in windows
pub const SMOOTHING_WINDOWS: usize = 5;

/// Detects speech intervals in `audio`
///
/// Returns sorted, non-overlapping segments. An empty list means no speech;
/// `[(0, len)]` means the whole buffer is speech. Buffers shorter than one
/// window are reported as speech unless they are provably silent (all zeros).
#[must_use]
pub fn detect_speech(audio: &[f32], sample_rate: u32) -> Vec<SpeechSegment> {
    let _span = tracing::debug_span!("detect_speech", samples = audio.len()).entered();

    // Covers the empty buffer too
    if peak(audio) <= 0.0 {
        return Vec::new();
    }

    let window = seconds_to_samples(WINDOW_SECONDS, sample_rate).max(1);
    if audio.len() < window {
        debug!(samples = audio.len(), window, "buffer shorter than one window, assuming speech");
        return vec![SpeechSegment::new(0, audio.len())];
    }

    let energies: Vec<f32> = audio.chunks_exact(window).map(rms).collect();
    let mut sorted = energies.clone();
    sorted.sort_by(f32::total_cmp);

    let noise_floor = percentile(&sorted, NOISE_FLOOR_PERCENTILE);
    let median_energy = percentile(&sorted, 50.0);

    if noise_floor > 0.0
        && median_energy / noise_floor < UNIFORM_ENERGY_RATIO
        && median_energy > UNIFORM_MIN_MEDIAN
    {
        debug!(
            noise_floor = %noise_floor,
            median = %median_energy,
            "low dynamic range, treating whole buffer as speech"
        );
        return vec![SpeechSegment::new(0, audio.len())];
    }

    let threshold = (noise_floor * THRESHOLD_MULTIPLIER).max(MIN_THRESHOLD);
    let flags: Vec<bool> = energies.iter().map(|&e| e > threshold).collect();
    let smoothed = smooth_majority(&flags, SMOOTHING_WINDOWS);
    let segments = merge_windows(&smoothed, window, audio.len());

    debug!(
        windows = energies.len(),
        noise_floor = %noise_floor,
        threshold = %threshold,
        segments = segments.len(),
        "speech detection complete"
    );

    segments
}

/// Percentile of an ascending slice with linear interpolation between ranks
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn percentile(sorted: &[f32], pct: f64) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let fract = (rank - rank.floor()) as f32;
    (sorted[hi] - sorted[lo]).mul_add(fract, sorted[lo])
}

/// Centered majority filter: a window stays set only if more than half of
/// its `kernel`-wide neighbourhood is set. Positions past either end count as unset.
fn smooth_majority(flags: &[bool], kernel: usize) -> Vec<bool> {
    let half = kernel / 2;

    let mut prefix = Vec::with_capacity(flags.len() + 1);
    prefix.push(0_usize);
    for &flag in flags {
        let last = prefix.last().copied().unwrap_or(0);
        prefix.push(last + usize::from(flag));
    }

    (0..flags.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(flags.len());
            let votes = prefix[hi] - prefix[lo];
            votes * 2 > kernel
        })
        .collect()
}

/// Collapses per-window flags into sample intervals
fn merge_windows(flags: &[bool], window: usize, total_len: usize) -> Vec<SpeechSegment> {
    let mut segments = Vec::new();
    let mut open: Option<usize> = None;

    for (i, &speech) in flags.iter().enumerate() {
        match (speech, open) {
            (true, None) => open = Some(i * window),
            (false, Some(start)) => {
                segments.push(SpeechSegment::new(start, i * window));
                open = None;
            }
            _ => {}
        }
    }

    if let Some(start) = open {
        segments.push(SpeechSegment::new(start, total_len));
    }

    segments
}
