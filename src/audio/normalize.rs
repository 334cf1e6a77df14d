use tracing::debug;

use super::{peak, rms};

/// Target RMS level (about -26 dBFS)
pub const TARGET_RMS: f32 = 0.05;
/// Maximum gain applied (about +9.5 dB)
pub const MAX_GAIN: f32 = 3.0;
/// Peak ceiling after gain
pub const CLIP_THRESHOLD: f32 = 0.99;
/// Buffers quieter than this are left untouched
pub const SILENCE_RMS: f32 = 1e-6;

/// Scales `audio` toward [`TARGET_RMS`] without boosting past [`MAX_GAIN`]
///
/// If the gained signal would peak above [`CLIP_THRESHOLD`], the whole buffer
/// is scaled down so its peak sits exactly on the ceiling. Effectively silent
/// input is returned unchanged.
#[must_use]
pub fn normalize(audio: &[f32]) -> Vec<f32> {
    let level = rms(audio);
    if level < SILENCE_RMS {
        return audio.to_vec();
    }

    let gain = (TARGET_RMS / level).min(MAX_GAIN);
    let mut output: Vec<f32> = audio.iter().map(|&s| s * gain).collect();

    let gained_peak = peak(&output);
    if gained_peak > CLIP_THRESHOLD {
        let scale = CLIP_THRESHOLD / gained_peak;
        for sample in &mut output {
            *sample *= scale;
        }
        debug!(peak = %gained_peak, "gain reduced to avoid clipping");
    }

    debug!(rms = %level, gain = %gain, "normalized");
    output
}
