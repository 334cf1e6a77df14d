use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use tracing::{debug, info};

use crate::error::AudioIoError;

/// Reads a WAV file as mono `f32` samples at `target_rate`
///
/// Integer PCM is scaled to [-1, 1], multi-channel audio is averaged down to
/// one channel and other sample rates are linearly resampled.
///
/// # Errors
/// Returns error if the file cannot be opened or decoded, or uses a format
/// other than 8-32 bit integer or 32-bit float PCM
#[allow(clippy::cast_precision_loss)]
pub fn read_wav(path: &Path, target_rate: u32) -> Result<Vec<f32>, AudioIoError> {
    let _span = tracing::debug_span!("read_wav").entered();
    let read_err = |source| AudioIoError::Read {
        path: path.to_path_buf(),
        source,
    };

    let reader = WavReader::open(path).map_err(read_err)?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(AudioIoError::Unsupported(format!(
            "{} channels at {} Hz",
            spec.channels, spec.sample_rate
        )));
    }

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(read_err)?,
        (SampleFormat::Int, bits @ 1..=32) => {
            // Full-scale value for this bit depth
            let scale = (1_u64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(read_err)?
        }
        (format, bits) => {
            return Err(AudioIoError::Unsupported(format!(
                "{format:?} samples with {bits} bits"
            )));
        }
    };

    info!(
        path = %path.display(),
        rate = spec.sample_rate,
        channels = spec.channels,
        samples = samples.len(),
        "WAV file read"
    );

    let mono = downmix_to_mono(&samples, spec.channels);
    Ok(resample_linear(&mono, spec.sample_rate, target_rate))
}

/// Writes mono samples as 16-bit PCM, creating parent directories
///
/// NaN/infinite samples are written as silence and everything else is clipped
/// to [-1, 1].
///
/// # Errors
/// Returns error if the directory or file cannot be created or written
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), AudioIoError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| AudioIoError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let write_err = |source| AudioIoError::Write {
        path: path.to_path_buf(),
        source,
    };

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).map_err(write_err)?;
    for &sample in samples {
        writer.write_sample(to_pcm16(sample)).map_err(write_err)?;
    }
    writer.finalize().map_err(write_err)?;

    debug!(path = %path.display(), samples = samples.len(), "WAV file written");
    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn to_pcm16(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    // Clamped to [-32767, 32767], so the cast is exact
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

/// Averages interleaved frames down to one channel
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels_f64 = f64::from(channels);
    samples
        .chunks(usize::from(channels))
        .map(|frame| {
            let sum: f64 = frame.iter().map(|&s| f64::from(s)).sum();
            (sum / channels_f64) as f32
        })
        .collect()
}

/// Linear-interpolation resampling from `from_rate` to `to_rate`
///
/// Output length is `ceil(len * to_rate / from_rate)`. Equal rates (or a zero
/// rate on either side) return the input unchanged.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let start = std::time::Instant::now();
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;
    let last = samples.len() - 1;

    let resampled: Vec<f32> = (0..output_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let floor = (position.floor() as usize).min(last);
            let ceil = (floor + 1).min(last);
            let fract = position - position.floor();
            let s1 = f64::from(samples[floor]);
            let s2 = f64::from(samples[ceil]);
            s1.mul_add(1.0 - fract, s2 * fract) as f32
        })
        .collect();

    debug!(
        from_rate,
        to_rate,
        input_samples = samples.len(),
        output_samples = resampled.len(),
        resample_us = start.elapsed().as_micros(),
        "resampled"
    );

    resampled
}
