use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Frame length in samples (one FFT)
pub const FFT_SIZE: usize = 1024;
/// Hop between consecutive frames (50% overlap)
pub const HOP_SIZE: usize = 512;

/// Window sums below this are left unnormalized during overlap-add
const WINDOW_SUM_EPSILON: f32 = 1e-8;

/// One-sided complex spectrogram, stored frame by frame
#[derive(Debug, Clone)]
pub struct Spectrogram {
    frames: Vec<Vec<Complex32>>,
}

impl Spectrogram {
    /// Number of time frames
    #[must_use]
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// Number of frequency bins per frame (`FFT_SIZE / 2 + 1`)
    #[must_use]
    pub const fn n_bins() -> usize {
        FFT_SIZE / 2 + 1
    }

    /// Frequency bins of frame `t`
    #[must_use]
    pub fn frame(&self, t: usize) -> &[Complex32] {
        &self.frames[t]
    }

    /// Mutable iterator over frames
    pub fn frames_mut(&mut self) -> impl Iterator<Item = &mut [Complex32]> {
        self.frames.iter_mut().map(Vec::as_mut_slice)
    }
}

/// Hann-windowed STFT with overlap-add inverse
pub struct Stft {
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl Default for Stft {
    fn default() -> Self {
        Self::new()
    }
}

impl Stft {
    /// Plans forward and inverse FFTs of `FFT_SIZE` points
    #[must_use]
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            window: hann_window(FFT_SIZE),
            forward: planner.plan_fft_forward(FFT_SIZE),
            inverse: planner.plan_fft_inverse(FFT_SIZE),
        }
    }

    /// Number of full frames that fit in `len` samples (no padding)
    #[must_use]
    pub const fn frame_count(len: usize) -> usize {
        if len < FFT_SIZE {
            0
        } else {
            1 + (len - FFT_SIZE) / HOP_SIZE
        }
    }

    /// Computes the spectrogram of `audio`
    ///
    /// Frames are read straight out of the input slice; trailing samples that
    /// do not fill a frame are not analyzed.
    #[must_use]
    pub fn forward(&self, audio: &[f32]) -> Spectrogram {
        let mut buffer = vec![Complex32::default(); FFT_SIZE];
        let mut scratch = vec![Complex32::default(); self.forward.get_inplace_scratch_len()];
        let mut frames = Vec::with_capacity(Self::frame_count(audio.len()));

        for frame in audio.windows(FFT_SIZE).step_by(HOP_SIZE) {
            for (dst, (&sample, &w)) in buffer.iter_mut().zip(frame.iter().zip(&self.window)) {
                *dst = Complex32::new(sample * w, 0.0);
            }
            self.forward.process_with_scratch(&mut buffer, &mut scratch);
            frames.push(buffer[..Spectrogram::n_bins()].to_vec());
        }

        Spectrogram { frames }
    }

    /// Reconstructs a signal of exactly `output_len` samples by overlap-add
    ///
    /// Each inverse frame is windowed again; the sum is divided by the
    /// accumulated squared window wherever it is non-negligible. Samples past
    /// the last frame are zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn inverse(&self, spectrogram: &Spectrogram, output_len: usize) -> Vec<f32> {
        let n_frames = spectrogram.n_frames();
        if n_frames == 0 {
            return vec![0.0; output_len];
        }

        let ola_len = (n_frames - 1) * HOP_SIZE + FFT_SIZE;
        let mut output = vec![0.0_f32; ola_len];
        let mut window_sum = vec![0.0_f32; ola_len];

        let mut buffer = vec![Complex32::default(); FFT_SIZE];
        let mut scratch = vec![Complex32::default(); self.inverse.get_inplace_scratch_len()];
        let scale = 1.0 / FFT_SIZE as f32;
        let nyquist = FFT_SIZE / 2;

        for (t, bins) in spectrogram.frames.iter().enumerate() {
            // Rebuild the Hermitian-symmetric full spectrum
            buffer[0] = Complex32::new(bins[0].re, 0.0);
            for (k, &bin) in bins.iter().enumerate().take(nyquist).skip(1) {
                buffer[k] = bin;
                buffer[FFT_SIZE - k] = bin.conj();
            }
            buffer[nyquist] = Complex32::new(bins[nyquist].re, 0.0);

            self.inverse.process_with_scratch(&mut buffer, &mut scratch);

            let start = t * HOP_SIZE;
            let out = &mut output[start..start + FFT_SIZE];
            let sums = &mut window_sum[start..start + FFT_SIZE];
            for (i, &w) in self.window.iter().enumerate() {
                out[i] += buffer[i].re * scale * w;
                sums[i] += w * w;
            }
        }

        for (sample, &sum) in output.iter_mut().zip(&window_sum) {
            if sum > WINDOW_SUM_EPSILON {
                *sample /= sum;
            }
        }

        output.resize(output_len, 0.0);
        output
    }
}

/// Symmetric Hann window
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn hann_window(len: usize) -> Vec<f32> {
    if len == 1 {
        return vec![1.0];
    }
    let denom = (len - 1) as f64;
    (0..len)
        .map(|n| {
            let phase = 2.0 * std::f64::consts::PI * n as f64 / denom;
            0.5_f64.mul_add(-phase.cos(), 0.5) as f32
        })
        .collect()
}
