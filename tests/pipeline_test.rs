//! End-to-end tests of the audio pre-processing pipeline
//!
//! Synthetic audio only: sine tones, zero runs and deterministic LCG noise.

#![allow(clippy::cast_precision_loss, clippy::float_cmp)]

use std::sync::{Arc, RwLock};
use whisper_voice::audio::segment::MAX_SEGMENT_SECONDS;
use whisper_voice::audio::{
    detect_speech, normalize, peak, reduce_noise, rms, segment_long_audio, trim_silence,
    AudioProcessor, SpeechSegment,
};
use whisper_voice::config::ProcessorConfig;

const SR: u32 = 16_000;
const SR_USIZE: usize = SR as usize;

fn sine(len: usize, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin() * amplitude
        })
        .collect()
}

/// Deterministic uniform noise in [-amplitude, amplitude]
fn lcg_noise(len: usize, amplitude: f32, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            ((state >> 8) as f32 / (1_u32 << 24) as f32).mul_add(2.0, -1.0) * amplitude
        })
        .collect()
}

/// Speech-like bursts: 1.0 s of tone followed by 0.2 s of silence, repeated
fn speech_bursts(seconds: usize, sample_rate: u32) -> Vec<f32> {
    let sr = sample_rate as usize;
    let cycle = sr + sr / 5;
    let tone = sine(sr, sample_rate, 0.3);
    (0..seconds * sr)
        .map(|i| {
            let pos = i % cycle;
            if pos < sr {
                tone[pos]
            } else {
                0.0
            }
        })
        .collect()
}

fn all_stages() -> AudioProcessor {
    AudioProcessor::with_config(ProcessorConfig::default())
}

#[test]
fn test_scenario_silence_has_no_speech() {
    let result = all_stages().process(&vec![0.0; 2 * SR_USIZE], SR).unwrap();

    assert!(!result.has_speech);
    assert_eq!(result.speech_ratio, 0.0);
    assert_eq!(result.peak_level, 0.0);
    assert!(result.segments.is_empty());
    assert_eq!(result.audio.len(), 2 * SR_USIZE);
}

#[test]
fn test_scenario_tone_is_speech() {
    let audio = sine(2 * SR_USIZE, SR, 0.3);

    let result = all_stages().process(&audio, SR).unwrap();

    assert!(result.has_speech);
    assert!(result.speech_ratio > 0.0 && result.speech_ratio <= 1.0);
    assert!(result.peak_level <= 0.99 + 1e-6);
    assert!(result.duration > 0.0 && result.duration <= 2.0);
    assert_eq!(result.raw_audio, audio);
}

#[test]
fn test_scenario_quiet_tone_boosted_with_capped_gain() {
    let processor = AudioProcessor::with_config(ProcessorConfig {
        vad_enabled: false,
        noise_reduction: false,
        normalize_audio: true,
    });
    let audio = sine(SR_USIZE, SR, 0.001);

    let result = processor.process(&audio, SR).unwrap();

    let gain = rms(&result.audio) / rms(&audio);
    assert!(gain > 1.0);
    assert!(gain <= 3.0 + 1e-3, "gain {gain}");
}

#[test]
fn test_scenario_long_silence_chunked_blindly() {
    let audio = vec![0.0; 301 * SR_USIZE];
    let max_len = MAX_SEGMENT_SECONDS as usize * SR_USIZE;

    let chunks = segment_long_audio(&audio, SR);

    assert!(chunks.len() >= 2);
    assert!(chunks.iter().all(|c| c.len() <= max_len && !c.is_empty()));
    assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), audio.len());
}

#[test]
fn test_scenario_split_at_long_gap() {
    let mut audio = speech_bursts(150, SR);
    audio.extend(vec![0.0; 10 * SR_USIZE]);
    audio.extend(speech_bursts(150, SR));
    assert_eq!(audio.len(), 310 * SR_USIZE);

    let chunks = segment_long_audio(&audio, SR);

    assert_eq!(chunks.len(), 2);
    let first = chunks[0].len();
    assert!(
        (150 * SR_USIZE..160 * SR_USIZE).contains(&first),
        "split at {:.2}s",
        first as f64 / f64::from(SR)
    );
    let max_len = MAX_SEGMENT_SECONDS as usize * SR_USIZE;
    assert!(chunks.iter().all(|c| c.len() <= max_len));
    assert_eq!(chunks.concat(), audio);
}

#[test]
fn test_processor_segmentation_matches_free_function() {
    let audio = vec![0.0; 301 * SR_USIZE];
    let chunks = all_stages().segment_long_audio(&audio, SR).unwrap();
    assert_eq!(chunks, segment_long_audio(&audio, SR));
}

#[test]
fn test_length_preserved_by_denoise_and_normalize() {
    let inputs = [
        Vec::new(),
        vec![0.2],
        lcg_noise(1_000, 0.1, 1),
        sine(SR_USIZE, SR, 0.3),
        {
            let mut a = vec![0.0; SR_USIZE];
            a.extend(sine(SR_USIZE, SR, 0.3));
            a.extend(lcg_noise(3_333, 0.01, 7));
            a
        },
    ];

    for audio in &inputs {
        let segments = detect_speech(audio, SR);
        assert_eq!(reduce_noise(audio, &segments, SR).len(), audio.len());
        assert_eq!(normalize(audio).len(), audio.len());
    }
}

#[test]
fn test_length_preserved_by_chunked_denoise() {
    // At 1 kHz the chunked path starts past 180_000 samples
    let sample_rate = 1_000;
    let mut audio = lcg_noise(100_000, 0.005, 3);
    audio.extend(sine(90_500, sample_rate, 0.3));
    let segments = detect_speech(&audio, sample_rate);

    let output = reduce_noise(&audio, &segments, sample_rate);

    assert_eq!(output.len(), audio.len());
    assert!(output.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
}

#[test]
fn test_segmentation_is_lossless() {
    // At 100 Hz the cap is 30_000 samples
    let sample_rate = 100;
    for (len, seed) in [(30_001, 1), (61_234, 2), (95_000, 3)] {
        let mut audio = lcg_noise(len, 0.4, seed);
        // Carve a few silent gaps so both split strategies get exercised
        for start in (5_000..len).step_by(17_000) {
            let end = (start + 800).min(len);
            audio[start..end].fill(0.0);
        }

        let chunks = segment_long_audio(&audio, sample_rate);

        assert!(chunks.iter().all(|c| c.len() <= 30_000));
        assert_eq!(chunks.concat(), audio, "len {len}");
    }
}

#[test]
fn test_silence_never_speech() {
    for len in [0, 1, 479, 480, 481, 16_000, 48_017] {
        assert!(detect_speech(&vec![0.0; len], SR).is_empty(), "len {len}");
    }
}

#[test]
fn test_normalize_never_clips() {
    let inputs = [
        sine(SR_USIZE, SR, 0.9),
        sine(SR_USIZE, SR, 5.0),
        lcg_noise(10_000, 1.0, 11),
        {
            let mut clicks = vec![0.0; SR_USIZE];
            clicks[10] = 1.0;
            clicks[9_000] = -0.7;
            clicks
        },
    ];
    for audio in &inputs {
        assert!(peak(&normalize(audio)) <= 0.99 + 1e-6);
    }
}

#[test]
fn test_unreliable_noise_floor_returns_input_unchanged() {
    // Broadband noise with every frame marked as speech: the quiet-frame noise
    // proxy is far above 30% of the signal RMS
    let audio = lcg_noise(2 * SR_USIZE, 0.1, 42);
    let segments = [SpeechSegment::new(0, audio.len())];

    let output = reduce_noise(&audio, &segments, SR);

    assert!(output.iter().zip(&audio).all(|(a, b)| a.to_bits() == b.to_bits()));
}

#[test]
fn test_trim_never_grows() {
    let audio = {
        let mut a = vec![0.0; SR_USIZE];
        a.extend(sine(SR_USIZE / 2, SR, 0.3));
        a.extend(vec![0.0; SR_USIZE]);
        a
    };
    let cases: [&[SpeechSegment]; 4] = [
        &[],
        &[SpeechSegment::new(0, audio.len())],
        &[SpeechSegment::new(16_000, 24_000)],
        &[SpeechSegment::new(100, 200), SpeechSegment::new(39_000, 40_000)],
    ];

    for segments in cases {
        let (trimmed, adjusted) = trim_silence(&audio, segments, SR);
        assert!(trimmed.len() <= audio.len());
        assert!(adjusted.iter().all(|s| s.start <= s.end && s.end <= trimmed.len()));
    }
}

#[test]
fn test_concurrent_processing_of_independent_buffers() {
    let processor = Arc::new(all_stages());
    let handles: Vec<_> = (0..4_u32)
        .map(|i| {
            let processor = Arc::clone(&processor);
            std::thread::spawn(move || {
                let mut audio = vec![0.0; SR_USIZE];
                audio.extend(sine(SR_USIZE, SR, 0.1 + 0.05 * i as f32));
                processor.process(&audio, SR).unwrap().has_speech
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
}

#[test]
fn test_config_changes_apply_to_next_call() {
    let shared = Arc::new(RwLock::new(ProcessorConfig::default()));
    let processor = AudioProcessor::new(Arc::clone(&shared));
    let audio = vec![0.0; SR_USIZE];

    assert!(!processor.process(&audio, SR).unwrap().has_speech);

    shared.write().unwrap().vad_enabled = false;
    let result = processor.process(&audio, SR).unwrap();
    assert!(result.has_speech);
    assert_eq!(result.segments, vec![SpeechSegment::new(0, audio.len())]);
}
