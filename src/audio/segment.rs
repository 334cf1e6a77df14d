//! Long-recording segmentation
//!
//! Transcription engines cap input duration, so recordings past the cap are
//! split at the midpoints of the widest silences between speech segments.
//! Splitting is lossless: concatenating the chunks reproduces the input.

use tracing::{debug, info};

use super::{detect_speech, SpeechSegment};

/// Longest chunk handed to an engine, in seconds
pub const MAX_SEGMENT_SECONDS: u32 = 300;
/// Trailing chunks shorter than this are folded into their predecessor
pub const MIN_SEGMENT_SECONDS: u32 = 3;

/// Splits `audio` into chunks of at most five minutes each
///
/// Audio within the cap comes back as a single chunk. Otherwise the split
/// points are the midpoints of the largest speech gaps, added one at a time
/// until every chunk fits; when gaps cannot achieve that (or VAD finds no
/// speech) the audio is cut at fixed five-minute boundaries instead.
#[must_use]
pub fn segment_long_audio(audio: &[f32], sample_rate: u32) -> Vec<Vec<f32>> {
    if audio.is_empty() {
        return Vec::new();
    }

    let max_samples = seconds_to_len(MAX_SEGMENT_SECONDS, sample_rate);
    let min_samples = seconds_to_len(MIN_SEGMENT_SECONDS, sample_rate);

    if audio.len() <= max_samples {
        return vec![audio.to_vec()];
    }

    let _span = tracing::debug_span!("segment_long_audio", samples = audio.len()).entered();
    let segments = detect_speech(audio, sample_rate);

    let (cuts, method) = if segments.is_empty() {
        (blind_cut_points(audio.len(), max_samples), "blind (no speech)")
    } else {
        match gap_cut_points(&segments, audio.len(), max_samples) {
            Some(cuts) => (cuts, "speech gaps"),
            None => (blind_cut_points(audio.len(), max_samples), "blind (gaps insufficient)"),
        }
    };
    let cuts = merge_short_tail(cuts, audio.len(), min_samples, max_samples);

    let chunks: Vec<Vec<f32>> = std::iter::once(0)
        .chain(cuts.iter().copied())
        .zip(cuts.iter().copied().chain(std::iter::once(audio.len())))
        .filter(|(start, end)| start < end)
        .map(|(start, end)| audio[start..end].to_vec())
        .collect();

    info!(
        samples = audio.len(),
        chunks = chunks.len(),
        method,
        "long recording segmented"
    );

    chunks
}

fn seconds_to_len(seconds: u32, sample_rate: u32) -> usize {
    let samples = u64::from(seconds) * u64::from(sample_rate);
    usize::try_from(samples).unwrap_or(usize::MAX).max(1)
}

/// Greedily adds gap midpoints (largest gap first) until every chunk fits
///
/// Returns sorted cut points, or `None` when even all gaps are not enough.
fn gap_cut_points(segments: &[SpeechSegment], len: usize, max_samples: usize) -> Option<Vec<usize>> {
    let mut gaps: Vec<(usize, usize, usize)> = segments
        .windows(2)
        .map(|pair| {
            let gap_start = pair[0].end;
            let gap_end = pair[1].start;
            (gap_end.saturating_sub(gap_start), gap_start, gap_end)
        })
        .collect();
    // Stable sort keeps earlier gaps first among equals
    gaps.sort_by(|a, b| b.0.cmp(&a.0));

    let mut cuts = Vec::new();
    for (size, gap_start, gap_end) in gaps {
        cuts.push(gap_start + (gap_end - gap_start) / 2);
        cuts.sort_unstable();
        if fits(&cuts, len, max_samples) {
            debug!(cuts = cuts.len(), last_gap = size, "gap split fits");
            return Some(cuts);
        }
    }

    None
}

/// Whether cutting at sorted `cuts` leaves every chunk within `max_samples`
fn fits(cuts: &[usize], len: usize, max_samples: usize) -> bool {
    let mut prev = 0;
    for &cut in cuts {
        if cut - prev > max_samples {
            return false;
        }
        prev = cut;
    }
    len - prev <= max_samples
}

/// Fixed-size cut points every `max_samples`
fn blind_cut_points(len: usize, max_samples: usize) -> Vec<usize> {
    (1..)
        .map(|k| k * max_samples)
        .take_while(|&cut| cut < len)
        .collect()
}

/// Folds a trailing chunk shorter than `min_samples` into its predecessor
///
/// When the merged chunk would exceed `max_samples`, the last two chunks are
/// rebalanced into equal halves instead, which both fit and are long enough.
fn merge_short_tail(
    mut cuts: Vec<usize>,
    len: usize,
    min_samples: usize,
    max_samples: usize,
) -> Vec<usize> {
    while let Some(&last_cut) = cuts.last() {
        if len - last_cut >= min_samples {
            break;
        }
        let prev_start = cuts.len().checked_sub(2).map_or(0, |i| cuts[i]);
        if len - prev_start <= max_samples {
            cuts.pop();
        } else {
            let midpoint = prev_start + (len - prev_start) / 2;
            if let Some(last) = cuts.last_mut() {
                *last = midpoint;
            }
            debug!(midpoint, "short tail rebalanced with its predecessor");
            break;
        }
    }
    cuts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bursty(len: usize) -> Vec<f32> {
        // 90 samples of square wave, 30 samples of silence
        (0..len)
            .map(|i| {
                if i % 120 >= 90 {
                    0.0
                } else if i % 2 == 0 {
                    0.5
                } else {
                    -0.5
                }
            })
            .collect()
    }

    #[test]
    fn test_short_audio_single_chunk() {
        let audio = vec![0.25; 16_000 * 5];
        let chunks = segment_long_audio(&audio, 16_000);
        assert_eq!(chunks, vec![audio]);
    }

    #[test]
    fn test_empty_audio_no_chunks() {
        assert!(segment_long_audio(&[], 16_000).is_empty());
    }

    #[test]
    fn test_silence_chunked_blindly() {
        // At 10 Hz the cap is 3000 samples
        let audio = vec![0.0; 7_001];
        let chunks = segment_long_audio(&audio, 10);

        let lens: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![3_000, 3_000, 1_001]);
        assert_eq!(chunks.concat(), audio);
    }

    #[test]
    fn test_splits_at_widest_gap() {
        // At 100 Hz: cap 30_000 samples, minimum 300
        let mut audio = bursty(14_000);
        audio.extend(vec![0.0; 2_000]);
        audio.extend(bursty(15_000));

        let chunks = segment_long_audio(&audio, 100);

        assert_eq!(chunks.len(), 2);
        assert!((14_000..16_000).contains(&chunks[0].len()), "{}", chunks[0].len());
        assert!(chunks.iter().all(|c| c.len() <= 30_000));
        assert_eq!(chunks.concat(), audio);
    }

    #[test]
    fn test_gap_cut_points_largest_first() {
        let segments = [
            SpeechSegment::new(0, 100),
            SpeechSegment::new(110, 400),
            SpeechSegment::new(500, 700),
            SpeechSegment::new(720, 1_000),
        ];
        // Widest gap is 400..500, midpoint 450
        assert_eq!(gap_cut_points(&segments, 1_000, 600), Some(vec![450]));
        // 450 alone, then 450 + 710, still leave a 450-sample chunk
        assert_eq!(
            gap_cut_points(&segments, 1_000, 400),
            Some(vec![105, 450, 710])
        );
    }

    #[test]
    fn test_gap_cut_points_gives_up() {
        let segments = [SpeechSegment::new(0, 900), SpeechSegment::new(950, 1_000)];
        assert_eq!(gap_cut_points(&segments, 1_000, 500), None);
        assert_eq!(gap_cut_points(&segments[..1], 1_000, 500), None);
    }

    #[test]
    fn test_blind_cut_points() {
        assert_eq!(blind_cut_points(10, 3), vec![3, 6, 9]);
        assert_eq!(blind_cut_points(9, 3), vec![3, 6]);
        assert!(blind_cut_points(3, 3).is_empty());
    }

    #[test]
    fn test_short_tail_merged() {
        assert_eq!(merge_short_tail(vec![100, 200], 205, 10, 150), vec![100]);
        assert_eq!(merge_short_tail(vec![100, 200], 300, 10, 150), vec![100, 200]);
    }

    #[test]
    fn test_short_tail_rebalanced_when_merge_overflows() {
        assert_eq!(merge_short_tail(vec![300], 301, 3, 300), vec![150]);
        assert_eq!(merge_short_tail(vec![300, 600], 601, 3, 300), vec![300, 450]);
    }

    #[test]
    fn test_fits() {
        assert!(fits(&[], 10, 10));
        assert!(!fits(&[], 11, 10));
        assert!(fits(&[5], 11, 10));
        assert!(!fits(&[2], 13, 10));
    }
}
