use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::engine::{Transcriber, TranscriptionError};
use crate::audio::AudioProcessor;
use crate::backup::Backup;

/// Processes a recording and transcribes it, segment by segment if long
///
/// The raw audio is backed up first so a failed run can be retried, and the
/// final transcript is saved to `last_transcription.txt` and the text history.
/// Recordings that fit in one chunk are transcribed from
/// `last_recording_processed.wav`; longer ones are split at speech gaps, each
/// chunk is transcribed in order, chunks with empty transcripts are skipped and
/// the rest joined with spaces.
///
/// # Errors
/// Returns [`TranscriptionError::NoSpeech`] when VAD finds nothing,
/// [`TranscriptionError::Empty`] when every chunk transcribes to nothing, and
/// the first other engine, pipeline or file error encountered
pub fn transcribe_recording(
    processor: &AudioProcessor,
    transcriber: &dyn Transcriber,
    backup: &Backup,
    audio: &[f32],
    sample_rate: u32,
) -> Result<String, TranscriptionError> {
    let _span = tracing::debug_span!("transcribe_recording", samples = audio.len()).entered();
    let start = std::time::Instant::now();

    backup.save_audio(audio, sample_rate)?;

    let result = processor.process(audio, sample_rate)?;
    if !result.has_speech {
        return Err(TranscriptionError::NoSpeech);
    }

    let chunks = processor.segment_long_audio(&result.audio, sample_rate)?;
    if chunks.len() <= 1 {
        let path = backup.save_processed(&result.audio, sample_rate)?;
        let text = transcriber.transcribe(&path)?;
        info!(
            chunks = 1,
            total_ms = start.elapsed().as_millis(),
            "recording transcribed"
        );
        keep_transcript(backup, &text);
        return Ok(text);
    }

    let paths = backup.save_segments(&chunks, sample_rate)?;
    let mut texts = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        match transcriber.transcribe(path) {
            Ok(text) if !text.trim().is_empty() => texts.push(text),
            Ok(_) | Err(TranscriptionError::Empty) => {
                warn!(segment = i + 1, "segment produced no text, skipping");
            }
            Err(e) => return Err(e),
        }
    }

    if texts.is_empty() {
        return Err(TranscriptionError::Empty);
    }

    info!(
        chunks = paths.len(),
        transcribed = texts.len(),
        total_ms = start.elapsed().as_millis(),
        "recording transcribed"
    );
    let text = texts.join(" ");
    keep_transcript(backup, &text);
    Ok(text)
}

/// Runs `job` on a dedicated thread and waits for it, at most `limit` if set
///
/// On timeout the thread is left running detached and its result is dropped,
/// so the caller gets control back at the deadline rather than when the job
/// finishes. The process can exit without waiting for it.
///
/// # Errors
/// Returns [`TranscriptionError::TimedOut`] when `limit` passes first and
/// [`TranscriptionError::Worker`] if the thread cannot start or panics
pub async fn run_detached<T, F>(job: F, limit: Option<Duration>) -> Result<T, TranscriptionError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("audio-pipeline".to_owned())
        .spawn(move || {
            if tx.send(job()).is_err() {
                debug!("pipeline finished after its caller stopped waiting");
            }
        })
        .map_err(|e| TranscriptionError::Worker(e.to_string()))?;

    let received = match limit {
        Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| {
            warn!(limit_s = limit.as_secs_f64(), "audio pipeline timed out");
            TranscriptionError::TimedOut(limit)
        })?,
        None => rx.await,
    };
    received.map_err(|_| TranscriptionError::Worker("thread exited without a result".to_owned()))
}

/// Saves the transcript next to the audio, logging rather than failing
fn keep_transcript(backup: &Backup, text: &str) {
    if let Err(e) = backup.save_transcript(text) {
        warn!(error = %e, "failed to save transcript");
    }
}
