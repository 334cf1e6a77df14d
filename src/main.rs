use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use whisper_voice::audio::{wav, AudioProcessor};
use whisper_voice::backup::Backup;
use whisper_voice::config::Config;
use whisper_voice::telemetry;
use whisper_voice::transcription::{
    run_detached, transcribe_recording, CommandTranscriber, TranscriptionError,
};

const USAGE: &str = "usage: whisper-voice <input.wav> [engine-command [args...]]";

/// What one run produced
enum Outcome {
    /// Engine transcript
    Text(String),
    /// Files written for an external engine
    Files {
        paths: Vec<PathBuf>,
        speech_ratio: f32,
        duration: f64,
    },
    NoSpeech,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    telemetry::init(config.telemetry.enabled, &config.telemetry.log_path)?;
    tracing::info!("whisper-voice starting");

    let mut args = std::env::args().skip(1);
    let Some(input) = args.next() else {
        bail!(USAGE);
    };
    let engine: Vec<String> = args.collect();

    let sample_rate = config.audio.sample_rate;
    let audio = wav::read_wav(Path::new(&input), sample_rate)
        .with_context(|| format!("failed to load {input}"))?;

    #[allow(clippy::cast_precision_loss)]
    let duration = audio.len() as f64 / f64::from(sample_rate);
    if duration < config.audio.min_duration {
        bail!(
            "recording too short: {duration:.2}s (minimum {:.2}s)",
            config.audio.min_duration
        );
    }

    let processor = AudioProcessor::new(Arc::new(RwLock::new(config.audio.processor_config())));
    let backup = Backup::new(&config.backup)?;

    // Zero disables the limit. On timeout the pipeline thread is abandoned and
    // the process exits without waiting for it.
    let limit = (config.audio.timeout > 0).then(|| Duration::from_secs(config.audio.timeout));
    let outcome = run_detached(
        move || run(&processor, &backup, &audio, sample_rate, engine),
        limit,
    )
    .await??;

    match outcome {
        Outcome::Text(text) => println!("{text}"),
        Outcome::Files {
            paths,
            speech_ratio,
            duration,
        } => {
            println!(
                "✓ {duration:.2}s of audio, {:.0}% speech",
                f64::from(speech_ratio) * 100.0
            );
            for path in paths {
                println!("  {}", path.display());
            }
        }
        Outcome::NoSpeech => println!("No speech detected"),
    }

    Ok(())
}

/// Runs one recording through the pipeline on the pipeline thread
fn run(
    processor: &AudioProcessor,
    backup: &Backup,
    audio: &[f32],
    sample_rate: u32,
    engine: Vec<String>,
) -> Result<Outcome> {
    let mut engine = engine.into_iter();
    if let Some(program) = engine.next() {
        let transcriber = CommandTranscriber::new(program, engine.collect());
        return match transcribe_recording(processor, &transcriber, backup, audio, sample_rate) {
            Ok(text) => Ok(Outcome::Text(text)),
            Err(TranscriptionError::NoSpeech) => Ok(Outcome::NoSpeech),
            Err(e) => Err(e.into()),
        };
    }

    backup.save_audio(audio, sample_rate)?;
    let result = processor.process(audio, sample_rate)?;
    if !result.has_speech {
        return Ok(Outcome::NoSpeech);
    }

    let chunks = processor.segment_long_audio(&result.audio, sample_rate)?;
    let paths = if chunks.len() <= 1 {
        vec![backup.save_processed(&result.audio, sample_rate)?]
    } else {
        backup.save_segments(&chunks, sample_rate)?
    };

    Ok(Outcome::Files {
        paths,
        speech_ratio: result.speech_ratio,
        duration: result.duration,
    })
}
