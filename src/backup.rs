use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::audio::wav::write_wav;
use crate::config::{BackupConfig, Config};

const LAST_RECORDING: &str = "last_recording.wav";
const LAST_PROCESSED: &str = "last_recording_processed.wav";
const SEGMENT_PREFIX: &str = "last_recording_";
const LAST_TRANSCRIPT: &str = "last_transcription.txt";
const HISTORY_DIR: &str = "audio_history";
const TEXT_HISTORY_DIR: &str = "history";
const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// Audio files handed to the transcription engine and the transcripts they
/// produced, plus a retained history of both
///
/// Layout under the backup directory:
/// - `last_recording.wav`: raw input of the latest run (for retry)
/// - `last_recording_processed.wav`: processed audio of a short recording
/// - `last_recording_<n>.wav`: segments of a long recording (1-based)
/// - `last_transcription.txt`: transcript of the latest successful run
/// - `audio_history/<unix_millis>.wav`: one raw copy per run
/// - `history/<unix_millis>.txt`: one transcript per run
#[derive(Debug, Clone)]
pub struct Backup {
    dir: PathBuf,
    history_dir: PathBuf,
    text_history_dir: PathBuf,
    history_limit: usize,
    retention_days: u32,
}

impl Backup {
    /// Opens the configured backup directory, creating it if needed
    ///
    /// # Errors
    /// Returns error if HOME is unset (for `~/` paths) or directories cannot be created
    pub fn new(config: &BackupConfig) -> Result<Self> {
        let dir = Config::expand_path(&config.directory)?;
        Self::at(dir, config.history_limit, config.retention_days)
    }

    /// Opens a backup directory at an explicit location
    ///
    /// # Errors
    /// Returns error if directories cannot be created
    pub fn at(dir: PathBuf, history_limit: usize, retention_days: u32) -> Result<Self> {
        let history_dir = dir.join(HISTORY_DIR);
        let text_history_dir = dir.join(TEXT_HISTORY_DIR);
        fs::create_dir_all(&history_dir).context("failed to create backup directory")?;
        fs::create_dir_all(&text_history_dir).context("failed to create transcript history directory")?;
        restrict_permissions(&dir);
        restrict_permissions(&history_dir);
        restrict_permissions(&text_history_dir);

        Ok(Self {
            dir,
            history_dir,
            text_history_dir,
            history_limit,
            retention_days,
        })
    }

    /// Backup root directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding timestamped raw recordings
    #[must_use]
    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    /// Directory holding timestamped transcripts
    #[must_use]
    pub fn text_history_dir(&self) -> &Path {
        &self.text_history_dir
    }

    /// Path of the transcript of the latest run
    #[must_use]
    pub fn transcript_path(&self) -> PathBuf {
        self.dir.join(LAST_TRANSCRIPT)
    }

    /// Path of the raw recording of the latest run
    #[must_use]
    pub fn audio_path(&self) -> PathBuf {
        self.dir.join(LAST_RECORDING)
    }

    /// Path of the processed recording of the latest short run
    #[must_use]
    pub fn processed_path(&self) -> PathBuf {
        self.dir.join(LAST_PROCESSED)
    }

    /// Path of segment `index` (1-based) of the latest long run
    #[must_use]
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{SEGMENT_PREFIX}{index}.wav"))
    }

    /// Saves raw audio as the latest recording and into the history
    ///
    /// Segment files left over from a previous long recording are removed and
    /// the history is pruned. History failures are logged, not returned.
    ///
    /// # Errors
    /// Returns error if `last_recording.wav` cannot be written
    pub fn save_audio(&self, audio: &[f32], sample_rate: u32) -> Result<PathBuf> {
        self.remove_stale_segments();

        let path = self.audio_path();
        write_wav(&path, audio, sample_rate).context("failed to save raw recording")?;

        match unix_millis() {
            Ok(millis) => {
                let history_path = self.history_dir.join(format!("{millis}.wav"));
                if let Err(e) = write_wav(&history_path, audio, sample_rate) {
                    tracing::warn!(error = %e, "failed to save history recording");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to timestamp history recording"),
        }

        if let Err(e) = self.prune_audio_history() {
            tracing::warn!(error = %e, "audio history cleanup failed");
        }

        tracing::info!(path = %path.display(), samples = audio.len(), "raw recording saved");
        Ok(path)
    }

    /// Saves processed audio of a recording that fits in one chunk
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn save_processed(&self, audio: &[f32], sample_rate: u32) -> Result<PathBuf> {
        let path = self.processed_path();
        write_wav(&path, audio, sample_rate).context("failed to save processed recording")?;
        tracing::debug!(path = %path.display(), samples = audio.len(), "processed recording saved");
        Ok(path)
    }

    /// Saves each chunk as `last_recording_<n>.wav`, returning the paths in order
    ///
    /// # Errors
    /// Returns error if any file cannot be written
    pub fn save_segments(&self, chunks: &[Vec<f32>], sample_rate: u32) -> Result<Vec<PathBuf>> {
        self.remove_stale_segments();

        let paths = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let path = self.segment_path(i + 1);
                write_wav(&path, chunk, sample_rate)
                    .with_context(|| format!("failed to save segment {}", i + 1))?;
                Ok(path)
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(segments = paths.len(), "segment files saved");
        Ok(paths)
    }

    /// Saves a transcript as the latest one and into the text history
    ///
    /// Empty transcripts are not saved. History failures are logged, not
    /// returned.
    ///
    /// # Errors
    /// Returns error if `last_transcription.txt` cannot be written
    pub fn save_transcript(&self, text: &str) -> Result<Option<PathBuf>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let path = self.transcript_path();
        fs::write(&path, text).context("failed to save transcript")?;

        match self.write_text_history(text) {
            Ok(history_path) => {
                tracing::debug!(path = %history_path.display(), "transcript history saved");
            }
            Err(e) => tracing::warn!(error = %e, "failed to save transcript history"),
        }

        if let Err(e) = self.prune_text_history() {
            tracing::warn!(error = %e, "transcript history cleanup failed");
        }

        tracing::info!(path = %path.display(), chars = text.chars().count(), "transcript saved");
        Ok(Some(path))
    }

    /// Transcript of the latest successful run, if any
    #[must_use]
    pub fn last_transcript(&self) -> Option<String> {
        let path = self.transcript_path();
        match fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read last transcript");
                None
            }
        }
    }

    /// Writes `history/<unix_millis>.txt`, moving to the next free millisecond
    /// if another transcript already took this one
    fn write_text_history(&self, text: &str) -> Result<PathBuf> {
        let mut millis = unix_millis()?;
        loop {
            let path = self.text_history_dir.join(format!("{millis}.txt"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(text.as_bytes())
                        .context("failed to write transcript history")?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => millis += 1,
                Err(e) => return Err(e).context("failed to create transcript history file"),
            }
        }
    }

    /// Applies history retention to recordings
    ///
    /// Deletes recordings older than `retention_days` OR beyond `history_limit`
    /// (newest kept). Zero disables the respective rule. Returns the number of
    /// files deleted.
    ///
    /// # Errors
    /// Returns error if directory listing fails. Individual file deletion failures are logged but don't stop cleanup.
    pub fn prune_audio_history(&self) -> Result<usize> {
        self.prune(&self.history_dir, "wav")
    }

    /// Applies the same retention rules as [`Backup::prune_audio_history`] to
    /// transcripts
    ///
    /// # Errors
    /// Returns error if directory listing fails
    pub fn prune_text_history(&self) -> Result<usize> {
        self.prune(&self.text_history_dir, "txt")
    }

    /// Deletes `<unix_millis>.<extension>` files in `dir` past retention
    fn prune(&self, dir: &Path, extension: &str) -> Result<usize> {
        if !dir.exists() {
            tracing::debug!(dir = %dir.display(), "history directory does not exist, skipping cleanup");
            return Ok(0);
        }

        let suffix = format!(".{extension}");
        // Collect all history files with their timestamps
        let mut entries: Vec<(PathBuf, u64)> = fs::read_dir(dir)
            .context("failed to read history directory")?
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                if !path.is_file() {
                    return None;
                }
                // <unix_millis>.<extension>
                let timestamp: u64 = path.file_name()?.to_str()?.strip_suffix(suffix.as_str())?.parse().ok()?;
                Some((path, timestamp))
            })
            .collect();

        if entries.is_empty() {
            return Ok(0);
        }

        // Newest first
        entries.sort_by(|a, b| b.1.cmp(&a.1));

        let mut to_delete = HashSet::new();

        if self.retention_days > 0 {
            let now = unix_millis()?;
            let retention_millis = u64::from(self.retention_days) * MILLIS_PER_DAY;
            for (path, timestamp) in &entries {
                if now.saturating_sub(*timestamp) > retention_millis {
                    to_delete.insert(path.clone());
                }
            }
        }

        if self.history_limit > 0 && entries.len() > self.history_limit {
            for (path, _) in entries.iter().skip(self.history_limit) {
                to_delete.insert(path.clone());
            }
        }

        let mut deleted_count = 0;
        for path in to_delete {
            match fs::remove_file(&path) {
                Ok(()) => {
                    deleted_count += 1;
                    tracing::debug!(path = %path.display(), "deleted history file");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete history file");
                }
            }
        }

        if deleted_count > 0 {
            tracing::debug!(
                dir = %dir.display(),
                deleted = deleted_count,
                total = entries.len(),
                remaining = entries.len() - deleted_count,
                "history pruned"
            );
        }

        Ok(deleted_count)
    }

    /// Deletes `last_recording_<n>.wav` files left by a previous run
    fn remove_stale_segments(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };

        let removed = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.file_name().and_then(|n| n.to_str()).is_some_and(is_segment_name))
            .filter(|path| match fs::remove_file(path) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete stale segment");
                    false
                }
            })
            .count();
        if removed > 0 {
            tracing::debug!(removed, "stale segment files removed");
        }
    }
}

fn is_segment_name(name: &str) -> bool {
    name.strip_prefix(SEGMENT_PREFIX)
        .and_then(|rest| rest.strip_suffix(".wav"))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn unix_millis() -> Result<u64> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("failed to get current time")?
        .as_millis();
    Ok(u64::try_from(millis).unwrap_or(u64::MAX))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
        tracing::debug!(path = %path.display(), error = %e, "could not restrict permissions");
    }
}

#[cfg(not(unix))]
const fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_backup(history_limit: usize, retention_days: u32) -> Backup {
        let dir = std::env::temp_dir().join(format!(
            "whisper_backup_test_{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        Backup::at(dir, history_limit, retention_days).unwrap()
    }

    fn create_recording(dir: &Path, timestamp: u64) -> PathBuf {
        let path = dir.join(format!("{timestamp}.wav"));
        fs::write(&path, b"fake wav data").unwrap();
        path
    }

    fn now_millis() -> u64 {
        unix_millis().unwrap()
    }

    #[test]
    fn test_new_creates_directories() {
        let backup = create_test_backup(0, 0);
        assert!(backup.dir().is_dir());
        assert!(backup.history_dir().is_dir());
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_prune_empty_history() {
        let backup = create_test_backup(3, 7);
        assert_eq!(backup.prune_audio_history().unwrap(), 0);
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_prune_age_based() {
        let backup = create_test_backup(0, 7);
        let now = now_millis();

        let old_ts = now - 8 * MILLIS_PER_DAY;
        let recent_ts = now - MILLIS_PER_DAY;
        create_recording(backup.history_dir(), old_ts);
        create_recording(backup.history_dir(), recent_ts);

        assert_eq!(backup.prune_audio_history().unwrap(), 1);
        assert!(!backup.history_dir().join(format!("{old_ts}.wav")).exists());
        assert!(backup.history_dir().join(format!("{recent_ts}.wav")).exists());
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_prune_count_based() {
        let backup = create_test_backup(3, 0);
        let now = now_millis();
        let timestamps: Vec<u64> = (0..5).map(|i| now - i * 60_000).collect();
        for ts in &timestamps {
            create_recording(backup.history_dir(), *ts);
        }

        assert_eq!(backup.prune_audio_history().unwrap(), 2);
        for ts in &timestamps[..3] {
            assert!(backup.history_dir().join(format!("{ts}.wav")).exists());
        }
        for ts in &timestamps[3..] {
            assert!(!backup.history_dir().join(format!("{ts}.wav")).exists());
        }
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_prune_both_policies() {
        let backup = create_test_backup(3, 7);
        let now = now_millis();

        // One removed by age, one by count
        create_recording(backup.history_dir(), now - 10 * MILLIS_PER_DAY);
        for i in 0..4 {
            create_recording(backup.history_dir(), now - i * 60_000);
        }

        assert_eq!(backup.prune_audio_history().unwrap(), 2);
        assert_eq!(fs::read_dir(backup.history_dir()).unwrap().count(), 3);
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_prune_zero_values_no_deletion() {
        let backup = create_test_backup(0, 0);
        let now = now_millis();
        create_recording(backup.history_dir(), now - 30 * MILLIS_PER_DAY);
        for i in 0..10 {
            create_recording(backup.history_dir(), now - i * 60_000);
        }

        assert_eq!(backup.prune_audio_history().unwrap(), 0);
        assert_eq!(fs::read_dir(backup.history_dir()).unwrap().count(), 11);
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_prune_ignores_non_recording_files() {
        let backup = create_test_backup(0, 7);
        let history = backup.history_dir();
        create_recording(history, now_millis() - 10 * MILLIS_PER_DAY);
        fs::write(history.join("notes.txt"), b"data").unwrap();
        fs::write(history.join("recording.wav"), b"data").unwrap();
        fs::write(history.join("123abc.wav"), b"data").unwrap();

        assert_eq!(backup.prune_audio_history().unwrap(), 1);
        assert!(history.join("notes.txt").exists());
        assert!(history.join("recording.wav").exists());
        assert!(history.join("123abc.wav").exists());
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_save_audio_writes_last_and_history() {
        let backup = create_test_backup(10, 0);

        let path = backup.save_audio(&[0.1; 1_600], 16_000).unwrap();

        assert_eq!(path, backup.dir().join("last_recording.wav"));
        assert!(path.exists());
        assert_eq!(fs::read_dir(backup.history_dir()).unwrap().count(), 1);
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_save_segments_replaces_stale_segments() {
        let backup = create_test_backup(0, 0);
        let chunks = vec![vec![0.1; 100]; 3];
        backup.save_segments(&chunks, 16_000).unwrap();
        assert!(backup.segment_path(3).exists());

        let paths = backup.save_segments(&chunks[..2], 16_000).unwrap();

        assert_eq!(paths, vec![backup.segment_path(1), backup.segment_path(2)]);
        assert!(!backup.segment_path(3).exists());
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_save_audio_clears_segments_but_keeps_processed() {
        let backup = create_test_backup(0, 0);
        backup.save_segments(&[vec![0.1; 100]], 16_000).unwrap();
        backup.save_processed(&[0.1; 100], 16_000).unwrap();

        backup.save_audio(&[0.1; 100], 16_000).unwrap();

        assert!(!backup.segment_path(1).exists());
        assert!(backup.processed_path().exists());
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_new_creates_text_history_directory() {
        let backup = create_test_backup(0, 0);
        assert_eq!(backup.text_history_dir(), backup.dir().join("history"));
        assert!(backup.text_history_dir().is_dir());
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_save_transcript_writes_last_and_history() {
        let backup = create_test_backup(10, 0);
        assert_eq!(backup.last_transcript(), None);

        let path = backup.save_transcript("hello world").unwrap().unwrap();

        assert_eq!(path, backup.dir().join("last_transcription.txt"));
        assert_eq!(backup.last_transcript().as_deref(), Some("hello world"));
        let history: Vec<_> = fs::read_dir(backup.text_history_dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(history.len(), 1);
        assert_eq!(fs::read_to_string(&history[0]).unwrap(), "hello world");
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_save_transcript_skips_empty_text() {
        let backup = create_test_backup(10, 0);

        assert_eq!(backup.save_transcript("  \n").unwrap(), None);

        assert!(!backup.transcript_path().exists());
        assert_eq!(fs::read_dir(backup.text_history_dir()).unwrap().count(), 0);
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_rapid_transcripts_never_overwrite_history() {
        let backup = create_test_backup(0, 0);

        for i in 0..5 {
            backup.save_transcript(&format!("take {i}")).unwrap();
        }

        assert_eq!(backup.last_transcript().as_deref(), Some("take 4"));
        assert_eq!(fs::read_dir(backup.text_history_dir()).unwrap().count(), 5);
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_prune_text_history_count_based() {
        let backup = create_test_backup(2, 0);
        let history = backup.text_history_dir();
        let now = now_millis();
        let timestamps: Vec<u64> = (0..4).map(|i| now - i * 60_000).collect();
        for ts in &timestamps {
            fs::write(history.join(format!("{ts}.txt")), b"text").unwrap();
        }
        // Only .txt files count towards the transcript limit
        create_recording(history, now - 10 * 60_000);

        assert_eq!(backup.prune_text_history().unwrap(), 2);
        for ts in &timestamps[..2] {
            assert!(history.join(format!("{ts}.txt")).exists());
        }
        for ts in &timestamps[2..] {
            assert!(!history.join(format!("{ts}.txt")).exists());
        }
        assert!(history.join(format!("{}.wav", now - 10 * 60_000)).exists());
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_prune_text_history_age_based() {
        let backup = create_test_backup(0, 7);
        let history = backup.text_history_dir();
        let now = now_millis();
        let old_ts = now - 8 * MILLIS_PER_DAY;
        let recent_ts = now - MILLIS_PER_DAY;
        fs::write(history.join(format!("{old_ts}.txt")), b"old").unwrap();
        fs::write(history.join(format!("{recent_ts}.txt")), b"recent").unwrap();

        assert_eq!(backup.prune_text_history().unwrap(), 1);
        assert!(!history.join(format!("{old_ts}.txt")).exists());
        assert!(history.join(format!("{recent_ts}.txt")).exists());
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_save_transcript_applies_history_limit() {
        let backup = create_test_backup(3, 0);
        let history = backup.text_history_dir();
        let now = now_millis();
        for i in 1..=3 {
            fs::write(history.join(format!("{}.txt", now - i * 60_000)), b"older").unwrap();
        }

        backup.save_transcript("newest").unwrap();

        assert_eq!(fs::read_dir(history).unwrap().count(), 3);
        assert!(!history.join(format!("{}.txt", now - 3 * 60_000)).exists());
        let _ = fs::remove_dir_all(backup.dir());
    }

    #[test]
    fn test_segment_name_matching() {
        assert!(is_segment_name("last_recording_1.wav"));
        assert!(is_segment_name("last_recording_12.wav"));
        assert!(!is_segment_name("last_recording_.wav"));
        assert!(!is_segment_name("last_recording_processed.wav"));
        assert!(!is_segment_name("last_recording.wav"));
    }
}
