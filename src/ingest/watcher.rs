//! Recordings-directory watcher.
//!
//! Watches for new chunk files and registers them as `ready` segments
//! once they are stable (the capture side has finished writing). Files
//! are identified by a content hash so re-delivered or renamed chunks
//! never register twice.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::Segment;
use crate::store::Database;

/// Errors that can occur while watching the recordings directory
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("recordings directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the segment watcher
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Directory the capture collaborator writes chunk files into
    pub recordings_dir: PathBuf,

    /// Nominal chunk length (seconds); start_ts = mtime - chunk length
    pub chunk_secs: u64,

    /// How long a file must be unmodified before registration (seconds)
    pub stability_delay_secs: u64,

    /// File extensions to register
    pub extensions: Vec<String>,
}

impl IngestConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            recordings_dir: config.recordings_dir(),
            chunk_secs: config.batching.chunk_secs,
            stability_delay_secs: 5,
            extensions: vec!["mp4".to_string(), "mov".to_string()],
        }
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|known| known == &ext)
            })
            .unwrap_or(false)
    }
}

/// Result of a directory scan
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanResult {
    /// Newly registered segments
    pub registered: usize,

    /// Files skipped (unstable, already known, or unreadable)
    pub skipped: usize,
}

/// Watches the recordings directory and registers ready segments.
pub struct SegmentWatcher {
    config: IngestConfig,
    db: Database,
}

impl SegmentWatcher {
    pub fn new(db: Database, config: IngestConfig) -> Self {
        Self { config, db }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Scan the directory once and register any stable chunk files.
    /// Used at startup to catch up on chunks written while we were down.
    pub async fn scan_once(&self) -> Result<ScanResult> {
        if !self.config.recordings_dir.exists() {
            return Err(WatcherError::DirectoryNotFound(
                self.config.recordings_dir.clone(),
            )
            .into());
        }

        let mut result = ScanResult::default();
        let mut entries = tokio::fs::read_dir(&self.config.recordings_dir)
            .await
            .context("failed to read recordings directory")?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || !self.config.matches_extension(&path) {
                continue;
            }

            match self.register_file(&path).await {
                Ok(true) => result.registered += 1,
                Ok(false) => result.skipped += 1,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to register chunk");
                    result.skipped += 1;
                }
            }
        }

        if result.registered > 0 {
            info!(
                registered = result.registered,
                skipped = result.skipped,
                "catch-up scan registered segments"
            );
        }

        Ok(result)
    }

    /// Watch for filesystem events until shutdown. Events only trigger a
    /// registration attempt; an unstable file is picked up by a later
    /// event or the periodic rescan.
    pub async fn watch(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let mut debouncer = new_debouncer(Duration::from_secs(2), move |events| {
            let _ = tx.send(events);
        })
        .context("failed to create file watcher")?;

        debouncer
            .watcher()
            .watch(&self.config.recordings_dir, RecursiveMode::NonRecursive)
            .with_context(|| {
                format!(
                    "failed to watch recordings directory {}",
                    self.config.recordings_dir.display()
                )
            })?;

        info!(dir = %self.config.recordings_dir.display(), "watching for chunk files");

        let mut poll = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = poll.tick() => {
                    while let Ok(batch) = rx.try_recv() {
                        let Ok(events) = batch else { continue };
                        for event in events {
                            let path = event.path;
                            if !self.config.matches_extension(&path) || !path.is_file() {
                                continue;
                            }
                            match self.register_file(&path).await {
                                Ok(true) => debug!(path = %path.display(), "registered segment"),
                                Ok(false) => {}
                                Err(err) => {
                                    warn!(path = %path.display(), error = %err, "failed to register chunk");
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Register one chunk file. Returns false when skipped (unstable or
    /// already known).
    async fn register_file(&self, path: &Path) -> Result<bool> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("failed to stat {}", path.display()))?;

        let modified: DateTime<Utc> = metadata
            .modified()
            .context("filesystem does not report mtime")?
            .into();

        let age = Utc::now() - modified;
        if age < chrono::Duration::seconds(self.config.stability_delay_secs as i64) {
            return Ok(false);
        }

        let hash = compute_file_hash(path).await?;
        let end_ts = modified;
        let start_ts = end_ts - chrono::Duration::seconds(self.config.chunk_secs as i64);

        let segment = Segment::ready(start_ts, end_ts, path.to_path_buf());
        self.db.register_segment(&segment, Some(hash)).await
    }
}

/// Compute SHA256 hash of file content (first 12 hex chars).
pub async fn compute_file_hash(path: &Path) -> Result<String> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    let digest = hasher.finalize();

    Ok(format!("{:x}", digest)[..12].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn test_config(dir: &Path) -> IngestConfig {
        IngestConfig {
            recordings_dir: dir.to_path_buf(),
            chunk_secs: 15,
            stability_delay_secs: 5,
            extensions: vec!["mp4".to_string()],
        }
    }

    fn backdate(path: &Path, secs_ago: i64) {
        let then = Utc::now() - chrono::Duration::seconds(secs_ago);
        set_file_mtime(path, FileTime::from_unix_time(then.timestamp(), 0)).unwrap();
    }

    #[tokio::test]
    async fn test_scan_registers_stable_chunks() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("test.db")).unwrap();

        let recordings = temp.path().join("recordings");
        std::fs::create_dir_all(&recordings).unwrap();

        let chunk = recordings.join("chunk-001.mp4");
        std::fs::write(&chunk, b"fake video content").unwrap();
        backdate(&chunk, 60);

        // Files with the wrong extension are ignored
        std::fs::write(recordings.join("notes.txt"), b"not a chunk").unwrap();

        let watcher = SegmentWatcher::new(db.clone(), test_config(&recordings));
        let result = watcher.scan_once().await.unwrap();
        assert_eq!(result.registered, 1);

        let segments = db.unbatched_ready_segments().await.unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].file_path, chunk);
        assert_eq!(segments[0].duration_secs(), 15.0);
    }

    #[tokio::test]
    async fn test_unstable_chunk_skipped() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("test.db")).unwrap();

        let recordings = temp.path().join("recordings");
        std::fs::create_dir_all(&recordings).unwrap();

        // Freshly written file: mtime is now, inside the stability delay
        std::fs::write(recordings.join("chunk-001.mp4"), b"still being written").unwrap();

        let watcher = SegmentWatcher::new(db.clone(), test_config(&recordings));
        let result = watcher.scan_once().await.unwrap();

        assert_eq!(result.registered, 0);
        assert_eq!(result.skipped, 1);
        assert!(db.unbatched_ready_segments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rescan_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("test.db")).unwrap();

        let recordings = temp.path().join("recordings");
        std::fs::create_dir_all(&recordings).unwrap();
        let chunk = recordings.join("chunk-001.mp4");
        std::fs::write(&chunk, b"fake video content").unwrap();
        backdate(&chunk, 60);

        let watcher = SegmentWatcher::new(db.clone(), test_config(&recordings));
        assert_eq!(watcher.scan_once().await.unwrap().registered, 1);
        assert_eq!(watcher.scan_once().await.unwrap().registered, 0);

        assert_eq!(db.unbatched_ready_segments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_directory_errors() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("test.db")).unwrap();

        let watcher =
            SegmentWatcher::new(db, test_config(&temp.path().join("does-not-exist")));
        assert!(watcher.scan_once().await.is_err());
    }
}
