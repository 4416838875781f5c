//! # Last-Known-Good Configuration Cache
//!
//! Persists the most recent configuration frame per adapter so streaming
//! can resume after a restart even when the upstream device never answers
//! a configuration request. Frames serialize to JSON, one file per adapter
//! named `<adapterName>.configuration.json` in the cache directory.
//!
//! Writes go through a bounded background queue and an atomic
//! write-then-rename, so the frame-processing path never blocks on disk
//! and readers never observe a half-written file. Cache failures are
//! reported and otherwise ignored; the cache is an optimization, not a
//! source of truth.

use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::frames::ConfigurationFrame;

const WRITE_QUEUE_DEPTH: usize = 8;

enum CacheJob {
    Write { path: PathBuf, contents: String },
    Flush(oneshot::Sender<()>),
}

/// Handle to the per-adapter configuration cache.
///
/// Cloneable; all clones share one background writer.
#[derive(Debug, Clone)]
pub struct ConfigurationCacheStore {
    directory: PathBuf,
    jobs: mpsc::Sender<CacheJob>,
}

impl ConfigurationCacheStore {
    /// Opens a cache rooted at `directory` and spawns its background
    /// writer. The directory is created on first write.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        let (jobs, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        tokio::spawn(write_worker(rx));
        ConfigurationCacheStore { directory, jobs }
    }

    /// Path of the cache file for `name`.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.configuration.json"))
    }

    /// Queues an asynchronous write of `frame` as the last-known-good
    /// configuration for `name`. Never blocks; a full queue or
    /// serialization failure is reported and the write dropped.
    pub fn cache(&self, name: &str, frame: &ConfigurationFrame) {
        let contents = match serde_json::to_string_pretty(frame) {
            Ok(contents) => contents,
            Err(err) => {
                error!(adapter = name, %err, "failed to serialize configuration frame for cache");
                return;
            }
        };
        let job = CacheJob::Write {
            path: self.file_path(name),
            contents,
        };
        if self.jobs.try_send(job).is_err() {
            warn!(adapter = name, "configuration cache write queue full, dropping write");
        }
    }

    /// Loads the cached configuration for `name`.
    ///
    /// A missing file is not an error and yields `None`; a corrupt or
    /// unreadable file is reported and also yields `None`.
    pub async fn load(&self, name: &str) -> Option<ConfigurationFrame> {
        let path = self.file_path(name);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                error!(adapter = name, path = %path.display(), %err, "failed to read cached configuration");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(frame) => {
                debug!(adapter = name, path = %path.display(), "loaded cached configuration");
                Some(frame)
            }
            Err(err) => {
                error!(adapter = name, path = %path.display(), %err, "cached configuration is corrupt");
                None
            }
        }
    }

    /// Waits until every previously queued write has been applied.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.jobs.send(CacheJob::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

async fn write_worker(mut jobs: mpsc::Receiver<CacheJob>) {
    while let Some(job) = jobs.recv().await {
        match job {
            CacheJob::Write { path, contents } => {
                if let Err(err) = write_atomic(&path, &contents).await {
                    error!(path = %path.display(), %err, "configuration cache write failed");
                }
            }
            CacheJob::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

/// Write to a sibling temp file, then rename over the target.
async fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}
