//! JSONL history store for `windowgate`. Writes one completed admission per line so a
//! persistent gate can pick up where the previous process left off.
//! Always writes; bring your own path.
//!
//! Stamps are finalized on the gate's release path, which must not block, so the completion
//! hook only queues them; a background task appends them with `tokio::fs`.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use windowgate::{ConfigError, SlidingWindowBuilder, SlidingWindowGate};

/// One line of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampRecord {
    pub completed_at_ms: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("encode: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("writer needs a tokio runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

#[derive(Clone, Debug)]
pub struct JsonlTimestampStore {
    path: PathBuf,
}

/// Background task appending queued stamps.
#[derive(Debug)]
pub struct StampWriter {
    task: JoinHandle<()>,
}

impl StampWriter {
    /// Resolves once every saver hook is dropped and all queued stamps are written.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "jsonl store: writer task failed");
        }
    }
}

impl JsonlTimestampStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stamps in file order. A missing file is an empty history; blank lines are skipped.
    pub async fn load(&self) -> Result<Vec<u64>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut stamps = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: StampRecord = serde_json::from_str(line)
                .map_err(|source| StoreError::Parse { line: idx + 1, source })?;
            stamps.push(record.completed_at_ms);
        }
        Ok(stamps)
    }

    pub async fn append(&self, completed_at_ms: u64) -> Result<(), StoreError> {
        let line = encode(completed_at_ms)?;
        let mut file =
            tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Rewrite the file keeping only the newest `keep` stamps.
    pub async fn compact(&self, keep: usize) -> Result<(), StoreError> {
        let mut stamps = self.load().await?;
        stamps.sort_unstable();
        let skip = stamps.len().saturating_sub(keep);
        let mut out = String::new();
        for at in &stamps[skip..] {
            out.push_str(&encode(*at)?);
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, out).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Completion hook queueing each stamp for the background writer, plus the writer itself.
    /// The hook never blocks; stamps reach the file in release order.
    pub fn saver(
        &self,
    ) -> Result<(impl Fn(u64) + Send + Sync + 'static, StampWriter), StoreError> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(write_stamps(self.clone(), rx));
        let path = self.path.clone();
        let save = move |at: u64| {
            if tx.send(at).is_err() {
                tracing::warn!(
                    path = %path.display(),
                    at,
                    "jsonl store: writer gone, stamp dropped"
                );
            }
        };
        Ok((save, StampWriter { task }))
    }

    /// Builder seeded from the file and saving back to it; set a clock before `build()`.
    pub async fn gate_builder(
        &self,
        count: usize,
        window: Duration,
    ) -> Result<(SlidingWindowBuilder, StampWriter), StoreError> {
        let seed = self.load().await?;
        let (save, writer) = self.saver()?;
        Ok((SlidingWindowGate::builder(count, window).seed(seed).on_complete(save), writer))
    }

    pub async fn persistent_gate(
        &self,
        count: usize,
        window: Duration,
    ) -> Result<(SlidingWindowGate, StampWriter), StoreError> {
        let (builder, writer) = self.gate_builder(count, window).await?;
        Ok((builder.build()?, writer))
    }
}

fn encode(completed_at_ms: u64) -> Result<String, StoreError> {
    let line =
        serde_json::to_string(&StampRecord { completed_at_ms }).map_err(StoreError::Encode)?;
    Ok(line + "\n")
}

async fn write_stamps(store: JsonlTimestampStore, mut rx: mpsc::UnboundedReceiver<u64>) {
    while let Some(at) = rx.recv().await {
        if let Err(e) = store.append(at).await {
            tracing::warn!(
                path = %store.path.display(),
                error = %e,
                "jsonl store: append failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTimestampStore::new(dir.path().join("absent.jsonl"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_then_load_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTimestampStore::new(dir.path().join("stamps.jsonl"));
        for at in [10, 20, 30] {
            store.append(at).await.unwrap();
        }
        assert_eq!(store.load().await.unwrap(), vec![10, 20, 30]);
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("completed_at_ms"));
    }

    #[tokio::test]
    async fn corrupt_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"completed_at_ms\":1}\n\nnot json\n").unwrap();
        let err = JsonlTimestampStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Parse { line: 3, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn compact_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTimestampStore::new(dir.path().join("stamps.jsonl"));
        for at in [5, 1, 4, 2, 3] {
            store.append(at).await.unwrap();
        }
        store.compact(2).await.unwrap();
        assert_eq!(store.load().await.unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn saver_queues_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTimestampStore::new(dir.path().join("stamps.jsonl"));
        let (save, writer) = store.saver().unwrap();
        for at in [3, 1, 2] {
            save(at);
        }
        drop(save);
        writer.finished().await;
        assert_eq!(store.load().await.unwrap(), vec![3, 1, 2]);
    }

    #[test]
    fn saver_outside_runtime_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTimestampStore::new(dir.path().join("stamps.jsonl"));
        assert!(matches!(store.saver(), Err(StoreError::Runtime(_))));
    }

    #[tokio::test]
    async fn invalid_config_surfaces_as_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlTimestampStore::new(dir.path().join("stamps.jsonl"));
        let err = store.persistent_gate(0, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Config(ConfigError::InvalidCount { provided: 0 })));
    }
}
