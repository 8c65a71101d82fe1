//! The file-spool channel variant (§4.4 "File-spool variant"), grounded on
//! `wbase/FileChannelShared.h`.
//!
//! Instead of streaming rows to the czar as they're produced, this variant appends
//! length-prefixed framed messages to a local result file; only once the last sharing task
//! finishes does it flush, close, and send a single summary message back over the transport.
//! Partially written files are removed on any failure, and two static-style entry points clean
//! up orphaned result files left behind by a crashed czar or worker, supplementing spec.md from
//! the original's restart-recovery hooks.

use observability_deps::tracing::{info, warn};
use qserv_types::{ProtoHeader, Transport};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex as AsyncMutex;

/// Errors from spooling to or finalizing a result file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying filesystem operation failed.
    #[error("result file i/o error: {0}")]
    Io(#[from] io::Error),
    /// The transport rejected the final summary send.
    #[error("failed to send result-file summary: {0}")]
    Transport(#[from] qserv_types::TransportError),
}

struct SpoolState {
    writer: Option<BufWriter<File>>,
    rows_written: u64,
}

/// A result channel that spools framed rows to `path` instead of streaming them, sending only
/// the final summary message over `transport`.
pub struct FileSpoolChannel {
    path: PathBuf,
    task_count: usize,
    last_count: AtomicUsize,
    state: AsyncMutex<SpoolState>,
    transport: Arc<dyn Transport>,
}

impl FileSpoolChannel {
    /// Open `path` for spooling, truncating any existing content.
    pub async fn create(
        path: impl Into<PathBuf>,
        task_count: usize,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, Error> {
        let path = path.into();
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            task_count,
            last_count: AtomicUsize::new(0),
            state: AsyncMutex::new(SpoolState {
                writer: Some(BufWriter::new(file)),
                rows_written: 0,
            }),
            transport,
        })
    }

    /// Append one length-prefixed framed message to the spool file.
    pub async fn spool_row(&self, payload: &[u8]) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let writer = state
            .writer
            .as_mut()
            .expect("spool_row called after the file was finalized");
        writer.write_u32_le(payload.len() as u32).await?;
        writer.write_all(payload).await?;
        state.rows_written += 1;
        Ok(())
    }

    /// Called when one sharing task finishes. Once every task has reported, flushes and closes
    /// the spool file and sends the single summary message, matching the in-memory channel's
    /// "only after the last task" coordination (§4.4).
    ///
    /// On any failure the partially written file is removed rather than left behind corrupt.
    pub async fn task_finished(&self, summary_header: &ProtoHeader) -> Result<bool, Error> {
        let count = self.last_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count < self.task_count {
            return Ok(false);
        }
        if let Err(err) = self.finalize(summary_header).await {
            warn!(path = %self.path.display(), %err, "removing partially written result file after failure");
            let _ = tokio::fs::remove_file(&self.path).await;
            return Err(err);
        }
        Ok(true)
    }

    async fn finalize(&self, summary_header: &ProtoHeader) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if let Some(mut writer) = state.writer.take() {
            writer.flush().await?;
        }
        info!(
            path = %self.path.display(),
            rows = state.rows_written,
            "result file spool finalized"
        );
        let summary = format!(
            "qserv-result-file:{}:endnodata={}",
            self.path.display(),
            summary_header.endnodata
        )
        .into_bytes();
        self.transport.send(summary).await?;
        Ok(())
    }
}

/// Remove result files left behind by `czar_id`/`query_id` across a czar restart: the czar no
/// longer expects their contents, so they are orphaned and safe to delete. Supplements the
/// distilled spec with `FileChannelShared::cleanupResultsOnCzarRestart`'s restart-recovery
/// behavior from `original_source`.
pub async fn cleanup_results_on_czar_restart(dir: &Path, czar_id: u32, query_id: u64) -> io::Result<usize> {
    let prefix = format!("czar{czar_id}_query{query_id}_");
    remove_matching(dir, &prefix).await
}

/// Remove every result file in `dir` on worker startup, since none of them can be trusted to
/// correspond to a still-live czar request. Supplements the distilled spec with
/// `FileChannelShared::cleanupResultsOnWorkerRestart`'s behavior.
pub async fn cleanup_results_on_worker_restart(dir: &Path) -> io::Result<usize> {
    remove_matching(dir, "").await
}

async fn remove_matching(dir: &Path, prefix: &str) -> io::Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if prefix.is_empty() || name.starts_with(prefix) {
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qserv_types::TransportError;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, Default)]
    struct RecordingTransport {
        sent: AsyncMutex<Vec<Vec<u8>>>,
        finished: AtomicBool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, buf: Vec<u8>) -> Result<(), TransportError> {
            self.sent.lock().await.push(buf);
            Ok(())
        }

        fn is_finished(&self) -> bool {
            self.finished.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn summary_is_sent_only_after_every_task_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.dat");
        let transport = Arc::new(RecordingTransport::default());
        let channel = FileSpoolChannel::create(&path, 2, Arc::clone(&transport) as Arc<dyn Transport>)
            .await
            .unwrap();

        channel.spool_row(b"row-one").await.unwrap();
        let header = ProtoHeader {
            protocol: 2,
            size: 0,
            md5: [0; 16],
            wname: "w".into(),
            endnodata: true,
        };
        assert!(!channel.task_finished(&header).await.unwrap());
        assert!(channel.sent_count(&transport).await == 0);

        channel.spool_row(b"row-two").await.unwrap();
        assert!(channel.task_finished(&header).await.unwrap());
        assert_eq!(channel.sent_count(&transport).await, 1);
    }

    impl FileSpoolChannel {
        async fn sent_count(&self, transport: &RecordingTransport) -> usize {
            transport.sent.lock().await.len()
        }
    }

    #[tokio::test]
    async fn worker_restart_cleanup_removes_every_file_in_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.dat"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("b.dat"), b"y").await.unwrap();
        let removed = cleanup_results_on_worker_restart(dir.path()).await.unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn czar_restart_cleanup_only_removes_matching_prefix() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("czar1_query7_a.dat"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("czar2_query9_b.dat"), b"y").await.unwrap();
        let removed = cleanup_results_on_czar_restart(dir.path(), 1, 7).await.unwrap();
        assert_eq!(removed, 1);
        assert!(dir.path().join("czar2_query9_b.dat").exists());
    }
}
