use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::assets::AssetStore;
use crate::config::DEFAULT_REMOTE_TIMEOUT;
use crate::core::db::DocumentStore;
use crate::error::{Error, Result};
use crate::models::{DataRecord, DataRecordPatch};
use crate::sink::SinkWriter;

/// Work left for a record after the caller got its response.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub local_path: PathBuf,
    pub record: DataRecord,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Applied to each upload attempt and to the sink write
    pub remote_timeout: Duration,
    pub upload_attempts: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            upload_attempts: 2,
        }
    }
}

/// Outcome counts of the jobs a worker processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
}

pub(crate) struct Worker<S: DocumentStore> {
    pub(crate) store: Arc<S>,
    pub(crate) assets: Arc<dyn AssetStore>,
    pub(crate) sink: Option<SinkWriter>,
    pub(crate) settings: WorkerSettings,
}

impl<S: DocumentStore> Worker<S> {
    /// Process jobs until every sender is dropped.
    pub(crate) async fn run(self, mut jobs: mpsc::Receiver<IngestJob>) -> WorkerStats {
        let mut stats = WorkerStats::default();
        while let Some(job) = jobs.recv().await {
            match self.complete(&job).await {
                Ok(()) => stats.completed += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!(
                        record = %job.record.id,
                        path = %job.local_path.display(),
                        kind = ?e.kind(),
                        error = %e,
                        "background processing failed"
                    );
                }
            }
        }
        info!(completed = stats.completed, failed = stats.failed, "ingestion worker stopped");
        stats
    }

    async fn complete(&self, job: &IngestJob) -> Result<()> {
        let url = self.upload(&job.local_path).await?;
        remove_local(&job.local_path).await;

        let patch = DataRecordPatch {
            file_url: Some(url.clone()),
        };
        self.store.update_data_record(&job.record.id, &patch).await?;

        let Some(sink) = &self.sink else {
            debug!(record = %job.record.id, "no sink configured");
            return Ok(());
        };
        let mut record = job.record.clone();
        record.file_url = Some(url);
        timeout(self.settings.remote_timeout, sink.write(&record))
            .await
            .map_err(|_| {
                Error::Sink(format!(
                    "write timed out after {:?}",
                    self.settings.remote_timeout
                ))
            })??;
        Ok(())
    }

    async fn upload(&self, path: &Path) -> Result<String> {
        let attempts = self.settings.upload_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            let outcome = match timeout(self.settings.remote_timeout, self.assets.upload(path)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Upload(format!(
                    "timed out after {:?}",
                    self.settings.remote_timeout
                ))),
            };
            match outcome {
                Ok(url) => return Ok(url),
                Err(e) => {
                    warn!(path = %path.display(), attempt, error = %e, "upload attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Upload("no upload attempted".to_string())))
    }
}

/// Delete a local upload, logging instead of failing.
pub(crate) async fn remove_local(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove local upload");
    }
}
