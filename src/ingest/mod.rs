//! Ingestion of submitted panel photos
//!
//! [`IngestionWorkflow::ingest`] stores the photo, reads it and persists a
//! [`DataRecord`] before returning. Uploading the photo and writing the report row happen
//! afterwards on a single background worker fed through a bounded queue.

mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::assets::AssetStore;
use crate::core::db::DocumentStore;
use crate::core::run_blocking;
use crate::error::{Error, Result};
use crate::models::{DataRecord, ExtractionResult, now};
use crate::pipeline::ExtractionPipeline;
use crate::sink::SinkWriter;

pub use worker::{IngestJob, WorkerSettings, WorkerStats};
use worker::{Worker, remove_local};

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub image: Vec<u8>,
    pub file_name: String,
    pub counter_id: String,
    pub flavor: String,
    pub size: String,
    /// Values supplied by the operator; extraction is skipped when present
    pub values_override: Option<ExtractionResult>,
    pub uploader: String,
}

pub struct IngestionWorkflow<S: DocumentStore> {
    store: Arc<S>,
    pipeline: ExtractionPipeline,
    upload_dir: PathBuf,
    jobs: mpsc::Sender<IngestJob>,
    worker: JoinHandle<WorkerStats>,
}

impl<S: DocumentStore> IngestionWorkflow<S> {
    /// Create the upload directory and spawn the background worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        store: Arc<S>,
        pipeline: ExtractionPipeline,
        upload_dir: impl Into<PathBuf>,
        assets: Arc<dyn AssetStore>,
        sink: Option<SinkWriter>,
        settings: WorkerSettings,
        queue_capacity: usize,
    ) -> Result<Self> {
        let upload_dir = upload_dir.into();
        std::fs::create_dir_all(&upload_dir).map_err(|e| {
            Error::Storage(format!("cannot create upload dir {}: {e}", upload_dir.display()))
        })?;

        let (jobs, receiver) = mpsc::channel(queue_capacity.max(1));
        let worker = Worker {
            store: store.clone(),
            assets,
            sink,
            settings,
        };
        let worker = tokio::spawn(worker.run(receiver));

        Ok(Self {
            store,
            pipeline,
            upload_dir,
            jobs,
            worker,
        })
    }

    /// Store, read and record one photo. The returned record has no `file_url` yet;
    /// it is filled in by the background worker.
    pub async fn ingest(&self, request: IngestRequest) -> Result<DataRecord> {
        let IngestRequest {
            image,
            file_name,
            counter_id,
            flavor,
            size,
            values_override,
            uploader,
        } = request;

        if counter_id.trim().is_empty() {
            return Err(Error::Validation("counter id must not be empty".to_string()));
        }
        if image.is_empty() {
            return Err(Error::Validation("uploaded image is empty".to_string()));
        }

        let local_path = self.persist_upload(&file_name, &image).await?;

        let fields = RecordFields {
            counter_id,
            flavor,
            size,
            uploader,
        };
        let record = match self.record(image, values_override, fields).await {
            Ok(record) => record,
            Err(e) => {
                remove_local(&local_path).await;
                return Err(e);
            }
        };

        let job = IngestJob {
            local_path,
            record: record.clone(),
        };
        if let Err(e) = self.jobs.send(job).await {
            error!(
                record = %record.id,
                path = %e.0.local_path.display(),
                "ingestion worker is gone, upload will not happen"
            );
        }
        Ok(record)
    }

    async fn persist_upload(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let base = Path::new(file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("upload");
        let path = self.upload_dir.join(format!("{}_{base}", Uuid::new_v4()));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::Storage(format!("failed to store upload {}: {e}", path.display())))?;
        Ok(path)
    }

    async fn record(
        &self,
        image: Vec<u8>,
        values_override: Option<ExtractionResult>,
        fields: RecordFields,
    ) -> Result<DataRecord> {
        let model = self
            .store
            .find_model_for_counter(&fields.counter_id)
            .await?
            .ok_or_else(|| Error::NoModelForCounter(fields.counter_id.clone()))?;

        let values = match values_override {
            Some(values) => values,
            None => {
                let pipeline = self.pipeline.clone();
                let model_name = model.model_name().to_string();
                let labels = model.collected_info.clone();
                run_blocking(move || {
                    let img = image::load_from_memory(&image)?;
                    pipeline.extract(&img, &model_name, &labels)
                })
                .await?
            }
        };

        let timestamp = now();
        let mut record = DataRecord {
            id: Uuid::new_v4().to_string(),
            counter_id: fields.counter_id,
            ocr_model_id: model.id,
            flavor: fields.flavor,
            size: fields.size,
            collected_info_values: values,
            uploader_identity: fields.uploader,
            file_url: None,
            created_at: timestamp,
            updated_at: timestamp,
        };
        record.id = self.store.save_data_record(&record).await?;
        info!(record = %record.id, counter = %record.counter_id, "saved data record");
        Ok(record)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Stop accepting work and wait until the worker has drained the queue.
    pub async fn shutdown(self) -> WorkerStats {
        drop(self.jobs);
        match self.worker.await {
            Ok(stats) => stats,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                error!(error = %e, "ingestion worker was cancelled");
                WorkerStats::default()
            }
        }
    }
}

struct RecordFields {
    counter_id: String,
    flavor: String,
    size: String,
    uploader: String,
}
