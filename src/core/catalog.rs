use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::core::db::DocumentStore;
use crate::core::registry::ModelRegistry;
use crate::core::run_blocking;
use crate::error::{Error, Result};
use crate::models::{OcrModelRecord, model_file_name, now};

/// Binds detection model files to counters: keeps the stored file, the registry and the
/// `ocr_model` records in step with each other.
pub struct ModelCatalog<S: DocumentStore> {
    store: Arc<S>,
    registry: Arc<ModelRegistry>,
}

impl<S: DocumentStore> Clone for ModelCatalog<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<S: DocumentStore> ModelCatalog<S> {
    pub fn new(store: Arc<S>, registry: Arc<ModelRegistry>) -> Self {
        Self { store, registry }
    }

    /// Store `bytes` as a new model for `counter_id` and make it available for extraction.
    ///
    /// `collected_info` lists the labels the model reads; it becomes both the record's
    /// expected labels and the model's class names, in class index order.
    pub async fn register(
        &self,
        counter_id: &str,
        original_file_name: &str,
        bytes: Vec<u8>,
        collected_info: Vec<String>,
    ) -> Result<OcrModelRecord> {
        if counter_id.trim().is_empty() {
            return Err(Error::Validation("counter id must not be empty".to_string()));
        }
        if collected_info.is_empty() {
            return Err(Error::Validation(format!(
                "model {original_file_name} declares no labels to collect"
            )));
        }

        let id = Uuid::new_v4().to_string();
        let name = model_file_name(&id, counter_id, original_file_name);
        let storage = self.registry.storage().clone();

        {
            let registry = self.registry.clone();
            let name = name.clone();
            let labels = collected_info.clone();
            run_blocking(move || {
                storage.write(&name, &bytes)?;
                storage.write_labels(&name, &labels)?;
                if let Err(e) = registry.add(&name) {
                    if let Err(cleanup) = storage.delete(&name) {
                        warn!(model = %name, error = %cleanup, "failed to remove rejected model file");
                    }
                    return Err(e);
                }
                Ok(())
            })
            .await?;
        }

        let timestamp = now();
        let record = OcrModelRecord {
            id,
            counter_id: counter_id.to_string(),
            file_name: original_file_name.to_string(),
            file_path: self.registry.storage().location(&name),
            collected_info,
            created_at: timestamp,
            updated_at: timestamp,
        };

        if let Err(e) = self.store.insert_ocr_model(&record).await {
            let registry = self.registry.clone();
            let evict = name.clone();
            if let Err(cleanup) = run_blocking(move || registry.remove(&evict)).await {
                warn!(model = %name, error = %cleanup, "failed to roll back model after store error");
            }
            return Err(e);
        }

        info!(model = %name, counter = %counter_id, "registered OCR model");
        Ok(record)
    }

    /// Unload the model, delete its file and its record.
    pub async fn retire(&self, ocr_model_id: &str) -> Result<OcrModelRecord> {
        let record = self
            .store
            .get_ocr_model(ocr_model_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("OCR model {ocr_model_id}")))?;

        let registry = self.registry.clone();
        let name = record.model_name().to_string();
        run_blocking(move || registry.remove(&name)).await?;
        self.store.delete_ocr_model(ocr_model_id).await?;

        info!(model = %record.model_name(), counter = %record.counter_id, "retired OCR model");
        Ok(record)
    }

    pub async fn models_for_counter(&self, counter_id: &str) -> Result<Vec<OcrModelRecord>> {
        self.store.list_ocr_models(Some(counter_id)).await
    }

    pub async fn all_models(&self) -> Result<Vec<OcrModelRecord>> {
        self.store.list_ocr_models(None).await
    }
}
