mod model;
mod state;

use std::future::Future;
use std::path::Path;

use sqlx::SqlitePool;

use crate::error::{Error, Result};
use crate::models::{DataRecord, DataRecordFilter, DataRecordPatch, OcrModelRecord};
use model::format_time;

/// Persistence of OCR model bindings and data records.
///
/// The ingestion path only needs `find_model_for_counter`, `save_data_record` and
/// `update_data_record`; the remaining operations back the model catalog and the CLI.
pub trait DocumentStore: Send + Sync + 'static {
    /// First model bound to the counter, in insertion order.
    fn find_model_for_counter(
        &self,
        counter_id: &str,
    ) -> impl Future<Output = Result<Option<OcrModelRecord>>> + Send;

    fn insert_ocr_model(&self, record: &OcrModelRecord) -> impl Future<Output = Result<()>> + Send;

    fn get_ocr_model(&self, id: &str) -> impl Future<Output = Result<Option<OcrModelRecord>>> + Send;

    fn list_ocr_models(
        &self,
        counter_id: Option<&str>,
    ) -> impl Future<Output = Result<Vec<OcrModelRecord>>> + Send;

    /// Returns whether a record was deleted.
    fn delete_ocr_model(&self, id: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Persist a new record and return its id.
    fn save_data_record(&self, record: &DataRecord) -> impl Future<Output = Result<String>> + Send;

    /// Apply `patch` to an existing record; fails with NotFound when the id is unknown.
    fn update_data_record(
        &self,
        id: &str,
        patch: &DataRecordPatch,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_data_record(&self, id: &str) -> impl Future<Output = Result<Option<DataRecord>>> + Send;

    fn list_data_records(
        &self,
        filter: &DataRecordFilter,
    ) -> impl Future<Output = Result<Vec<DataRecord>>> + Send;

    fn delete_data_record(&self, id: &str) -> impl Future<Output = Result<bool>> + Send;
}

/// SQLite-backed [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct CounterDb {
    pool: SqlitePool,
}

impl CounterDb {
    pub async fn open<P: AsRef<Path>>(db_file: P) -> Result<Self> {
        Ok(Self {
            pool: state::open_pool(db_file).await?,
        })
    }

    pub async fn in_memory() -> Result<Self> {
        Ok(Self {
            pool: state::open_memory_pool().await?,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl DocumentStore for CounterDb {
    async fn find_model_for_counter(&self, counter_id: &str) -> Result<Option<OcrModelRecord>> {
        sqlx::query("SELECT * FROM ocr_model WHERE counter_id = ?1 ORDER BY rowid ASC LIMIT 1")
            .bind(counter_id)
            .fetch_optional(&self.pool)
            .await?
            .map(OcrModelRecord::try_from)
            .transpose()
    }

    async fn insert_ocr_model(&self, record: &OcrModelRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO ocr_model (id, counter_id, file_name, file_path, collected_info, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        )
        .bind(&record.id)
        .bind(&record.counter_id)
        .bind(&record.file_name)
        .bind(&record.file_path)
        .bind(serde_json::to_string(&record.collected_info)?)
        .bind(format_time(&record.created_at)?)
        .bind(format_time(&record.updated_at)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_ocr_model(&self, id: &str) -> Result<Option<OcrModelRecord>> {
        sqlx::query("SELECT * FROM ocr_model WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(OcrModelRecord::try_from)
            .transpose()
    }

    async fn list_ocr_models(&self, counter_id: Option<&str>) -> Result<Vec<OcrModelRecord>> {
        sqlx::query("SELECT * FROM ocr_model WHERE ?1 IS NULL OR counter_id = ?1 ORDER BY rowid ASC")
            .bind(counter_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(OcrModelRecord::try_from)
            .collect()
    }

    async fn delete_ocr_model(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ocr_model WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_data_record(&self, record: &DataRecord) -> Result<String> {
        sqlx::query(
            r#"INSERT INTO data_record (id, counter_id, ocr_model_id, flavor, size, collected_info_values,
                uploader_identity, file_url, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
        )
        .bind(&record.id)
        .bind(&record.counter_id)
        .bind(&record.ocr_model_id)
        .bind(&record.flavor)
        .bind(&record.size)
        .bind(serde_json::to_string(&record.collected_info_values)?)
        .bind(&record.uploader_identity)
        .bind(&record.file_url)
        .bind(format_time(&record.created_at)?)
        .bind(format_time(&record.updated_at)?)
        .execute(&self.pool)
        .await?;
        Ok(record.id.clone())
    }

    async fn update_data_record(&self, id: &str, patch: &DataRecordPatch) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE data_record SET file_url = COALESCE(?1, file_url), updated_at = ?2 WHERE id = ?3"#,
        )
        .bind(&patch.file_url)
        .bind(format_time(&crate::models::now())?)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("data record {id}")));
        }
        Ok(())
    }

    async fn get_data_record(&self, id: &str) -> Result<Option<DataRecord>> {
        sqlx::query("SELECT * FROM data_record WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(DataRecord::try_from)
            .transpose()
    }

    async fn list_data_records(&self, filter: &DataRecordFilter) -> Result<Vec<DataRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM data_record WHERE ?1 IS NULL OR counter_id = ?1 ORDER BY rowid ASC",
        )
        .bind(filter.counter_id.as_deref())
        .fetch_all(&self.pool)
        .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = DataRecord::try_from(row)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn delete_data_record(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM data_record WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
