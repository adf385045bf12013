use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{Error, Result};
use crate::models::{DataRecord, ExtractionResult, OcrModelRecord};

pub(super) fn format_time(t: &OffsetDateTime) -> Result<String> {
    t.format(&Rfc3339)
        .map_err(|e| Error::Validation(format!("unformattable timestamp {t}: {e}")))
}

pub(super) fn parse_time(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339)
        .map_err(|e| Error::Validation(format!("invalid stored timestamp {s:?}: {e}")))
}

impl TryFrom<SqliteRow> for OcrModelRecord {
    type Error = Error;

    fn try_from(row: SqliteRow) -> Result<Self> {
        let collected_info: String = row.try_get("collected_info")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(OcrModelRecord {
            id: row.try_get("id")?,
            counter_id: row.try_get("counter_id")?,
            file_name: row.try_get("file_name")?,
            file_path: row.try_get("file_path")?,
            collected_info: serde_json::from_str(&collected_info)?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        })
    }
}

impl TryFrom<SqliteRow> for DataRecord {
    type Error = Error;

    fn try_from(row: SqliteRow) -> Result<Self> {
        let values: String = row.try_get("collected_info_values")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(DataRecord {
            id: row.try_get("id")?,
            counter_id: row.try_get("counter_id")?,
            ocr_model_id: row.try_get("ocr_model_id")?,
            flavor: row.try_get("flavor")?,
            size: row.try_get("size")?,
            collected_info_values: serde_json::from_str::<ExtractionResult>(&values)?,
            uploader_identity: row.try_get("uploader_identity")?,
            file_url: row.try_get("file_url")?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        })
    }
}
