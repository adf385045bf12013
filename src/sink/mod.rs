//! Reporting rows written to an external spreadsheet
//!
//! Each counter has a [`SheetLayout`] describing where every field of a [`DataRecord`]
//! lands. Rows are appended below the existing data: the writer reads the current row
//! count and then writes at `count + 1`. That read-then-write is not atomic, so callers
//! must not run two writers against the same sheet at once; the ingestion worker is the
//! single writer in this crate.

mod sheets;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{DataRecord, Shift};

pub use sheets::{DEFAULT_SHEETS_API, GoogleSheetsClient};

/// Spreadsheet-like store addressed by `Sheet!A1`-style ranges.
#[async_trait]
pub trait TabularSink: Send + Sync {
    async fn read_values(&self, sheet_id: &str, range: &str) -> Result<Vec<Vec<Value>>>;

    async fn update_values(&self, sheet_id: &str, range: &str, rows: Vec<Vec<Value>>) -> Result<()>;
}

/// Column indices of the fixed record fields. Fields without an index are not written.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FixedColumns {
    pub timestamp: Option<usize>,
    pub uploader: Option<usize>,
    pub image: Option<usize>,
    pub date: Option<usize>,
    pub shift: Option<usize>,
    pub flavor: Option<usize>,
    pub size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SheetLayout {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    #[serde(default = "default_first_column")]
    pub first_column: String,
    #[serde(default = "default_last_column")]
    pub last_column: String,
    #[serde(default)]
    pub columns: FixedColumns,
    /// Collected label to column index
    #[serde(default)]
    pub headers: BTreeMap<String, usize>,
}

impl SheetLayout {
    /// Reject layouts that assign two fields to the same column.
    pub fn validate(&self) -> Result<()> {
        let fixed = &self.columns;
        let named = [
            ("timestamp", fixed.timestamp),
            ("uploader", fixed.uploader),
            ("image", fixed.image),
            ("date", fixed.date),
            ("shift", fixed.shift),
            ("flavor", fixed.flavor),
            ("size", fixed.size),
        ]
        .into_iter()
        .filter_map(|(name, index)| index.map(|i| (name, i)))
        .chain(self.headers.iter().map(|(label, &i)| (label.as_str(), i)));

        let mut taken: HashMap<usize, &str> = HashMap::new();
        for (name, index) in named {
            if let Some(previous) = taken.insert(index, name) {
                return Err(Error::Validation(format!(
                    "sheet {}: column {index} is assigned to both {previous} and {name}",
                    self.sheet_name
                )));
            }
        }
        Ok(())
    }
}

fn default_first_column() -> String {
    "A".to_string()
}

fn default_last_column() -> String {
    "Z".to_string()
}

/// Sheet layouts keyed by counter id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct SinkLayouts(HashMap<String, SheetLayout>);

impl SinkLayouts {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Validation(format!("cannot read sink layouts {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Parse layouts and check each one for overlapping columns.
    pub fn from_json(text: &str) -> Result<Self> {
        let layouts: Self = serde_json::from_str(text)?;
        for layout in layouts.0.values() {
            layout.validate()?;
        }
        Ok(layouts)
    }

    pub fn get(&self, counter_id: &str) -> Option<&SheetLayout> {
        self.0.get(counter_id)
    }

    pub fn insert(&mut self, counter_id: impl Into<String>, layout: SheetLayout) {
        self.0.insert(counter_id.into(), layout);
    }
}

/// Shift number written for a record created at `hour`.
pub fn shift_for_hour(hour: u8) -> u8 {
    Shift::from_hour(hour).number()
}

/// Flatten a record into a row following `layout`.
///
/// Columns are ordered by index, indices with nothing assigned are `null`, and a header
/// whose label has no collected value is written as `0`.
pub fn build_row(record: &DataRecord, layout: &SheetLayout) -> Vec<Value> {
    let created = record.created_at;
    let date = format!(
        "{:04}-{:02}-{:02}",
        created.year(),
        u8::from(created.month()),
        created.day()
    );
    let timestamp = format!(
        "{date} {:02}:{:02}:{:02}",
        created.hour(),
        created.minute(),
        created.second()
    );

    let mut cells: BTreeMap<usize, Value> = BTreeMap::new();
    let fixed = &layout.columns;
    let mut put = |index: Option<usize>, value: Value| {
        if let Some(index) = index {
            cells.insert(index, value);
        }
    };
    put(fixed.timestamp, json!(timestamp));
    put(fixed.uploader, json!(record.uploader_identity));
    put(fixed.image, json!(record.file_url));
    put(fixed.date, json!(date));
    put(fixed.shift, json!(shift_for_hour(created.hour())));
    put(fixed.flavor, json!(record.flavor));
    put(fixed.size, json!(record.size));

    for (label, &index) in &layout.headers {
        let value = match record.collected_info_values.get(label) {
            Some(v) => json!(v),
            None => json!(0),
        };
        cells.insert(index, value);
    }

    let width = cells.keys().next_back().map_or(0, |last| last + 1);
    let mut row = vec![Value::Null; width];
    for (index, value) in cells {
        row[index] = value;
    }
    row
}

pub struct SinkWriter {
    sink: Arc<dyn TabularSink>,
    layouts: SinkLayouts,
}

impl SinkWriter {
    pub fn new(sink: Arc<dyn TabularSink>, layouts: SinkLayouts) -> Self {
        Self { sink, layouts }
    }

    /// Append the row derived from `record`. Counters without a layout are skipped.
    pub async fn write(&self, record: &DataRecord) -> Result<()> {
        let Some(layout) = self.layouts.get(&record.counter_id) else {
            warn!(counter = %record.counter_id, record = %record.id, "no sheet layout for counter, skipping sink write");
            return Ok(());
        };
        let row = build_row(record, layout);
        self.append_row(
            &layout.spreadsheet_id,
            &layout.sheet_name,
            &layout.first_column,
            &layout.last_column,
            row,
        )
        .await
    }

    /// Write `row` below the rows already present in `sheet_name!first:last`.
    pub async fn append_row(
        &self,
        sheet_id: &str,
        sheet_name: &str,
        first_column: &str,
        last_column: &str,
        row: Vec<Value>,
    ) -> Result<()> {
        let full_range = format!("{sheet_name}!{first_column}:{last_column}");
        let existing = self.sink.read_values(sheet_id, &full_range).await?;
        let target = if existing.is_empty() {
            full_range
        } else {
            format!("{sheet_name}!{first_column}{}", existing.len() + 1)
        };
        self.sink.update_values(sheet_id, &target, vec![row]).await?;
        info!(sheet = %sheet_id, range = %target, "appended row");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionResult;
    use parking_lot::Mutex;
    use time::macros::datetime;

    fn record(values: ExtractionResult) -> DataRecord {
        DataRecord {
            id: "r1".to_string(),
            counter_id: "C1".to_string(),
            ocr_model_id: "m1".to_string(),
            flavor: "cola".to_string(),
            size: "1L".to_string(),
            collected_info_values: values,
            uploader_identity: "op1".to_string(),
            file_url: Some("https://img/1.png".to_string()),
            created_at: datetime!(2026-03-04 21:05:09 UTC),
            updated_at: datetime!(2026-03-04 21:05:09 UTC),
        }
    }

    fn layout(headers: &[(&str, usize)], columns: FixedColumns) -> SheetLayout {
        SheetLayout {
            spreadsheet_id: "sheet".to_string(),
            sheet_name: "Data".to_string(),
            first_column: "A".to_string(),
            last_column: "J".to_string(),
            columns,
            headers: headers.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn row_pads_missing_columns_and_defaults_headers() {
        let rec = record([("Total", "120")].into_iter().collect());
        let row = build_row(&rec, &layout(&[("Total", 8), ("Good", 9)], FixedColumns::default()));
        assert_eq!(row.len(), 10);
        assert!(row[..8].iter().all(Value::is_null));
        assert_eq!(row[8], json!("120"));
        assert_eq!(row[9], json!(0));
    }

    #[test]
    fn fixed_columns_are_filled() {
        let columns = FixedColumns {
            timestamp: Some(0),
            uploader: Some(1),
            image: Some(2),
            date: Some(3),
            shift: Some(4),
            flavor: Some(5),
            size: Some(6),
        };
        let rec = record([("Total", "87")].into_iter().collect());
        let row = build_row(&rec, &layout(&[("Total", 7)], columns));
        assert_eq!(
            row,
            vec![
                json!("2026-03-04 21:05:09"),
                json!("op1"),
                json!("https://img/1.png"),
                json!("2026-03-04"),
                json!(3),
                json!("cola"),
                json!("1L"),
                json!("87"),
            ]
        );
    }

    #[test]
    fn layouts_parse_from_json() {
        let layouts = SinkLayouts::from_json(
            r#"{"C1": {"spreadsheet_id": "abc", "sheet_name": "Line 1", "columns": {"image": 0}, "headers": {"Total": 7}}}"#,
        )
        .unwrap();
        let layout = layouts.get("C1").unwrap();
        assert_eq!(layout.first_column, "A");
        assert_eq!(layout.headers["Total"], 7);
        assert!(layout.columns.shift.is_none());
    }

    #[test]
    fn header_on_a_fixed_column_is_rejected() {
        let err = SinkLayouts::from_json(
            r#"{"C1": {"spreadsheet_id": "abc", "sheet_name": "Line 1", "columns": {"image": 2}, "headers": {"Total": 2}}}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationError);
        assert!(err.to_string().contains("image and Total"));
    }

    #[test]
    fn two_headers_on_one_column_are_rejected() {
        let sheet = layout(&[("Good", 3), ("Total", 3)], FixedColumns::default());
        assert!(sheet.validate().is_err());
        assert!(layout(&[("Good", 3), ("Total", 4)], FixedColumns::default()).validate().is_ok());
    }

    #[derive(Default)]
    struct MemorySink {
        rows: Mutex<Vec<Vec<Value>>>,
        writes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TabularSink for MemorySink {
        async fn read_values(&self, _sheet_id: &str, _range: &str) -> Result<Vec<Vec<Value>>> {
            Ok(self.rows.lock().clone())
        }

        async fn update_values(&self, _sheet_id: &str, range: &str, rows: Vec<Vec<Value>>) -> Result<()> {
            self.writes.lock().push(range.to_string());
            self.rows.lock().extend(rows);
            Ok(())
        }
    }

    #[tokio::test]
    async fn appends_below_existing_rows() -> anyhow::Result<()> {
        let sink = Arc::new(MemorySink::default());
        let mut layouts = SinkLayouts::default();
        layouts.insert("C1", layout(&[("Total", 1)], FixedColumns::default()));
        let writer = SinkWriter::new(sink.clone(), layouts);

        let rec = record([("Total", "5")].into_iter().collect());
        writer.write(&rec).await?;
        writer.write(&rec).await?;
        writer.write(&rec).await?;

        assert_eq!(*sink.writes.lock(), vec!["Data!A:J", "Data!A2", "Data!A3"]);
        assert_eq!(sink.rows.lock().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn counters_without_layout_are_skipped() -> anyhow::Result<()> {
        let sink = Arc::new(MemorySink::default());
        let writer = SinkWriter::new(sink.clone(), SinkLayouts::default());
        writer.write(&record(ExtractionResult::default())).await?;
        assert!(sink.writes.lock().is_empty());
        Ok(())
    }
}
