use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Value used for every expected label that was not detected or not legible
pub const DEFAULT_VALUE: &str = "0";

/// Labeled region in original-image pixel space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundingBox {
    pub label: String,
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// Clamp float corners into a `width` x `height` image.
    ///
    /// A box that collapses after clamping is widened to a single pixel instead of dropped,
    /// so `x1 < x2` and `y1 < y2` always hold for a non-empty image.
    pub fn clamped(label: impl Into<String>, corners: [f32; 4], width: u32, height: u32) -> Self {
        let [x1, y1, x2, y2] = corners;
        let (x1, x2) = clamp_axis(x1.min(x2), x1.max(x2), width);
        let (y1, y2) = clamp_axis(y1.min(y2), y1.max(y2), height);
        Self {
            label: label.into(),
            x1,
            y1,
            x2,
            y2,
        }
    }
}

fn clamp_axis(lo: f32, hi: f32, extent: u32) -> (u32, u32) {
    let extent = extent.max(1);
    let max = extent as f32;
    let lo = if lo.is_finite() { lo.clamp(0.0, max) } else { 0.0 };
    let hi = if hi.is_finite() { hi.clamp(0.0, max) } else { max };
    let mut lo = lo.floor() as u32;
    let mut hi = hi.ceil() as u32;
    if lo >= extent {
        lo = extent - 1;
    }
    if hi <= lo {
        hi = lo + 1;
    }
    (lo, hi.min(extent))
}

/// Label to recognized digits, one entry per expected label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionResult(BTreeMap<String, String>);

impl ExtractionResult {
    /// Result with every label set to [`DEFAULT_VALUE`].
    pub fn with_defaults<S: AsRef<str>>(labels: &[S]) -> Self {
        Self(
            labels
                .iter()
                .map(|label| (label.as_ref().to_string(), DEFAULT_VALUE.to_string()))
                .collect(),
        )
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.0.get(label).map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains_key(label)
    }

    pub fn insert(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.0.insert(label.into(), value.into());
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ExtractionResult {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Detection model bound to a counter, with the labels it is expected to find.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrModelRecord {
    pub id: String,
    pub counter_id: String,
    pub file_name: String,
    pub file_path: String,
    pub collected_info: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl OcrModelRecord {
    /// Registry key of the model file backing this record.
    pub fn model_name(&self) -> &str {
        std::path::Path::new(&self.file_path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.file_path)
    }
}

/// Storage file name that embeds the provenance of a model:
/// `model_{ocr_model_id}_counter_{counter_id}_{original_file_name}`.
pub fn model_file_name(ocr_model_id: &str, counter_id: &str, original_file_name: &str) -> String {
    format!("model_{ocr_model_id}_counter_{counter_id}_{original_file_name}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub id: String,
    pub counter_id: String,
    pub ocr_model_id: String,
    pub flavor: String,
    pub size: String,
    pub collected_info_values: ExtractionResult,
    pub uploader_identity: String,
    pub file_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct DataRecordPatch {
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DataRecordFilter {
    pub counter_id: Option<String>,
    pub flavor: Option<String>,
    pub size: Option<String>,
    pub uploader_identity: Option<String>,
    pub created_after: Option<OffsetDateTime>,
    pub created_before: Option<OffsetDateTime>,
}

impl DataRecordFilter {
    pub fn matches(&self, record: &DataRecord) -> bool {
        fn eq(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().is_none_or(|f| f == value)
        }
        eq(&self.counter_id, &record.counter_id)
            && eq(&self.flavor, &record.flavor)
            && eq(&self.size, &record.size)
            && eq(&self.uploader_identity, &record.uploader_identity)
            && self.created_after.is_none_or(|t| record.created_at >= t)
            && self.created_before.is_none_or(|t| record.created_at <= t)
    }
}

/// Production shift derived from the hour a record was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    First,
    Second,
    Third,
}

impl Shift {
    pub fn from_hour(hour: u8) -> Self {
        match hour {
            0..12 => Shift::First,
            12..20 => Shift::Second,
            _ => Shift::Third,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Shift::First => 1,
            Shift::Second => 2,
            Shift::Third => 3,
        }
    }
}

/// Current time in the local offset, falling back to UTC when the offset is unknown.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_boundaries() {
        let cases = [(0, 1), (11, 1), (12, 2), (19, 2), (20, 3), (23, 3)];
        for (hour, expected) in cases {
            assert_eq!(Shift::from_hour(hour).number(), expected, "hour {hour}");
        }
    }

    #[test]
    fn clamping_keeps_edge_boxes() {
        let b = BoundingBox::clamped("Total", [-15.0, -3.0, 120.0, 70.0], 100, 50);
        assert_eq!((b.x1, b.y1, b.x2, b.y2), (0, 0, 100, 50));

        // entirely to the right of the image
        let b = BoundingBox::clamped("Good", [150.0, 10.0, 180.0, 20.0], 100, 50);
        assert!(b.x1 < b.x2 && b.x2 <= 100);
        assert_eq!(b.width(), 1);
    }

    #[test]
    fn model_file_name_embeds_provenance() {
        assert_eq!(
            model_file_name("42", "C1", "panel.rten"),
            "model_42_counter_C1_panel.rten"
        );
    }

    #[test]
    fn extraction_defaults_cover_all_labels() {
        let result = ExtractionResult::with_defaults(&["Total", "Good"]);
        assert_eq!(result.len(), 2);
        assert_eq!(result.get("Total"), Some(DEFAULT_VALUE));
        assert_eq!(serde_json::to_string(&result).unwrap(), r#"{"Good":"0","Total":"0"}"#);
    }
}
