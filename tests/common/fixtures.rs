#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use counterscan::assets::AssetStore;
use counterscan::core::db::CounterDb;
use counterscan::core::{FsModelStorage, ModelCatalog, ModelRegistry, ModelStorage};
use counterscan::detection::model::{CoordinateSpace, DetectionModel, ModelLoader, RawDetection};
use counterscan::detection::ocr::RegionReader;
use counterscan::sink::TabularSink;
use counterscan::{Error, ExtractionPipeline};
use image::{DynamicImage, ImageBuffer, Rgb};
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;

/// Detector replaying a fixed list of boxes given in original image pixels.
pub struct ScriptedModel {
    detections: Vec<RawDetection>,
}

impl DetectionModel for ScriptedModel {
    fn input_size(&self) -> (u32, u32) {
        (64, 64)
    }

    fn coordinate_space(&self) -> CoordinateSpace {
        CoordinateSpace::Original
    }

    fn infer(&self, _input: &image::RgbImage) -> counterscan::Result<Vec<RawDetection>> {
        Ok(self.detections.clone())
    }
}

/// Loads "model files" that are text scripts, one `label x1 y1 x2 y2` line per detection.
pub struct ScriptedLoader;

impl ModelLoader for ScriptedLoader {
    fn load(
        &self,
        name: &str,
        bytes: Vec<u8>,
        _labels: Vec<String>,
    ) -> counterscan::Result<Arc<dyn DetectionModel>> {
        let text = String::from_utf8(bytes).map_err(|e| Error::load(name, e))?;
        let mut detections = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() != 5 {
                return Err(Error::load(name, format!("bad script line {line:?}")));
            }
            let mut corners = [0.0f32; 4];
            for (slot, raw) in corners.iter_mut().zip(&parts[1..]) {
                *slot = raw
                    .parse()
                    .map_err(|e| Error::load(name, format!("bad coordinate {raw:?}: {e}")))?;
            }
            detections.push(RawDetection {
                label: parts[0].to_string(),
                score: 0.9,
                corners,
            });
        }
        Ok(Arc::new(ScriptedModel { detections }))
    }
}

/// Serialize detections into the script format understood by [`ScriptedLoader`].
pub fn script(detections: &[(&str, [i32; 4])]) -> Vec<u8> {
    detections
        .iter()
        .map(|(label, [x1, y1, x2, y2])| format!("{label} {x1} {y1} {x2} {y2}\n"))
        .collect::<String>()
        .into_bytes()
}

/// Reader answering by crop width, so tests can tell regions apart.
#[derive(Default)]
pub struct WidthReader {
    readings: HashMap<u32, Option<String>>,
    calls: AtomicU32,
}

impl WidthReader {
    pub fn new(readings: &[(u32, Option<&str>)]) -> Self {
        Self {
            readings: readings
                .iter()
                .map(|(w, r)| (*w, r.map(str::to_string)))
                .collect(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RegionReader for WidthReader {
    fn read(&self, crop: &DynamicImage) -> counterscan::Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.readings.get(&crop.width()).cloned().flatten())
    }
}

/// Asset store that records uploads and can be told to fail the first attempts.
#[derive(Default)]
pub struct RecordingAssets {
    pub uploaded: Mutex<Vec<PathBuf>>,
    failures_left: AtomicU32,
}

impl RecordingAssets {
    pub fn failing(times: u32) -> Self {
        Self {
            uploaded: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(times),
        }
    }
}

#[async_trait]
impl AssetStore for RecordingAssets {
    async fn upload(&self, local_path: &Path) -> counterscan::Result<String> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Upload("asset host unavailable".to_string()));
        }
        if !local_path.exists() {
            return Err(Error::Upload(format!("{} does not exist", local_path.display())));
        }
        self.uploaded.lock().push(local_path.to_path_buf());
        let name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload");
        Ok(format!("https://assets.test/{name}"))
    }
}

/// In-memory spreadsheet.
#[derive(Default)]
pub struct MemorySheet {
    pub rows: Mutex<Vec<Vec<Value>>>,
    pub ranges: Mutex<Vec<String>>,
}

#[async_trait]
impl TabularSink for MemorySheet {
    async fn read_values(&self, _sheet_id: &str, _range: &str) -> counterscan::Result<Vec<Vec<Value>>> {
        Ok(self.rows.lock().clone())
    }

    async fn update_values(
        &self,
        _sheet_id: &str,
        range: &str,
        rows: Vec<Vec<Value>>,
    ) -> counterscan::Result<()> {
        self.ranges.lock().push(range.to_string());
        self.rows.lock().extend(rows);
        Ok(())
    }
}

/// Sheet whose first writes are rejected, or whose writes never complete.
#[derive(Default)]
pub struct BrokenSheet {
    pub sheet: MemorySheet,
    failures_left: AtomicU32,
    hang: bool,
}

impl BrokenSheet {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl TabularSink for BrokenSheet {
    async fn read_values(&self, sheet_id: &str, range: &str) -> counterscan::Result<Vec<Vec<Value>>> {
        self.sheet.read_values(sheet_id, range).await
    }

    async fn update_values(
        &self,
        sheet_id: &str,
        range: &str,
        rows: Vec<Vec<Value>>,
    ) -> counterscan::Result<()> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Sink("quota exceeded".to_string()));
        }
        self.sheet.update_values(sheet_id, range, rows).await
    }
}

/// Reader that fails on crops of one width and reads `value` everywhere else.
pub struct FailingReader {
    pub failing_width: u32,
    pub value: &'static str,
}

impl RegionReader for FailingReader {
    fn read(&self, crop: &DynamicImage) -> counterscan::Result<Option<String>> {
        if crop.width() == self.failing_width {
            return Err(Error::Validation("OCR failed: engine error".to_string()));
        }
        Ok(Some(self.value.to_string()))
    }
}

/// A white PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgb([255u8, 255u8, 255u8]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("Failed to encode test image");
    bytes
}

pub fn white_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([255u8, 255u8, 255u8])))
}

/// Registry over a fresh temporary model directory.
/// Returns both the registry and the temp directory (which must be kept alive).
pub fn create_test_registry() -> (Arc<ModelRegistry>, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let storage = Arc::new(FsModelStorage::new(dir.path()).expect("Failed to create model storage"));
    let registry = ModelRegistry::empty(storage, Arc::new(ScriptedLoader));
    (Arc::new(registry), dir)
}

/// Store a scripted model under `name` and load it.
pub fn add_scripted_model(registry: &ModelRegistry, name: &str, detections: &[(&str, [i32; 4])]) {
    registry
        .storage()
        .write(name, &script(detections))
        .expect("Failed to store model");
    registry.add(name).expect("Failed to load model");
}

/// Everything an ingestion test needs, rooted in one temp directory.
pub struct TestEnv {
    pub dir: TempDir,
    pub db: Arc<CounterDb>,
    pub registry: Arc<ModelRegistry>,
    pub catalog: ModelCatalog<CounterDb>,
}

impl TestEnv {
    pub async fn new() -> TestEnv {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let storage = Arc::new(
            FsModelStorage::new(dir.path().join("models")).expect("Failed to create model storage"),
        );
        let registry = Arc::new(ModelRegistry::empty(storage, Arc::new(ScriptedLoader)));
        let db = Arc::new(CounterDb::in_memory().await.expect("Failed to open database"));
        let catalog = ModelCatalog::new(db.clone(), registry.clone());
        TestEnv {
            dir,
            db,
            registry,
            catalog,
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn pipeline(&self, reader: Arc<WidthReader>) -> ExtractionPipeline {
        ExtractionPipeline::new(self.registry.clone(), reader)
    }

    pub fn uploads_left(&self) -> usize {
        std::fs::read_dir(self.upload_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
