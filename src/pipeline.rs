use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::core::registry::ModelRegistry;
use crate::detection::RegionDetector;
use crate::detection::ocr::RegionReader;
use crate::detection::preprocessing;
use crate::error::Result;
use crate::models::{BoundingBox, ExtractionResult};

/// Pixels added below each detected box before reading it
pub const DEFAULT_CROP_MARGIN: u32 = 10;

/// Detection + reading + default filling.
///
/// The result always holds exactly the expected labels: labels without a usable reading keep
/// the default value (a reader error counts as no reading), and detections for labels nobody asked for are ignored. When a model
/// reports the same label twice, the later detection wins.
#[derive(Clone)]
pub struct ExtractionPipeline {
    registry: Arc<ModelRegistry>,
    detector: RegionDetector,
    reader: Arc<dyn RegionReader>,
    crop_margin: u32,
}

impl ExtractionPipeline {
    pub fn new(registry: Arc<ModelRegistry>, reader: Arc<dyn RegionReader>) -> Self {
        Self {
            registry,
            detector: RegionDetector::new(),
            reader,
            crop_margin: DEFAULT_CROP_MARGIN,
        }
    }

    pub fn with_crop_margin(mut self, crop_margin: u32) -> Self {
        self.crop_margin = crop_margin;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Read every expected label from `img` using the model registered as `model_name`.
    pub fn extract<S: AsRef<str>>(
        &self,
        img: &DynamicImage,
        model_name: &str,
        expected_labels: &[S],
    ) -> Result<ExtractionResult> {
        let model = self.registry.get(model_name)?;
        let boxes = self.detector.detect(img, model.as_ref())?;

        let mut results = ExtractionResult::with_defaults(expected_labels);
        for bbox in last_per_label(&boxes) {
            if !results.contains(&bbox.label) {
                debug!(label = %bbox.label, model = %model_name, "ignoring detection for unexpected label");
                continue;
            }

            let crop = preprocessing::crop_region(img, bbox, self.crop_margin);
            match self.reader.read(&crop) {
                Ok(Some(text)) => results.insert(bbox.label.clone(), text),
                Ok(None) => info!(label = %bbox.label, "no text detected, keeping default"),
                Err(e) => warn!(label = %bbox.label, error = %e, "reading failed, keeping default"),
            }
        }

        info!(
            model = %model_name,
            detections = boxes.len(),
            results = ?results,
            "extraction finished"
        );
        Ok(results)
    }
}

/// Keep only the last box reported for each label, in detection order.
fn last_per_label(boxes: &[BoundingBox]) -> Vec<&BoundingBox> {
    boxes
        .iter()
        .enumerate()
        .filter(|(i, bbox)| !boxes[i + 1..].iter().any(|later| later.label == bbox.label))
        .map(|(_, bbox)| bbox)
        .collect()
}
