use std::sync::Arc;

use image::RgbImage;
use rten::Model;
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;
use tracing::debug;

use crate::error::{Error, Result};

/// Coordinate frame a model reports its boxes in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateSpace {
    /// Fractions of the image size in `[0, 1]`
    Normalized,
    /// Pixels of the resized model input
    InputFrame,
    /// Pixels of the original image
    Original,
}

/// One box as emitted by a model, before mapping back to the original image.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub label: String,
    pub score: f32,
    /// `[x1, y1, x2, y2]` in the model's [`CoordinateSpace`]
    pub corners: [f32; 4],
}

/// A loaded detector. Implementations must be usable from several threads at once.
pub trait DetectionModel: Send + Sync {
    /// `(width, height)` the input image is resized to before inference.
    fn input_size(&self) -> (u32, u32);

    fn coordinate_space(&self) -> CoordinateSpace;

    /// Run inference on an image already resized to [`DetectionModel::input_size`].
    fn infer(&self, input: &RgbImage) -> Result<Vec<RawDetection>>;
}

/// Turns stored model bytes into a usable [`DetectionModel`].
pub trait ModelLoader: Send + Sync {
    fn load(&self, name: &str, bytes: Vec<u8>, labels: Vec<String>) -> Result<Arc<dyn DetectionModel>>;
}

#[derive(Debug, Clone)]
pub struct YoloParams {
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 800,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 100,
        }
    }
}

/// YOLO-style detector running on the `rten` runtime.
///
/// Expects a single `[1, 3, H, W]` float input scaled to `[0, 1]` and a single
/// `[1, 4 + classes, N]` output of center-x, center-y, width, height and class scores.
pub struct RtenDetectionModel {
    model: Model,
    labels: Vec<String>,
    params: YoloParams,
}

impl RtenDetectionModel {
    pub fn new(model: Model, labels: Vec<String>, params: YoloParams) -> Self {
        Self {
            model,
            labels,
            params,
        }
    }

    fn label_for(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

impl DetectionModel for RtenDetectionModel {
    fn input_size(&self) -> (u32, u32) {
        (self.params.input_size, self.params.input_size)
    }

    fn coordinate_space(&self) -> CoordinateSpace {
        CoordinateSpace::InputFrame
    }

    fn infer(&self, input: &RgbImage) -> Result<Vec<RawDetection>> {
        let (width, height) = input.dimensions();
        let mut tensor = NdTensor::<f32, 4>::zeros([1, 3, height as usize, width as usize]);
        for (x, y, pixel) in input.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }

        let output: NdTensor<f32, 3> = self
            .model
            .run_one(tensor.view().into(), None)
            .map_err(|e| Error::Validation(format!("detector inference failed: {e:?}")))?
            .try_into()
            .map_err(|e| Error::Validation(format!("unexpected detector output: {e:?}")))?;

        let [_, rows, count] = output.shape();
        let data = output.to_vec();
        let detections = decode_predictions(&data, rows, count, &self.params);
        debug!(candidates = count, kept = detections.len(), "decoded detector output");

        Ok(detections
            .into_iter()
            .map(|(class_id, score, corners)| RawDetection {
                label: self.label_for(class_id),
                score,
                corners,
            })
            .collect())
    }
}

/// Decode a row-major `[4 + classes, count]` prediction block into
/// `(class_id, score, [x1, y1, x2, y2])`, applying the confidence threshold
/// and per-class non-maximum suppression.
pub fn decode_predictions(
    data: &[f32],
    rows: usize,
    count: usize,
    params: &YoloParams,
) -> Vec<(usize, f32, [f32; 4])> {
    if rows <= 4 || data.len() < rows * count {
        return Vec::new();
    }
    let at = |row: usize, i: usize| data[row * count + i];

    let mut candidates = Vec::new();
    for i in 0..count {
        let (class_id, score) = (4..rows)
            .map(|row| (row - 4, at(row, i)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < params.conf_threshold {
            continue;
        }
        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        let corners = [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0];
        candidates.push((class_id, score, corners));
    }

    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut kept: Vec<(usize, f32, [f32; 4])> = Vec::new();
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.0 == candidate.0 && iou(&k.2, &candidate.2) > params.iou_threshold);
        if !suppressed {
            kept.push(candidate);
            if kept.len() >= params.max_detections {
                break;
            }
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Loads `.rten` files as [`RtenDetectionModel`]s.
#[derive(Debug, Clone, Default)]
pub struct RtenModelLoader {
    pub params: YoloParams,
}

impl RtenModelLoader {
    pub fn new(params: YoloParams) -> Self {
        Self { params }
    }
}

impl ModelLoader for RtenModelLoader {
    fn load(&self, name: &str, bytes: Vec<u8>, labels: Vec<String>) -> Result<Arc<dyn DetectionModel>> {
        let model = Model::load(bytes).map_err(|e| Error::load(name, format!("{e:?}")))?;
        Ok(Arc::new(RtenDetectionModel::new(model, labels, self.params.clone())))
    }
}
