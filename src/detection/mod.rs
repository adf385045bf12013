pub mod model;
pub mod ocr;
pub mod preprocessing;

use image::{DynamicImage, GenericImageView};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::BoundingBox;
use model::{CoordinateSpace, DetectionModel};

/// Runs a detection model on a full image and reports boxes in original pixel space.
#[derive(Debug, Clone, Default)]
pub struct RegionDetector;

impl RegionDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect labeled regions. Boxes come back in the model's emission order, clamped to
    /// the image; duplicates of a label are kept for the caller to resolve.
    pub fn detect(&self, img: &DynamicImage, model: &dyn DetectionModel) -> Result<Vec<BoundingBox>> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::Validation("image has no pixels".to_string()));
        }

        let (input_w, input_h) = model.input_size();
        let input = preprocessing::resize_for_detection(img, input_w, input_h);
        let raw = model.infer(&input)?;

        let space = model.coordinate_space();
        let boxes: Vec<BoundingBox> = raw
            .into_iter()
            .map(|det| {
                let corners = to_original_space(det.corners, space, (width, height), (input_w, input_h));
                BoundingBox::clamped(det.label, corners, width, height)
            })
            .collect();

        debug!(
            count = boxes.len(),
            labels = ?boxes.iter().map(|b| b.label.as_str()).collect::<Vec<_>>(),
            "detected regions"
        );
        Ok(boxes)
    }
}

/// Map `[x1, y1, x2, y2]` from the model's frame into original image pixels.
pub fn to_original_space(
    corners: [f32; 4],
    space: CoordinateSpace,
    original: (u32, u32),
    input: (u32, u32),
) -> [f32; 4] {
    let (sx, sy) = match space {
        CoordinateSpace::Normalized => (original.0 as f32, original.1 as f32),
        CoordinateSpace::InputFrame => (
            original.0 as f32 / input.0.max(1) as f32,
            original.1 as f32 / input.1.max(1) as f32,
        ),
        CoordinateSpace::Original => (1.0, 1.0),
    };
    let [x1, y1, x2, y2] = corners;
    [x1 * sx, y1 * sy, x2 * sx, y2 * sy]
}
