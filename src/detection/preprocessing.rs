use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::distance_transform::Norm;
use imageproc::morphology::open;

use crate::models::BoundingBox;

/// Crops narrower than this are upscaled before recognition
const MIN_OCR_HEIGHT: u32 = 48;

/// Resize the full image to the model's fixed input size.
pub fn resize_for_detection(img: &DynamicImage, width: u32, height: u32) -> RgbImage {
    imageops::resize(&img.to_rgb8(), width.max(1), height.max(1), FilterType::Triangle)
}

/// Cut a detected region out of the image, extending its lower edge by `margin`
/// pixels so descenders are not clipped. The result never leaves the image.
pub fn crop_region(img: &DynamicImage, bbox: &BoundingBox, margin: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    let x1 = bbox.x1.min(width.saturating_sub(1));
    let y1 = bbox.y1.min(height.saturating_sub(1));
    let x2 = bbox.x2.clamp(x1 + 1, width);
    let y2 = bbox.y2.saturating_add(margin).clamp(y1 + 1, height);
    img.crop_imm(x1, y1, x2 - x1, y2 - y1)
}

/// Convert image to grayscale
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Normalize a crop for digit recognition: dark digits on a light background,
/// equalized contrast, segment gaps bridged, and a minimum height.
pub fn prepare_for_ocr(crop: &DynamicImage) -> DynamicImage {
    let mut gray = to_grayscale(crop);
    if gray.width() == 0 || gray.height() == 0 {
        return DynamicImage::ImageLuma8(gray);
    }

    // Lit displays show light digits on a dark panel
    if mean_brightness(&gray) < 128.0 {
        imageops::invert(&mut gray);
    }

    let equalized = equalize_histogram(&gray);
    // Opening removes thin light gaps, joining the segments of seven-segment digits
    let bridged = open(&equalized, Norm::LInf, 1);

    let (w, h) = bridged.dimensions();
    if h >= MIN_OCR_HEIGHT {
        return DynamicImage::ImageLuma8(bridged);
    }
    let scale = MIN_OCR_HEIGHT as f32 / h as f32;
    let scaled_w = ((w as f32 * scale).round() as u32).max(1);
    DynamicImage::ImageLuma8(imageops::resize(
        &bridged,
        scaled_w,
        MIN_OCR_HEIGHT,
        FilterType::CatmullRom,
    ))
}

fn mean_brightness(gray: &GrayImage) -> f32 {
    let total: u64 = gray.pixels().map(|p| p[0] as u64).sum();
    total as f32 / (gray.width() as u64 * gray.height() as u64) as f32
}
