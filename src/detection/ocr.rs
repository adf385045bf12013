use std::path::{Path, PathBuf};

use image::DynamicImage;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use tracing::{debug, trace};

use crate::detection::preprocessing;
use crate::error::{Error, Result};

/// Characters a region reading may consist of
pub const DIGITS: &str = "0123456789";

/// Reads the digits shown in a cropped display region.
pub trait RegionReader: Send + Sync {
    /// `Ok(None)` means nothing legible was found; a returned string is never empty
    /// and contains only [`DIGITS`].
    fn read(&self, crop: &DynamicImage) -> Result<Option<String>>;
}

/// First whitespace-separated token made only of digits.
pub fn first_digit_token(text: &str) -> Option<String> {
    text.split_whitespace()
        .find(|token| token.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

/// Default location of the `ocrs` models, `~/.cache/ocrs`
pub fn default_model_dir() -> Option<PathBuf> {
    let home_dir = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()?;
    Some(Path::new(&home_dir).join(".cache/ocrs"))
}

/// [`RegionReader`] backed by the `ocrs` engine, restricted to digits.
pub struct OcrsReader {
    engine: OcrEngine,
    preprocess: bool,
}

impl OcrsReader {
    /// Load `text-detection.rten` and `text-recognition.rten` from `model_dir`.
    pub fn from_dir<P: AsRef<Path>>(model_dir: P, preprocess: bool) -> Result<Self> {
        let model_dir = model_dir.as_ref();
        let detection_model_path = model_dir.join("text-detection.rten");
        let recognition_model_path = model_dir.join("text-recognition.rten");

        for path in [&detection_model_path, &recognition_model_path] {
            if !path.exists() {
                return Err(Error::load(
                    path.display().to_string(),
                    "OCR model not found (download the ocrs models into this directory)",
                ));
            }
        }

        let detection_model = Model::load_file(&detection_model_path)
            .map_err(|e| Error::load(detection_model_path.display().to_string(), format!("{e:?}")))?;
        let recognition_model = Model::load_file(&recognition_model_path)
            .map_err(|e| Error::load(recognition_model_path.display().to_string(), format!("{e:?}")))?;

        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            allowed_chars: Some(DIGITS.to_string()),
            ..Default::default()
        })
        .map_err(|e| Error::load("ocrs engine", format!("{e:?}")))?;

        debug!(dir = %model_dir.display(), preprocess, "OCR engine initialized");
        Ok(Self { engine, preprocess })
    }
}

impl RegionReader for OcrsReader {
    fn read(&self, crop: &DynamicImage) -> Result<Option<String>> {
        let prepared = if self.preprocess {
            preprocessing::prepare_for_ocr(crop)
        } else {
            crop.clone()
        };
        let img = prepared.to_rgb8();

        let img_source = ImageSource::from_bytes(img.as_raw(), img.dimensions())
            .map_err(|e| Error::Validation(format!("crop not usable for OCR: {e:?}")))?;
        let ocr_input = self
            .engine
            .prepare_input(img_source)
            .map_err(|e| Error::Validation(format!("failed to prepare OCR input: {e:?}")))?;
        let text = self
            .engine
            .get_text(&ocr_input)
            .map_err(|e| Error::Validation(format!("OCR failed: {e:?}")))?;

        trace!(raw = %text.trim(), "OCR output");
        Ok(first_digit_token(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_digit_token_skips_invalid_tokens() {
        assert_eq!(first_digit_token("12a 0087\n55"), Some("0087".to_string()));
    }

    #[test]
    fn blank_or_non_digit_text_is_none() {
        assert_eq!(first_digit_token(""), None);
        assert_eq!(first_digit_token("  \n "), None);
        assert_eq!(first_digit_token("abc 1.5"), None);
    }
}
