//! Runtime configuration, read from `COUNTERSCAN_*` environment variables

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::detection::model::YoloParams;
use crate::detection::ocr;
use crate::error::{Error, Result};
use crate::pipeline::DEFAULT_CROP_MARGIN;
use crate::sink::DEFAULT_SHEETS_API;

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub model_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub database_path: PathBuf,
    pub ocr: OcrConfig,
    pub detection: YoloParams,
    pub crop_margin: u32,
    pub assets: Option<AssetConfig>,
    pub sheets: Option<SheetsConfig>,
    pub remote_timeout: Duration,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Directory holding `text-detection.rten` and `text-recognition.rten`
    pub model_dir: PathBuf,
    pub preprocess: bool,
}

/// Credentials for the image host.
#[derive(Debug, Clone)]
pub struct AssetConfig {
    pub api_base: String,
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub api_base: String,
    pub token: String,
    /// JSON file mapping counter ids to sheet layouts
    pub layout_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_dir(PathBuf::from("data"))
    }
}

impl Config {
    /// Defaults with every local path placed under `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Config {
            model_dir: data_dir.join("models"),
            upload_dir: data_dir.join("uploads"),
            database_path: data_dir.join("counterscan.db"),
            data_dir,
            ocr: OcrConfig {
                model_dir: ocr::default_model_dir().unwrap_or_else(|| PathBuf::from("ocrs")),
                preprocess: true,
            },
            detection: YoloParams::default(),
            crop_margin: DEFAULT_CROP_MARGIN,
            assets: None,
            sheets: None,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Read configuration from the environment, after loading a `.env` file if one exists.
    ///
    /// The asset host and the sheets sink are only configured when all of their
    /// variables are present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let data_dir = var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data"));
        let mut config = Self::with_data_dir(data_dir);

        if let Some(dir) = var("MODEL_DIR") {
            config.model_dir = dir.into();
        }
        if let Some(dir) = var("UPLOAD_DIR") {
            config.upload_dir = dir.into();
        }
        if let Some(path) = var("DATABASE") {
            config.database_path = path.into();
        }
        if let Some(dir) = var("OCR_MODEL_DIR") {
            config.ocr.model_dir = dir.into();
        }
        if let Some(flag) = parsed::<bool>("OCR_PREPROCESS")? {
            config.ocr.preprocess = flag;
        }
        if let Some(size) = parsed("INPUT_SIZE")? {
            config.detection.input_size = size;
        }
        if let Some(threshold) = parsed("CONF_THRESHOLD")? {
            config.detection.conf_threshold = threshold;
        }
        if let Some(threshold) = parsed("IOU_THRESHOLD")? {
            config.detection.iou_threshold = threshold;
        }
        if let Some(max) = parsed("MAX_DETECTIONS")? {
            config.detection.max_detections = max;
        }
        if let Some(margin) = parsed("CROP_MARGIN")? {
            config.crop_margin = margin;
        }
        if let Some(secs) = parsed::<u64>("REMOTE_TIMEOUT_SECS")? {
            config.remote_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = parsed::<usize>("QUEUE_CAPACITY")? {
            config.queue_capacity = capacity.max(1);
        }

        config.assets = match (var("CLOUD_NAME"), var("CLOUD_API_KEY"), var("CLOUD_API_SECRET")) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(AssetConfig {
                api_base: var("CLOUD_API_BASE")
                    .unwrap_or_else(|| "https://api.cloudinary.com".to_string()),
                cloud_name,
                api_key,
                api_secret,
            }),
            _ => None,
        };

        config.sheets = match (var("SHEETS_TOKEN"), var("SHEET_LAYOUTS")) {
            (Some(token), Some(layout_path)) => Some(SheetsConfig {
                api_base: var("SHEETS_API_BASE").unwrap_or_else(|| DEFAULT_SHEETS_API.to_string()),
                token,
                layout_path: layout_path.into(),
            }),
            _ => None,
        };

        Ok(config)
    }
}

fn var(suffix: &str) -> Option<String> {
    env::var(format!("COUNTERSCAN_{suffix}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn parsed<T>(suffix: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(suffix).map(|raw| parse_value(suffix, &raw)).transpose()
}

/// Parse the raw value of `COUNTERSCAN_{suffix}`, ignoring surrounding whitespace.
fn parse_value<T>(suffix: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Validation(format!("COUNTERSCAN_{suffix}={raw}: {e}")))
}
