pub mod assets;
pub mod config;
pub mod core;
pub mod detection;
pub mod error;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod sink;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use ingest::{IngestRequest, IngestionWorkflow, WorkerSettings, WorkerStats};
pub use models::{BoundingBox, DataRecord, ExtractionResult, OcrModelRecord};
pub use pipeline::ExtractionPipeline;
