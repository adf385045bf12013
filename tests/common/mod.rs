mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from counterscan for tests
pub use counterscan::core::db::{CounterDb, DocumentStore};
pub use counterscan::core::{FsModelStorage, ModelCatalog, ModelRegistry, ModelStorage};
pub use counterscan::models::{DataRecord, DataRecordFilter, DataRecordPatch, OcrModelRecord};
pub use counterscan::{ErrorKind, ExtractionPipeline, ExtractionResult};
