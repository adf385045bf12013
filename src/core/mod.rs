pub mod catalog;
pub mod db;
pub mod registry;
pub mod storage;

pub use catalog::ModelCatalog;
pub use db::{CounterDb, DocumentStore};
pub use registry::ModelRegistry;
pub use storage::{FsModelStorage, ModelStorage};

use crate::error::{Error, Result};

/// Run blocking work (file IO, model loading, inference) off the async workers.
/// Panics inside `f` are resumed on the caller.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(Error::Storage(format!("blocking task cancelled: {e}"))),
    }
}
